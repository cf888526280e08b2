//! Persistent cache of extracted class records.
//!
//! Uses LMDB (via heed). Keys are `"{extractor-kind}:{sha256 of file bytes}"`,
//! so a changed file or a changed extractor never hits a stale record.
//! Values are the record serialized as JSON.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::ingest::ClassStructureProvider;
use crate::model::ClassStructure;

pub const STRUCTURES_DB: &str = "structures";

const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

type StrDb = Database<Str, Str>;

#[derive(Debug)]
pub struct PersistentCache {
    env: Arc<Env>,
    db_path: PathBuf,
    structures: StrDb,
}

impl PersistentCache {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }

        let env = Arc::new(open_env(&db_path)?);

        let mut wtxn = env.write_txn()?;
        let structures = env.create_database::<Str, Str>(&mut wtxn, Some(STRUCTURES_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            structures,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn get(&self, key: &str) -> Result<Option<ClassStructure>> {
        let rtxn = self.env.read_txn()?;
        let Some(raw) = self.structures.get(&rtxn, key)? else {
            return Ok(None);
        };
        let class = serde_json::from_str(raw)
            .with_context(|| format!("Corrupt cache entry: {key}"))?;
        Ok(Some(class))
    }

    pub fn put(&self, key: &str, class: &ClassStructure) -> Result<()> {
        let value = serde_json::to_string(class)?;
        let mut wtxn = self.env.write_txn()?;
        self.structures.put(&mut wtxn, key, &value)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let rtxn = self.env.read_txn()?;
        let mut entries = 0u64;
        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        for item in self.structures.iter(&rtxn)? {
            let (key, _) = item?;
            entries += 1;
            let kind = key.split_once(':').map(|(k, _)| k).unwrap_or(key);
            *by_kind.entry(kind.to_string()).or_default() += 1;
        }
        Ok(CacheStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            entries,
            by_kind,
        })
    }
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: We do not use NO_LOCK and keep default LMDB locking guarantees.
    // NO_SUB_DIR keeps the cache a single file at the --db path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open db env: {}", db_path.display()))
    }
}

pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

pub fn cache_key(kind: &str, content: &[u8]) -> String {
    format!("{kind}:{}", hash_content(content))
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub db_path: String,
    pub entries: u64,
    pub by_kind: BTreeMap<String, u64>,
}

/// Wraps a provider with the persistent cache. Lookup or store failures
/// are logged and fall through to plain extraction.
pub struct CachedProvider<'c, P> {
    inner: P,
    cache: &'c PersistentCache,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<'c, P: ClassStructureProvider> CachedProvider<'c, P> {
    pub fn new(inner: P, cache: &'c PersistentCache) -> Self {
        Self {
            inner,
            cache,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl<P: ClassStructureProvider> ClassStructureProvider for CachedProvider<'_, P> {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn accepts(&self, path: &Path) -> bool {
        self.inner.accepts(path)
    }

    fn parse(&self, path: &Path, content: &[u8]) -> Result<ClassStructure> {
        let key = cache_key(self.inner.kind(), content);
        match self.cache.get(&key) {
            Ok(Some(class)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path.display(), class = %class.name, "cache hit");
                return Ok(class);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), "cache lookup failed: {e:#}"),
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let class = self.inner.parse(path, content)?;
        debug!(path = %path.display(), class = %class.name, "cache miss");
        if let Err(e) = self.cache.put(&key, &class) {
            warn!(path = %path.display(), "cache store failed: {e:#}");
        }
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassSource;

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl ClassStructureProvider for CountingProvider {
        fn kind(&self) -> &'static str {
            "counting-v1"
        }

        fn accepts(&self, _path: &Path) -> bool {
            true
        }

        fn parse(&self, _path: &Path, content: &[u8]) -> Result<ClassStructure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = String::from_utf8_lossy(content).trim().to_string();
            Ok(ClassStructure::new(name, ClassSource::Obfuscated).with_field("int[]", "a"))
        }
    }

    #[test]
    fn key_depends_on_kind_and_content() {
        assert_eq!(cache_key("k", b"abc"), cache_key("k", b"abc"));
        assert_ne!(cache_key("k", b"abc"), cache_key("k", b"abd"));
        assert_ne!(cache_key("k", b"abc"), cache_key("j", b"abc"));
        assert!(cache_key("k", b"").starts_with("k:e3b0c442"));
    }

    #[test]
    fn put_then_get_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = PersistentCache::open(dir.path().join("cache.lmdb"))?;
        let class = ClassStructure::new("ab", ClassSource::Obfuscated)
            .with_superclass("cd")
            .with_method("void", "a", &["int"]);

        assert!(cache.get("x:1")?.is_none());
        cache.put("x:1", &class)?;
        assert_eq!(cache.get("x:1")?, Some(class));

        let stats = cache.stats()?;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.by_kind.get("x"), Some(&1));
        Ok(())
    }

    #[test]
    fn second_parse_of_unchanged_content_is_a_hit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = PersistentCache::open(dir.path().join("cache.lmdb"))?;
        let provider = CachedProvider::new(
            CountingProvider {
                calls: AtomicUsize::new(0),
            },
            &cache,
        );

        let first = provider.parse(Path::new("a.txt"), b"ab")?;
        let second = provider.parse(Path::new("b.txt"), b"ab")?;
        provider.parse(Path::new("c.txt"), b"cd")?;

        assert_eq!(first, second);
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.hits(), 1);
        assert_eq!(provider.misses(), 2);
        assert!((provider.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
        Ok(())
    }
}
