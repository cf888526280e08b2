use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::cli::Cli;
use crate::weights::MatcherConfig;

pub fn resolve_db_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.db.clone() {
        return Ok(p);
    }

    Ok(class_mapper_home()?.join("cache.lmdb"))
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "db")?;
    remove_file_if_exists(&lmdb_lock_path(db_path), "db lock")?;
    Ok(())
}

/// Reads a `{"deobfuscated": "obfuscated"}` table. Empty values are
/// rejected; obfuscated names claimed by several entries are logged.
pub fn load_anchors(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read anchor table: {}", path.display()))?;
    let anchors: BTreeMap<String, String> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse anchor table: {}", path.display()))?;
    if let Some((deob, _)) = anchors.iter().find(|(k, v)| k.trim().is_empty() || v.trim().is_empty()) {
        bail!(
            "Anchor table {} has an empty entry for `{deob}`",
            path.display()
        );
    }
    for (obf, deob) in shared_obfuscated_names(&anchors) {
        warn!(
            table = %path.display(),
            obfuscated = %obf,
            claimed_by = %deob.join(", "),
            "anchor table maps several classes to one obfuscated name; reverse lookups use the last"
        );
    }
    Ok(anchors)
}

/// Obfuscated names that more than one anchor entry maps to, with their
/// deobfuscated names in table order.
pub fn shared_obfuscated_names(anchors: &BTreeMap<String, String>) -> Vec<(&str, Vec<&str>)> {
    let mut by_obf: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (deob, obf) in anchors {
        by_obf.entry(obf.as_str()).or_default().push(deob.as_str());
    }
    by_obf.into_iter().filter(|(_, deob)| deob.len() > 1).collect()
}

pub fn load_matcher_config(path: Option<&Path>) -> Result<MatcherConfig> {
    let Some(path) = path else {
        return Ok(MatcherConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read matcher config: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse matcher config: {}", path.display()))
}

fn class_mapper_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("class-mapper"))
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}
