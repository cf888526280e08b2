//! Loads both sides of a mapping run: artifact discovery, (cached)
//! extraction, then restriction of reference graphs to project classes.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

use crate::bytecode::{BYTECODE_SUFFIX, BytecodeProvider};
use crate::cache::{CachedProvider, PersistentCache};
use crate::ingest::{ClassStructureProvider, default_workers, parse_all_parallel};
use crate::model::ClassStructure;
use crate::progress::ProgressTracker;
use crate::scan::scan_artifacts;
use crate::structure::SourceProvider;

pub const SOURCE_SUFFIX: &str = ".java";

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Obfuscated-side worker count; `0` picks a default.
    pub workers: usize,
    pub progress: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedClasses {
    pub deobfuscated: Vec<ClassStructure>,
    pub obfuscated: Vec<ClassStructure>,
}

/// Extracts every `.java` file under `dir` in parallel. Any failure fails
/// the whole side. Records are sorted by class name.
pub fn load_deobfuscated<P>(dir: &Path, provider: &P) -> Result<Vec<ClassStructure>>
where
    P: ClassStructureProvider + ?Sized,
{
    let paths = scan_artifacts(dir, SOURCE_SUFFIX)?;
    let mut classes = paths
        .par_iter()
        .map(|path| provider.parse_file(path))
        .collect::<Result<Vec<_>>>()
        .context("Failed to parse deobfuscated classes")?;
    classes.sort_by(|a, b| a.name.cmp(&b.name));
    info!(dir = %dir.display(), classes = classes.len(), "loaded deobfuscated classes");
    Ok(classes)
}

/// Extracts every disassembly listing under `dir` on the fail-fast worker
/// pool. Records are sorted by class name.
pub fn load_obfuscated<P>(dir: &Path, provider: &P, options: &LoadOptions) -> Result<Vec<ClassStructure>>
where
    P: ClassStructureProvider + ?Sized,
{
    let paths = scan_artifacts(dir, BYTECODE_SUFFIX)?;
    let workers = if options.workers == 0 { default_workers() } else { options.workers };
    let tracker = ProgressTracker::new(paths.len(), workers, options.progress);

    let parsed = parse_all_parallel(&paths, provider, workers, Some(&tracker));
    tracker.finish();
    let mut classes = parsed.context("Failed to parse obfuscated classes")?;

    classes.sort_by(|a, b| a.name.cmp(&b.name));
    let snap = tracker.snapshot();
    info!(
        dir = %dir.display(),
        classes = classes.len(),
        workers,
        rate = %format!("{:.1}/s", snap.rate()),
        "loaded obfuscated classes"
    );
    Ok(classes)
}

/// Restricts every reference graph to project classes (either side's
/// names) and anchor-table names. Obfuscated-side targets that are anchored
/// are renamed to their deobfuscated names so both sides share one
/// vocabulary.
pub fn filter_project_references(loaded: &mut LoadedClasses, anchors: &BTreeMap<String, String>) {
    let mut project: BTreeSet<String> = loaded
        .deobfuscated
        .iter()
        .chain(&loaded.obfuscated)
        .map(|c| c.name.clone())
        .collect();
    project.extend(anchors.keys().cloned());
    project.extend(anchors.values().cloned());

    let reverse: HashMap<&str, &str> = anchors
        .iter()
        .map(|(deob, obf)| (obf.as_str(), deob.as_str()))
        .collect();

    for class in loaded.deobfuscated.iter_mut() {
        if let Some(graph) = class.cross_references.as_mut() {
            *graph = graph.retain_targets(|target| project.contains(target));
        }
    }
    for class in loaded.obfuscated.iter_mut() {
        if let Some(graph) = class.cross_references.as_mut() {
            *graph = graph.remap_targets(|target| {
                project
                    .contains(target)
                    .then(|| reverse.get(target).copied().unwrap_or(target).to_string())
            });
        }
    }
}

/// Loads both sides with the stock extractors, through `cache` when given.
pub fn load_all(
    deob_dir: &Path,
    obf_dir: &Path,
    anchors: &BTreeMap<String, String>,
    cache: Option<&PersistentCache>,
    options: &LoadOptions,
) -> Result<LoadedClasses> {
    let mut loaded = match cache {
        Some(cache) => {
            let source = CachedProvider::new(SourceProvider, cache);
            let bytecode = CachedProvider::new(BytecodeProvider, cache);
            let deobfuscated = load_deobfuscated(deob_dir, &source)?;
            let obfuscated = load_obfuscated(obf_dir, &bytecode, options)?;
            info!(
                hits = source.hits() + bytecode.hits(),
                misses = source.misses() + bytecode.misses(),
                deobfuscated_hit_rate = %format!("{:.1}%", source.hit_rate() * 100.0),
                obfuscated_hit_rate = %format!("{:.1}%", bytecode.hit_rate() * 100.0),
                "cache summary"
            );
            LoadedClasses {
                deobfuscated,
                obfuscated,
            }
        }
        None => LoadedClasses {
            deobfuscated: load_deobfuscated(deob_dir, &SourceProvider)?,
            obfuscated: load_obfuscated(obf_dir, &BytecodeProvider, options)?,
        },
    };

    filter_project_references(&mut loaded, anchors);
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crossref::{CrossReferenceGraph, Reference, ReferenceKind};
    use crate::model::ClassSource;
    use crate::scorer::Scorer;
    use crate::weights::ScoringWeights;
    use std::fs;

    #[test]
    fn filtering_keeps_project_and_anchor_targets() {
        let graph = CrossReferenceGraph::from_references([
            ("run", Reference::new(ReferenceKind::MethodCall, "Model", "draw", 1)),
            ("run", Reference::new(ReferenceKind::MethodCall, "Widget", "draw", 2)),
            ("run", Reference::new(ReferenceKind::StaticCall, "Anchored", "get", 3)),
        ]);
        let mut loaded = LoadedClasses {
            deobfuscated: vec![
                ClassStructure::new("Scene", ClassSource::Deobfuscated).with_cross_references(graph),
                ClassStructure::new("Model", ClassSource::Deobfuscated),
            ],
            obfuscated: vec![],
        };
        let anchors = BTreeMap::from([("Anchored".to_string(), "zz".to_string())]);

        filter_project_references(&mut loaded, &anchors);
        let graph = loaded.deobfuscated[0].cross_references.as_ref().unwrap();
        assert_eq!(graph.total_references, 2);
        assert!(graph.unique_targets.contains_key("Model"));
        assert!(graph.unique_targets.contains_key("Anchored"));
        assert!(!graph.unique_targets.contains_key("Widget"));
    }

    #[test]
    fn anchored_obfuscated_targets_share_the_deobfuscated_vocabulary() -> Result<()> {
        let deob = tempfile::tempdir()?;
        let obf = tempfile::tempdir()?;
        fs::write(
            deob.path().join("Model.java"),
            "public class Model { public void render() {} public void update() {} }",
        )?;
        fs::write(
            deob.path().join("Scene.java"),
            "public class Scene {\n    private Model model;\n    public void draw() {\n        model.render();\n        model.update();\n    }\n}\n",
        )?;
        fs::write(
            obf.path().join("ab.bytecode.txt"),
            "public class ab {\n  public void a();\n  public void b();\n}\n",
        )?;
        fs::write(
            obf.path().join("gh.bytecode.txt"),
            "public class gh {\n  private ab a;\n  public void a();\n    Code:\n       0: aload_0\n       1: getfield      #2                  // Field a:Lab;\n       4: invokevirtual #3                  // Method ab.a:()V\n       7: aload_0\n       8: getfield      #2                  // Field a:Lab;\n      11: invokevirtual #4                  // Method ab.b:()V\n      14: return\n}\n",
        )?;
        let anchors = BTreeMap::from([("Model".to_string(), "ab".to_string())]);

        let loaded = load_all(deob.path(), obf.path(), &anchors, None, &LoadOptions::default())?;
        let scene = loaded.deobfuscated.iter().find(|c| c.name == "Scene").unwrap();
        let gh = loaded.obfuscated.iter().find(|c| c.name == "gh").unwrap();
        let scene_targets: Vec<&str> = scene.cross_references.as_ref().unwrap().targets().collect();
        let gh_targets: Vec<&str> = gh.cross_references.as_ref().unwrap().targets().collect();
        assert_eq!(scene_targets, vec!["Model"]);
        assert_eq!(gh_targets, vec!["Model"]);

        let weights = ScoringWeights::default();
        let breakdown = Scorer::new(&weights, &anchors).score(scene, gh);
        assert!(breakdown.crossref_similarity > 0.0);
        Ok(())
    }

    #[test]
    fn loads_both_sides_sorted_and_cached() -> Result<()> {
        let deob = tempfile::tempdir()?;
        let obf = tempfile::tempdir()?;
        fs::write(
            deob.path().join("Zone.java"),
            "public class Zone { private int id; public int getId() { return id; } }",
        )?;
        fs::write(
            deob.path().join("Actor.java"),
            "public class Actor { private Zone zone; public Zone getZone() { return zone; } }",
        )?;
        fs::write(
            obf.path().join("b.bytecode.txt"),
            "public class b {\n  private int a;\n  public int a();\n}\n",
        )?;
        fs::write(
            obf.path().join("a.bytecode.txt"),
            "public class a {\n  private b a;\n  public b a();\n}\n",
        )?;

        let db = tempfile::tempdir()?;
        let cache = PersistentCache::open(db.path().join("cache.lmdb"))?;
        let options = LoadOptions {
            workers: 2,
            progress: false,
        };
        let first = load_all(deob.path(), obf.path(), &BTreeMap::new(), Some(&cache), &options)?;
        let names: Vec<&str> = first.deobfuscated.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Actor", "Zone"]);
        let names: Vec<&str> = first.obfuscated.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(cache.stats()?.entries, 4);

        let second = load_all(deob.path(), obf.path(), &BTreeMap::new(), Some(&cache), &options)?;
        assert_eq!(first.deobfuscated, second.deobfuscated);
        assert_eq!(first.obfuscated, second.obfuscated);
        assert_eq!(cache.stats()?.entries, 4);
        Ok(())
    }

    #[test]
    fn a_broken_listing_fails_the_load() -> Result<()> {
        let deob = tempfile::tempdir()?;
        let obf = tempfile::tempdir()?;
        fs::write(deob.path().join("A.java"), "public class A {}")?;
        fs::write(obf.path().join("a.bytecode.txt"), "public class a {\n}\n")?;
        fs::write(obf.path().join("bad.bytecode.txt"), "not a listing\n")?;

        let err = load_all(deob.path(), obf.path(), &BTreeMap::new(), None, &LoadOptions::default())
            .unwrap_err();
        assert!(format!("{err:#}").contains("bad.bytecode.txt"));
        Ok(())
    }
}
