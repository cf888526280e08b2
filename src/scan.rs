use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::error::IngestError;

/// Collects the files directly inside `dir` whose name ends with `suffix`,
/// sorted by path. Subdirectories are not entered. An empty result is an
/// error.
pub fn scan_artifacts(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, IngestError> {
    std::fs::read_dir(dir).map_err(|source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                let matches = entry.file_type().is_some_and(|t| t.is_file())
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(suffix));
                if matches {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut paths: Vec<PathBuf> = rx.iter().collect();
    if paths.is_empty() {
        return Err(IngestError::NoArtifacts {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
        });
    }
    paths.sort();
    Ok(paths)
}
