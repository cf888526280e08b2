//! Fail-fast parallel ingestion: a fixed pool of workers turns artifact
//! files into [`ClassStructure`] records.
//!
//! The first failure anywhere cancels dispatch and the whole run returns
//! that error; results gathered so far are dropped.

use anyhow::{Context, Result};
use crossbeam::channel::{bounded, unbounded};
use crossbeam::select;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::model::ClassStructure;
use crate::progress::ProgressTracker;

/// Turns one artifact file into a class record.
pub trait ClassStructureProvider: Send + Sync {
    /// Stable identifier of the extractor and its output format; part of
    /// the cache key.
    fn kind(&self) -> &'static str;

    fn accepts(&self, path: &Path) -> bool;

    fn parse(&self, path: &Path, content: &[u8]) -> Result<ClassStructure>;

    fn parse_file(&self, path: &Path) -> Result<ClassStructure> {
        let content =
            std::fs::read(path).with_context(|| format!("Failed to read: {}", path.display()))?;
        self.parse(path, &content)
    }
}

/// Counting semaphore. Permits go back on drop, so a parse that fails or
/// panics still releases its slot.
pub struct Semaphore {
    available: Mutex<usize>,
    released: Condvar,
}

pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            available: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        Permit { semaphore: self }
    }

    pub fn available(&self) -> usize {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut available = self
            .semaphore
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.semaphore.released.notify_one();
    }
}

/// Available parallelism minus one, never below one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Parses every path with `provider` on `workers` threads (`0` picks
/// [`default_workers`]). Records come back in no particular order.
pub fn parse_all_parallel<P>(
    paths: &[PathBuf],
    provider: &P,
    workers: usize,
    progress: Option<&ProgressTracker>,
) -> Result<Vec<ClassStructure>, IngestError>
where
    P: ClassStructureProvider + ?Sized,
{
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    let workers = if workers == 0 { default_workers() } else { workers };
    let workers = workers.min(paths.len());
    debug!(files = paths.len(), workers, kind = provider.kind(), "ingestion started");

    let (job_tx, job_rx) = bounded::<&Path>(workers * 2);
    let (result_tx, result_rx) = unbounded::<ClassStructure>();
    let (error_tx, error_rx) = unbounded::<IngestError>();
    let cancelled = AtomicBool::new(false);
    let semaphore = Semaphore::new(workers);

    let outcome = std::thread::scope(|scope| {
        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let error_tx = error_tx.clone();
            let cancelled = &cancelled;
            let semaphore = &semaphore;
            scope.spawn(move || {
                for path in job_rx.iter() {
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    let _permit = semaphore.acquire();
                    let started = Instant::now();
                    match provider.parse_file(path) {
                        Ok(class) => {
                            if let Some(p) = progress {
                                p.record_success(worker_id, started.elapsed());
                            }
                            if result_tx.send(class).is_err() {
                                break;
                            }
                        }
                        Err(cause) => {
                            if let Some(p) = progress {
                                p.record_failure(worker_id, started.elapsed());
                            }
                            cancelled.store(true, Ordering::Release);
                            let _ = error_tx.send(IngestError::Worker {
                                worker_id,
                                path: path.to_path_buf(),
                                cause,
                            });
                            break;
                        }
                    }
                }
            });
        }
        // Only the workers hold these now; the channels disconnect once
        // every worker has exited.
        drop(job_rx);
        drop(result_tx);
        drop(error_tx);

        let mut failure = None;
        for path in paths {
            select! {
                send(job_tx, path.as_path()) -> sent => {
                    if sent.is_err() {
                        break;
                    }
                }
                recv(error_rx) -> err => {
                    if let Ok(err) = err {
                        failure = Some(err);
                    }
                    break;
                }
            }
        }
        drop(job_tx);

        let mut results = Vec::with_capacity(paths.len());
        if failure.is_none() {
            loop {
                select! {
                    recv(result_rx) -> class => match class {
                        Ok(class) => results.push(class),
                        Err(_) => break,
                    },
                    recv(error_rx) -> err => {
                        if let Ok(err) = err {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }
        }
        // Errors are sent before a worker drops its result sender.
        if failure.is_none() {
            failure = error_rx.try_recv().ok();
        }

        match failure {
            Some(err) => {
                cancelled.store(true, Ordering::Release);
                Err(err)
            }
            None => Ok(results),
        }
    });

    if let Some(p) = progress {
        p.finish();
    }
    match &outcome {
        Ok(results) => debug!(records = results.len(), "ingestion finished"),
        Err(err) => warn!("ingestion aborted: {err}"),
    }
    outcome
}
