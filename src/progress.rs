//! Progress aggregation for the ingestion pool.
//!
//! Workers only bump counters here; the tracker never feeds back into
//! scheduling. The terminal bar is hidden unless enabled and stderr is a
//! terminal.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const TEMPLATE: &str = "{spinner} {msg} {pos}/{len} files ({percent}%) - {per_sec} - {eta}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub failed: usize,
    pub busy: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / secs
    }
}

pub struct ProgressTracker {
    total: usize,
    processed: AtomicUsize,
    failed: AtomicUsize,
    workers: Mutex<Vec<WorkerStats>>,
    started: Instant,
    bar: ProgressBar,
}

impl ProgressTracker {
    pub fn new(total: usize, workers: usize, show: bool) -> Self {
        let bar = if show && std::io::stderr().is_terminal() {
            let bar = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar().template(TEMPLATE) {
                bar.set_style(style);
            }
            bar.set_message("extracting");
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            total,
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            workers: Mutex::new(vec![WorkerStats::default(); workers]),
            started: Instant::now(),
            bar,
        }
    }

    pub fn hidden(total: usize, workers: usize) -> Self {
        Self::new(total, workers, false)
    }

    pub fn record_success(&self, worker_id: usize, busy: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.update_worker(worker_id, busy, false);
        self.bar.inc(1);
    }

    pub fn record_failure(&self, worker_id: usize, busy: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.update_worker(worker_id, busy, true);
    }

    fn update_worker(&self, worker_id: usize, busy: Duration, failed: bool) {
        // A poisoned lock only loses per-worker detail.
        let Ok(mut workers) = self.workers.lock() else {
            return;
        };
        if worker_id >= workers.len() {
            workers.resize(worker_id + 1, WorkerStats::default());
        }
        let stats = &mut workers[worker_id];
        if failed {
            stats.failed += 1;
        } else {
            stats.processed += 1;
        }
        stats.busy += busy;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.workers
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
