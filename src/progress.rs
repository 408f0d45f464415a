//! # Progress Reporting
//!
//! Conversions publish coarse progress into a shared [`ProgressState`] that the caller polls.
//! Counters only ever move forward. A cancel request is honoured between blocks, never in the
//! middle of one.

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::error::{ConvertError, Result};

/// Phases a conversion moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Stage {
    Init = 0,
    Histogram = 1,
    PaletteOptimize = 2,
    PerBlockMatch = 3,
    Deduplicate = 4,
    Encode = 5,
    Done = 6,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Histogram => "histogram",
            Stage::PaletteOptimize => "palette_optimize",
            Stage::PerBlockMatch => "per_block_match",
            Stage::Deduplicate => "deduplicate",
            Stage::Encode => "encode",
            Stage::Done => "done",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Stage::Init,
            1 => Stage::Histogram,
            2 => Stage::PaletteOptimize,
            3 => Stage::PerBlockMatch,
            4 => Stage::Deduplicate,
            5 => Stage::Encode,
            _ => Stage::Done,
        }
    }
}

#[derive(Debug, Default)]
pub struct ProgressState {
    current: AtomicUsize,
    max: AtomicUsize,
    stage: AtomicU8,
    cancelled: AtomicBool,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_max(&self, max: usize) {
        self.max.fetch_max(max, Ordering::Relaxed);
    }

    pub fn advance(&self, amount: usize) {
        self.current.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::Relaxed)
    }

    /// Stages never move backwards.
    pub fn set_stage(&self, stage: Stage) {
        self.stage.fetch_max(stage as u8, Ordering::Relaxed);
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Relaxed))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check_cancel(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Write a JSON progress snapshot for an external poller. Failures are logged and ignored.
pub fn write_progress(path: &Path, current: usize, total: usize, phase: &str, status: &str) {
    let json = json!({
        "current": current,
        "total": total,
        "phase": phase,
        "status": status,
    });
    if let Err(e) = fs::write(path, json.to_string()) {
        warn!("could not write progress to {}: {}", path.display(), e);
    }
}

/// A conversion running on its own worker thread.
pub struct ConversionTask<T> {
    progress: Arc<ProgressState>,
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> ConversionTask<T> {
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce(&ProgressState) -> Result<T> + Send + 'static,
    {
        let progress = Arc::new(ProgressState::new());
        let shared = Arc::clone(&progress);
        let handle = thread::spawn(move || work(&shared));
        Self { progress, handle }
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<T> {
        self.handle
            .join()
            .map_err(|_| ConvertError::WorkerPanicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_max_are_monotonic() {
        let p = ProgressState::new();
        p.set_stage(Stage::Deduplicate);
        p.set_stage(Stage::Histogram);
        assert_eq!(p.stage(), Stage::Deduplicate);
        p.set_max(10);
        p.set_max(4);
        assert_eq!(p.max(), 10);
    }

    #[test]
    fn cancel_surfaces_as_error() {
        let p = ProgressState::new();
        assert!(p.check_cancel().is_ok());
        p.cancel();
        assert!(matches!(p.check_cancel(), Err(ConvertError::Cancelled)));
    }

    #[test]
    fn task_reports_result_and_progress() {
        let task = ConversionTask::spawn(|progress| {
            progress.set_max(3);
            for _ in 0..3 {
                progress.check_cancel()?;
                progress.advance(1);
            }
            Ok(42)
        });
        let shared = Arc::clone(&task.progress);
        assert_eq!(task.join().unwrap(), 42);
        assert_eq!(shared.current(), 3);
        assert_eq!(shared.max(), 3);
    }

    #[test]
    fn snapshot_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        write_progress(&path, 3, 8, "encode", "running");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["current"], 3);
        assert_eq!(value["phase"], "encode");
    }
}
