//! Progress events emitted during a synchronization pass.
//!
//! The engine only emits events; rendering them (human text, JSON lines,
//! nothing) is up to the caller.

/// Phase of a synchronization pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncPhase {
    LoadingMirror,
    Planning,
    Writing,
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Full scan of the backing table has started.
    LoadingMirror { table: String, source: String },
    /// Mirror loaded; fetched records are being diffed against it.
    Planning {
        table: String,
        source: String,
        mirrored: u64,
        fetched: u64,
    },
    /// `done` of `total` write batches have been submitted.
    Writing {
        table: String,
        source: String,
        done: u64,
        total: u64,
    },
}

impl SyncProgressEvent {
    pub fn phase(&self) -> SyncPhase {
        match self {
            SyncProgressEvent::LoadingMirror { .. } => SyncPhase::LoadingMirror,
            SyncProgressEvent::Planning { .. } => SyncPhase::Planning,
            SyncProgressEvent::Writing { .. } => SyncPhase::Writing,
        }
    }
}

/// Receives progress events.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}
