//! Batched remote writer.
//!
//! Applies planned creates and updates in fixed-size batches, sequentially.
//! A failing batch is recorded and skipped; later batches still run. The
//! returned [`WriteReport`] lists exactly what landed, so callers never
//! have to assume full application.

use tracing::warn;

use crate::models::RecordUpdate;
use crate::plan::{CreateOp, UpdateOp};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::store::TableStore;

/// Default number of records per write call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Kind of write a batch carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

/// A batch the store rejected.
#[derive(Debug, Clone)]
pub struct FailedBatch {
    pub kind: WriteKind,
    pub identifiers: Vec<String>,
    pub error: String,
}

/// What a call to [`BatchWriter::apply`] actually achieved.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// Identifiers of rows created.
    pub created: Vec<String>,
    /// Identifiers of rows updated.
    pub updated: Vec<String>,
    pub failed: Vec<FailedBatch>,
}

impl WriteReport {
    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn modified_count(&self) -> usize {
        self.updated.len()
    }

    pub fn failed_records(&self) -> usize {
        self.failed.iter().map(|f| f.identifiers.len()).sum()
    }
}

/// Sequential batch writer.
#[derive(Debug, Clone, Copy)]
pub struct BatchWriter {
    batch_size: usize,
}

impl BatchWriter {
    /// A batch size of zero is treated as one.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of write calls `apply` will make.
    pub fn batch_count(&self, creates: usize, updates: usize) -> usize {
        creates.div_ceil(self.batch_size) + updates.div_ceil(self.batch_size)
    }

    /// Submit creates, then updates. Never fails as a whole.
    pub async fn apply(
        &self,
        store: &dyn TableStore,
        table: &str,
        source: &str,
        creates: &[CreateOp],
        updates: &[UpdateOp],
        progress: &dyn SyncProgressReporter,
    ) -> WriteReport {
        let mut report = WriteReport::default();
        let total = self.batch_count(creates.len(), updates.len()) as u64;
        let mut done = 0u64;

        for batch in creates.chunks(self.batch_size) {
            let fields: Vec<_> = batch.iter().map(|op| op.fields.clone()).collect();
            let identifiers: Vec<String> = batch.iter().map(|op| op.identifier.clone()).collect();
            match store.batch_create(table, &fields).await {
                Ok(_) => report.created.extend(identifiers),
                Err(e) => {
                    warn!(table, source, records = batch.len(), error = %e, "create batch failed");
                    report.failed.push(FailedBatch {
                        kind: WriteKind::Create,
                        identifiers,
                        error: format!("{:#}", e),
                    });
                }
            }
            done += 1;
            progress.report(SyncProgressEvent::Writing {
                table: table.to_string(),
                source: source.to_string(),
                done,
                total,
            });
        }

        for batch in updates.chunks(self.batch_size) {
            let patches: Vec<RecordUpdate> = batch
                .iter()
                .map(|op| RecordUpdate {
                    handle: op.handle.clone(),
                    fields: op.fields.clone(),
                })
                .collect();
            let identifiers: Vec<String> = batch.iter().map(|op| op.identifier.clone()).collect();
            match store.batch_update(table, &patches).await {
                Ok(()) => report.updated.extend(identifiers),
                Err(e) => {
                    warn!(table, source, records = batch.len(), error = %e, "update batch failed");
                    report.failed.push(FailedBatch {
                        kind: WriteKind::Update,
                        identifiers,
                        error: format!("{:#}", e),
                    });
                }
            }
            done += 1;
            progress.report(SyncProgressEvent::Writing {
                table: table.to_string(),
                source: source.to_string(),
                done,
                total,
            });
        }

        report
    }
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
