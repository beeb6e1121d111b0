//! Upsert orchestration.
//!
//! [`Synchronizer`] runs one synchronization pass over one backing table
//! for one named source:
//!
//! ```text
//! load mirror (table, source) ──▶ map fetched records ──▶ plan
//!                                                          │
//!                      reconcile status (optional) ◀───────┤
//!                                                          ▼
//!                                   merge ──▶ batched write ──▶ SyncReport
//! ```
//!
//! Passes over the same `(table, source)` must not run concurrently; the
//! mirror goes stale as soon as someone else writes. Re-running a pass is
//! idempotent, which is the recovery story for partial application.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::mirror::{load_mirror, Mirror, MirrorScope};
use crate::models::{FieldMap, FieldValue, StatusLabels};
use crate::plan::{plan, Plan, PlanPolicy, UpdateMode, UpdateOp};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::reconcile::{compute_status_changes, StatusChange};
use crate::store::TableStore;
use crate::writer::{BatchWriter, FailedBatch, DEFAULT_BATCH_SIZE};

/// Conditions that abort a pass before anything is written.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no table given for source '{source_id}'")]
    MissingTable { source_id: String },

    #[error("no source given for table '{table}'")]
    MissingSource { table: String },

    #[error("failed to load mirror of table '{table}'")]
    MirrorLoad {
        table: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Engine settings shared by every pass of one synchronizer.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub key_field: String,
    pub source_field: String,
    pub status_field: String,
    pub labels: StatusLabels,
    /// Source value reserved for fixtures; rows carrying it are adopted
    /// by whichever source syncs the table.
    pub placeholder_source: Option<String>,
    pub provenance_fields: Vec<String>,
    pub batch_size: usize,
    pub treat_empty_as_absent: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            key_field: "id".to_string(),
            source_field: "source".to_string(),
            status_field: "status".to_string(),
            labels: StatusLabels::default(),
            placeholder_source: None,
            provenance_fields: vec!["source".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
            treat_empty_as_absent: true,
        }
    }
}

/// What to synchronize in one pass.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub table: String,
    pub source_id: String,
    pub tracked_fields: Vec<String>,
    /// When false, absence from the fetch is not read as deletion.
    pub manage_status: bool,
    pub update_mode: UpdateMode,
}

impl SyncJob {
    pub fn new(table: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            source_id: source_id.into(),
            tracked_fields: Vec::new(),
            manage_status: true,
            update_mode: UpdateMode::default(),
        }
    }

    pub fn tracked_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn manage_status(mut self, manage: bool) -> Self {
        self.manage_status = manage;
        self
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }
}

/// Aggregate counts of one pass, after writing.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub table: String,
    pub source: String,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    /// Fetched records that needed no write.
    pub unchanged: usize,
    pub deactivated: usize,
    pub reactivated: usize,
    /// Fetched records dropped before planning (empty or unidentified).
    pub skipped: usize,
    pub duplicates: usize,
    /// Table rows ignored because an earlier row has the same identifier.
    pub remote_duplicates: usize,
    pub failed_records: usize,
    pub failed_batches: Vec<FailedBatch>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed_batches.is_empty()
    }
}

/// Planned counts of a pass that was not written.
#[derive(Debug, Clone, Default)]
pub struct SyncPreview {
    pub table: String,
    pub source: String,
    pub fetched: usize,
    pub mirrored: usize,
    pub creates: usize,
    pub updates: usize,
    pub unchanged: usize,
    pub deactivations: usize,
    pub reactivations: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub remote_duplicates: usize,
}

/// The engine's entry point. Owns its backing store handle; construct one
/// per store and reuse it across passes.
pub struct Synchronizer {
    store: Arc<dyn TableStore>,
    settings: SyncSettings,
    progress: Arc<dyn SyncProgressReporter>,
}

struct PreparedPass {
    mirror: Mirror,
    plan: Plan,
    status_changes: Vec<StatusChange>,
    fetched: usize,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn TableStore>, settings: SyncSettings) -> Self {
        Self {
            store,
            settings,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn TableStore {
        self.store.as_ref()
    }

    /// Run one full pass and write the result.
    ///
    /// `fetch` yields `(identifier, raw record)` pairs; `mapper` turns a raw
    /// record into an attribute bag, or `None` to skip it. Partial write
    /// failures are reported, never raised.
    pub async fn synchronize<R, I, M>(
        &self,
        job: &SyncJob,
        fetch: I,
        mapper: M,
    ) -> Result<SyncReport, SyncError>
    where
        I: IntoIterator<Item = (String, R)>,
        M: FnMut(&R) -> Option<FieldMap>,
    {
        let pass = self.prepare(job, fetch, mapper).await?;
        let labels = &self.settings.labels;

        let (updates, status_by_id) = merge_status_changes(
            pass.plan.updates.clone(),
            &pass.status_changes,
            &self.settings.status_field,
        );

        let writer = BatchWriter::new(self.settings.batch_size);
        let written = writer
            .apply(
                self.store.as_ref(),
                &job.table,
                &job.source_id,
                &pass.plan.creates,
                &updates,
                self.progress.as_ref(),
            )
            .await;

        let mut report = SyncReport {
            table: job.table.clone(),
            source: job.source_id.clone(),
            fetched: pass.fetched,
            created: written.created_count(),
            unchanged: pass.plan.skipped_unchanged(),
            skipped: pass.plan.skipped.len(),
            duplicates: pass.plan.duplicates.len(),
            remote_duplicates: pass.mirror.duplicate_rows,
            failed_records: written.failed_records(),
            ..Default::default()
        };

        let planned_updates: std::collections::HashSet<&str> = pass
            .plan
            .updates
            .iter()
            .map(|u| u.identifier.as_str())
            .collect();
        for identifier in &written.updated {
            if planned_updates.contains(identifier.as_str()) {
                report.updated += 1;
            }
            if let Some(change) = status_by_id.get(identifier.as_str()) {
                if change.is_deactivation(labels) {
                    report.deactivated += 1;
                } else {
                    report.reactivated += 1;
                }
            }
        }
        report.failed_batches = written.failed;

        info!(
            table = %report.table,
            source = %report.source,
            backend = self.store.backend_name(),
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deactivated = report.deactivated,
            reactivated = report.reactivated,
            skipped = report.skipped,
            remote_duplicates = report.remote_duplicates,
            failed = report.failed_records,
            "sync finished"
        );

        Ok(report)
    }

    /// Load, map and plan exactly as [`synchronize`](Self::synchronize)
    /// does, but write nothing.
    pub async fn preview<R, I, M>(
        &self,
        job: &SyncJob,
        fetch: I,
        mapper: M,
    ) -> Result<SyncPreview, SyncError>
    where
        I: IntoIterator<Item = (String, R)>,
        M: FnMut(&R) -> Option<FieldMap>,
    {
        let pass = self.prepare(job, fetch, mapper).await?;
        let labels = &self.settings.labels;
        let deactivations = pass
            .status_changes
            .iter()
            .filter(|c| c.is_deactivation(labels))
            .count();

        Ok(SyncPreview {
            table: job.table.clone(),
            source: job.source_id.clone(),
            fetched: pass.fetched,
            mirrored: pass.mirror.len(),
            creates: pass.plan.creates.len(),
            updates: pass.plan.updates.len(),
            unchanged: pass.plan.skipped_unchanged(),
            deactivations,
            reactivations: pass.status_changes.len() - deactivations,
            skipped: pass.plan.skipped.len(),
            duplicates: pass.plan.duplicates.len(),
            remote_duplicates: pass.mirror.duplicate_rows,
        })
    }

    async fn prepare<R, I, M>(
        &self,
        job: &SyncJob,
        fetch: I,
        mut mapper: M,
    ) -> Result<PreparedPass, SyncError>
    where
        I: IntoIterator<Item = (String, R)>,
        M: FnMut(&R) -> Option<FieldMap>,
    {
        if job.table.trim().is_empty() {
            return Err(SyncError::MissingTable {
                source_id: job.source_id.clone(),
            });
        }
        if job.source_id.trim().is_empty() {
            return Err(SyncError::MissingSource {
                table: job.table.clone(),
            });
        }

        self.progress.report(SyncProgressEvent::LoadingMirror {
            table: job.table.clone(),
            source: job.source_id.clone(),
        });
        let scope = self.mirror_scope(job);
        let mirror = load_mirror(self.store.as_ref(), &job.table, &scope)
            .await
            .map_err(|source| SyncError::MirrorLoad {
                table: job.table.clone(),
                source,
            })?;

        // Map every raw record before planning; the planner and the
        // reconciler both see this one materialized view.
        let mapped: Vec<(String, Option<FieldMap>)> = fetch
            .into_iter()
            .map(|(identifier, raw)| {
                let fields = mapper(&raw);
                (identifier, fields)
            })
            .collect();
        let fetched = mapped.len();

        self.progress.report(SyncProgressEvent::Planning {
            table: job.table.clone(),
            source: job.source_id.clone(),
            mirrored: mirror.len() as u64,
            fetched: fetched as u64,
        });

        let plan = plan(&mirror, mapped, &self.plan_policy(job));
        let status_changes = if job.manage_status {
            compute_status_changes(
                &mirror,
                &plan.fetched_ids,
                &self.settings.labels,
                self.settings.treat_empty_as_absent,
            )
        } else {
            Vec::new()
        };

        Ok(PreparedPass {
            mirror,
            plan,
            status_changes,
            fetched,
        })
    }

    fn mirror_scope(&self, job: &SyncJob) -> MirrorScope {
        MirrorScope {
            key_field: self.settings.key_field.clone(),
            source_field: self.settings.source_field.clone(),
            status_field: self.settings.status_field.clone(),
            source_filter: Some(job.source_id.clone()),
            placeholder_sources: self.settings.placeholder_source.iter().cloned().collect(),
            fingerprint_fields: job.tracked_fields.clone(),
        }
    }

    fn plan_policy(&self, job: &SyncJob) -> PlanPolicy {
        PlanPolicy {
            key_field: self.settings.key_field.clone(),
            source_field: self.settings.source_field.clone(),
            status_field: self.settings.status_field.clone(),
            source_value: job.source_id.clone(),
            labels: self.settings.labels.clone(),
            tracked_fields: job.tracked_fields.clone(),
            provenance_fields: self.settings.provenance_fields.clone(),
            update_mode: job.update_mode,
        }
    }
}

/// Fold status transitions into the update list: a row that already has
/// a field update gets its status written in the same patch, any other
/// row gets a status-only patch.
fn merge_status_changes<'a>(
    mut updates: Vec<UpdateOp>,
    changes: &'a [StatusChange],
    status_field: &str,
) -> (Vec<UpdateOp>, HashMap<&'a str, &'a StatusChange>) {
    let mut by_handle: HashMap<String, usize> = updates
        .iter()
        .enumerate()
        .map(|(i, u)| (u.handle.clone(), i))
        .collect();
    let mut by_id = HashMap::with_capacity(changes.len());

    for change in changes {
        by_id.insert(change.identifier.as_str(), change);
        let value = FieldValue::Text(change.to.clone());
        match by_handle.get(&change.handle) {
            Some(&i) => {
                updates[i].fields.insert(status_field.to_string(), value);
            }
            None => {
                let mut fields = FieldMap::new();
                fields.insert(status_field.to_string(), value);
                by_handle.insert(change.handle.clone(), updates.len());
                updates.push(UpdateOp {
                    identifier: change.identifier.clone(),
                    handle: change.handle.clone(),
                    fields,
                });
            }
        }
    }

    (updates, by_id)
}
