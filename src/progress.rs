//! Sync progress reporting.
//!
//! Renders the engine's [`SyncProgressEvent`]s during `civsync sync` so
//! users see which table is being scanned and how many write batches are
//! left. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;
use std::sync::Arc;

use civic_sync_core::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};

/// Human-friendly progress on stderr: "sync shil → Organizations  writing  3 / 12 batches".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::LoadingMirror { table, source } => {
                format!("sync {} → {}  loading mirror...\n", source, table)
            }
            SyncProgressEvent::Planning {
                table,
                source,
                mirrored,
                fetched,
            } => format!(
                "sync {} → {}  planning  {} fetched against {} mirrored\n",
                source,
                table,
                format_number(*fetched),
                format_number(*mirrored)
            ),
            SyncProgressEvent::Writing {
                table,
                source,
                done,
                total,
            } => format!(
                "sync {} → {}  writing  {} / {} batches\n",
                source,
                table,
                format_number(*done),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::LoadingMirror { table, source } => serde_json::json!({
                "event": "progress",
                "table": table,
                "source": source,
                "phase": "loading_mirror"
            }),
            SyncProgressEvent::Planning {
                table,
                source,
                mirrored,
                fetched,
            } => serde_json::json!({
                "event": "progress",
                "table": table,
                "source": source,
                "phase": "planning",
                "mirrored": mirrored,
                "fetched": fetched
            }),
            SyncProgressEvent::Writing {
                table,
                source,
                done,
                total,
            } => serde_json::json!({
                "event": "progress",
                "table": table,
                "source": source,
                "phase": "writing",
                "done": done,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
