//! Output handoff
//!
//! Serializes a finished run to pretty JSON. The file is written to a
//! sibling temp path and renamed into place.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use super::coordinator::{RecoveryOutcome, RecoveryStatsSnapshot, ResendFailure};
use super::store::SeqRange;
use super::wire::Record;

#[derive(Debug, Serialize)]
struct OutputDocument<'a> {
    generated_at: String,
    complete: bool,
    highest_sequence: i32,
    missing_count: u64,
    missing: &'a [SeqRange],
    failures: &'a [ResendFailure],
    stats: &'a RecoveryStatsSnapshot,
    records: &'a [Record],
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    path: PathBuf,
}

impl OutputWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(outcome: &RecoveryOutcome) -> anyhow::Result<String> {
        let doc = OutputDocument {
            generated_at: chrono::Utc::now().to_rfc3339(),
            complete: outcome.complete,
            highest_sequence: outcome.highest_sequence,
            missing_count: outcome.missing_count,
            missing: &outcome.missing,
            failures: &outcome.failures,
            stats: &outcome.stats,
            records: &outcome.records,
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    pub fn write(&self, outcome: &RecoveryOutcome) -> anyhow::Result<()> {
        let json = Self::render(outcome)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;

        info!(
            "Wrote {} records to {} (complete: {})",
            outcome.records.len(),
            self.path.display(),
            outcome.complete
        );
        Ok(())
    }
}
