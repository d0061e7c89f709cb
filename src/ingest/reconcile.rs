// src/ingest/reconcile.rs
//! Pure diff between the schedules the registry wants and the recurring
//! entries the queue holds.

use std::collections::{HashMap, HashSet};

use crate::queue::{RepeatableJob, INGEST_JOB};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSchedule {
    pub connector_id: String,
    pub pattern: String,
}

impl DesiredSchedule {
    pub fn new(connector_id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleDiff {
    pub create: Vec<DesiredSchedule>,
    pub delete: Vec<RepeatableJob>,
    pub keep: Vec<RepeatableJob>,
}

impl ScheduleDiff {
    /// True when applying the diff would not touch the queue.
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// At most one recurring entry per connector survives:
/// - entries for ids not in `desired` are deleted;
/// - the first entry whose pattern matches is kept, every other entry for
///   that id is deleted;
/// - a connector with no matching entry gets one created.
///
/// Entries with a different job name are not ours and are ignored.
pub fn reconcile(desired: &[DesiredSchedule], current: &[RepeatableJob]) -> ScheduleDiff {
    let wanted: HashSet<&str> = desired.iter().map(|d| d.connector_id.as_str()).collect();
    let mut by_id: HashMap<&str, Vec<&RepeatableJob>> = HashMap::new();
    let mut diff = ScheduleDiff::default();

    for entry in current.iter().filter(|e| e.name == INGEST_JOB) {
        if wanted.contains(entry.job_id.as_str()) {
            by_id.entry(entry.job_id.as_str()).or_default().push(entry);
        } else {
            diff.delete.push(entry.clone());
        }
    }

    for want in desired {
        let existing = by_id.remove(want.connector_id.as_str()).unwrap_or_default();
        let keep_idx = existing.iter().position(|e| e.pattern == want.pattern);
        for (i, entry) in existing.iter().enumerate() {
            if Some(i) == keep_idx {
                diff.keep.push((*entry).clone());
            } else {
                diff.delete.push((*entry).clone());
            }
        }
        if keep_idx.is_none() {
            diff.create.push(want.clone());
        }
    }
    diff
}
