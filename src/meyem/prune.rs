use crate::error::MeyemError;
use crate::logging;
use crate::meyem::dates::{Clock, DayStamp, entry_stem};
use crate::meyem::entry::LocalEntry;
use crate::meyem::warn;
use serde::Serialize;
use std::fs;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub cutoff: Option<DayStamp>,
    pub scanned: usize,
    pub kept: usize,
    pub deleted: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub deleted_identities: Vec<String>,
}

/// Delete local entries dated strictly before `cutoff`. An entry dated on
/// the cutoff itself is kept.
pub fn prune(entries: &[LocalEntry], cutoff: DayStamp, clock: &Clock, dry_run: bool) -> PruneSummary {
    let mut summary = PruneSummary {
        cutoff: Some(cutoff),
        dry_run,
        ..PruneSummary::default()
    };

    for entry in entries {
        summary.scanned += 1;
        let date = match clock.classify_entry(&entry_stem(&entry.path), &entry.path) {
            Ok(date) => date,
            Err(err) => {
                warn::emit_failure("prune", "classify", &entry.identity, "stat-failed", &err);
                summary.failed += 1;
                continue;
            }
        };
        if date >= cutoff {
            summary.kept += 1;
            continue;
        }

        logging::debug(format!(
            "{date} older than {cutoff}, deleting {}",
            entry.identity
        ));
        if dry_run {
            summary.deleted += 1;
            summary.deleted_identities.push(entry.identity.clone());
            continue;
        }
        let removed = if entry.path.is_dir() {
            fs::remove_dir_all(&entry.path)
        } else {
            fs::remove_file(&entry.path)
        };
        match removed {
            Ok(()) => {
                summary.deleted += 1;
                summary.deleted_identities.push(entry.identity.clone());
            }
            Err(err) => {
                let err = anyhow::Error::from(MeyemError::filesystem(&entry.path, err));
                warn::emit_failure("prune", "delete", &entry.identity, "local-delete-failed", &err);
                summary.failed += 1;
            }
        }
    }
    summary
}
