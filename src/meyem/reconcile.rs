//! Remote-follows-local reconciliation by identity.
//!
//! A remote entry survives iff some local entry has the same basename.
//! Local entries are never touched.

use crate::logging;
use crate::meyem::entry::LocalEntry;
use crate::meyem::remote::{RemoteEntry, RemoteStore};
use crate::meyem::warn;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub preserved: usize,
    pub deleted: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub deleted_identities: Vec<String>,
}

/// Remote entries whose identity has no local counterpart.
pub fn orphans<'a>(local: &[LocalEntry], remote: &'a [RemoteEntry]) -> Vec<&'a RemoteEntry> {
    let local_identities: BTreeSet<&str> = local.iter().map(|e| e.identity.as_str()).collect();
    remote
        .iter()
        .filter(|entry| !local_identities.contains(entry.identity.as_str()))
        .collect()
}

pub fn reconcile(
    stage: &str,
    local: &[LocalEntry],
    remote: &[RemoteEntry],
    store: &dyn RemoteStore,
    dry_run: bool,
) -> ReconcileSummary {
    let mut summary = ReconcileSummary {
        dry_run,
        ..ReconcileSummary::default()
    };
    let doomed: BTreeSet<&str> = orphans(local, remote)
        .into_iter()
        .map(|e| e.path.as_str())
        .collect();

    for entry in remote {
        if !doomed.contains(entry.path.as_str()) {
            logging::debug(format!("preserving [{}]", entry.identity));
            summary.preserved += 1;
            continue;
        }
        if dry_run {
            logging::debug(format!("would delete [{}]", entry.identity));
            summary.deleted += 1;
            summary.deleted_identities.push(entry.identity.clone());
            continue;
        }
        logging::debug(format!("deleting [{}]", entry.identity));
        match store.delete(&entry.path) {
            Ok(()) => {
                summary.deleted += 1;
                summary.deleted_identities.push(entry.identity.clone());
            }
            Err(err) => {
                warn::emit_failure(stage, "remote-delete", &entry.path, "remote-delete-failed", &err);
                summary.failed += 1;
            }
        }
    }
    summary
}
