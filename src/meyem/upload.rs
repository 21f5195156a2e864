use crate::logging;
use crate::meyem::entry::LocalEntry;
use crate::meyem::remote::{RemoteEntry, RemoteStore, join_remote};
use crate::meyem::warn;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub uploaded_identities: Vec<String>,
}

/// Upload every local artifact whose identity is not already in `remote`.
pub fn upload_missing(
    local: &[LocalEntry],
    remote: &[RemoteEntry],
    remote_dir: &str,
    store: &dyn RemoteStore,
) -> UploadSummary {
    let remote_identities: BTreeSet<&str> = remote.iter().map(|e| e.identity.as_str()).collect();
    let mut summary = UploadSummary::default();
    let total = local.len();

    for (index, entry) in local.iter().enumerate() {
        logging::debug(format!("uploading [{}/{}] {}", index + 1, total, entry.identity));
        if remote_identities.contains(entry.identity.as_str()) {
            logging::debug("remote file exists, skipping");
            summary.skipped += 1;
            continue;
        }
        let dest = join_remote(remote_dir, &entry.identity);
        match store.put(&dest, &entry.path) {
            Ok(()) => {
                summary.uploaded += 1;
                summary.uploaded_identities.push(entry.identity.clone());
            }
            Err(err) => {
                warn::emit_failure("upload", "remote-put", &dest, "upload-failed", &err);
                summary.failed += 1;
            }
        }
    }
    summary
}
