use crate::meyem::paths::MeyemPaths;
use crate::meyem::util::now_epoch_secs;
use crate::meyem::warn;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &MeyemPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.logs_dir.join("audit.log");
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

pub fn status_for(failed: usize) -> &'static str {
    if failed == 0 { "ok" } else { "degraded" }
}

/// Audit a phase that already ran. A failed write is warned about and handed
/// back as an issue; it never turns finished work into an error.
pub fn record_phase(
    paths: &MeyemPaths,
    phase: &str,
    status: &str,
    message: &str,
    issues: &mut Vec<String>,
) {
    if let Err(err) = append_event(paths, phase, status, message) {
        let entity = paths.logs_dir.display().to_string();
        warn::emit_failure(phase, "audit", &entity, "audit-write-failed", &err);
        issues.push(format!("{phase}: audit write failed: {err:#}"));
    }
}
