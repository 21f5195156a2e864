pub mod build;
pub mod prune;
pub mod reconcile;
pub mod run;
pub mod status;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::meyem::config::{MeyemConfig, load_config};
use crate::meyem::dates::Clock;
use crate::meyem::encoder::FfmpegEncoder;
use crate::meyem::paths::{MeyemPaths, resolve_paths};
use crate::meyem::pipeline::RunContext;
use crate::meyem::prune::PruneSummary;
use crate::meyem::reconcile::ReconcileSummary;
use crate::meyem::remote::RemoteStore;
use crate::meyem::timelapse::BuildSummary;
use crate::meyem::upload::UploadSummary;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            summary: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn attach(&mut self, summary: &impl Serialize) {
        self.summary = serde_json::to_value(summary).ok();
    }

    /// `0` when everything went through, `2` when the command finished but
    /// left issues behind. Hard failures never produce a report.
    pub fn exit_code(&self) -> i32 {
        if self.ok { 0 } else { 2 }
    }
}

/// Resolved paths and validated config shared by the mutating commands.
pub struct Session {
    pub paths: MeyemPaths,
    pub config: MeyemConfig,
    pub clock: Clock,
}

impl Session {
    pub fn load() -> Result<Self> {
        let paths = resolve_paths()?;
        let config = load_config(&paths)?;
        let clock = config.clock()?;
        Ok(Self {
            paths,
            config,
            clock,
        })
    }

    pub fn context<'a>(&'a self, store: &'a dyn RemoteStore) -> RunContext<'a> {
        RunContext {
            paths: &self.paths,
            config: &self.config,
            clock: self.clock,
            store,
        }
    }

    pub fn encoder(&self) -> Result<FfmpegEncoder> {
        let timeout = match self.config.timelapse.encode_timeout_secs {
            0 => None,
            secs => Some(secs),
        };
        FfmpegEncoder::resolve(self.paths.ffmpeg_bin.as_deref(), timeout)
    }
}

pub fn describe_reconcile(report: &mut CommandReport, label: &str, summary: &ReconcileSummary) {
    let verb = if summary.dry_run { "would_delete" } else { "deleted" };
    report.detail(format!(
        "{label}.preserved={} {label}.{verb}={}",
        summary.preserved, summary.deleted
    ));
    if !summary.deleted_identities.is_empty() {
        report.detail(format!(
            "{label}.{verb}_entries={}",
            summary.deleted_identities.join(",")
        ));
    }
    if summary.failed > 0 {
        report.issue(format!("{label}: {} remote delete(s) failed", summary.failed));
    }
}

pub fn describe_build(report: &mut CommandReport, summary: &BuildSummary) {
    report.detail(format!(
        "build.built={} build.active={} build.existing={} build.empty={} build.skipped={}",
        summary.built, summary.active, summary.existing, summary.empty, summary.skipped
    ));
    report.detail(format!(
        "build.encoded_batches={} build.reused_batches={}",
        summary.encoded_batches, summary.reused_batches
    ));
    if !summary.built_days.is_empty() {
        report.detail(format!("build.days={}", summary.built_days.join(",")));
    }
    if summary.failed > 0 {
        report.issue(format!(
            "build failed for {} day(s): {}",
            summary.failed,
            summary.failed_days.join(",")
        ));
    }
}

pub fn describe_upload(report: &mut CommandReport, summary: &UploadSummary) {
    report.detail(format!(
        "upload.uploaded={} upload.skipped={}",
        summary.uploaded, summary.skipped
    ));
    if summary.failed > 0 {
        report.issue(format!("upload: {} file(s) failed", summary.failed));
    }
}

pub fn describe_prune(report: &mut CommandReport, summary: Option<&PruneSummary>) {
    let Some(summary) = summary else {
        report.detail("prune=disabled (preserve_picture_days=0)");
        return;
    };
    let verb = if summary.dry_run { "would_delete" } else { "deleted" };
    if let Some(cutoff) = summary.cutoff {
        report.detail(format!("prune.cutoff={cutoff}"));
    }
    report.detail(format!(
        "prune.scanned={} prune.kept={} prune.{verb}={}",
        summary.scanned, summary.kept, summary.deleted
    ));
    if !summary.deleted_identities.is_empty() {
        report.detail(format!(
            "prune.{verb}_entries={}",
            summary.deleted_identities.join(",")
        ));
    }
    if summary.failed > 0 {
        report.issue(format!("prune: {} entr(ies) failed", summary.failed));
    }
}
