//! One upkeep pass over the backups and timelapses namespaces.
//!
//! Each step is callable on its own so the single-purpose commands share the
//! exact listing and exclusion rules the full run uses.

use crate::logging;
use crate::meyem::audit;
use crate::meyem::config::MeyemConfig;
use crate::meyem::dates::Clock;
use crate::meyem::encoder::Encoder;
use crate::meyem::entry::{LocalEntry, list_artifacts, list_local};
use crate::meyem::paths::MeyemPaths;
use crate::meyem::prune::{PruneSummary, prune};
use crate::meyem::reconcile::{ReconcileSummary, reconcile};
use crate::meyem::remote::{RemoteStore, list_excluding};
use crate::meyem::timelapse::{BuildSettings, BuildSummary, build_all};
use crate::meyem::upload::{UploadSummary, upload_missing};
use crate::meyem::warn;
use crate::error::MeyemError;
use anyhow::Result;
use serde::Serialize;
use std::fs;

pub struct RunContext<'a> {
    pub paths: &'a MeyemPaths,
    pub config: &'a MeyemConfig,
    pub clock: Clock,
    pub store: &'a dyn RemoteStore,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub local_days: usize,
    pub backups_reconcile: Option<ReconcileSummary>,
    pub build: Option<BuildSummary>,
    pub upload: Option<UploadSummary>,
    pub prune: Option<PruneSummary>,
    pub timelapses_reconcile: Option<ReconcileSummary>,
    pub issues: Vec<String>,
}

impl RunSummary {
    pub fn failed_entities(&self) -> usize {
        self.backups_reconcile.as_ref().map_or(0, |s| s.failed)
            + self.build.as_ref().map_or(0, |s| s.failed)
            + self.upload.as_ref().map_or(0, |s| s.failed)
            + self.prune.as_ref().map_or(0, |s| s.failed)
            + self.timelapses_reconcile.as_ref().map_or(0, |s| s.failed)
    }

    /// The run finished but left something undone.
    pub fn is_partial(&self) -> bool {
        !self.issues.is_empty() || self.failed_entities() > 0
    }
}

/// Day directories (and stray files) of the local backups tree, without the
/// timelapses subdirectory. Failing to list it is fatal for the run.
pub fn list_backup_days(config: &MeyemConfig) -> Result<Vec<LocalEntry>> {
    list_local(
        &config.local_backups_dir(),
        Some(&config.backups.timelapses_subdir),
    )
}

pub fn reconcile_backups(
    ctx: &RunContext<'_>,
    local: &[LocalEntry],
    dry_run: bool,
    issues: &mut Vec<String>,
) -> Result<ReconcileSummary> {
    let remote = list_excluding(
        ctx.store,
        &ctx.config.backups.remote_path,
        Some(&ctx.config.backups.timelapses_subdir),
    )?;
    logging::debug(format!(
        "backups: {} local, {} remote",
        local.len(),
        remote.len()
    ));
    let summary = reconcile("reconcile-backups", local, &remote, ctx.store, dry_run);
    audit::record_phase(
        ctx.paths,
        "reconcile-backups",
        audit::status_for(summary.failed),
        &format!(
            "preserved={} deleted={} failed={} dry_run={}",
            summary.preserved, summary.deleted, summary.failed, summary.dry_run
        ),
        issues,
    );
    Ok(summary)
}

pub fn build_timelapses(
    paths: &MeyemPaths,
    config: &MeyemConfig,
    clock: &Clock,
    days: &[LocalEntry],
    encoder: &dyn Encoder,
    issues: &mut Vec<String>,
) -> Result<BuildSummary> {
    let timelapses_dir = config.local_timelapses_dir();
    fs::create_dir_all(&timelapses_dir)
        .map_err(|err| MeyemError::filesystem(&timelapses_dir, err))?;
    let settings = BuildSettings::from_config(config);
    let summary = build_all(days, &timelapses_dir, clock.today(), clock, &settings, encoder);
    audit::record_phase(
        paths,
        "build",
        audit::status_for(summary.failed),
        &format!(
            "built={} active={} existing={} empty={} failed={} encoded_batches={} reused_batches={}",
            summary.built,
            summary.active,
            summary.existing,
            summary.empty,
            summary.failed,
            summary.encoded_batches,
            summary.reused_batches
        ),
        issues,
    );
    Ok(summary)
}

fn local_timelapses(config: &MeyemConfig) -> Result<Vec<LocalEntry>> {
    list_artifacts(&config.local_timelapses_dir(), &config.timelapse.extension)
}

pub fn upload_timelapses(
    ctx: &RunContext<'_>,
    issues: &mut Vec<String>,
) -> Result<UploadSummary> {
    let local = local_timelapses(ctx.config)?;
    let remote_dir = ctx.config.remote_timelapses_dir();
    let remote = ctx.store.list(&remote_dir)?;
    let summary = upload_missing(&local, &remote, &remote_dir, ctx.store);
    audit::record_phase(
        ctx.paths,
        "upload",
        audit::status_for(summary.failed),
        &format!(
            "uploaded={} skipped={} failed={}",
            summary.uploaded, summary.skipped, summary.failed
        ),
        issues,
    );
    Ok(summary)
}

/// `None` when retention is disabled (`preserve_picture_days = 0`).
pub fn prune_timelapses(
    ctx: &RunContext<'_>,
    dry_run: bool,
    issues: &mut Vec<String>,
) -> Result<Option<PruneSummary>> {
    let Some(days) = ctx.config.preserve_timelapse_days() else {
        logging::debug("retention disabled, keeping every timelapse");
        return Ok(None);
    };
    let cutoff = ctx.clock.today_minus_days(days);
    let local = local_timelapses(ctx.config)?;
    let summary = prune(&local, cutoff, &ctx.clock, dry_run);
    audit::record_phase(
        ctx.paths,
        "prune",
        audit::status_for(summary.failed),
        &format!(
            "cutoff={cutoff} scanned={} deleted={} kept={} failed={} dry_run={}",
            summary.scanned, summary.deleted, summary.kept, summary.failed, summary.dry_run
        ),
        issues,
    );
    Ok(Some(summary))
}

pub fn reconcile_timelapses(
    ctx: &RunContext<'_>,
    dry_run: bool,
    issues: &mut Vec<String>,
) -> Result<ReconcileSummary> {
    let local = local_timelapses(ctx.config)?;
    let remote = ctx.store.list(&ctx.config.remote_timelapses_dir())?;
    let summary = reconcile("reconcile-timelapses", &local, &remote, ctx.store, dry_run);
    audit::record_phase(
        ctx.paths,
        "reconcile-timelapses",
        audit::status_for(summary.failed),
        &format!(
            "preserved={} deleted={} failed={} dry_run={}",
            summary.preserved, summary.deleted, summary.failed, summary.dry_run
        ),
        issues,
    );
    Ok(summary)
}

fn skipped_step(summary: &mut RunSummary, stage: &str, entity: &str, err: &anyhow::Error) {
    warn::emit_failure(stage, "step", entity, "step-skipped", err);
    summary.issues.push(format!("{stage} skipped: {err:#}"));
}

/// Full pass. Only a failure to list the local backups aborts; any other
/// step that cannot start is skipped and recorded as an issue. Audit write
/// failures land in `issues` too.
pub fn run_pipeline(ctx: &RunContext<'_>, encoder: &dyn Encoder) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    let days = list_backup_days(ctx.config)?;
    summary.local_days = days.len();

    let remote_backups = ctx.config.backups.remote_path.as_str();
    match reconcile_backups(ctx, &days, false, &mut summary.issues) {
        Ok(step) => summary.backups_reconcile = Some(step),
        Err(err) => skipped_step(&mut summary, "reconcile-backups", remote_backups, &err),
    }

    let local_timelapses_dir = ctx.config.local_timelapses_dir();
    let local_timelapses_dir = local_timelapses_dir.display().to_string();
    match build_timelapses(
        ctx.paths,
        ctx.config,
        &ctx.clock,
        &days,
        encoder,
        &mut summary.issues,
    ) {
        Ok(step) => summary.build = Some(step),
        Err(err) => skipped_step(&mut summary, "build", &local_timelapses_dir, &err),
    }

    let remote_timelapses = ctx.config.remote_timelapses_dir();
    match upload_timelapses(ctx, &mut summary.issues) {
        Ok(step) => summary.upload = Some(step),
        Err(err) => skipped_step(&mut summary, "upload", &remote_timelapses, &err),
    }

    match prune_timelapses(ctx, false, &mut summary.issues) {
        Ok(step) => summary.prune = step,
        Err(err) => skipped_step(&mut summary, "prune", &local_timelapses_dir, &err),
    }

    match reconcile_timelapses(ctx, false, &mut summary.issues) {
        Ok(step) => summary.timelapses_reconcile = Some(step),
        Err(err) => skipped_step(&mut summary, "reconcile-timelapses", &remote_timelapses, &err),
    }

    audit::record_phase(
        ctx.paths,
        "run",
        if summary.is_partial() { "degraded" } else { "ok" },
        &format!(
            "days={} failed_entities={} issues={}",
            summary.local_days,
            summary.failed_entities(),
            summary.issues.len()
        ),
        &mut summary.issues,
    );
    Ok(summary)
}
