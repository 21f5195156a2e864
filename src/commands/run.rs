use anyhow::Result;

use crate::commands::{
    CommandReport, Session, describe_build, describe_prune, describe_reconcile, describe_upload,
};
use crate::dropbox::open_store;
use crate::meyem::lock::RunLock;
use crate::meyem::pipeline::run_pipeline;

pub fn run() -> Result<CommandReport> {
    let session = Session::load()?;
    let _lock = RunLock::acquire(&session.paths.lock_file, "run")?;
    let store = open_store(&session.config)?;
    let encoder = session.encoder()?;

    let summary = run_pipeline(&session.context(store.as_ref()), &encoder)?;

    let mut report = CommandReport::new("run");
    report.detail(format!("local_days={}", summary.local_days));
    if let Some(step) = &summary.backups_reconcile {
        describe_reconcile(&mut report, "backups", step);
    }
    if let Some(step) = &summary.build {
        describe_build(&mut report, step);
    }
    if let Some(step) = &summary.upload {
        describe_upload(&mut report, step);
    }
    if summary.prune.is_some() || session.config.preserve_timelapse_days().is_none() {
        describe_prune(&mut report, summary.prune.as_ref());
    }
    if let Some(step) = &summary.timelapses_reconcile {
        describe_reconcile(&mut report, "timelapses", step);
    }
    for issue in &summary.issues {
        report.issue(issue.clone());
    }
    report.attach(&summary);
    Ok(report)
}
