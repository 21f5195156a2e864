use anyhow::Result;

use crate::commands::{CommandReport, Session, describe_reconcile};
use crate::dropbox::open_store;
use crate::meyem::lock::RunLock;
use crate::meyem::pipeline::{list_backup_days, reconcile_backups, reconcile_timelapses};

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub timelapses: bool,
    pub dry_run: bool,
}

pub fn run(opts: &ReconcileOptions) -> Result<CommandReport> {
    let session = Session::load()?;
    let _lock = RunLock::acquire(&session.paths.lock_file, "reconcile")?;
    let store = open_store(&session.config)?;
    let ctx = session.context(store.as_ref());

    let mut report = CommandReport::new("reconcile");
    let mut issues = Vec::new();
    let summary = if opts.timelapses {
        report.detail(format!(
            "namespace=timelapses remote={}",
            session.config.remote_timelapses_dir()
        ));
        let summary = reconcile_timelapses(&ctx, opts.dry_run, &mut issues)?;
        describe_reconcile(&mut report, "timelapses", &summary);
        summary
    } else {
        report.detail(format!(
            "namespace=backups remote={}",
            session.config.backups.remote_path
        ));
        let days = list_backup_days(&session.config)?;
        let summary = reconcile_backups(&ctx, &days, opts.dry_run, &mut issues)?;
        describe_reconcile(&mut report, "backups", &summary);
        summary
    };
    for issue in issues {
        report.issue(issue);
    }
    report.attach(&summary);
    Ok(report)
}
