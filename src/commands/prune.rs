use anyhow::Result;

use crate::commands::{CommandReport, Session, describe_prune};
use crate::dropbox::open_store;
use crate::meyem::lock::RunLock;
use crate::meyem::pipeline::prune_timelapses;

#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    pub dry_run: bool,
}

pub fn run(opts: &PruneOptions) -> Result<CommandReport> {
    let session = Session::load()?;
    let _lock = RunLock::acquire(&session.paths.lock_file, "prune")?;
    let store = open_store(&session.config)?;

    let mut issues = Vec::new();
    let ctx = session.context(store.as_ref());
    let summary = prune_timelapses(&ctx, opts.dry_run, &mut issues)?;

    let mut report = CommandReport::new("prune");
    describe_prune(&mut report, summary.as_ref());
    for issue in issues {
        report.issue(issue);
    }
    if let Some(summary) = &summary {
        report.attach(summary);
    }
    Ok(report)
}
