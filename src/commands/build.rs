use anyhow::Result;

use crate::commands::{CommandReport, Session, describe_build};
use crate::meyem::lock::RunLock;
use crate::meyem::pipeline::{build_timelapses, list_backup_days};

pub fn run() -> Result<CommandReport> {
    let session = Session::load()?;
    let _lock = RunLock::acquire(&session.paths.lock_file, "build")?;
    let encoder = session.encoder()?;

    let days = list_backup_days(&session.config)?;
    let mut issues = Vec::new();
    let summary = build_timelapses(
        &session.paths,
        &session.config,
        &session.clock,
        &days,
        &encoder,
        &mut issues,
    )?;

    let mut report = CommandReport::new("build");
    report.detail(format!(
        "timelapses_dir={}",
        session.config.local_timelapses_dir().display()
    ));
    describe_build(&mut report, &summary);
    for issue in issues {
        report.issue(issue);
    }
    report.attach(&summary);
    Ok(report)
}
