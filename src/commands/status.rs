use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::meyem::config::{MeyemConfig, load_config};
use crate::meyem::encoder::resolve_ffmpeg_bin;
use crate::meyem::lock;
use crate::meyem::paths::resolve_paths;
use crate::meyem::timelapse::BuildSettings;
use crate::meyem::util::pid_alive;

include!(concat!(env!("OUT_DIR"), "/meyem_env_allowlist.rs"));

fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        "unset".to_string()
    } else {
        format!("set ({} chars)", secret.chars().count())
    }
}

/// `MEYEM_*` variables the binary never reads, usually typos.
pub fn unknown_env_vars(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with("MEYEM_"))
        .filter(|name| !GENERATED_MEYEM_ENV_ALLOWLIST.contains(&name.as_str()))
        .collect();
    unknown.sort();
    unknown
}

fn describe_config(report: &mut CommandReport, cfg: &MeyemConfig) {
    report.detail(format!("backups.local_path={}", cfg.backups.local_path));
    report.detail(format!("backups.remote_path={}", cfg.backups.remote_path));
    report.detail(format!(
        "backups.timelapses_subdir={}",
        cfg.backups.timelapses_subdir
    ));
    report.detail(format!(
        "backups.preserve_picture_days={}",
        cfg.backups.preserve_picture_days
    ));
    match cfg.preserve_timelapse_days() {
        Some(days) => report.detail(format!("timelapses.preserve_days={days}")),
        None => report.detail("timelapses.preserve_days=forever"),
    }
    report.detail(format!(
        "timelapse.framerate={} timelapse.batch_seconds={} timelapse.batch_size={}",
        cfg.timelapse.framerate,
        cfg.timelapse.batch_seconds,
        BuildSettings::from_config(cfg).batch_size()
    ));
    report.detail(format!(
        "timelapse.image_extension={} timelapse.extension={} timelapse.workers={}",
        cfg.timelapse.image_extension, cfg.timelapse.extension, cfg.timelapse.workers
    ));
    report.detail(format!("remote.provider={}", cfg.remote.provider));
    match cfg.remote.provider.as_str() {
        "mirror" => report.detail(format!("remote.mirror_path={}", cfg.remote.mirror_path)),
        _ => report.detail(format!(
            "remote.access_token={}",
            mask_secret(&cfg.remote.access_token)
        )),
    }
    let timezone = if cfg.clock.timezone.is_empty() {
        "local"
    } else {
        cfg.clock.timezone.as_str()
    };
    report.detail(format!("clock.timezone={timezone}"));

    let local = cfg.local_backups_dir();
    if !local.is_dir() {
        report.issue(format!("local backups dir missing ({})", local.display()));
    }
}

fn describe_lock(report: &mut CommandReport, path: &std::path::Path) {
    report.detail(format!("lock_file={}", path.display()));
    let held = match lock::is_held(path) {
        Ok(held) => held,
        Err(err) => {
            report.issue(format!("lock=unreadable ({err:#})"));
            return;
        }
    };
    report.detail(format!("lock.held={held}"));

    let payload = match lock::read_payload(path) {
        Ok(payload) => payload,
        Err(err) => {
            report.issue(format!("lock=corrupt ({err:#})"));
            return;
        }
    };
    let Some(payload) = payload else {
        return;
    };
    report.detail(format!("lock.pid={}", payload.pid));
    report.detail(format!("lock.command={}", payload.command));
    report.detail(format!("lock.start_time={}", payload.start_time));
    if !held || !pid_alive(payload.pid) {
        report.detail("lock.payload=stale (holder exited without cleanup)");
        return;
    }
    let current_uuid = env!("BUILD_UUID");
    if payload.build_uuid == current_uuid {
        report.detail("lock.build_match=ok");
    } else {
        report.issue(format!(
            "lock.build_mismatch=found (lock={} current={current_uuid})",
            payload.build_uuid
        ));
    }
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("meyem_home={}", paths.meyem_home.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!(
        "config_file={} ({})",
        paths.config_file.display(),
        if paths.config_file.exists() { "found" } else { "not found" }
    ));

    match load_config(&paths) {
        Ok(cfg) => describe_config(&mut report, &cfg),
        Err(err) => report.issue(format!("{err:#}")),
    }

    describe_lock(&mut report, &paths.lock_file);

    match resolve_ffmpeg_bin(paths.ffmpeg_bin.as_deref()) {
        Ok(bin) => report.detail(format!("ffmpeg_bin={}", bin.display())),
        Err(err) => report.issue(format!("{err:#}")),
    }

    for name in unknown_env_vars(env::vars().map(|(name, _)| name)) {
        report.issue(format!("unknown environment variable {name}"));
    }

    Ok(report)
}
