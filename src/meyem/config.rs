use crate::error::MeyemError;
use crate::meyem::dates::Clock;
use crate::meyem::motioneye;
use crate::meyem::paths::MeyemPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupsConfig {
    pub local_path: String,
    pub remote_path: String,
    pub timelapses_subdir: String,
    /// motionEye semantics: 0 keeps pictures forever.
    pub preserve_picture_days: u64,
}

impl Default for BackupsConfig {
    fn default() -> Self {
        Self {
            local_path: String::new(),
            remote_path: String::new(),
            timelapses_subdir: "timelapses".to_string(),
            preserve_picture_days: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelapseConfig {
    pub framerate: u32,
    pub batch_seconds: u32,
    pub image_extension: String,
    pub extension: String,
    pub workers: usize,
    pub encode_timeout_secs: u64,
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            framerate: 30,
            batch_seconds: 5,
            image_extension: ".jpg".to_string(),
            extension: ".mp4".to_string(),
            workers: 1,
            encode_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub provider: String,
    pub access_token: String,
    pub mirror_path: String,
    pub retries: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: "dropbox".to_string(),
            access_token: String::new(),
            mirror_path: String::new(),
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClockConfig {
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotioneyeConfig {
    pub device_conf: String,
    pub upload_conf: String,
    pub camera_id: String,
}

impl Default for MotioneyeConfig {
    fn default() -> Self {
        Self {
            device_conf: String::new(),
            upload_conf: String::new(),
            camera_id: "1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeyemConfig {
    pub backups: BackupsConfig,
    pub timelapse: TimelapseConfig,
    pub remote: RemoteConfig,
    pub clock: ClockConfig,
    pub motioneye: MotioneyeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMeyemConfig {
    backups: Option<BackupsConfig>,
    timelapse: Option<TimelapseConfig>,
    remote: Option<RemoteConfig>,
    clock: Option<ClockConfig>,
    motioneye: Option<MotioneyeConfig>,
}

impl MeyemConfig {
    pub fn local_backups_dir(&self) -> PathBuf {
        PathBuf::from(&self.backups.local_path)
    }

    pub fn local_timelapses_dir(&self) -> PathBuf {
        self.local_backups_dir().join(&self.backups.timelapses_subdir)
    }

    pub fn remote_timelapses_dir(&self) -> String {
        crate::meyem::remote::join_remote(
            &self.backups.remote_path,
            &self.backups.timelapses_subdir,
        )
    }

    /// Timelapses live twice as long as the pictures they were built from.
    /// `None` when retention is disabled.
    pub fn preserve_timelapse_days(&self) -> Option<u64> {
        match self.backups.preserve_picture_days {
            0 => None,
            days => Some(days.saturating_mul(2)),
        }
    }

    pub fn clock(&self) -> Result<Clock> {
        Clock::from_timezone(&self.clock.timezone)
            .map_err(|err| MeyemError::Config(format!("{err:#}")).into())
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

pub fn normalize_extension(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('.') {
        trimmed.to_string()
    } else {
        format!(".{trimmed}")
    }
}

/// Remote paths are absolute and carry no trailing separator.
pub fn normalize_remote_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    MeyemError::Config(message.into()).into()
}

pub fn validate(cfg: &MeyemConfig) -> Result<()> {
    if cfg.backups.local_path.trim().is_empty() {
        return Err(invalid(
            "backups.local_path is required (or MEYEM_LOCAL_BACKUPS_PATH, or motioneye.device_conf)",
        ));
    }
    if cfg.backups.remote_path.trim().is_empty() {
        return Err(invalid(
            "backups.remote_path is required (or MEYEM_REMOTE_BACKUPS_PATH, or motioneye.upload_conf)",
        ));
    }
    let subdir = cfg.backups.timelapses_subdir.trim();
    if subdir.is_empty() || subdir.contains('/') || subdir == "." || subdir == ".." {
        return Err(invalid(
            "backups.timelapses_subdir must be a single directory name",
        ));
    }
    if cfg.timelapse.framerate == 0 {
        return Err(invalid("timelapse.framerate must be >= 1"));
    }
    if cfg.timelapse.batch_seconds == 0 {
        return Err(invalid("timelapse.batch_seconds must be >= 1"));
    }
    if !cfg.timelapse.image_extension.starts_with('.') || cfg.timelapse.image_extension.len() < 2 {
        return Err(invalid("timelapse.image_extension must look like `.jpg`"));
    }
    if !cfg.timelapse.extension.starts_with('.') || cfg.timelapse.extension.len() < 2 {
        return Err(invalid("timelapse.extension must look like `.mp4`"));
    }
    if cfg.timelapse.workers == 0 {
        return Err(invalid("timelapse.workers must be >= 1"));
    }
    match cfg.remote.provider.as_str() {
        "dropbox" => {
            if cfg.remote.access_token.trim().is_empty() {
                return Err(invalid(
                    "remote.access_token is required for the dropbox provider",
                ));
            }
        }
        "mirror" => {
            if cfg.remote.mirror_path.trim().is_empty() {
                return Err(invalid(
                    "remote.mirror_path is required for the mirror provider",
                ));
            }
        }
        other => {
            return Err(invalid(format!(
                "invalid remote provider `{other}`: use `dropbox` or `mirror`"
            )));
        }
    }
    cfg.clock()?;
    Ok(())
}

pub fn parse_config_str(raw: &str, base: &mut MeyemConfig) -> Result<()> {
    let parsed: PartialMeyemConfig =
        toml::from_str(raw).map_err(|err| invalid(format!("failed to parse config: {err}")))?;
    if let Some(backups) = parsed.backups {
        base.backups = backups;
    }
    if let Some(timelapse) = parsed.timelapse {
        base.timelapse = timelapse;
    }
    if let Some(remote) = parsed.remote {
        base.remote = remote;
    }
    if let Some(clock) = parsed.clock {
        base.clock = clock;
    }
    if let Some(motioneye) = parsed.motioneye {
        base.motioneye = motioneye;
    }
    Ok(())
}

fn merge_file_config(path: &Path, base: &mut MeyemConfig) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_config_str(&raw, base).with_context(|| format!("in {}", path.display()))
}

fn apply_env_overrides(cfg: &mut MeyemConfig) {
    cfg.backups.local_path = env_or_string("MEYEM_LOCAL_BACKUPS_PATH", &cfg.backups.local_path);
    cfg.backups.remote_path =
        env_or_string("MEYEM_REMOTE_BACKUPS_PATH", &cfg.backups.remote_path);
    cfg.backups.timelapses_subdir =
        env_or_string("MEYEM_TIMELAPSES_SUBDIR", &cfg.backups.timelapses_subdir);
    cfg.backups.preserve_picture_days = env_or_u64(
        "MEYEM_PRESERVE_PICTURE_DAYS",
        cfg.backups.preserve_picture_days,
    );
    cfg.timelapse.framerate = env_or_u32("MEYEM_BATCH_FRAMERATE", cfg.timelapse.framerate);
    cfg.timelapse.batch_seconds =
        env_or_u32("MEYEM_BATCH_SECONDS", cfg.timelapse.batch_seconds);
    cfg.timelapse.image_extension =
        env_or_string("MEYEM_IMAGE_EXTENSION", &cfg.timelapse.image_extension);
    cfg.timelapse.extension =
        env_or_string("MEYEM_TIMELAPSE_EXTENSION", &cfg.timelapse.extension);
    cfg.timelapse.workers = env_or_usize("MEYEM_BUILD_WORKERS", cfg.timelapse.workers);
    cfg.timelapse.encode_timeout_secs = env_or_u64(
        "MEYEM_ENCODE_TIMEOUT_SECS",
        cfg.timelapse.encode_timeout_secs,
    );
    cfg.remote.provider = env_or_string("MEYEM_REMOTE_PROVIDER", &cfg.remote.provider);
    cfg.remote.access_token =
        env_or_string("MEYEM_DROPBOX_ACCESS_TOKEN", &cfg.remote.access_token);
    cfg.remote.mirror_path = env_or_string("MEYEM_REMOTE_MIRROR_PATH", &cfg.remote.mirror_path);
    cfg.remote.retries = env_or_usize("MEYEM_REMOTE_RETRIES", cfg.remote.retries);
    cfg.clock.timezone = env_or_string("MEYEM_TIMEZONE", &cfg.clock.timezone);
    cfg.motioneye.device_conf =
        env_or_string("MEYEM_MOTIONEYE_DEVICE_CONF", &cfg.motioneye.device_conf);
    cfg.motioneye.upload_conf =
        env_or_string("MEYEM_MOTIONEYE_UPLOAD_CONF", &cfg.motioneye.upload_conf);
    cfg.motioneye.camera_id = env_or_string("MEYEM_MOTIONEYE_CAMERA_ID", &cfg.motioneye.camera_id);
}

fn normalize(cfg: &mut MeyemConfig) {
    cfg.backups.remote_path = normalize_remote_path(&cfg.backups.remote_path);
    cfg.backups.timelapses_subdir = cfg.backups.timelapses_subdir.trim().to_string();
    cfg.timelapse.image_extension = normalize_extension(&cfg.timelapse.image_extension);
    cfg.timelapse.extension = normalize_extension(&cfg.timelapse.extension);
    cfg.remote.provider = cfg.remote.provider.trim().to_ascii_lowercase();
}

pub fn load_config(paths: &MeyemPaths) -> Result<MeyemConfig> {
    let mut cfg = MeyemConfig::default();
    merge_file_config(&paths.config_file, &mut cfg)?;
    apply_env_overrides(&mut cfg);
    motioneye::fill_missing(&mut cfg)?;
    normalize(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror_config() -> MeyemConfig {
        let mut cfg = MeyemConfig::default();
        cfg.backups.local_path = "/var/lib/motioneye/Camera1".into();
        cfg.backups.remote_path = "/motioneye/Camera1".into();
        cfg.remote.provider = "mirror".into();
        cfg.remote.mirror_path = "/mnt/remote".into();
        cfg
    }

    fn is_config_error(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<MeyemError>(), Some(MeyemError::Config(_)))
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let mut cfg = MeyemConfig::default();
        parse_config_str(
            r#"
[backups]
local_path = "/data/cam"
remote_path = "cam"
preserve_picture_days = 7

[timelapse]
framerate = 24
"#,
            &mut cfg,
        )
        .unwrap();
        assert_eq!(cfg.backups.local_path, "/data/cam");
        assert_eq!(cfg.backups.timelapses_subdir, "timelapses");
        assert_eq!(cfg.timelapse.framerate, 24);
        assert_eq!(cfg.timelapse.batch_seconds, 5);
        assert_eq!(cfg.remote.provider, "dropbox");
        assert_eq!(cfg.preserve_timelapse_days(), Some(14));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let mut cfg = MeyemConfig::default();
        let err = parse_config_str("[backups\nlocal_path=", &mut cfg).unwrap_err();
        assert!(is_config_error(&err));
    }

    #[test]
    fn derived_paths_and_batch_size() {
        let mut cfg = mirror_config();
        normalize(&mut cfg);
        assert_eq!(
            crate::meyem::timelapse::BuildSettings::from_config(&cfg).batch_size(),
            150
        );
        assert_eq!(
            cfg.local_timelapses_dir(),
            PathBuf::from("/var/lib/motioneye/Camera1/timelapses")
        );
        assert_eq!(cfg.remote_timelapses_dir(), "/motioneye/Camera1/timelapses");
        assert_eq!(cfg.preserve_timelapse_days(), None);
    }

    #[test]
    fn validate_accepts_a_complete_mirror_config() {
        let mut cfg = mirror_config();
        normalize(&mut cfg);
        validate(&cfg).unwrap();
    }

    #[test]
    fn validate_rejects_missing_paths_and_bad_numbers() {
        let mut cfg = mirror_config();
        cfg.backups.local_path.clear();
        assert!(is_config_error(&validate(&cfg).unwrap_err()));

        let mut cfg = mirror_config();
        cfg.timelapse.batch_seconds = 0;
        assert!(is_config_error(&validate(&cfg).unwrap_err()));

        let mut cfg = mirror_config();
        cfg.timelapse.workers = 0;
        assert!(is_config_error(&validate(&cfg).unwrap_err()));

        let mut cfg = mirror_config();
        cfg.backups.timelapses_subdir = "a/b".into();
        assert!(is_config_error(&validate(&cfg).unwrap_err()));
    }

    #[test]
    fn validate_checks_provider_requirements() {
        let mut cfg = mirror_config();
        cfg.remote.provider = "dropbox".into();
        assert!(is_config_error(&validate(&cfg).unwrap_err()));
        cfg.remote.access_token = "sl.token".into();
        validate(&cfg).unwrap();

        cfg.remote.provider = "s3".into();
        assert!(is_config_error(&validate(&cfg).unwrap_err()));
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let mut cfg = mirror_config();
        cfg.clock.timezone = "Nowhere/Special".into();
        assert!(is_config_error(&validate(&cfg).unwrap_err()));
    }

    #[test]
    fn normalizers() {
        assert_eq!(normalize_extension("mp4"), ".mp4");
        assert_eq!(normalize_extension(".jpg"), ".jpg");
        assert_eq!(normalize_remote_path("cam/"), "/cam");
        assert_eq!(normalize_remote_path("/cam"), "/cam");
        assert_eq!(normalize_remote_path("  "), "");
    }
}
