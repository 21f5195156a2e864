//! Optional import of camera settings from a motionEye installation.
//!
//! Only fills fields the TOML file and environment left empty.

use crate::error::MeyemError;
use crate::meyem::config::MeyemConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSettings {
    pub target_dir: Option<String>,
    pub preserve_pictures: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSettings {
    pub location: Option<String>,
    pub access_token: Option<String>,
}

/// Parse a motionEye camera file (`thread-N.conf`). Extra settings are
/// stored as `# @key value` comments, plain motion settings as `key value`.
pub fn parse_device_conf(raw: &str) -> DeviceSettings {
    let mut out = DeviceSettings::default();
    for line in raw.lines() {
        let line = line.trim();
        let normalized = match line.strip_prefix('#') {
            // Only `# @key` comments carry settings; other comments are inert.
            Some(comment) => match comment.trim_start().strip_prefix('@') {
                Some(extra) => extra,
                None => continue,
            },
            None => line,
        };
        let Some((key, value)) = normalized.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key {
            "target_dir" => out.target_dir = Some(value.to_string()),
            "preserve_pictures" => out.preserve_pictures = value.parse::<u64>().ok(),
            _ => {}
        }
    }
    out
}

/// Read the Dropbox entry for `camera_id` from motionEye's `uploadservices.json`.
pub fn parse_upload_services(raw: &str, camera_id: &str) -> Result<UploadSettings> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|err| MeyemError::Config(format!("uploadservices.json is not JSON: {err}")))?;
    let Some(dropbox) = parsed.get(camera_id).and_then(|camera| camera.get("dropbox")) else {
        return Ok(UploadSettings::default());
    };
    let location = dropbox
        .get("location")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);
    let access_token = dropbox
        .get("credentials")
        .and_then(|c| c.get("access_token"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);
    Ok(UploadSettings {
        location,
        access_token,
    })
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|err| MeyemError::Config(format!("cannot read {}: {err}", path.display())))
        .with_context(|| "motionEye import failed")
}

pub fn apply_device(cfg: &mut MeyemConfig, device: &DeviceSettings) {
    if cfg.backups.local_path.trim().is_empty()
        && let Some(dir) = &device.target_dir
    {
        cfg.backups.local_path = dir.clone();
    }
    if cfg.backups.preserve_picture_days == 0
        && let Some(days) = device.preserve_pictures
    {
        cfg.backups.preserve_picture_days = days;
    }
}

pub fn apply_upload(cfg: &mut MeyemConfig, upload: &UploadSettings) {
    if cfg.backups.remote_path.trim().is_empty()
        && let Some(location) = &upload.location
    {
        cfg.backups.remote_path = location.clone();
    }
    if cfg.remote.access_token.trim().is_empty()
        && let Some(token) = &upload.access_token
    {
        cfg.remote.access_token = token.clone();
    }
}

pub fn fill_missing(cfg: &mut MeyemConfig) -> Result<()> {
    let device_conf = cfg.motioneye.device_conf.trim().to_string();
    if !device_conf.is_empty() {
        let device = parse_device_conf(&read(Path::new(&device_conf))?);
        apply_device(cfg, &device);
    }

    let upload_conf = cfg.motioneye.upload_conf.trim().to_string();
    if !upload_conf.is_empty() {
        let camera_id = cfg.motioneye.camera_id.trim().to_string();
        let upload = parse_upload_services(&read(Path::new(&upload_conf))?, &camera_id)?;
        apply_upload(cfg, &upload);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_CONF: &str = "\
# @enabled on
# @preserve_pictures 7
# @upload_enabled on
target_dir /var/lib/motioneye/Camera1
framerate 2
";

    #[test]
    fn device_conf_reads_target_and_retention() {
        let got = parse_device_conf(DEVICE_CONF);
        assert_eq!(
            got,
            DeviceSettings {
                target_dir: Some("/var/lib/motioneye/Camera1".into()),
                preserve_pictures: Some(7),
            }
        );
    }

    #[test]
    fn commented_out_settings_are_ignored() {
        let raw = "\
# target_dir /old/Camera1
#preserve_pictures 30
target_dir /var/lib/motioneye/Camera1
#  @preserve_pictures 7
";
        let got = parse_device_conf(raw);
        assert_eq!(got.target_dir.as_deref(), Some("/var/lib/motioneye/Camera1"));
        assert_eq!(got.preserve_pictures, Some(7));

        let only_comments = parse_device_conf("# target_dir /old\n# preserve_pictures 3\n");
        assert_eq!(only_comments, DeviceSettings::default());
    }

    #[test]
    fn upload_services_reads_dropbox_entry() {
        let raw = r#"{"1": {"dropbox": {"location": "/Camera1", "credentials": {"access_token": "abc"}}}}"#;
        let got = parse_upload_services(raw, "1").unwrap();
        assert_eq!(got.location.as_deref(), Some("/Camera1"));
        assert_eq!(got.access_token.as_deref(), Some("abc"));
        assert_eq!(parse_upload_services(raw, "2").unwrap(), UploadSettings::default());
    }

    #[test]
    fn import_never_overrides_explicit_values() {
        let mut cfg = MeyemConfig::default();
        cfg.backups.local_path = "/explicit".into();
        apply_device(&mut cfg, &parse_device_conf(DEVICE_CONF));
        assert_eq!(cfg.backups.local_path, "/explicit");
        assert_eq!(cfg.backups.preserve_picture_days, 7);

        apply_upload(
            &mut cfg,
            &UploadSettings {
                location: Some("/Camera1".into()),
                access_token: Some("abc".into()),
            },
        );
        assert_eq!(cfg.backups.remote_path, "/Camera1");
        assert_eq!(cfg.remote.access_token, "abc");
    }

    #[test]
    fn fill_missing_reads_files_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let device = tmp.path().join("thread-1.conf");
        fs::write(&device, DEVICE_CONF).unwrap();
        let mut cfg = MeyemConfig::default();
        cfg.motioneye.device_conf = device.display().to_string();
        fill_missing(&mut cfg).unwrap();
        assert_eq!(cfg.backups.local_path, "/var/lib/motioneye/Camera1");
    }

    #[test]
    fn missing_motioneye_file_is_a_config_error() {
        let mut cfg = MeyemConfig::default();
        cfg.motioneye.device_conf = "/definitely/not/here.conf".into();
        let err = fill_missing(&mut cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MeyemError>(),
            Some(MeyemError::Config(_))
        ));
    }
}
