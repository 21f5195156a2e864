use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MeyemPaths {
    pub meyem_home: PathBuf,
    pub logs_dir: PathBuf,
    pub lock_file: PathBuf,
    pub config_file: PathBuf,
    pub ffmpeg_bin: Option<PathBuf>,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    env_path(var).unwrap_or(fallback)
}

pub fn resolve_paths() -> Result<MeyemPaths> {
    let meyem_home = match env_path("MEYEM_HOME") {
        Some(custom) => custom,
        None => required_home_dir()?.join(".meyem"),
    };

    let logs_dir = env_or_default_path("MEYEM_LOGS_DIR", meyem_home.join("logs"));
    let lock_file = logs_dir.join("meyem.lock");
    let config_file = env_or_default_path("MEYEM_CONFIG_PATH", meyem_home.join("meyem.toml"));
    let ffmpeg_bin = env_path("FFMPEG_BIN");

    Ok(MeyemPaths {
        meyem_home,
        logs_dir,
        lock_file,
        config_file,
        ffmpeg_bin,
    })
}
