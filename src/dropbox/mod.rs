pub mod client;
pub mod content_hash;

use crate::error::MeyemError;
use crate::meyem::config::MeyemConfig;
use crate::meyem::remote::{MirrorStore, RemoteStore};
use anyhow::Result;

pub use client::DropboxClient;

/// The remote store named by `remote.provider`.
pub fn open_store(cfg: &MeyemConfig) -> Result<Box<dyn RemoteStore>> {
    match cfg.remote.provider.as_str() {
        "dropbox" => Ok(Box::new(DropboxClient::new(
            &cfg.remote.access_token,
            cfg.remote.retries,
        )?)),
        "mirror" => Ok(Box::new(MirrorStore::new(&cfg.remote.mirror_path))),
        other => Err(MeyemError::Config(format!("invalid remote provider `{other}`")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_provider_opens_a_directory_store() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = MeyemConfig::default();
        cfg.remote.provider = "mirror".into();
        cfg.remote.mirror_path = tmp.path().display().to_string();
        let store = open_store(&cfg).unwrap();
        assert!(store.list("/Camera1").unwrap().is_empty());
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let mut cfg = MeyemConfig::default();
        cfg.remote.provider = "ftp".into();
        let err = open_store(&cfg).err().unwrap();
        assert!(matches!(err.downcast_ref::<MeyemError>(), Some(MeyemError::Config(_))));
    }
}
