use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeyemError {
    #[error("config invalid: {0}")]
    Config(String),
    #[error("remote store failed on {path}: {reason}")]
    Remote { path: String, reason: String },
    #[error("encode failed for {target}: {reason}")]
    Encode { target: String, reason: String },
    #[error("filesystem operation failed on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another meyem run holds the lock at {}", .0.display())]
    Locked(PathBuf),
}

impl MeyemError {
    pub fn remote(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Remote {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Encode {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Locked(_) => ErrorCode::E001Locked,
            Self::Config(_) => ErrorCode::E002ConfigInvalid,
            Self::Remote { .. } => ErrorCode::E003RemoteFailed,
            Self::Encode { .. } => ErrorCode::E004EncodeFailed,
            Self::Filesystem { .. } => ErrorCode::E005FilesystemFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E003RemoteFailed,
    E004EncodeFailed,
    E005FilesystemFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003RemoteFailed => "E003_REMOTE_FAILED",
            Self::E004EncodeFailed => "E004_ENCODE_FAILED",
            Self::E005FilesystemFailed => "E005_FILESYSTEM_FAILED",
        }
    }
}

/// Best-effort classification of an `anyhow` chain, used for warn lines.
pub fn code_for(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MeyemError>())
        .map(MeyemError::code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn code_for_finds_typed_error_under_context() {
        let err = Err::<(), _>(MeyemError::encode("2024-03-05_1.mp4", "exit status 1"))
            .context("building 2024-03-05")
            .unwrap_err();
        assert_eq!(code_for(&err), Some(ErrorCode::E004EncodeFailed));
        assert_eq!(ErrorCode::E004EncodeFailed.as_str(), "E004_ENCODE_FAILED");
    }

    #[test]
    fn code_for_is_none_for_untyped_errors() {
        let err = anyhow::anyhow!("plain failure");
        assert_eq!(code_for(&err), None);
    }
}
