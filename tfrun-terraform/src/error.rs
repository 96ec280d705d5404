//! Errors raised while preparing a Terraform workspace

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from downloading, unpacking and installing
#[derive(Debug, Error)]
pub enum SetupError {
    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP request failed or returned an error status
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Zip archive could not be read
    #[error("invalid archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Archive entry would be written outside the destination
    #[error("archive entry escapes destination directory: {0}")]
    UnsafeEntry(String),

    /// Version file content is not a release version
    #[error("invalid terraform version {0:?}")]
    InvalidVersion(String),

    /// No Terraform release exists for this platform
    #[error("unsupported platform {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Release checksums do not list the archive
    #[error("no checksum for {0} in release checksums")]
    MissingChecksum(String),

    /// Downloaded archive does not match its published checksum
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Module working directory is missing
    #[error("working directory {} does not exist", .0.display())]
    MissingWorkingDir(PathBuf),

    /// Blocking task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(String),
}

impl SetupError {
    pub fn io(path: &Path) -> impl FnOnce(std::io::Error) -> SetupError + '_ {
        move |source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn http(url: &str) -> impl FnOnce(reqwest::Error) -> SetupError + '_ {
        move |source| SetupError::Http {
            url: url.to_string(),
            source,
        }
    }
}

pub type SetupResult<T> = Result<T, SetupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_display() {
        let err = SetupError::InvalidVersion("latest".to_string());
        assert_eq!(err.to_string(), "invalid terraform version \"latest\"");

        let err = SetupError::io(Path::new("/tmp/root/pkg.zip"))(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        assert_eq!(err.to_string(), "I/O error on /tmp/root/pkg.zip: not found");
    }
}
