//! Error type shared by every layer of the orchestration
//!
//! An [`Error`] carries a [`ErrorKind`] describing which stage failed, a
//! context message, and an ordered list of underlying causes. A lock recovery
//! that fails to unlock produces a single error holding both the action
//! failure and the unlock failure.

use crate::lock::LockErrInfo;

/// Boxed error used for causes
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which stage of an operation produced the error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Download, unzip, version read or tool installation failed
    Setup,
    /// `terraform init` failed after its own retries
    Init,
    /// The action failed for a reason that may go away on retry
    Transient,
    /// The action failed because the state lock is held
    LockHeld,
    /// The requested output key does not exist
    MissingKey,
    /// The operation was cancelled while waiting or running
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Setup => "setup",
            ErrorKind::Init => "init",
            ErrorKind::Transient => "transient",
            ErrorKind::LockHeld => "lock held",
            ErrorKind::MissingKey => "missing key",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Error returned by all operations
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    lock: Option<LockErrInfo>,
    causes: Vec<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            lock: None,
            causes: Vec::new(),
        }
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Setup, message)
    }

    pub fn missing_key(key: &str) -> Self {
        Self::new(
            ErrorKind::MissingKey,
            format!("missing key {} from terraform output", key),
        )
    }

    /// Cancellation observed after `last` was returned by an attempt
    pub fn cancelled(last: Error) -> Self {
        Self::new(ErrorKind::Cancelled, "context got cancelled").with_cause(last)
    }

    /// Append a cause to the chain
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn with_lock(mut self, lock: LockErrInfo) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Wrap this error with additional context, keeping its kind and lock info
    pub fn context(self, message: impl Into<String>) -> Self {
        let kind = self.kind;
        let lock = self.lock.clone();
        Self {
            kind,
            message: message.into(),
            lock,
            causes: vec![Box::new(self)],
        }
    }

    /// Wrap this error as a different kind
    pub fn reclassify(self, kind: ErrorKind, message: impl Into<String>) -> Self {
        let lock = self.lock.clone();
        Self {
            kind,
            message: message.into(),
            lock,
            causes: vec![Box::new(self)],
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Lock information, if this error came from a held state lock
    pub fn lock_info(&self) -> Option<&LockErrInfo> {
        self.lock.as_ref()
    }

    pub fn causes(&self) -> impl Iterator<Item = &(dyn std::error::Error + Send + Sync + 'static)> {
        self.causes.iter().map(|c| c.as_ref())
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for (i, cause) in self.causes.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.causes
            .first()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
