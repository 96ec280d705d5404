//! Orchestrator - run Terraform actions with retries and state lock recovery
//!
//! Every operation initializes the working directory first and then runs its
//! action inside [`retry`]. For apply and destroy, a failed attempt is
//! classified: when it failed on a state lock older than the configured
//! expiration, the lock is force-released so the next attempt can take it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};
use crate::lock::{Disposition, LockErrInfo, classify};
use crate::retry::{RetryPolicy, retry};
use crate::tool::{GracefulShutdown, OutputMeta, Tool, ToolError};

/// Retry policy for `terraform init`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOptions {
    pub retry: RetryPolicy,
}

/// Options for apply and destroy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOptions {
    /// Retry policy for the action itself
    pub retry: RetryPolicy,
    /// Grace period after interrupting a cancelled action
    pub graceful_shutdown_period: Duration,
    /// Age after which a held state lock is force-released (zero disables)
    pub lock_expiration: Duration,
    pub init: InitOptions,
}

pub type ApplyOptions = ActionOptions;
pub type DestroyOptions = ActionOptions;

/// Options for reading outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub retry: RetryPolicy,
    pub init: InitOptions,
}

/// Mutating Terraform actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Apply,
    Destroy,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Apply => write!(f, "apply"),
            Action::Destroy => write!(f, "destroy"),
        }
    }
}

/// Runs operations against a single working directory through a [`Tool`]
pub struct Orchestrator<T: Tool> {
    tool: T,
    clock: fn() -> DateTime<Utc>,
}

impl<T: Tool> Orchestrator<T> {
    pub fn new(tool: T) -> Self {
        Self {
            tool,
            clock: Utc::now,
        }
    }

    /// Replace the clock used to compute lock age
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// Run `terraform init` with its own retry policy
    pub async fn init(
        &self,
        cancel: &CancellationToken,
        backend_config: &Path,
        options: &InitOptions,
    ) -> Result<()> {
        let result = retry(cancel, options.retry, move |cancel| async move {
            self.tool
                .init(&cancel, backend_config)
                .await
                .map_err(|e| attempt_error("init", e))
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e.context("failed to init terraform")),
            Err(e) => Err(e.reclassify(ErrorKind::Init, "failed to init terraform")),
        }
    }

    pub async fn init_and_apply(
        &self,
        cancel: &CancellationToken,
        backend_config: &Path,
        options: &ApplyOptions,
    ) -> Result<()> {
        self.init_and_run(cancel, backend_config, Action::Apply, options)
            .await
    }

    pub async fn init_and_destroy(
        &self,
        cancel: &CancellationToken,
        backend_config: &Path,
        options: &DestroyOptions,
    ) -> Result<()> {
        self.init_and_run(cancel, backend_config, Action::Destroy, options)
            .await
    }

    /// Initialize and read one output.
    ///
    /// With `ignore_empty_output`, an empty output map yields `Ok(None)`
    /// instead of a missing-key error.
    pub async fn init_and_output(
        &self,
        cancel: &CancellationToken,
        backend_config: &Path,
        key: &str,
        ignore_empty_output: bool,
        options: &OutputOptions,
    ) -> Result<Option<OutputMeta>> {
        self.init(cancel, backend_config, &options.init).await?;

        let outputs = retry(cancel, options.retry, move |cancel| async move {
            self.tool
                .output(&cancel)
                .await
                .map_err(|e| attempt_error("output", e))
        })
        .await
        .map_err(|e| e.context("failed to get terraform output"))?;

        select_output(outputs, key, ignore_empty_output)
    }

    async fn init_and_run(
        &self,
        cancel: &CancellationToken,
        backend_config: &Path,
        action: Action,
        options: &ActionOptions,
    ) -> Result<()> {
        self.init(cancel, backend_config, &options.init).await?;

        retry(cancel, options.retry, move |cancel| async move {
            self.attempt(&cancel, action, options).await
        })
        .await
        .map_err(|e| e.context(format!("failed to {} terraform config", action)))?;

        info!("terraform {} succeeded", action);
        Ok(())
    }

    /// One attempt of an action, with lock recovery on stale locks
    async fn attempt(
        &self,
        cancel: &CancellationToken,
        action: Action,
        options: &ActionOptions,
    ) -> Result<()> {
        let shutdown = GracefulShutdown::enabled(options.graceful_shutdown_period);
        let result = match action {
            Action::Apply => self.tool.apply(cancel, shutdown).await,
            Action::Destroy => self.tool.destroy(cancel, shutdown).await,
        };
        let err = match result {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let disposition = classify(
            &err.to_string(),
            err.is_interrupted(),
            options.lock_expiration,
            (self.clock)(),
        );

        match disposition {
            Disposition::Transient | Disposition::Terminal => Err(attempt_error(action, err)),
            Disposition::LockHeld(lock) => {
                debug!(
                    "state lock {} held by {} since {}, not expired yet",
                    lock.id, lock.who, lock.created
                );
                Err(Error::new(
                    ErrorKind::LockHeld,
                    format!("terraform {} attempt failed", action),
                )
                .with_cause(err)
                .with_lock(lock))
            }
            Disposition::LockRecoverable(lock) => {
                Err(self.recover_lock(cancel, action, err, lock).await)
            }
        }
    }

    /// Force-release a stale lock and report the failed attempt
    async fn recover_lock(
        &self,
        cancel: &CancellationToken,
        action: Action,
        err: ToolError,
        lock: LockErrInfo,
    ) -> Error {
        warn!(
            "force-unlocking state lock {} on {} held by {} ({}) since {}",
            lock.id, lock.path, lock.who, lock.operation, lock.created
        );

        let mut combined = Error::new(
            ErrorKind::LockHeld,
            format!(
                "terraform {} failed on expired state lock {}",
                action, lock.id
            ),
        )
        .with_cause(err);

        if let Err(unlock_err) = self.tool.force_unlock(cancel, &lock.id).await {
            warn!(
                "failed to force-unlock state lock {}: {}",
                lock.id, unlock_err
            );
            combined = combined.with_cause(
                Error::new(
                    ErrorKind::Transient,
                    format!("failed to force-unlock state lock {}", lock.id),
                )
                .with_cause(unlock_err),
            );
        }

        combined.with_lock(lock)
    }
}

/// Pick one key out of a full output map
pub fn select_output(
    mut outputs: HashMap<String, OutputMeta>,
    key: &str,
    ignore_empty_output: bool,
) -> Result<Option<OutputMeta>> {
    if ignore_empty_output && outputs.is_empty() {
        return Ok(None);
    }
    outputs
        .remove(key)
        .map(Some)
        .ok_or_else(|| Error::missing_key(key))
}

fn attempt_error(command: impl fmt::Display, err: ToolError) -> Error {
    let kind = if err.is_interrupted() {
        ErrorKind::Cancelled
    } else {
        ErrorKind::Transient
    };
    Error::new(kind, format!("terraform {} attempt failed", command)).with_cause(err)
}
