//! Tool - trait abstracting the Terraform commands the orchestrator needs
//!
//! The orchestrator never spawns processes itself. A [`Tool`] runs one
//! Terraform command per call against a single working directory.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from a single Terraform invocation
#[derive(Debug, Error)]
pub enum ToolError {
    /// The process could not be started
    #[error("failed to run terraform {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("terraform {command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The process was stopped because the operation was cancelled
    #[error("terraform {command} was interrupted")]
    Interrupted { command: String },

    /// The command output could not be decoded
    #[error("failed to parse terraform {command} output: {message}")]
    Output { command: String, message: String },
}

impl ToolError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ToolError::Interrupted { .. })
    }
}

/// Result type for tool invocations
pub type ToolResult<T> = Result<T, ToolError>;

/// One entry of `terraform output -json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMeta {
    #[serde(default)]
    pub sensitive: bool,
    #[serde(rename = "type", default)]
    pub value_type: serde_json::Value,
    pub value: serde_json::Value,
}

/// Interrupt-then-wait behaviour for long-running commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GracefulShutdown {
    /// Send an interrupt instead of killing immediately
    pub enable: bool,
    /// How long to wait after the interrupt before killing
    pub period: Duration,
}

impl GracefulShutdown {
    pub fn enabled(period: Duration) -> Self {
        Self {
            enable: true,
            period,
        }
    }
}

/// Terraform commands run by the orchestrator
///
/// Implementations must observe `cancel`: when it fires, a running command is
/// stopped (honouring [`GracefulShutdown`] where given) and
/// [`ToolError::Interrupted`] is returned.
#[async_trait]
pub trait Tool: Send + Sync {
    /// `terraform init -upgrade -backend-config=<backend_config>`
    async fn init(&self, cancel: &CancellationToken, backend_config: &Path) -> ToolResult<()>;

    /// `terraform apply -auto-approve`
    async fn apply(&self, cancel: &CancellationToken, shutdown: GracefulShutdown)
    -> ToolResult<()>;

    /// `terraform destroy -auto-approve`
    async fn destroy(
        &self,
        cancel: &CancellationToken,
        shutdown: GracefulShutdown,
    ) -> ToolResult<()>;

    /// `terraform output -json`
    async fn output(&self, cancel: &CancellationToken) -> ToolResult<HashMap<String, OutputMeta>>;

    /// `terraform force-unlock -force <lock_id>`
    async fn force_unlock(&self, cancel: &CancellationToken, lock_id: &str) -> ToolResult<()>;
}
