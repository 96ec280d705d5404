//! Terraform process runner
//!
//! Each call spawns one `terraform` process in the module directory, waits for
//! it to exit, and captures its output. Cancellation stops the process: with
//! graceful shutdown enabled it is interrupted first and given the grace period
//! to release its state lock before being killed.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use tfrun_core::{GracefulShutdown, OutputMeta, Tool, ToolError, ToolResult};

use crate::error::{SetupError, SetupResult};

/// Runs the installed Terraform binary against one working directory
#[derive(Debug, Clone)]
pub struct TerraformExec {
    exec_path: PathBuf,
    working_dir: PathBuf,
}

impl TerraformExec {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        exec_path: impl Into<PathBuf>,
    ) -> SetupResult<Self> {
        let working_dir = working_dir.into();
        if !working_dir.is_dir() {
            return Err(SetupError::MissingWorkingDir(working_dir));
        }
        Ok(Self {
            exec_path: exec_path.into(),
            working_dir,
        })
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        command: &str,
        args: &[String],
        shutdown: GracefulShutdown,
    ) -> ToolResult<Output> {
        debug!(
            "running terraform {} {} in {}",
            command,
            args.join(" "),
            self.working_dir.display()
        );

        let child = Command::new(&self.exec_path)
            .arg(command)
            .args(args)
            .current_dir(&self.working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("CHECKPOINT_DISABLE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let pid = child.id();
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            output = &mut wait => output.map_err(|source| ToolError::Spawn {
                command: command.to_string(),
                source,
            })?,
            _ = cancel.cancelled() => {
                stop(pid, shutdown, wait).await;
                return Err(ToolError::Interrupted {
                    command: command.to_string(),
                });
            }
        };

        if !output.status.success() {
            return Err(ToolError::Failed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output)
    }
}

/// Stop a running process, interrupting it first when shutdown is enabled
async fn stop<F>(pid: Option<u32>, shutdown: GracefulShutdown, mut wait: Pin<&mut F>)
where
    F: Future<Output = std::io::Result<Output>>,
{
    #[cfg(unix)]
    {
        let Some(pid) = pid else {
            return;
        };
        if shutdown.enable {
            debug!(
                "interrupting terraform (pid {}), grace period {:?}",
                pid, shutdown.period
            );
            send_signal(pid, libc::SIGINT);
            if tokio::time::timeout(shutdown.period, wait.as_mut())
                .await
                .is_ok()
            {
                return;
            }
        }
        send_signal(pid, libc::SIGKILL);
        let _ = wait.await;
    }

    // The child is killed when `wait` is dropped
    #[cfg(not(unix))]
    {
        let _ = (pid, shutdown, wait.as_mut());
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) {
    if let Ok(pid) = libc::pid_t::try_from(pid) {
        // SAFETY: pid belongs to a child spawned by us that has not been reaped
        unsafe {
            libc::kill(pid, signal);
        }
    }
}

fn base_args() -> Vec<String> {
    vec!["-no-color".to_string(), "-input=false".to_string()]
}

#[async_trait]
impl Tool for TerraformExec {
    async fn init(&self, cancel: &CancellationToken, backend_config: &Path) -> ToolResult<()> {
        let mut args = base_args();
        args.push("-upgrade".to_string());
        args.push(format!("-backend-config={}", backend_config.display()));
        self.run(cancel, "init", &args, GracefulShutdown::default())
            .await
            .map(|_| ())
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        shutdown: GracefulShutdown,
    ) -> ToolResult<()> {
        let mut args = base_args();
        args.push("-auto-approve".to_string());
        self.run(cancel, "apply", &args, shutdown).await.map(|_| ())
    }

    async fn destroy(
        &self,
        cancel: &CancellationToken,
        shutdown: GracefulShutdown,
    ) -> ToolResult<()> {
        let mut args = base_args();
        args.push("-auto-approve".to_string());
        self.run(cancel, "destroy", &args, shutdown)
            .await
            .map(|_| ())
    }

    async fn output(&self, cancel: &CancellationToken) -> ToolResult<HashMap<String, OutputMeta>> {
        let args = vec!["-no-color".to_string(), "-json".to_string()];
        let output = self
            .run(cancel, "output", &args, GracefulShutdown::default())
            .await?;

        serde_json::from_slice(&output.stdout).map_err(|e| ToolError::Output {
            command: "output".to_string(),
            message: e.to_string(),
        })
    }

    async fn force_unlock(&self, cancel: &CancellationToken, lock_id: &str) -> ToolResult<()> {
        let args = vec![
            "-no-color".to_string(),
            "-force".to_string(),
            lock_id.to_string(),
        ];
        self.run(cancel, "force-unlock", &args, GracefulShutdown::default())
            .await
            .map(|_| ())
    }
}
