//! tfrun Core
//!
//! Retry and state lock recovery around Terraform invocations.
//!
//! # Overview
//!
//! - **retry**: bounded retry with a fixed interval that stops waiting when
//!   the operation is cancelled
//! - **lock**: detection of "Error acquiring the state lock" failures and
//!   parsing of their `Lock Info:` block
//! - **orchestrator**: init-then-act operations (apply, destroy, output) that
//!   force-release stale locks between attempts
//! - **tool**: the trait a Terraform runner implements
//!
//! # Example
//!
//! ```ignore
//! use tfrun_core::{ApplyOptions, Orchestrator, RetryPolicy};
//!
//! let orchestrator = Orchestrator::new(runner);
//! let options = ApplyOptions {
//!     retry: RetryPolicy::new(3, Duration::from_secs(10)),
//!     lock_expiration: Duration::from_secs(30 * 60),
//!     ..Default::default()
//! };
//! orchestrator.init_and_apply(&cancel, &backend_path, &options).await?;
//! ```

pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod retry;
pub mod tool;

pub use error::{BoxError, Error, ErrorKind, Result};
pub use lock::{Disposition, LockErrInfo, classify, extract_lock_info};
pub use orchestrator::{
    Action, ActionOptions, ApplyOptions, DestroyOptions, InitOptions, Orchestrator, OutputOptions,
    select_output,
};
pub use retry::{RetryPolicy, retry};
pub use tool::{GracefulShutdown, OutputMeta, Tool, ToolError, ToolResult};

pub use tokio_util::sync::CancellationToken;
