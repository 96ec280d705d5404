//! tfrun Terraform
//!
//! Concrete Terraform support for tfrun: downloading a module package,
//! installing the Terraform release it pins, and running module operations
//! through the retrying orchestrator from `tfrun-core`.
//!
//! # Example
//!
//! ```ignore
//! use tfrun_terraform::{ModuleOptions, NewTerraformOptions, Terraform};
//!
//! let terraform = Terraform::new(NewTerraformOptions::new(
//!     "/var/lib/tfrun",
//!     "TF_VERSION",
//!     "https://artifacts.example.com/modules.zip",
//!     "modules.zip",
//! ))
//! .await?;
//! terraform.apply_module(&cancel, &module, &ApplyOptions::default()).await?;
//! ```

pub mod error;
pub mod exec;
pub mod install;
pub mod package;
pub mod terraform;

pub use error::{SetupError, SetupResult};
pub use exec::TerraformExec;
pub use install::{DEFAULT_RELEASES_URL, Installer, TerraformVersion, binary_name, read_version};
pub use package::prepare_package;
pub use terraform::{ModuleOptions, NewTerraformOptions, Terraform};
