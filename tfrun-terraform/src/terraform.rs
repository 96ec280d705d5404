//! Terraform workspace: module package, installed binary, and module operations

use std::path::{Path, PathBuf};

use log::info;
use tokio_util::sync::CancellationToken;

use tfrun_core::{ApplyOptions, DestroyOptions, Error, Orchestrator, OutputOptions, Result};

use crate::error::SetupError;
use crate::exec::TerraformExec;
use crate::install::{DEFAULT_RELEASES_URL, Installer, binary_name, read_version};
use crate::package::prepare_package;

/// Options for [`Terraform::new`]
#[derive(Debug, Clone)]
pub struct NewTerraformOptions {
    /// Directory the package is unpacked into (recreated on setup)
    pub root_path: PathBuf,
    /// Version file, relative to `root_path`
    pub version_file_path: PathBuf,
    /// URL of the zip package holding the modules
    pub package_url: String,
    /// File name the package is downloaded to inside `root_path`
    pub package_dest_name: String,
    /// Terraform releases mirror
    pub releases_url: String,
}

impl NewTerraformOptions {
    pub fn new(
        root_path: impl Into<PathBuf>,
        version_file_path: impl Into<PathBuf>,
        package_url: impl Into<String>,
        package_dest_name: impl Into<String>,
    ) -> Self {
        Self {
            root_path: root_path.into(),
            version_file_path: version_file_path.into(),
            package_url: package_url.into(),
            package_dest_name: package_dest_name.into(),
            releases_url: DEFAULT_RELEASES_URL.to_string(),
        }
    }

    pub fn with_releases_url(mut self, releases_url: impl Into<String>) -> Self {
        self.releases_url = releases_url.into();
        self
    }
}

/// Files staged into a module directory before each operation
#[derive(Debug, Clone, Default)]
pub struct ModuleOptions {
    /// Module directory, relative to the workspace root
    pub module_path: PathBuf,
    pub backend_config_file_name: String,
    pub backend_config: Vec<u8>,
    pub variable_file_name: String,
    pub variable_payload: Vec<u8>,
}

/// A prepared workspace with an installed Terraform binary
#[derive(Debug, Clone)]
pub struct Terraform {
    root_path: PathBuf,
    exec_path: PathBuf,
}

impl Terraform {
    /// Recreate the root directory, unpack the module package into it, and
    /// install the Terraform version named by the package's version file
    pub async fn new(mut options: NewTerraformOptions) -> Result<Self> {
        options.root_path = absolute_path(options.root_path);
        let exec_path = initialize(&options)
            .await
            .map_err(|e| e.context("failed to initialize terraform"))?;
        Ok(Self::with_installed(options.root_path, exec_path))
    }

    /// Use an already prepared root directory and Terraform binary.
    ///
    /// Relative paths are resolved against the current directory.
    pub fn with_installed(root_path: impl Into<PathBuf>, exec_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: absolute_path(root_path.into()),
            exec_path: absolute_path(exec_path.into()),
        }
    }

    /// Use a root directory prepared by an earlier [`Terraform::new`]
    pub fn installed_in(root_path: impl Into<PathBuf>) -> Self {
        let root_path = root_path.into();
        let exec_path = root_path.join(binary_name());
        Self::with_installed(root_path, exec_path)
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn exec_path(&self) -> &Path {
        &self.exec_path
    }

    /// Remove the whole workspace; succeeds if it is already gone
    pub async fn clean(&self) -> Result<()> {
        remove_dir_if_exists(&self.root_path)
            .await
            .map_err(|e| setup_error("failed to clean up workspace directory", e))
    }

    pub async fn apply_module(
        &self,
        cancel: &CancellationToken,
        module: &ModuleOptions,
        options: &ApplyOptions,
    ) -> Result<()> {
        let (orchestrator, backend_path) = self.prepare_module(module).await?;
        orchestrator
            .init_and_apply(cancel, &backend_path, options)
            .await
            .map_err(|e| {
                e.context(format!(
                    "error applying terraform module {}",
                    module.module_path.display()
                ))
            })
    }

    pub async fn destroy_module(
        &self,
        cancel: &CancellationToken,
        module: &ModuleOptions,
        options: &DestroyOptions,
    ) -> Result<()> {
        let (orchestrator, backend_path) = self.prepare_module(module).await?;
        orchestrator
            .init_and_destroy(cancel, &backend_path, options)
            .await
            .map_err(|e| {
                e.context(format!(
                    "error destroying terraform module {}",
                    module.module_path.display()
                ))
            })
    }

    /// Read one output value; a missing key is an error
    pub async fn retrieve_module_output(
        &self,
        cancel: &CancellationToken,
        key: &str,
        module: &ModuleOptions,
        options: &OutputOptions,
    ) -> Result<serde_json::Value> {
        self.retrieve_output(cancel, key, module, false, options)
            .await?
            .ok_or_else(|| Error::missing_key(key))
    }

    /// Read one output value, returning `None` if the module has no outputs at all
    pub async fn retrieve_module_output_or_nil(
        &self,
        cancel: &CancellationToken,
        key: &str,
        module: &ModuleOptions,
        options: &OutputOptions,
    ) -> Result<Option<serde_json::Value>> {
        self.retrieve_output(cancel, key, module, true, options)
            .await
    }

    async fn retrieve_output(
        &self,
        cancel: &CancellationToken,
        key: &str,
        module: &ModuleOptions,
        ignore_empty_output: bool,
        options: &OutputOptions,
    ) -> Result<Option<serde_json::Value>> {
        let (orchestrator, backend_path) = self.prepare_module(module).await?;
        let meta = orchestrator
            .init_and_output(cancel, &backend_path, key, ignore_empty_output, options)
            .await
            .map_err(|e| {
                e.context(format!(
                    "error retrieving output of terraform module {}",
                    module.module_path.display()
                ))
            })?;
        Ok(meta.map(|m| m.value))
    }

    /// Write the backend config and variables into the module directory and
    /// build an orchestrator for it
    async fn prepare_module(
        &self,
        module: &ModuleOptions,
    ) -> Result<(Orchestrator<TerraformExec>, PathBuf)> {
        let module_dir = self.root_path.join(&module.module_path);
        let backend_path = stage_module_files(&module_dir, module).await?;

        let exec = TerraformExec::new(&module_dir, &self.exec_path)
            .map_err(|e| setup_error("failed to create terraform exec", e))?;
        Ok((Orchestrator::new(exec), backend_path))
    }
}

/// Write the staged files, returning the backend config path
async fn stage_module_files(module_dir: &Path, module: &ModuleOptions) -> Result<PathBuf> {
    let backend_path = module_dir.join(&module.backend_config_file_name);
    tokio::fs::write(&backend_path, &module.backend_config)
        .await
        .map_err(|e| {
            setup_error(
                format!(
                    "failed to write terraform backend config to {}",
                    backend_path.display()
                ),
                e,
            )
        })?;

    let variable_path = module_dir.join(&module.variable_file_name);
    tokio::fs::write(&variable_path, &module.variable_payload)
        .await
        .map_err(|e| {
            setup_error(
                format!(
                    "failed to write terraform variables to {}",
                    variable_path.display()
                ),
                e,
            )
        })?;

    Ok(backend_path)
}

async fn initialize(options: &NewTerraformOptions) -> Result<PathBuf> {
    let root = &options.root_path;

    remove_dir_if_exists(root)
        .await
        .map_err(|e| setup_error("failed to clean up workspace directory", e))?;
    create_root(root)
        .await
        .map_err(|e| setup_error("failed to create workspace directory", e))?;

    let client = reqwest::Client::new();
    prepare_package(&client, &options.package_url, root, &options.package_dest_name)
        .await
        .map_err(|e| setup_error("failed to prepare the terraform modules", e))?;

    let version = read_version(&root.join(&options.version_file_path))
        .await
        .map_err(|e| setup_error("invalid terraform version in module package", e))?;

    let exec_path = Installer::new(client, options.releases_url.clone())
        .install(root, &version)
        .await
        .map_err(|e| setup_error(format!("failed to install terraform {}", version), e))?;

    info!(
        "workspace {} ready with terraform {}",
        root.display(),
        version
    );
    Ok(exec_path)
}

async fn create_root(root: &Path) -> std::result::Result<(), SetupError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o750);
    builder.create(root).await.map_err(SetupError::io(root))
}

/// Remove a directory tree, treating a missing directory as success
pub async fn remove_dir_if_exists(path: &Path) -> std::result::Result<(), SetupError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SetupError::io(path)(e)),
    }
}

fn setup_error(
    message: impl Into<String>,
    cause: impl std::error::Error + Send + Sync + 'static,
) -> Error {
    Error::setup(message).with_cause(cause)
}

/// Resolve `path` against the current directory; kept as given if that fails
fn absolute_path(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}
