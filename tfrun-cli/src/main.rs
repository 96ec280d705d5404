mod settings;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::warn;
use tokio_util::sync::CancellationToken;

use tfrun_core::{Error, ErrorKind};
use tfrun_terraform::{DEFAULT_RELEASES_URL, ModuleOptions, NewTerraformOptions, Terraform};

use settings::Settings;

#[derive(Parser)]
#[command(name = "tfrun")]
#[command(about = "Run Terraform modules with retries and state lock recovery", long_about = None)]
struct Cli {
    /// Workspace directory the module package is unpacked into
    #[arg(long, global = true, default_value = ".tfrun")]
    root: PathBuf,

    /// URL of the module package; when omitted, the existing workspace is reused
    #[arg(long, global = true)]
    package_url: Option<String>,

    /// File name the package is downloaded to inside the workspace
    #[arg(long, global = true, default_value = "modules.zip")]
    package_name: String,

    /// Version file inside the package, relative to the workspace
    #[arg(long, global = true, default_value = "TF_VERSION")]
    version_file: PathBuf,

    /// Terraform releases mirror
    #[arg(long, global = true, default_value = DEFAULT_RELEASES_URL)]
    releases_url: String,

    /// JSON file with retry and lock policy defaults
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a module
    Apply {
        #[command(flatten)]
        module: ModuleArgs,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Destroy the resources of a module
    Destroy {
        #[command(flatten)]
        module: ModuleArgs,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Print one output value of a module as JSON
    Output {
        /// Output name
        key: String,

        /// Print null instead of failing when the module has no outputs
        #[arg(long)]
        allow_empty: bool,

        #[command(flatten)]
        module: ModuleArgs,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Remove the workspace directory
    Clean,
}

#[derive(Args)]
struct ModuleArgs {
    /// Module directory, relative to the workspace
    #[arg(long)]
    module: PathBuf,

    /// Local backend config file copied into the module
    #[arg(long)]
    backend_config: Option<PathBuf>,

    /// File name of the backend config inside the module
    #[arg(long, default_value = "backend.tfvars")]
    backend_config_name: String,

    /// Local variables file copied into the module
    #[arg(long)]
    var_file: Option<PathBuf>,

    /// File name of the variables file inside the module
    #[arg(long, default_value = "terraform.tfvars.json")]
    var_file_name: String,
}

#[derive(Args)]
struct PolicyArgs {
    /// Retries after the first failed attempt
    #[arg(long)]
    retries: Option<i64>,

    /// Seconds between attempts
    #[arg(long)]
    retry_interval: Option<u64>,

    /// Retries for terraform init
    #[arg(long)]
    init_retries: Option<i64>,

    /// Seconds between init attempts
    #[arg(long)]
    init_retry_interval: Option<u64>,

    /// Seconds after which a held state lock is force-released (0 disables)
    #[arg(long)]
    lock_expiration: Option<u64>,

    /// Seconds a cancelled apply or destroy gets to exit after an interrupt
    #[arg(long)]
    graceful_shutdown_period: Option<u64>,
}

impl PolicyArgs {
    fn to_settings(&self) -> Settings {
        Settings {
            retries: self.retries,
            retry_interval: self.retry_interval,
            init_retries: self.init_retries,
            init_retry_interval: self.init_retry_interval,
            lock_expiration: self.lock_expiration,
            graceful_shutdown_period: self.graceful_shutdown_period,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling the running operation");
            trigger.cancel();
        }
    });

    let result = run(cli, &cancel).await;

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<(), String> {
    let file_settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match &cli.command {
        Commands::Clean => run_clean(&cli.root).await,
        Commands::Apply { module, policy } => {
            let options = policy.to_settings().or(file_settings).action_options();
            let module = load_module(module)?;
            let terraform = open_workspace(&cli).await?;
            terraform
                .apply_module(cancel, &module, &options)
                .await
                .map_err(describe)?;
            println!("{}", "Apply complete.".green().bold());
            Ok(())
        }
        Commands::Destroy { module, policy } => {
            let options = policy.to_settings().or(file_settings).action_options();
            let module = load_module(module)?;
            let terraform = open_workspace(&cli).await?;
            terraform
                .destroy_module(cancel, &module, &options)
                .await
                .map_err(describe)?;
            println!("{}", "Destroy complete.".green().bold());
            Ok(())
        }
        Commands::Output {
            key,
            allow_empty,
            module,
            policy,
        } => {
            let options = policy.to_settings().or(file_settings).output_options();
            let module = load_module(module)?;
            let terraform = open_workspace(&cli).await?;
            let value = if *allow_empty {
                terraform
                    .retrieve_module_output_or_nil(cancel, key, &module, &options)
                    .await
                    .map_err(describe)?
                    .unwrap_or(serde_json::Value::Null)
            } else {
                terraform
                    .retrieve_module_output(cancel, key, &module, &options)
                    .await
                    .map_err(describe)?
            };
            let rendered = serde_json::to_string_pretty(&value)
                .map_err(|e| format!("Failed to render output {}: {}", key, e))?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

async fn run_clean(root: &Path) -> Result<(), String> {
    Terraform::installed_in(root)
        .clean()
        .await
        .map_err(describe)?;
    println!("{}", format!("Removed {}", root.display()).green());
    Ok(())
}

/// Prepare a fresh workspace when a package URL is given, otherwise reuse
/// the one already in the root directory
async fn open_workspace(cli: &Cli) -> Result<Terraform, String> {
    let Some(package_url) = &cli.package_url else {
        let terraform = Terraform::installed_in(&cli.root);
        if !terraform.exec_path().is_file() {
            return Err(format!(
                "No terraform installed in {}; pass --package-url to prepare the workspace",
                cli.root.display()
            ));
        }
        return Ok(terraform);
    };

    println!("{}", "Preparing workspace...".cyan());
    let options = NewTerraformOptions::new(
        cli.root.clone(),
        &cli.version_file,
        package_url,
        &cli.package_name,
    )
    .with_releases_url(&cli.releases_url);
    Terraform::new(options).await.map_err(describe)
}

fn load_module(args: &ModuleArgs) -> Result<ModuleOptions, String> {
    Ok(ModuleOptions {
        module_path: args.module.clone(),
        backend_config_file_name: args.backend_config_name.clone(),
        backend_config: read_optional(args.backend_config.as_deref())?,
        variable_file_name: args.var_file_name.clone(),
        variable_payload: read_optional(args.var_file.as_deref())?,
    })
}

fn read_optional(path: Option<&Path>) -> Result<Vec<u8>, String> {
    match path {
        Some(path) => {
            std::fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
        }
        None => Ok(Vec::new()),
    }
}

/// Render an error, naming the lock holder when a state lock is involved
fn describe(err: Error) -> String {
    match (err.kind(), err.lock_info()) {
        (ErrorKind::LockHeld, Some(lock)) => format!(
            "{}\n  lock {} held by {} ({}) since {}",
            err, lock.id, lock.who, lock.operation, lock.created
        ),
        _ => err.to_string(),
    }
}
