use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use vmforge_common::config::default_type_names;
use vmforge_common::{DirectoryTemplateStore, FleetConfig, FleetError};
use vmforge_orchestrator::logger::{self, LogLevel};
use vmforge_orchestrator::{
    create_default_fleet, destroy_managed, with_session, Provisioner, Settings,
};
use vmforge_providers::{ComputeApi, TrueNasClient};

#[derive(Parser)]
#[command(name = "vmforge")]
#[command(about = "Provision and decommission VMs on a TrueNAS compute fabric", long_about = None)]
struct Cli {
    /// Action to perform
    #[arg(value_enum)]
    action: Action,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Base directory holding templates/vms and templates/devices
    #[arg(long)]
    templates_dir: Option<PathBuf>,

    /// Logging level
    #[arg(long, value_enum, ignore_case = true, default_value = "INFO")]
    log_level: LogLevel,

    /// Name prefix of VMs to destroy (repeatable; defaults to the managed types)
    #[arg(long = "prefix")]
    prefixes: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    Create,
    Destroy,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.log_level);

    match run(cli).await {
        Ok(()) => {
            info!("Operation completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.downcast_ref::<FleetError>() {
                Some(FleetError::Interrupted) => info!("Operation cancelled by user"),
                _ => error!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env().map_err(FleetError::from)?;
    let config = FleetConfig::load(&cli.config).map_err(FleetError::from)?;
    let templates_dir = cli.templates_dir.unwrap_or_else(|| PathBuf::from("."));
    let templates = DirectoryTemplateStore::load(templates_dir).map_err(FleetError::from)?;
    info!(base = %templates.base_path().display(), "Loaded templates");

    let url = settings.endpoint();
    let client = TrueNasClient::connect(&url)
        .await
        .map_err(|e| FleetError::Connection(format!("{:#}", e)))?;
    info!(url = %url, "Connected");
    let api: Arc<dyn ComputeApi> = Arc::new(client);

    let action = cli.action;
    let credentials = settings.credentials.clone();
    let vnc_password = settings.vnc_password.clone();
    let prefixes = if cli.prefixes.is_empty() {
        default_type_names()
    } else {
        cli.prefixes
    };

    with_session(api, &credentials, |api| async move {
        let work = async {
            match action {
                Action::Create => {
                    let provisioner =
                        Provisioner::new(api.as_ref(), &templates, &vnc_password);
                    for report in create_default_fleet(&provisioner, &config).await? {
                        if report.is_clean() {
                            info!(
                                vm_type = %report.vm_type,
                                created = report.created.len(),
                                "Batch complete"
                            );
                        } else {
                            warn!(
                                vm_type = %report.vm_type,
                                created = report.created.len(),
                                failed = report.failed.len(),
                                "Batch completed with failures"
                            );
                        }
                    }
                }
                Action::Destroy => {
                    let report = destroy_managed(api.as_ref(), &prefixes).await?;
                    info!(
                        matched = report.matched.len(),
                        deleted = report.deleted.len(),
                        failures = report.failures.len(),
                        "Decommission complete"
                    );
                }
            }
            Ok::<(), FleetError>(())
        };

        tokio::select! {
            outcome = work => outcome,
            _ = tokio::signal::ctrl_c() => Err(FleetError::Interrupted),
        }
    })
    .await?;

    Ok(())
}
