/*
* Clone Manager Command Line Interface
* ------------------------------------
* @project: vm-clone-manager
*
* Command Structure:
* ---------------
* vm-clone
* ├── clone   --vm-name X     // resolve X, clone it, wait for the task
* ├── cleanup --vm-name X     // delete every VM called X, report per VM
* └── init    [--force]       // write config/default.toml
*
* Global flags (--cluster, --username, --password, --config, --json, -v)
* override whatever the config files and environment said.
*
* Exit Codes:
* ---------
* 0 - done
* 1 - failed (error kind and detail printed to stderr)
* 2 - cleanup ran but some VMs could not be deleted
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{generate_default_config, Settings};
use crate::core::PrismClient;
use crate::errors::CloneError;
use crate::orchestrator::{CleanupReport, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "vm-clone")]
#[command(about = "Clone VMs on a Prism cluster and clean the clones up again", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml / local.toml
    #[arg(short, long, value_name = "CONFIG_DIR", global = true)]
    pub config: Option<PathBuf>,

    /// Cluster address (overrides cluster.host)
    #[arg(long, alias = "cluster-ip", value_name = "HOST", global = true)]
    pub cluster: Option<String>,

    #[arg(long, global = true)]
    pub username: Option<String>,

    #[arg(long, env = "VM_CLONE_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Print results as JSON (for provisioning tooling)
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clone a VM
    Clone {
        #[arg(long)]
        vm_name: String,
    },
    /// Delete all VMs with the given name
    Cleanup {
        #[arg(long)]
        vm_name: String,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(cli: Cli) -> ExitCode {
    match execute(&cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            ExitCode::from(1)
        }
    }
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<CloneError>() {
        Some(clone_err) => eprintln!(
            "{} {}: {}",
            "✗".red(),
            clone_err.kind().red().bold(),
            clone_err
        ),
        None => eprintln!("{} {:#}", "✗".red(), err),
    }
}

async fn execute(cli: &Cli) -> anyhow::Result<ExitCode> {
    if let Commands::Init { force } = cli.command {
        handle_init_command(cli.config.clone(), force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let settings = load_settings(cli)?;
    let cancel = cancel_on_ctrl_c();

    // Session lives exactly as long as this command.
    let client = PrismClient::connect(&settings.cluster)?;
    let orchestrator = Orchestrator::new(&client, &settings);

    match &cli.command {
        Commands::Clone { vm_name } => {
            let clone = orchestrator.clone_vm(vm_name, &cancel).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&clone)?);
            } else {
                println!(
                    "{} Cloned '{}' as '{}' ({})",
                    "✓".green(),
                    vm_name,
                    clone.name.bold(),
                    clone.id
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cleanup { vm_name } => {
            let report = orchestrator.cleanup_clones(vm_name, &cancel).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_cleanup_report(&report);
            }
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Init { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Config files and environment first, then CLI flags on top.
pub fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(host) = &cli.cluster {
        settings.cluster.host = host.clone();
    }
    if let Some(user) = &cli.username {
        settings.cluster.username = user.clone();
    }
    if let Some(password) = &cli.password {
        settings.cluster.password = password.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight work");
            trigger.cancel();
        }
    });
    cancel
}

fn print_cleanup_report(report: &CleanupReport) {
    if report.attempted() == 0 {
        println!("{} No VMs named '{}', nothing to do", "✓".green(), report.name);
        return;
    }
    for vm in &report.succeeded {
        println!("{} Deleted {}", "✓".green(), vm);
    }
    for failure in &report.failed {
        println!(
            "{} Failed to delete {}: {}: {}",
            "✗".red(),
            failure.vm,
            failure.kind.red(),
            failure.error
        );
    }
    let summary = format!(
        "{} deleted, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
    if report.is_clean() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.yellow());
    }
}

fn handle_init_command(config_dir: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let config_dir = config_dir.unwrap_or_else(|| PathBuf::from("config"));
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite.",
            target.display()
        );
    }

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;
    let config_str = toml::to_string_pretty(&generate_default_config())?;
    std::fs::write(&target, config_str).with_context(|| format!("writing {}", target.display()))?;

    info!("Wrote {}", target.display());
    println!("{} Default configuration generated", "✓".green());
    Ok(())
}
