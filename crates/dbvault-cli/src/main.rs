use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use dbvault_core::{default_registry, ConfigLayer, KeyPair};

mod backup;
mod settings;

use backup::{BackupArgs, RestoreArgs};
use settings::{ConfigCommands, ConnectionArgs};

#[derive(Parser)]
#[command(name = "dbvault")]
#[command(about = "Encrypted database backups with post-quantum keys", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.dbvault/config.yaml)
    #[arg(long, global = true, env = "DBVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump, compress, encrypt and optionally email a database backup
    Backup(BackupArgs),
    /// Decrypt, extract and restore an encrypted backup
    Restore(RestoreArgs),
    /// List supported providers and whether their tools are installed
    Providers,
    /// Validate settings, key file and tool availability without touching the database
    Check {
        /// Database provider
        #[arg(short, long)]
        provider: Option<String>,

        /// Key pair file
        #[arg(short, long)]
        keys: Option<PathBuf>,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Show or save configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "dbvault=debug,dbvault_core=debug"
    } else {
        "dbvault=info,dbvault_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format!("✗ {:#}", e).red());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = settings::config_path(cli.config.as_deref());

    match cli.command {
        Commands::Backup(args) => backup::run_backup(args, &config).await,
        Commands::Restore(args) => backup::run_restore(args, &config).await,
        Commands::Providers => {
            println!("{}", "Providers".bold().blue());
            println!("{}", "-".repeat(50));
            for provider in default_registry().iter() {
                let descriptor = provider.descriptor();
                let status = if provider.is_available().await {
                    "✓ installed".green()
                } else {
                    "✗ not found".red()
                };
                println!(
                    "{:<12} {:<12} .{:<9} {}",
                    descriptor.name, descriptor.display_name, descriptor.extension, status
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            provider,
            keys,
            connection,
        } => {
            let cli_layer = ConfigLayer {
                provider,
                keys_path: keys,
                database: connection.into_options(),
                ..ConfigLayer::default()
            };
            let resolved = settings::resolve(&config, cli_layer)?;
            let name = resolved.provider()?;
            let provider = default_registry().get(name)?;
            let mut healthy = true;

            println!("{}", "Health Check".bold().blue());
            println!("{}", "-".repeat(50));

            let report = provider.validate_config(&resolved.database);
            if report.valid {
                println!(
                    "{}",
                    format!(
                        "✓ {} settings are complete",
                        provider.descriptor().display_name
                    )
                    .green()
                );
            } else {
                healthy = false;
                for error in &report.errors {
                    println!("{}", format!("✗ {}", error).red());
                }
            }

            match KeyPair::load(&resolved.keys_path) {
                Ok(_) => println!(
                    "{}",
                    format!("✓ Key file {} is valid", resolved.keys_path.display()).green()
                ),
                Err(e) => {
                    healthy = false;
                    println!("{}", format!("✗ {}", e).red());
                }
            }

            if provider.is_available().await && provider.is_restore_available().await {
                println!("{}", "✓ Dump and restore tools are installed".green());
            } else {
                healthy = false;
                println!(
                    "{}",
                    format!(
                        "✗ {} tools are not installed or not on PATH",
                        provider.descriptor().display_name
                    )
                    .red()
                );
            }

            Ok(if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config { command } => {
            settings::run(command, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
