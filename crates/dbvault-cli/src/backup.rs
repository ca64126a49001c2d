//! Backup and restore commands

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use dbvault_core::pipeline::backup::format_size;
use dbvault_core::{
    BackupPipeline, BackupRequest, DeliveryOutcome, ExecutorConfig, ProviderRegistry,
    RestorePipeline, RestoreRequest, SmtpMailer, ToolExecutor,
};

use crate::settings::{self, BackupSettingsArgs, ConnectionArgs};

/// Exit status when the backup was written but could not be emailed.
pub const EXIT_DELIVERY_FAILED: u8 = 2;

#[derive(Args)]
pub struct BackupArgs {
    #[command(flatten)]
    pub settings: BackupSettingsArgs,

    /// Skip email delivery even if a recipient is configured
    #[arg(long, conflicts_with = "email")]
    pub no_email: bool,

    /// Kill the dump tool after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// File name prefix for the backup artifacts
    #[arg(long, default_value = dbvault_core::naming::DEFAULT_PREFIX)]
    pub prefix: String,
}

#[derive(Args)]
pub struct RestoreArgs {
    /// Encrypted backup file to restore
    #[arg(short, long)]
    pub file: PathBuf,

    /// Database provider (supabase, mongodb, mysql, postgresql)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Key pair file (JSON with publicKey and privateKey)
    #[arg(short, long)]
    pub keys: Option<PathBuf>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Drop existing collections before restoring (MongoDB)
    #[arg(long)]
    pub drop: bool,

    /// Clean existing objects before restoring (PostgreSQL)
    #[arg(long)]
    pub clean: bool,

    /// Parent directory for the temporary work directory
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Kill the restore tool after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub fn registry(timeout: Option<u64>) -> ProviderRegistry {
    let config = ExecutorConfig {
        timeout: timeout.map(Duration::from_secs),
        ..ExecutorConfig::default()
    };
    ProviderRegistry::with_builtin(ToolExecutor::new(config))
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    pb
}

pub async fn run_backup(args: BackupArgs, config: &Path) -> Result<ExitCode> {
    let resolved = settings::resolve(config, args.settings.into_layer())?;
    let provider = resolved.provider()?.to_string();
    debug!("Resolved configuration: {:?}", resolved);

    let mut request = BackupRequest::new(
        &provider,
        resolved.database.clone(),
        &resolved.keys_path,
        &resolved.backup_dir,
    )
    .keep_files(resolved.keep_files)
    .with_prefix(args.prefix);

    if !args.no_email {
        if let Some(to) = &resolved.email_to {
            let smtp = resolved
                .smtp
                .clone()
                .into_settings()
                .context("Email delivery is configured but SMTP settings are incomplete")?;
            request = request.deliver_to(to, Arc::new(SmtpMailer::new(smtp)));
        }
    }

    let registry = registry(args.timeout);
    println!(
        "{}",
        format!("Backing up {} database...", provider).yellow()
    );
    let pb = spinner("Dumping, compressing and encrypting...");
    let result = BackupPipeline::new(&registry).run(request).await;

    let report = match result {
        Ok(report) => {
            pb.finish_with_message("Backup completed");
            report
        }
        Err(e) => {
            pb.finish_with_message("Backup failed");
            return Err(e).context("Backup failed");
        }
    };

    println!(
        "{}",
        format!("✓ Backup created at {}", report.encrypted_path.display()).green()
    );
    println!("Provider: {}", report.provider);
    println!("Database: {}", report.database);
    println!("Size: {}", format_size(report.size_bytes));
    println!("SHA-256: {}", report.checksum);
    for retained in &report.retained {
        println!("Kept: {}", retained.display());
    }
    for warning in &report.warnings {
        println!("{}", format!("! {}", warning).yellow());
    }

    match &report.delivery {
        DeliveryOutcome::Skipped => Ok(ExitCode::SUCCESS),
        DeliveryOutcome::Delivered { to } => {
            println!("{}", format!("✓ Emailed to {}", to).green());
            Ok(ExitCode::SUCCESS)
        }
        DeliveryOutcome::Failed { to, error } => {
            println!(
                "{}",
                format!("✗ Email to {} failed: {}", to, error).red()
            );
            println!(
                "The encrypted backup is still available at {}",
                report.encrypted_path.display()
            );
            Ok(ExitCode::from(EXIT_DELIVERY_FAILED))
        }
    }
}

pub async fn run_restore(args: RestoreArgs, config: &Path) -> Result<ExitCode> {
    let mut options = args.connection.into_options();
    options.drop = args.drop.then_some(true);
    options.clean = args.clean.then_some(true);

    let cli = dbvault_core::ConfigLayer {
        provider: args.provider,
        keys_path: args.keys,
        database: options,
        ..dbvault_core::ConfigLayer::default()
    };
    let resolved = settings::resolve(config, cli)?;
    let provider = resolved.provider()?.to_string();

    let mut request = RestoreRequest::new(
        &provider,
        resolved.database.clone(),
        &args.file,
        &resolved.keys_path,
    );
    if let Some(work_dir) = args.work_dir {
        request = request.with_work_root(work_dir);
    }

    let registry = registry(args.timeout);
    println!(
        "{}",
        format!("Restoring from {}...", args.file.display()).yellow()
    );
    let pb = spinner("Decrypting, extracting and restoring...");

    match RestorePipeline::new(&registry).run(request).await {
        Ok(report) => {
            pb.finish_with_message("Restore completed");
            println!(
                "{}",
                format!(
                    "✓ Restored {} into {}",
                    report.dump_file_name, report.provider
                )
                .green()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            pb.finish_with_message("Restore failed");
            Err(e).context("Restore failed")
        }
    }
}
