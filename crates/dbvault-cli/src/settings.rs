//! Command-line flags as a configuration layer, and the `config` command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::*;

use dbvault_core::config::default_config_path;
use dbvault_core::{ConfigLayer, ProviderOptions, ResolvedConfig, SmtpLayer};

/// Database connection flags shared by every command that talks to a database.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Database host
    #[arg(long)]
    pub host: Option<String>,

    /// Database port
    #[arg(long)]
    pub port: Option<u16>,

    /// Database user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Database password
    #[arg(long)]
    pub password: Option<String>,

    /// Connection URI (MongoDB)
    #[arg(long)]
    pub uri: Option<String>,

    /// Database name
    #[arg(short, long)]
    pub database: Option<String>,
}

impl ConnectionArgs {
    pub fn into_options(self) -> ProviderOptions {
        ProviderOptions {
            host: self.host,
            port: self.port,
            user: self.user,
            password: self.password,
            uri: self.uri,
            database: self.database,
            ..ProviderOptions::default()
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SmtpArgs {
    /// SMTP server host
    #[arg(long)]
    pub smtp_host: Option<String>,

    /// SMTP server port (587 STARTTLS, 465 implicit TLS)
    #[arg(long)]
    pub smtp_port: Option<u16>,

    /// Use implicit TLS
    #[arg(long)]
    pub smtp_secure: Option<bool>,

    /// SMTP user name
    #[arg(long)]
    pub smtp_user: Option<String>,

    /// SMTP password
    #[arg(long)]
    pub smtp_pass: Option<String>,

    /// Sender address (defaults to the SMTP user)
    #[arg(long)]
    pub smtp_from: Option<String>,
}

impl SmtpArgs {
    pub fn into_layer(self) -> SmtpLayer {
        SmtpLayer {
            host: self.smtp_host,
            port: self.smtp_port,
            secure: self.smtp_secure,
            user: self.smtp_user,
            pass: self.smtp_pass,
            from: self.smtp_from,
        }
    }
}

/// Settings a backup run (or `config save`) can take from the command line.
#[derive(Args, Debug, Clone, Default)]
pub struct BackupSettingsArgs {
    /// Database provider (supabase, mongodb, mysql, postgresql)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Directory receiving the encrypted backup
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Key pair file (JSON with publicKey and privateKey)
    #[arg(short, long)]
    pub keys: Option<PathBuf>,

    /// Keep the intermediate dump and archive files
    #[arg(long)]
    pub keep_files: bool,

    /// Email the encrypted backup to this address
    #[arg(short, long)]
    pub email: Option<String>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub smtp: SmtpArgs,
}

impl BackupSettingsArgs {
    pub fn into_layer(self) -> ConfigLayer {
        ConfigLayer {
            provider: self.provider,
            backup_dir: self.output_dir,
            keys_path: self.keys,
            keep_files: self.keep_files.then_some(true),
            email_to: self.email,
            database: self.connection.into_options(),
            smtp: self.smtp.into_layer(),
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the merged configuration with secrets masked
    Show {
        #[command(flatten)]
        settings: BackupSettingsArgs,
    },
    /// Save the given flags into the config file
    Save {
        #[command(flatten)]
        settings: BackupSettingsArgs,
    },
    /// Print the config file location
    Path,
}

/// `--config`, else `$HOME/.dbvault/config.yaml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_config_path(|key| std::env::var(key).ok()))
}

/// CLI flags > saved file > environment; no defaults applied.
pub fn merged_layer(config: &Path, cli: ConfigLayer) -> Result<ConfigLayer> {
    let saved = ConfigLayer::load(config)
        .with_context(|| format!("Failed to load config file {}", config.display()))?;
    let env = ConfigLayer::from_process_env().context("Invalid environment configuration")?;
    Ok(cli.merge(saved).merge(env))
}

pub fn resolve(config: &Path, cli: ConfigLayer) -> Result<ResolvedConfig> {
    Ok(merged_layer(config, cli)?.resolve())
}

pub fn run(command: ConfigCommands, config: &Path) -> Result<()> {
    match command {
        ConfigCommands::Show { settings } => {
            let merged = merged_layer(config, settings.into_layer())?;
            let resolved = merged.clone().resolve();
            println!("{}", "Configuration".bold().blue());
            println!("{}", "-".repeat(40));
            println!("Config file:  {}", config.display());
            println!(
                "Provider:     {}",
                resolved.provider.as_deref().unwrap_or("(not set)")
            );
            println!("Backup dir:   {}", resolved.backup_dir.display());
            println!("Keys file:    {}", resolved.keys_path.display());
            println!("Keep files:   {}", resolved.keep_files);
            println!(
                "Email to:     {}",
                resolved.email_to.as_deref().unwrap_or("(disabled)")
            );
            println!();
            let yaml = serde_yaml::to_string(&merged.redacted())
                .context("Failed to render configuration")?;
            print!("{}", yaml);
        }
        ConfigCommands::Save { settings } => {
            let saved = ConfigLayer::load(config)
                .with_context(|| format!("Failed to load config file {}", config.display()))?;
            let updated = settings.into_layer().merge(saved);
            updated
                .save(config)
                .with_context(|| format!("Failed to write config file {}", config.display()))?;
            println!(
                "{}",
                format!("✓ Configuration saved to {}", config.display()).green()
            );
        }
        ConfigCommands::Path => {
            println!("{}", config.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_become_layer() {
        let args = BackupSettingsArgs {
            provider: Some("mysql".into()),
            keep_files: true,
            connection: ConnectionArgs {
                user: Some("root".into()),
                database: Some("orders_db".into()),
                ..ConnectionArgs::default()
            },
            smtp: SmtpArgs {
                smtp_port: Some(465),
                ..SmtpArgs::default()
            },
            ..BackupSettingsArgs::default()
        };
        let layer = args.into_layer();
        assert_eq!(layer.provider.as_deref(), Some("mysql"));
        assert_eq!(layer.keep_files, Some(true));
        assert_eq!(layer.database.user.as_deref(), Some("root"));
        assert_eq!(layer.smtp.port, Some(465));
        assert!(layer.backup_dir.is_none());
    }

    #[test]
    fn test_unset_keep_files_does_not_override_saved_value() {
        let layer = BackupSettingsArgs::default().into_layer();
        let saved = ConfigLayer {
            keep_files: Some(true),
            ..ConfigLayer::default()
        };
        assert_eq!(layer.merge(saved).keep_files, Some(true));
    }

    #[test]
    fn test_save_merges_into_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        ConfigLayer {
            provider: Some("postgresql".into()),
            email_to: Some("ops@example.com".into()),
            ..ConfigLayer::default()
        }
        .save(&path)
        .unwrap();

        let settings = BackupSettingsArgs {
            provider: Some("mysql".into()),
            ..BackupSettingsArgs::default()
        };
        run(ConfigCommands::Save { settings }, &path).unwrap();

        let saved = ConfigLayer::load(&path).unwrap();
        assert_eq!(saved.provider.as_deref(), Some("mysql"));
        assert_eq!(saved.email_to.as_deref(), Some("ops@example.com"));
    }
}
