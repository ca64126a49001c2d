//! Layered configuration
//!
//! Every source produces a `ConfigLayer` of optional values. Layers are
//! merged with "first present wins", highest precedence first:
//!
//! 1. command-line arguments
//! 2. saved YAML config file
//! 3. environment variables
//! 4. built-in defaults (applied by `resolve`)

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::delivery::{SmtpSettings, DEFAULT_SMTP_PORT, IMPLICIT_TLS_PORT};
use crate::errors::{Result, VaultError};
use crate::provider::options::redact_uri;
use crate::provider::ProviderOptions;

pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_KEYS_PATH: &str = "./keys.json";
pub const CONFIG_DIR: &str = ".dbvault";
pub const CONFIG_FILE: &str = "config.yaml";

const MASK: &str = "****";

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SmtpLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl SmtpLayer {
    pub fn merge(self, lower: SmtpLayer) -> Self {
        Self {
            host: self.host.or(lower.host),
            port: self.port.or(lower.port),
            secure: self.secure.or(lower.secure),
            user: self.user.or(lower.user),
            pass: self.pass.or(lower.pass),
            from: self.from.or(lower.from),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == SmtpLayer::default()
    }

    /// Complete SMTP settings, or `ConfigInvalid` naming what is missing.
    pub fn into_settings(self) -> Result<SmtpSettings> {
        let host = non_empty(self.host);
        let user = non_empty(self.user);
        let pass = non_empty(self.pass);

        let mut missing = Vec::new();
        if host.is_none() {
            missing.push("SMTP_HOST");
        }
        if user.is_none() {
            missing.push("SMTP_USER");
        }
        if pass.is_none() {
            missing.push("SMTP_PASS");
        }
        let (Some(host), Some(username), Some(password)) = (host, user, pass) else {
            return Err(VaultError::ConfigInvalid(format!(
                "email delivery requested but SMTP settings are incomplete (missing {})",
                missing.join(", ")
            )));
        };

        let port = self.port.unwrap_or(DEFAULT_SMTP_PORT);
        Ok(SmtpSettings {
            secure: self.secure.unwrap_or(port == IMPLICIT_TLS_PORT),
            from: non_empty(self.from).unwrap_or_else(|| username.clone()),
            host,
            port,
            username,
            password,
        })
    }
}

impl fmt::Debug for SmtpLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpLayer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| MASK))
            .field("from", &self.from)
            .finish()
    }
}

/// One source's worth of settings; every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_files: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_to: Option<String>,
    #[serde(skip_serializing_if = "ProviderOptions::is_empty")]
    pub database: ProviderOptions,
    #[serde(skip_serializing_if = "SmtpLayer::is_empty")]
    pub smtp: SmtpLayer,
}

impl ConfigLayer {
    /// Field-by-field merge where values already present in `self` win.
    pub fn merge(self, lower: ConfigLayer) -> Self {
        Self {
            provider: self.provider.or(lower.provider),
            backup_dir: self.backup_dir.or(lower.backup_dir),
            keys_path: self.keys_path.or(lower.keys_path),
            keep_files: self.keep_files.or(lower.keep_files),
            email_to: self.email_to.or(lower.email_to),
            database: self.database.merge(lower.database),
            smtp: self.smtp.merge(lower.smtp),
        }
    }

    /// Reads the environment through `lookup`, so callers decide where
    /// variables come from.
    pub fn from_env<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        Ok(Self {
            provider: get("DBVAULT_PROVIDER"),
            backup_dir: get("BACKUP_DIR").map(PathBuf::from),
            keys_path: get("KEYS_PATH").map(PathBuf::from),
            keep_files: None,
            email_to: get("EMAIL_TO"),
            database: ProviderOptions {
                host: get("DB_HOST"),
                port: parse_port("DB_PORT", get("DB_PORT"))?,
                user: get("DB_USER"),
                password: get("DB_PASSWORD"),
                uri: get("MONGODB_URI"),
                database: get("DB_NAME"),
                ..ProviderOptions::default()
            },
            smtp: SmtpLayer {
                host: get("SMTP_HOST"),
                port: parse_port("SMTP_PORT", get("SMTP_PORT"))?,
                secure: parse_bool("SMTP_SECURE", get("SMTP_SECURE"))?,
                user: get("SMTP_USER"),
                pass: get("SMTP_PASS"),
                from: get("SMTP_FROM"),
            },
        })
    }

    pub fn from_process_env() -> Result<Self> {
        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Saved config file; a missing or empty file is an empty layer.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No saved config at {:?}", path);
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|e| {
            VaultError::ConfigInvalid(format!("config file {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        // The file can hold database and SMTP passwords.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Copy with every secret replaced by a mask, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.database.password.is_some() {
            copy.database.password = Some(MASK.to_string());
        }
        copy.database.uri = copy.database.uri.as_deref().map(redact_uri);
        if copy.smtp.pass.is_some() {
            copy.smtp.pass = Some(MASK.to_string());
        }
        copy
    }

    /// Applies built-in defaults.
    pub fn resolve(self) -> ResolvedConfig {
        ResolvedConfig {
            provider: non_empty(self.provider),
            backup_dir: self
                .backup_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            keys_path: self
                .keys_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYS_PATH)),
            keep_files: self.keep_files.unwrap_or(false),
            email_to: non_empty(self.email_to),
            database: self.database,
            smtp: self.smtp,
        }
    }
}

/// Fully merged settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub provider: Option<String>,
    pub backup_dir: PathBuf,
    pub keys_path: PathBuf,
    pub keep_files: bool,
    pub email_to: Option<String>,
    pub database: ProviderOptions,
    pub smtp: SmtpLayer,
}

impl ResolvedConfig {
    pub fn provider(&self) -> Result<&str> {
        self.provider.as_deref().ok_or_else(|| {
            VaultError::ConfigInvalid(
                "no provider configured; pass --provider or set DBVAULT_PROVIDER".into(),
            )
        })
    }
}

/// `$HOME/.dbvault/config.yaml`, or relative to the working directory
/// when no home is known.
pub fn default_config_path<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let base = non_empty(lookup("HOME"))
        .or_else(|| non_empty(lookup("USERPROFILE")))
        .map(PathBuf::from)
        .unwrap_or_default();
    base.join(CONFIG_DIR).join(CONFIG_FILE)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_port(key: &str, value: Option<String>) -> Result<Option<u16>> {
    value
        .map(|v| {
            v.parse::<u16>().map_err(|_| {
                VaultError::ConfigInvalid(format!("{} is not a valid port: {}", key, v))
            })
        })
        .transpose()
}

fn parse_bool(key: &str, value: Option<String>) -> Result<Option<bool>> {
    value
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(VaultError::ConfigInvalid(format!(
                "{} is not a boolean: {}",
                key, v
            ))),
        })
        .transpose()
}
