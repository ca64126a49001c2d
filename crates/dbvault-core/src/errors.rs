use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Maximum number of stderr bytes carried inside an error.
pub const STDERR_TAIL_BYTES: usize = 4 * 1024;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool not available: {tool} is not installed or not on PATH")]
    ToolUnavailable { tool: String },

    #[error("Invalid options for {provider}: {}", .errors.join("; "))]
    InvalidOptions { provider: String, errors: Vec<String> },

    #[error("Dump failed: {0}")]
    DumpFailed(ToolFailure),

    #[error("Restore failed: {0}")]
    RestoreFailed(ToolFailure),

    #[error("Archive error: {0}")]
    ArchiveFailed(String),

    #[error("Extract error: {0}")]
    ExtractFailed(String),

    #[error("No dump file found in archive {0:?}")]
    NoDumpFileFound(PathBuf),

    #[error("Cipher error: {0}")]
    CipherFailed(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Key file is missing required field(s): {}", .0.join(", "))]
    KeysMissingFields(Vec<String>),

    #[error("Unknown provider '{name}'. Available providers: {}", .available.join(", "))]
    UnknownProvider { name: String, available: Vec<String> },

    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("Email delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("{stage} stage failed for provider {provider}: {source}")]
    Stage {
        stage: Stage,
        provider: String,
        #[source]
        source: Box<VaultError>,
    },
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Failure of an external dump/restore tool invocation.
#[derive(Error, Debug)]
pub enum ToolFailure {
    #[error("{0} could not be found")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("exited with {}: {stderr}", describe_exit(.code))]
    Exited { code: Option<i32>, stderr: String },

    #[error("tool reported success but {0:?} was not written")]
    MissingOutput(PathBuf),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed to run tool: {0}")]
    Spawn(String),
}

/// Taxonomy class of a `VaultError`, independent of stage context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    ToolUnavailable,
    InvalidOptions,
    DumpFailed,
    RestoreFailed,
    ArchiveFailed,
    ExtractFailed,
    CipherFailed,
    ConfigInvalid,
    KeysMissingFields,
    UnknownProvider,
    DeliveryFailed,
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Keys,
    Probe,
    Dump,
    Archive,
    Encrypt,
    Decrypt,
    Extract,
    Restore,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Keys => "keys",
            Stage::Probe => "probe",
            Stage::Dump => "dump",
            Stage::Archive => "archive",
            Stage::Encrypt => "encrypt",
            Stage::Decrypt => "decrypt",
            Stage::Extract => "extract",
            Stage::Restore => "restore",
        };
        f.write_str(name)
    }
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Io(_) => ErrorKind::Io,
            VaultError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            VaultError::InvalidOptions { .. } => ErrorKind::InvalidOptions,
            VaultError::DumpFailed(_) => ErrorKind::DumpFailed,
            VaultError::RestoreFailed(_) => ErrorKind::RestoreFailed,
            VaultError::ArchiveFailed(_) => ErrorKind::ArchiveFailed,
            VaultError::ExtractFailed(_) | VaultError::NoDumpFileFound(_) => {
                ErrorKind::ExtractFailed
            }
            VaultError::CipherFailed(_) => ErrorKind::CipherFailed,
            VaultError::ConfigInvalid(_) | VaultError::DuplicateProvider(_) => {
                ErrorKind::ConfigInvalid
            }
            VaultError::KeysMissingFields(_) => ErrorKind::KeysMissingFields,
            VaultError::UnknownProvider { .. } => ErrorKind::UnknownProvider,
            VaultError::DeliveryFailed(_) => ErrorKind::DeliveryFailed,
            VaultError::Stage { source, .. } => source.kind(),
        }
    }

    /// Stage the error was raised in, if it carries pipeline context.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            VaultError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn at(self, stage: Stage, provider: &str) -> Self {
        // Keep the innermost context when a stage error bubbles through twice.
        if matches!(self, VaultError::Stage { .. }) {
            return self;
        }
        VaultError::Stage {
            stage,
            provider: provider.to_string(),
            source: Box::new(self),
        }
    }
}

impl From<zip::result::ZipError> for VaultError {
    fn from(e: zip::result::ZipError) -> Self {
        VaultError::ArchiveFailed(e.to_string())
    }
}

impl From<serde_yaml::Error> for VaultError {
    fn from(e: serde_yaml::Error) -> Self {
        VaultError::ConfigInvalid(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::ConfigInvalid(e.to_string())
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Last `STDERR_TAIL_BYTES` of a tool's stderr, cut on a char boundary.
pub fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}
