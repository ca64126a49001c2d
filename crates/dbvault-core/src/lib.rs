pub mod errors;
pub mod executor;
pub mod provider;
pub mod archive;
pub mod cipher;
pub mod keys;
pub mod naming;
pub mod delivery;
pub mod config;
pub mod pipeline;

pub use archive::Archiver;
pub use cipher::{CipherStage, MlKemCipher, PqCipher};
pub use config::{ConfigLayer, ResolvedConfig, SmtpLayer};
pub use delivery::{EmailMessage, Mailer, SmtpMailer, SmtpSettings};
pub use errors::{ErrorKind, Result, Stage, ToolFailure, VaultError};
pub use executor::{ExecutorConfig, ToolCommand, ToolExecutor};
pub use keys::KeyPair;
pub use naming::{generate_backup_filename, BackupNames};
pub use pipeline::{
    BackupPipeline, BackupReport, BackupRequest, DeliveryOutcome, RestorePipeline, RestoreReport,
    RestoreRequest,
};
pub use provider::{
    default_registry, DatabaseProvider, EngineTool, ProviderDescriptor, ProviderOptions,
    ProviderRegistry, ToolProvider, ValidationReport,
};
