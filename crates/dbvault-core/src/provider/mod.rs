//! Database provider abstraction
//!
//! One `DatabaseProvider` per engine normalises that engine's native
//! dump/restore tooling behind a single contract. Built-in engines only
//! describe their commands through `EngineTool`; `ToolProvider` turns that
//! description into the full contract on top of the `ToolExecutor`.

pub mod descriptor;
pub mod mongodb;
pub mod mysql;
pub mod options;
pub mod postgres;
pub mod registry;
pub mod supabase;

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::errors::{Result, ToolFailure, VaultError};
use crate::executor::{StderrClassifier, ToolCommand, ToolExecutor};

pub use descriptor::{ProviderDescriptor, ValidationReport};
pub use mongodb::MongoDb;
pub use mysql::MySql;
pub use options::ProviderOptions;
pub use postgres::Postgres;
pub use registry::{default_registry, ProviderRegistry};
pub use supabase::Supabase;

/// Uniform contract every database integration implements.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Extension of the dump artifact this provider writes.
    fn file_extension(&self) -> &str {
        &self.descriptor().extension
    }

    /// Pure pre-flight check; performs no I/O.
    fn validate_config(&self, options: &ProviderOptions) -> ValidationReport;

    /// Probes the external dump tool. Returns false on any probe failure.
    async fn is_available(&self) -> bool;

    /// Probes the tool used for restores, when it differs from the dump tool.
    async fn is_restore_available(&self) -> bool {
        self.is_available().await
    }

    async fn create_dump(&self, output: &Path, options: &ProviderOptions) -> Result<()>;

    async fn restore_from_dump(&self, dump: &Path, options: &ProviderOptions) -> Result<()>;
}

/// Engine-specific command shapes and output quirks.
pub trait EngineTool: Send + Sync + 'static {
    fn descriptor(&self) -> ProviderDescriptor;

    fn validate(&self, options: &ProviderOptions) -> ValidationReport;

    fn probe_command(&self) -> ToolCommand;

    fn restore_probe_command(&self) -> ToolCommand {
        self.probe_command()
    }

    fn dump_command(&self, output: &Path, options: &ProviderOptions) -> Result<ToolCommand>;

    fn restore_command(&self, dump: &Path, options: &ProviderOptions) -> Result<ToolCommand>;

    /// Known-good stderr fragments for this engine's tools.
    fn stderr_classifier(&self) -> StderrClassifier;
}

/// `DatabaseProvider` backed by an external command-line tool.
pub struct ToolProvider<E: EngineTool> {
    engine: E,
    descriptor: ProviderDescriptor,
    executor: ToolExecutor,
}

impl<E: EngineTool> ToolProvider<E> {
    pub fn new(engine: E, executor: ToolExecutor) -> Self {
        let descriptor = engine.descriptor();
        Self {
            engine,
            descriptor,
            executor,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn ensure_valid(&self, options: &ProviderOptions) -> Result<()> {
        let report = self.engine.validate(options);
        if report.valid {
            Ok(())
        } else {
            Err(VaultError::InvalidOptions {
                provider: self.descriptor.name.clone(),
                errors: report.errors,
            })
        }
    }
}

#[async_trait]
impl<E: EngineTool> DatabaseProvider for ToolProvider<E> {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, options: &ProviderOptions) -> ValidationReport {
        self.engine.validate(options)
    }

    async fn is_available(&self) -> bool {
        self.executor.probe(&self.engine.probe_command()).await
    }

    async fn is_restore_available(&self) -> bool {
        self.executor
            .probe(&self.engine.restore_probe_command())
            .await
    }

    #[instrument(skip(self, options), fields(provider = %self.descriptor.name))]
    async fn create_dump(&self, output: &Path, options: &ProviderOptions) -> Result<()> {
        self.ensure_valid(options)?;
        let cmd = self.engine.dump_command(output, options)?;
        info!("Creating {} dump at {:?}", self.descriptor.display_name, output);

        let classifier = self.engine.stderr_classifier();
        match self.executor.execute(&cmd, &classifier, Some(output)).await {
            Ok(report) => {
                debug!("Dump finished with {} warning(s)", report.warnings.len());
                Ok(())
            }
            Err(failure) => {
                // A failed run never leaves a file that looks like a finished dump.
                if output.exists() {
                    let _ = fs::remove_file(output);
                }
                Err(dump_error(failure))
            }
        }
    }

    #[instrument(skip(self, options), fields(provider = %self.descriptor.name))]
    async fn restore_from_dump(&self, dump: &Path, options: &ProviderOptions) -> Result<()> {
        self.ensure_valid(options)?;
        if !dump.is_file() {
            return Err(VaultError::RestoreFailed(ToolFailure::Spawn(format!(
                "dump file {} does not exist",
                dump.display()
            ))));
        }
        let cmd = self.engine.restore_command(dump, options)?;
        info!("Restoring {} from {:?}", self.descriptor.display_name, dump);

        let classifier = self.engine.stderr_classifier();
        self.executor
            .execute(&cmd, &classifier, None)
            .await
            .map(|_| ())
            .map_err(restore_error)
    }
}

fn dump_error(failure: ToolFailure) -> VaultError {
    match failure {
        ToolFailure::NotFound(tool) => VaultError::ToolUnavailable { tool },
        other => VaultError::DumpFailed(other),
    }
}

fn restore_error(failure: ToolFailure) -> VaultError {
    match failure {
        ToolFailure::NotFound(tool) => VaultError::ToolUnavailable { tool },
        other => VaultError::RestoreFailed(other),
    }
}

/// Collects "<field> is required" messages for absent string fields.
pub(crate) fn require(errors: &mut Vec<String>, value: &Option<String>, message: &str) {
    if ProviderOptions::present(value).is_none() {
        errors.push(message.to_string());
    }
}

/// Value of a field validated earlier; mirrors `require` for command builders.
pub(crate) fn required<'a>(
    provider: &str,
    value: &'a Option<String>,
    field: &str,
) -> Result<&'a str> {
    ProviderOptions::present(value).ok_or_else(|| VaultError::InvalidOptions {
        provider: provider.to_string(),
        errors: vec![format!("{} is required", field)],
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use tempfile::TempDir;

    /// Engine whose "tool" is a shell snippet, for exercising ToolProvider.
    struct ShellEngine {
        dump_script: String,
        restore_program: Option<&'static str>,
    }

    impl EngineTool for ShellEngine {
        fn descriptor(&self) -> ProviderDescriptor {
            ProviderDescriptor::new("shell", "Shell", "sql")
        }

        fn validate(&self, options: &ProviderOptions) -> ValidationReport {
            let mut errors = Vec::new();
            require(&mut errors, &options.database, "database is required");
            ValidationReport::from_errors(errors)
        }

        fn probe_command(&self) -> ToolCommand {
            ToolCommand::new("sh").arg("-c").arg("true")
        }

        fn restore_probe_command(&self) -> ToolCommand {
            match self.restore_program {
                Some(program) => ToolCommand::new(program).arg("--version"),
                None => self.probe_command(),
            }
        }

        fn dump_command(&self, output: &Path, _options: &ProviderOptions) -> Result<ToolCommand> {
            Ok(ToolCommand::new("sh")
                .arg("-c")
                .arg(self.dump_script.replace("{out}", &output.display().to_string())))
        }

        fn restore_command(&self, dump: &Path, _options: &ProviderOptions) -> Result<ToolCommand> {
            Ok(ToolCommand::new("cat").arg(dump.display().to_string()))
        }

        fn stderr_classifier(&self) -> StderrClassifier {
            StderrClassifier::default()
        }
    }

    fn provider(script: &str) -> ToolProvider<ShellEngine> {
        ToolProvider::new(
            ShellEngine {
                dump_script: script.to_string(),
                restore_program: None,
            },
            ToolExecutor::default(),
        )
    }

    #[tokio::test]
    async fn test_failed_dump_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("partial.sql");
        let provider = provider("echo half > '{out}'; exit 1");

        let err = provider
            .create_dump(&out, &ProviderOptions::new().with_database("db"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DumpFailed);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_running_tool() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("x.sql");
        let marker = dir.path().join("ran");
        let provider = provider(&format!("touch '{}'", marker.display()));

        let err = provider
            .create_dump(&out, &ProviderOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_successful_dump_and_probe() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("ok.sql");
        let provider = provider("echo 'CREATE TABLE t();' > '{out}'");

        assert!(provider.is_available().await);
        provider
            .create_dump(&out, &ProviderOptions::new().with_database("db"))
            .await
            .unwrap();
        assert!(out.exists());
        assert_eq!(provider.file_extension(), "sql");
    }

    #[tokio::test]
    async fn test_missing_restore_tool_is_probed_separately() {
        let provider = ToolProvider::new(
            ShellEngine {
                dump_script: "true".to_string(),
                restore_program: Some("dbvault-no-such-restore-tool"),
            },
            ToolExecutor::default(),
        );

        assert!(provider.is_available().await);
        assert!(!provider.is_restore_available().await);
        assert!(self::provider("true").is_restore_available().await);
    }

    #[tokio::test]
    async fn test_restore_requires_existing_dump() {
        let dir = TempDir::new().unwrap();
        let provider = provider("true");
        let err = provider
            .restore_from_dump(
                &dir.path().join("missing.sql"),
                &ProviderOptions::new().with_database("db"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RestoreFailed);
    }
}
