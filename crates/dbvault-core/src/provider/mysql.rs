use std::path::Path;

use super::{require, required, EngineTool, ProviderDescriptor, ProviderOptions, ValidationReport};
use crate::errors::Result;
use crate::executor::{StderrClassifier, ToolCommand};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;

const BENIGN_STDERR: &[&str] = &["using a password on the command line interface can be insecure"];

/// MySQL / MariaDB via `mysqldump` and `mysql`.
#[derive(Debug, Clone, Default)]
pub struct MySql;

impl MySql {
    /// `--host --port --user [--password]`, shared by dump and restore.
    fn connection_args(cmd: ToolCommand, options: &ProviderOptions) -> Result<ToolCommand> {
        let host = ProviderOptions::present(&options.host).unwrap_or(DEFAULT_HOST);
        let port = options.port.unwrap_or(DEFAULT_PORT);
        let user = required("mysql", &options.user, "user")?;

        let mut cmd = cmd
            .arg(format!("--host={}", host))
            .arg(format!("--port={}", port))
            .arg(format!("--user={}", user));
        if let Some(password) = ProviderOptions::present(&options.password) {
            cmd = cmd.secret_arg(format!("--password={}", password), password);
        }
        Ok(cmd)
    }
}

impl EngineTool for MySql {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("mysql", "MySQL", "sql")
    }

    fn validate(&self, options: &ProviderOptions) -> ValidationReport {
        let mut errors = Vec::new();
        require(&mut errors, &options.user, "MySQL user is required");
        require(&mut errors, &options.database, "MySQL database name is required");
        ValidationReport::from_errors(errors)
    }

    fn probe_command(&self) -> ToolCommand {
        ToolCommand::new("mysqldump").arg("--version")
    }

    fn restore_probe_command(&self) -> ToolCommand {
        ToolCommand::new("mysql").arg("--version")
    }

    fn dump_command(&self, output: &Path, options: &ProviderOptions) -> Result<ToolCommand> {
        let database = required("mysql", &options.database, "database")?;
        let cmd = Self::connection_args(ToolCommand::new("mysqldump"), options)?;
        Ok(cmd
            .arg("--single-transaction")
            .arg("--routines")
            .arg("--triggers")
            .arg("--events")
            .arg(format!("--result-file={}", output.display()))
            .arg(database))
    }

    /// The dump is fed on standard input, equivalent to `mysql ... db < dump`.
    fn restore_command(&self, dump: &Path, options: &ProviderOptions) -> Result<ToolCommand> {
        let database = required("mysql", &options.database, "database")?;
        let cmd = Self::connection_args(ToolCommand::new("mysql"), options)?;
        Ok(cmd.arg(database).stdin_file(dump))
    }

    fn stderr_classifier(&self) -> StderrClassifier {
        StderrClassifier::new(BENIGN_STDERR)
    }
}
