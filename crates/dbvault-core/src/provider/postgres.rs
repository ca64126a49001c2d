use std::path::Path;

use super::{require, required, EngineTool, ProviderDescriptor, ProviderOptions, ValidationReport};
use crate::errors::Result;
use crate::executor::{StderrClassifier, ToolCommand};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;

/// pg_dump/pg_restore read the password from this variable, not from a flag.
pub const PASSWORD_ENV: &str = "PGPASSWORD";

const BENIGN_STDERR: &[&str] = &["does not exist, skipping"];

/// PostgreSQL via `pg_dump` / `pg_restore` in custom format.
#[derive(Debug, Clone, Default)]
pub struct Postgres;

impl Postgres {
    fn connection_args(cmd: ToolCommand, options: &ProviderOptions) -> Result<ToolCommand> {
        let host = ProviderOptions::present(&options.host).unwrap_or(DEFAULT_HOST);
        let port = options.port.unwrap_or(DEFAULT_PORT);
        let user = required("postgresql", &options.user, "user")?;

        let mut cmd = cmd
            .arg(format!("--host={}", host))
            .arg(format!("--port={}", port))
            .arg(format!("--username={}", user));
        if let Some(password) = ProviderOptions::present(&options.password) {
            cmd = cmd.env(PASSWORD_ENV, password);
        }
        Ok(cmd)
    }
}

impl EngineTool for Postgres {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("postgresql", "PostgreSQL", "dump")
    }

    fn validate(&self, options: &ProviderOptions) -> ValidationReport {
        let mut errors = Vec::new();
        require(&mut errors, &options.user, "PostgreSQL user is required");
        require(&mut errors, &options.database, "PostgreSQL database name is required");
        ValidationReport::from_errors(errors)
    }

    fn probe_command(&self) -> ToolCommand {
        ToolCommand::new("pg_dump").arg("--version")
    }

    fn restore_probe_command(&self) -> ToolCommand {
        ToolCommand::new("pg_restore").arg("--version")
    }

    fn dump_command(&self, output: &Path, options: &ProviderOptions) -> Result<ToolCommand> {
        let database = required("postgresql", &options.database, "database")?;
        let cmd = Self::connection_args(ToolCommand::new("pg_dump"), options)?;
        Ok(cmd
            .arg("--format=custom")
            .arg("--no-owner")
            .arg("--no-acl")
            .arg(format!("--file={}", output.display()))
            .arg(database))
    }

    fn restore_command(&self, dump: &Path, options: &ProviderOptions) -> Result<ToolCommand> {
        let database = required("postgresql", &options.database, "database")?;
        let mut cmd = Self::connection_args(ToolCommand::new("pg_restore"), options)?
            .arg(format!("--dbname={}", database))
            .arg("--no-owner")
            .arg("--no-acl");
        if options.clean_enabled() {
            cmd = cmd.arg("--clean").arg("--if-exists");
        }
        Ok(cmd.arg(dump.display().to_string()))
    }

    fn stderr_classifier(&self) -> StderrClassifier {
        StderrClassifier::new(BENIGN_STDERR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ProviderOptions {
        ProviderOptions::new()
            .with_host("pg.internal")
            .with_user("postgres")
            .with_password("pw")
            .with_database("orders_db")
    }

    #[test]
    fn test_requires_user_and_database() {
        let report = Postgres.validate(&ProviderOptions::new());
        assert_eq!(
            report.errors,
            vec![
                "PostgreSQL user is required",
                "PostgreSQL database name is required"
            ]
        );
        assert!(Postgres.validate(&options()).valid);
    }

    #[test]
    fn test_dump_passes_password_through_env() {
        let cmd = Postgres
            .dump_command(Path::new("/b/orders.dump"), &options())
            .unwrap();
        assert_eq!(cmd.program, "pg_dump");
        assert_eq!(
            cmd.args,
            vec![
                "--host=pg.internal",
                "--port=5432",
                "--username=postgres",
                "--format=custom",
                "--no-owner",
                "--no-acl",
                "--file=/b/orders.dump",
                "orders_db",
            ]
        );
        assert_eq!(cmd.env.get(PASSWORD_ENV).map(String::as_str), Some("pw"));
        assert!(!cmd.args.iter().any(|a| a.starts_with("--password")));
    }

    #[test]
    fn test_restore_clean_flags() {
        let plain = Postgres
            .restore_command(Path::new("/t/o.dump"), &options())
            .unwrap();
        assert!(!plain.args.contains(&"--clean".to_string()));

        let clean = Postgres
            .restore_command(Path::new("/t/o.dump"), &options().with_clean(true))
            .unwrap();
        assert_eq!(clean.program, "pg_restore");
        assert_eq!(
            clean.args,
            vec![
                "--host=pg.internal",
                "--port=5432",
                "--username=postgres",
                "--dbname=orders_db",
                "--no-owner",
                "--no-acl",
                "--clean",
                "--if-exists",
                "/t/o.dump",
            ]
        );
    }

    #[test]
    fn test_restore_probe_uses_pg_restore() {
        assert_eq!(Postgres.probe_command().program, "pg_dump");
        assert_eq!(Postgres.restore_probe_command().program, "pg_restore");
    }
}
