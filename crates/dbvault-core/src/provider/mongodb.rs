use std::path::Path;

use super::{require, required, EngineTool, ProviderDescriptor, ProviderOptions, ValidationReport};
use crate::errors::Result;
use crate::executor::{StderrClassifier, ToolCommand};

// mongodump/mongorestore log progress on stderr as `<timestamp>\t<message>`.
// Patterns start at the tab so failure lines quoting the same words still surface.
const BENIGN_STDERR: &[&str] = &[
    "\twriting ",
    "\tdone dumping ",
    "\tdumping up to ",
    "\tpreparing collections to restore",
    "\treading metadata for ",
    "\trestoring ",
    "\tfinished restoring ",
    "\tno indexes to restore",
    "document(s) restored successfully",
    "\tdropping collection ",
    "\tarchive prelude ",
    "\tmux ",
    "\tdemux ",
];

/// MongoDB via `mongodump` / `mongorestore` in gzipped archive mode.
#[derive(Debug, Clone, Default)]
pub struct MongoDb;

impl EngineTool for MongoDb {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("mongodb", "MongoDB", "archive")
    }

    fn validate(&self, options: &ProviderOptions) -> ValidationReport {
        let mut errors = Vec::new();
        require(&mut errors, &options.uri, "MongoDB connection URI is required");
        ValidationReport::from_errors(errors)
    }

    fn probe_command(&self) -> ToolCommand {
        ToolCommand::new("mongodump").arg("--version")
    }

    fn restore_probe_command(&self) -> ToolCommand {
        ToolCommand::new("mongorestore").arg("--version")
    }

    fn dump_command(&self, output: &Path, options: &ProviderOptions) -> Result<ToolCommand> {
        let uri = required("mongodb", &options.uri, "uri")?;
        let mut cmd = ToolCommand::new("mongodump").secret_arg(format!("--uri={}", uri), uri);
        if let Some(database) = ProviderOptions::present(&options.database) {
            cmd = cmd.arg(format!("--db={}", database));
        }
        Ok(cmd
            .arg(format!("--archive={}", output.display()))
            .arg("--gzip"))
    }

    fn restore_command(&self, dump: &Path, options: &ProviderOptions) -> Result<ToolCommand> {
        let uri = required("mongodb", &options.uri, "uri")?;
        let mut cmd = ToolCommand::new("mongorestore").secret_arg(format!("--uri={}", uri), uri);
        if let Some(database) = ProviderOptions::present(&options.database) {
            cmd = cmd.arg(format!("--db={}", database));
        }
        if options.drop_enabled() {
            cmd = cmd.arg("--drop");
        }
        Ok(cmd
            .arg(format!("--archive={}", dump.display()))
            .arg("--gzip"))
    }

    fn stderr_classifier(&self) -> StderrClassifier {
        StderrClassifier::new(BENIGN_STDERR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "mongodb://localhost:27017";

    #[test]
    fn test_requires_uri() {
        let report = MongoDb.validate(&ProviderOptions::new().with_database("app"));
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["MongoDB connection URI is required"]);

        assert!(MongoDb.validate(&ProviderOptions::new().with_uri(URI)).valid);
    }

    #[test]
    fn test_dump_args() {
        let options = ProviderOptions::new().with_uri(URI).with_database("app");
        let cmd = MongoDb
            .dump_command(Path::new("/b/app.archive"), &options)
            .unwrap();
        assert_eq!(cmd.program, "mongodump");
        assert_eq!(
            cmd.args,
            vec![
                "--uri=mongodb://localhost:27017",
                "--db=app",
                "--archive=/b/app.archive",
                "--gzip"
            ]
        );
    }

    #[test]
    fn test_restore_args_with_drop() {
        let options = ProviderOptions::new().with_uri(URI).with_drop(true);
        let cmd = MongoDb
            .restore_command(Path::new("/t/app.archive"), &options)
            .unwrap();
        assert_eq!(cmd.program, "mongorestore");
        assert_eq!(
            cmd.args,
            vec![
                "--uri=mongodb://localhost:27017",
                "--drop",
                "--archive=/t/app.archive",
                "--gzip"
            ]
        );
    }

    #[test]
    fn test_uri_is_masked_in_display() {
        let options = ProviderOptions::new().with_uri("mongodb://u:p@host/app");
        let cmd = MongoDb.dump_command(Path::new("/b/x.archive"), &options).unwrap();
        assert!(!cmd.to_string().contains("u:p@"));
    }

    #[test]
    fn test_progress_lines_are_benign() {
        let classifier = MongoDb.stderr_classifier();
        assert!(classifier.is_benign("2024-05-01T10:00:00.000+0000\twriting app.users to archive"));
        assert!(classifier
            .is_benign("2024-05-01T10:00:01.000+0000\tdone dumping app.users (42 documents)"));
        assert!(!classifier.is_benign("Failed: error connecting to db server"));
    }

    #[test]
    fn test_failures_mentioning_progress_words_are_warnings() {
        let classifier = MongoDb.stderr_classifier();
        let stderr = "2024-05-01T10:00:00.000+0000\terror writing to archive: broken pipe\n\
                      2024-05-01T10:00:02.000+0000\tFailed: restoring app.users: duplicate key\n\
                      2024-05-01T10:00:03.000+0000\trestoring app.orders from archive\n";
        let warnings = classifier.warnings(stderr);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("error writing to archive"));
        assert!(warnings[1].contains("Failed: restoring"));
    }

    #[test]
    fn test_restore_probe_uses_mongorestore() {
        assert_eq!(MongoDb.probe_command().program, "mongodump");
        assert_eq!(MongoDb.restore_probe_command().program, "mongorestore");
    }
}
