//! Supabase CLI integration.
//!
//! Works against the project the CLI is linked to, so no connection
//! options are required.

use std::path::Path;

use super::{EngineTool, ProviderDescriptor, ProviderOptions, ValidationReport};
use crate::errors::Result;
use crate::executor::{StderrClassifier, ToolCommand};

pub const DEFAULT_PROGRAM: &str = "supabase";

const BENIGN_STDERR: &[&str] = &[
    "dumping schemas from",
    "dumping data from",
    "dumped schema to",
    "dumped data to",
    "connecting to",
    "initialising schema",
    "applying migration",
    "seeding data",
    "resetting local database",
    "restarting containers",
    "finished supabase db",
    "a new version of supabase cli is available",
    "we recommend updating regularly",
];

#[derive(Debug, Clone)]
pub struct Supabase {
    program: String,
}

impl Supabase {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_PROGRAM)
    }

    /// Uses a different CLI binary, e.g. a pinned path.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Supabase {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineTool for Supabase {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("supabase", "Supabase", "sql")
    }

    fn validate(&self, _options: &ProviderOptions) -> ValidationReport {
        ValidationReport::ok()
    }

    fn probe_command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).arg("--version")
    }

    fn dump_command(&self, output: &Path, _options: &ProviderOptions) -> Result<ToolCommand> {
        Ok(ToolCommand::new(&self.program)
            .arg("db")
            .arg("dump")
            .arg("-f")
            .arg(output.display().to_string()))
    }

    fn restore_command(&self, dump: &Path, _options: &ProviderOptions) -> Result<ToolCommand> {
        Ok(ToolCommand::new(&self.program)
            .arg("db")
            .arg("reset")
            .arg("--db-url")
            .arg(format!("file://{}", dump.display())))
    }

    fn stderr_classifier(&self) -> StderrClassifier {
        StderrClassifier::new(BENIGN_STDERR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_shapes() {
        let engine = Supabase::new();
        let dump = engine
            .dump_command(Path::new("/backups/a.sql"), &ProviderOptions::new())
            .unwrap();
        assert_eq!(dump.to_string(), "supabase db dump -f /backups/a.sql");

        let restore = engine
            .restore_command(Path::new("/tmp/a.sql"), &ProviderOptions::new())
            .unwrap();
        assert_eq!(
            restore.to_string(),
            "supabase db reset --db-url file:///tmp/a.sql"
        );
    }

    #[test]
    fn test_custom_program() {
        let engine = Supabase::with_program("/opt/supabase/bin/supabase");
        assert_eq!(engine.probe_command().program, "/opt/supabase/bin/supabase");
    }

    #[test]
    fn test_no_required_fields() {
        assert!(Supabase::new().validate(&ProviderOptions::new()).valid);
    }
}
