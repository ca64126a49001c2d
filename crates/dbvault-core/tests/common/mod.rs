//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dbvault_core::errors::ToolFailure;
use dbvault_core::{
    DatabaseProvider, EmailMessage, Mailer, ProviderDescriptor, ProviderOptions, ProviderRegistry,
    Result, ValidationReport, VaultError,
};
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{PublicKey as _, SecretKey as _};
use serde_json::json;

pub const DUMP_CONTENTS: &[u8] =
    b"-- stub dump\nCREATE TABLE orders (id int);\nINSERT INTO orders VALUES (1);\n";

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum DumpBehavior {
    Succeed,
    /// Writes half a file, then reports failure
    FailAfterPartialWrite,
    /// Reports success without writing anything
    SucceedWithoutOutput,
    /// Writes the dump, then never returns
    HangAfterWrite,
}

/// In-process provider standing in for an external dump tool.
pub struct StubProvider {
    descriptor: ProviderDescriptor,
    available: bool,
    restore_available: bool,
    dump: DumpBehavior,
    fail_restore: bool,
    pub restored: Mutex<Vec<Vec<u8>>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::new("stub", "Stub", "sql"),
            available: true,
            restore_available: true,
            dump: DumpBehavior::Succeed,
            fail_restore: false,
            restored: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn without_restore_tool(mut self) -> Self {
        self.restore_available = false;
        self
    }

    pub fn failing_dump(mut self) -> Self {
        self.dump = DumpBehavior::FailAfterPartialWrite;
        self
    }

    pub fn silent_dump(mut self) -> Self {
        self.dump = DumpBehavior::SucceedWithoutOutput;
        self
    }

    pub fn hanging_dump(mut self) -> Self {
        self.dump = DumpBehavior::HangAfterWrite;
        self
    }

    pub fn failing_restore(mut self) -> Self {
        self.fail_restore = true;
        self
    }
}

#[async_trait]
impl DatabaseProvider for StubProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, options: &ProviderOptions) -> ValidationReport {
        if options.database.as_deref().unwrap_or("").is_empty() {
            ValidationReport::from_errors(vec!["Stub database name is required".into()])
        } else {
            ValidationReport::ok()
        }
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn is_restore_available(&self) -> bool {
        self.available && self.restore_available
    }

    async fn create_dump(&self, output: &Path, _options: &ProviderOptions) -> Result<()> {
        match self.dump {
            DumpBehavior::Succeed => {
                fs::write(output, DUMP_CONTENTS)?;
                Ok(())
            }
            DumpBehavior::FailAfterPartialWrite => {
                fs::write(output, &DUMP_CONTENTS[..10])?;
                Err(VaultError::DumpFailed(ToolFailure::Exited {
                    code: Some(2),
                    stderr: "stub: connection reset".into(),
                }))
            }
            DumpBehavior::SucceedWithoutOutput => Ok(()),
            DumpBehavior::HangAfterWrite => {
                fs::write(output, DUMP_CONTENTS)?;
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn restore_from_dump(&self, dump: &Path, _options: &ProviderOptions) -> Result<()> {
        if self.fail_restore {
            return Err(VaultError::RestoreFailed(ToolFailure::Exited {
                code: Some(1),
                stderr: "stub: relation already exists".into(),
            }));
        }
        let bytes = fs::read(dump)?;
        self.restored
            .lock()
            .map_err(|_| VaultError::RestoreFailed(ToolFailure::Spawn("poisoned".into())))?
            .push(bytes);
        Ok(())
    }
}

pub fn registry_with(provider: Arc<StubProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(provider).unwrap();
    registry
}

pub fn options() -> ProviderOptions {
    ProviderOptions::new().with_database("orders_db")
}

/// Generates an ML-KEM-768 key pair and writes it as a key file.
pub fn write_keys(dir: &Path, name: &str) -> PathBuf {
    let (public_key, secret_key) = mlkem768::keypair();
    let path = dir.join(name);
    let contents = json!({
        "publicKey": hex::encode(public_key.as_bytes()),
        "privateKey": hex::encode(secret_key.as_bytes()),
    });
    fs::write(&path, contents.to_string()).unwrap();
    path
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

/// Mailer that records messages instead of sending them.
#[derive(Default)]
pub struct StubMailer {
    fail: bool,
    pub sent: Mutex<Vec<EmailMessage>>,
}

impl StubMailer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.fail {
            return Err(VaultError::DeliveryFailed("535 authentication rejected".into()));
        }
        assert!(message.attachment.exists(), "attachment must exist when sending");
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
