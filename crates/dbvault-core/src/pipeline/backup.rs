//! Backup pipeline: dump → archive → encrypt → (deliver) → clean up.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, instrument, warn};

use super::workdir::IntermediateFiles;
use super::{blocking, sha256_file};
use crate::archive::Archiver;
use crate::cipher::CipherStage;
use crate::delivery::{EmailMessage, Mailer};
use crate::errors::{Result, Stage, VaultError};
use crate::keys::KeyPair;
use crate::naming::{BackupNames, DEFAULT_PREFIX};
use crate::provider::{DatabaseProvider, ProviderDescriptor, ProviderOptions, ProviderRegistry};

/// Backup pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    Init,
    Dumped,
    Archived,
    Encrypted,
    Delivered,
    Cleaned,
    Done,
    Failed,
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where and how to email the encrypted artifact.
#[derive(Clone)]
pub struct DeliveryRequest {
    pub to: String,
    pub mailer: Arc<dyn Mailer>,
}

impl fmt::Debug for DeliveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryRequest")
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub provider: String,
    pub options: ProviderOptions,
    pub keys_path: PathBuf,
    pub output_dir: PathBuf,
    pub keep_files: bool,
    pub prefix: String,
    pub delivery: Option<DeliveryRequest>,
}

impl BackupRequest {
    pub fn new(
        provider: impl Into<String>,
        options: ProviderOptions,
        keys_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider: provider.into(),
            options,
            keys_path: keys_path.into(),
            output_dir: output_dir.into(),
            keep_files: false,
            prefix: DEFAULT_PREFIX.to_string(),
            delivery: None,
        }
    }

    pub fn keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn deliver_to(mut self, to: impl Into<String>, mailer: Arc<dyn Mailer>) -> Self {
        self.delivery = Some(DeliveryRequest {
            to: to.into(),
            mailer,
        });
        self
    }
}

/// Result of email delivery; a failure here leaves the backup intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Skipped,
    Delivered { to: String },
    Failed { to: String, error: String },
}

impl DeliveryOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct BackupReport {
    pub provider: String,
    pub database: String,
    pub encrypted_path: PathBuf,
    pub size_bytes: u64,
    /// SHA-256 of the encrypted artifact, hex encoded
    pub checksum: String,
    /// Intermediate artifacts left on disk because `keep_files` was set
    pub retained: Vec<PathBuf>,
    pub delivery: DeliveryOutcome,
    pub warnings: Vec<String>,
}

impl BackupReport {
    /// The backup exists but delivery did not happen.
    pub fn is_partial(&self) -> bool {
        self.delivery.is_failed()
    }
}

pub struct BackupPipeline<'a> {
    registry: &'a ProviderRegistry,
    archiver: Archiver,
    cipher: CipherStage,
}

impl<'a> BackupPipeline<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            archiver: Archiver::new(),
            cipher: CipherStage::default(),
        }
    }

    pub fn with_cipher(mut self, cipher: CipherStage) -> Self {
        self.cipher = cipher;
        self
    }

    #[instrument(skip(self, request), fields(provider = %request.provider))]
    pub async fn run(&self, request: BackupRequest) -> Result<BackupReport> {
        let provider = self
            .registry
            .get(&request.provider)
            .map_err(|e| e.at(Stage::Validate, &request.provider))?;
        let descriptor = provider.descriptor().clone();
        let name = descriptor.name.clone();

        let validation = provider.validate_config(&request.options);
        if !validation.valid {
            return Err(VaultError::InvalidOptions {
                provider: name.clone(),
                errors: validation.errors,
            }
            .at(Stage::Validate, &name));
        }

        let keys = KeyPair::load(&request.keys_path).map_err(|e| e.at(Stage::Keys, &name))?;

        if !provider.is_available().await {
            return Err(VaultError::ToolUnavailable { tool: name.clone() }.at(Stage::Probe, &name));
        }

        fs::create_dir_all(&request.output_dir)
            .map_err(|e| VaultError::from(e).at(Stage::Dump, &name))?;

        self.execute(provider, &descriptor, keys, request).await
    }

    async fn execute(
        &self,
        provider: Arc<dyn DatabaseProvider>,
        descriptor: &ProviderDescriptor,
        keys: KeyPair,
        request: BackupRequest,
    ) -> Result<BackupReport> {
        let name = descriptor.name.as_str();
        let database = request.options.database_label(name);
        let names = BackupNames::new(&request.prefix, &database, provider.file_extension());
        let dump_path = request.output_dir.join(&names.dump);
        let archive_path = request.output_dir.join(&names.archive);
        let encrypted_path = request.output_dir.join(&names.encrypted);

        let mut state = BackupState::Init;
        let mut intermediates = IntermediateFiles::new();

        let result = async {
            intermediates.track(&dump_path);
            provider
                .create_dump(&dump_path, &request.options)
                .await
                .map_err(|e| e.at(Stage::Dump, name))?;
            state = advance(state, BackupState::Dumped);

            intermediates.track(&archive_path);
            let archiver = self.archiver;
            let (source, target) = (dump_path.clone(), archive_path.clone());
            blocking(move || archiver.compress(&source, &target))
                .await
                .map_err(|e| e.at(Stage::Archive, name))?;
            state = advance(state, BackupState::Archived);

            let cipher = self.cipher.clone();
            let public_key = keys.public_key.clone();
            let (source, target) = (archive_path.clone(), encrypted_path.clone());
            blocking(move || cipher.encrypt_file(&source, &target, &public_key))
                .await
                .map_err(|e| e.at(Stage::Encrypt, name))?;
            state = advance(state, BackupState::Encrypted);
            Ok::<(), VaultError>(())
        }
        .await;

        if let Err(e) = result {
            warn!("Backup failed after reaching {} state: {}", state, e);
            advance(state, BackupState::Failed);
            intermediates.cleanup();
            return Err(e);
        }

        let mut warnings = Vec::new();
        let size_bytes = fs::metadata(&encrypted_path).map(|m| m.len()).unwrap_or(0);
        let checksum = match sha256_file(&encrypted_path) {
            Ok(checksum) => checksum,
            Err(e) => {
                warnings.push(format!("could not checksum {}: {}", encrypted_path.display(), e));
                String::new()
            }
        };

        let delivery = match &request.delivery {
            Some(delivery) => {
                let message = EmailMessage {
                    to: delivery.to.clone(),
                    subject: email_subject(descriptor, &database),
                    body: email_body(
                        descriptor,
                        &database,
                        &names.encrypted,
                        size_bytes,
                        &checksum,
                    ),
                    attachment: encrypted_path.clone(),
                };
                match delivery.mailer.send(&message).await {
                    Ok(()) => {
                        state = advance(state, BackupState::Delivered);
                        DeliveryOutcome::Delivered {
                            to: delivery.to.clone(),
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Email delivery to {} failed, backup kept at {:?}: {}",
                            delivery.to, encrypted_path, e
                        );
                        DeliveryOutcome::Failed {
                            to: delivery.to.clone(),
                            error: e.to_string(),
                        }
                    }
                }
            }
            None => DeliveryOutcome::Skipped,
        };

        let retained = if request.keep_files {
            intermediates.keep()
        } else {
            warnings.extend(intermediates.cleanup());
            Vec::new()
        };
        state = advance(state, BackupState::Cleaned);
        advance(state, BackupState::Done);

        info!(
            "Backup of {} {} complete: {:?} ({} bytes)",
            descriptor.display_name, database, encrypted_path, size_bytes
        );
        Ok(BackupReport {
            provider: name.to_string(),
            database,
            encrypted_path,
            size_bytes,
            checksum,
            retained,
            delivery,
            warnings,
        })
    }
}

fn advance(from: BackupState, to: BackupState) -> BackupState {
    debug!("backup state {} -> {}", from, to);
    to
}

/// `Database Backup: <display name> <database> <YYYY-MM-DD HH:MM:SS>`
pub fn email_subject(descriptor: &ProviderDescriptor, database: &str) -> String {
    format!(
        "Database Backup: {} {} {}",
        descriptor.display_name,
        database,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn email_body(
    descriptor: &ProviderDescriptor,
    database: &str,
    file_name: &str,
    size_bytes: u64,
    checksum: &str,
) -> String {
    format!(
        "A new encrypted database backup is attached.\n\n\
         Provider: {}\n\
         Database: {}\n\
         File: {}\n\
         Size: {}\n\
         SHA-256: {}\n\n\
         The backup is encrypted with your post-quantum public key.\n\
         Keep your private key safe: it is required to restore this backup.\n",
        descriptor.display_name,
        database,
        file_name,
        format_size(size_bytes),
        checksum
    )
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_format() {
        let descriptor = ProviderDescriptor::new("mysql", "MySQL", "sql");
        let subject = email_subject(&descriptor, "orders_db");
        let stamp = subject
            .strip_prefix("Database Backup: MySQL orders_db ")
            .unwrap();
        assert_eq!(stamp.len(), "2024-01-01 00:00:00".len());
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[10..11], " ");
    }

    #[test]
    fn test_body_lists_artifact_details() {
        let descriptor = ProviderDescriptor::new("postgresql", "PostgreSQL", "dump");
        let body = email_body(&descriptor, "orders_db", "x.zip.encrypted", 2048, "abc123");
        assert!(body.contains("Provider: PostgreSQL"));
        assert!(body.contains("Database: orders_db"));
        assert!(body.contains("File: x.zip.encrypted"));
        assert!(body.contains("Size: 2.00 KB"));
        assert!(body.contains("SHA-256: abc123"));
        assert!(body.contains("private key"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_delivery_outcome() {
        assert!(!DeliveryOutcome::Skipped.is_failed());
        assert!(DeliveryOutcome::Failed {
            to: "ops@example.com".into(),
            error: "timeout".into()
        }
        .is_failed());
    }
}
