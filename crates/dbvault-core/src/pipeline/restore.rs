//! Restore pipeline: decrypt → extract → restore, inside a scoped work directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::blocking;
use super::workdir::ScopedWorkDir;
use crate::archive::Archiver;
use crate::cipher::CipherStage;
use crate::errors::{Result, Stage, VaultError};
use crate::keys::KeyPair;
use crate::naming::ENCRYPTED_SUFFIX;
use crate::provider::{DatabaseProvider, ProviderOptions, ProviderRegistry};

const WORK_DIR_LABEL: &str = "dbvault-restore";
const EXTRACT_DIR: &str = "extracted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Init,
    Decrypted,
    Extracted,
    Restored,
    Done,
    Failed,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub provider: String,
    pub options: ProviderOptions,
    pub encrypted_path: PathBuf,
    pub keys_path: PathBuf,
    /// Parent of the private work directory; system temp dir when unset
    pub work_root: Option<PathBuf>,
}

impl RestoreRequest {
    pub fn new(
        provider: impl Into<String>,
        options: ProviderOptions,
        encrypted_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider: provider.into(),
            options,
            encrypted_path: encrypted_path.into(),
            keys_path: keys_path.into(),
            work_root: None,
        }
    }

    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub provider: String,
    pub dump_file_name: String,
}

pub struct RestorePipeline<'a> {
    registry: &'a ProviderRegistry,
    archiver: Archiver,
    cipher: CipherStage,
}

impl<'a> RestorePipeline<'a> {
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

    /// Restores `request.encrypted_path` into the target database.
    ///
    /// The work directory is gone when this returns, whatever the outcome.
    #[instrument(skip(self, request), fields(provider = %request.provider))]
    pub async fn run(&self, request: RestoreRequest) -> Result<RestoreReport> {
        let provider = self
            .registry
            .get(&request.provider)
            .map_err(|e| e.at(Stage::Validate, &request.provider))?;
        let name = provider.descriptor().name.clone();

        let validation = provider.validate_config(&request.options);
        if !validation.valid {
            return Err(VaultError::InvalidOptions {
                provider: name.clone(),
                errors: validation.errors,
            }
            .at(Stage::Validate, &name));
        }

        let keys = KeyPair::load(&request.keys_path).map_err(|e| e.at(Stage::Keys, &name))?;

        if !provider.is_restore_available().await {
            return Err(VaultError::ToolUnavailable { tool: name.clone() }.at(Stage::Probe, &name));
        }

        let root = request
            .work_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let work_dir = ScopedWorkDir::create(&root, WORK_DIR_LABEL)
            .map_err(|e| VaultError::from(e).at(Stage::Decrypt, &name))?;

        let result = self.execute(provider, &name, &keys, &request, &work_dir).await;
        if let Err(e) = work_dir.close() {
            warn!("Failed to remove restore work directory: {}", e);
        }
        result
    }

    async fn execute(
        &self,
        provider: Arc<dyn DatabaseProvider>,
        name: &str,
        keys: &KeyPair,
        request: &RestoreRequest,
        work_dir: &ScopedWorkDir,
    ) -> Result<RestoreReport> {
        let mut state = RestoreState::Init;

        let result = async {
            let archive_path = work_dir.join(decrypted_name(&request.encrypted_path));
            let cipher = self.cipher.clone();
            let private_key = keys.private_key.clone();
            let (source, target) = (request.encrypted_path.clone(), archive_path.clone());
            blocking(move || cipher.decrypt_file(&source, &target, &private_key))
                .await
                .map_err(|e| e.at(Stage::Decrypt, name))?;
            state = advance(state, RestoreState::Decrypted);

            let archiver = self.archiver;
            let extract_dir = work_dir.join(EXTRACT_DIR);
            let dump_path = blocking(move || archiver.extract(&archive_path, &extract_dir))
                .await
                .map_err(|e| e.at(Stage::Extract, name))?;
            state = advance(state, RestoreState::Extracted);

            provider
                .restore_from_dump(&dump_path, &request.options)
                .await
                .map_err(|e| e.at(Stage::Restore, name))?;
            state = advance(state, RestoreState::Restored);

            let dump_file_name = dump_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok::<String, VaultError>(dump_file_name)
        }
        .await;

        match result {
            Ok(dump_file_name) => {
                advance(state, RestoreState::Done);
                info!("Restored {} from {:?}", name, request.encrypted_path);
                Ok(RestoreReport {
                    provider: name.to_string(),
                    dump_file_name,
                })
            }
            Err(e) => {
                warn!("Restore failed after reaching {} state: {}", state, e);
                advance(state, RestoreState::Failed);
                Err(e)
            }
        }
    }
}

/// `x.zip.encrypted` decrypts to `x.zip`.
fn decrypted_name(encrypted: &Path) -> String {
    let name = encrypted
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => "backup.zip".to_string(),
    }
}

fn advance(from: RestoreState, to: RestoreState) -> RestoreState {
    debug!("restore state {} -> {}", from, to);
    to
}
