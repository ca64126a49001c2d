//! Backup and restore pipelines
//!
//! Both pipelines run their stages strictly in order, attach stage and
//! provider context to the first failure and stop there. Every artifact
//! they create lives in a scope they own:
//! - backup: dump and archive are intermediate, the encrypted file is the product
//! - restore: everything lives in a private work directory removed on exit

pub mod backup;
pub mod restore;
pub mod workdir;

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::{Result, VaultError};

pub use backup::{
    BackupPipeline, BackupReport, BackupRequest, BackupState, DeliveryOutcome, DeliveryRequest,
};
pub use restore::{RestorePipeline, RestoreReport, RestoreRequest, RestoreState};
pub use workdir::{IntermediateFiles, ScopedWorkDir};

/// SHA-256 of a file, hex encoded.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Runs synchronous file work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| VaultError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
}
