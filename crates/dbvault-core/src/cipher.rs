//! Post-quantum file encryption
//!
//! The pipelines only see the `PqCipher` capability. The built-in
//! `MlKemCipher` is a KEM/DEM construction:
//! - ML-KEM-768 encapsulation against the recipient public key
//! - HKDF-SHA256 over the shared secret to derive an AES-256 key
//! - AES-256-GCM over the payload, authenticating the envelope header
//!
//! Envelope layout: `DBVPQ001 | KEM ciphertext | nonce (12) | ciphertext+tag`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use rand::RngCore;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};

use crate::errors::{Result, VaultError};

pub const MAGIC: &[u8; 8] = b"DBVPQ001";
pub const NONCE_LEN: usize = 12;
const KDF_INFO: &[u8] = b"dbvault ml-kem-768 aes-256-gcm";

/// Opaque encrypt/decrypt capability over in-memory buffers.
pub trait PqCipher: Send + Sync {
    fn algorithm(&self) -> &'static str;

    fn encrypt(&self, plaintext: &[u8], public_key: &str) -> Result<Vec<u8>>;

    /// Must fail on a mismatched key or a tampered envelope.
    fn decrypt(&self, envelope: &[u8], private_key: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MlKemCipher;

impl MlKemCipher {
    fn header_len() -> usize {
        MAGIC.len() + mlkem768::ciphertext_bytes() + NONCE_LEN
    }

    fn derive_cipher(shared_secret: &[u8]) -> Result<Aes256Gcm> {
        let hkdf = Hkdf::<Sha256>::new(Some(&MAGIC[..]), shared_secret);
        let mut key = [0u8; 32];
        hkdf.expand(KDF_INFO, &mut key)
            .map_err(|_| VaultError::CipherFailed("key derivation failed".into()))?;
        Aes256Gcm::new_from_slice(&key)
            .map_err(|_| VaultError::CipherFailed("invalid derived key length".into()))
    }
}

impl PqCipher for MlKemCipher {
    fn algorithm(&self) -> &'static str {
        "ML-KEM-768 + AES-256-GCM"
    }

    fn encrypt(&self, plaintext: &[u8], public_key: &str) -> Result<Vec<u8>> {
        let public_key = mlkem768::PublicKey::from_bytes(&decode_key(public_key, "public")?)
            .map_err(|e| VaultError::CipherFailed(format!("invalid public key: {}", e)))?;
        let (shared_secret, kem_ciphertext) = mlkem768::encapsulate(&public_key);
        let cipher = Self::derive_cipher(shared_secret.as_bytes())?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut envelope = Vec::with_capacity(Self::header_len() + plaintext.len() + 16);
        envelope.extend_from_slice(MAGIC);
        envelope.extend_from_slice(kem_ciphertext.as_bytes());
        envelope.extend_from_slice(&nonce);

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &envelope,
                },
            )
            .map_err(|_| VaultError::CipherFailed("encryption failed".into()))?;
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }

    fn decrypt(&self, envelope: &[u8], private_key: &str) -> Result<Vec<u8>> {
        let header_len = Self::header_len();
        if envelope.len() < header_len || &envelope[..MAGIC.len()] != MAGIC {
            return Err(VaultError::CipherFailed(
                "input is not a dbvault encrypted artifact".into(),
            ));
        }
        let secret_key = mlkem768::SecretKey::from_bytes(&decode_key(private_key, "private")?)
            .map_err(|e| VaultError::CipherFailed(format!("invalid private key: {}", e)))?;

        let kem_end = MAGIC.len() + mlkem768::ciphertext_bytes();
        let kem_ciphertext = mlkem768::Ciphertext::from_bytes(&envelope[MAGIC.len()..kem_end])
            .map_err(|e| VaultError::CipherFailed(format!("corrupt envelope: {}", e)))?;
        let nonce = &envelope[kem_end..header_len];

        let shared_secret = mlkem768::decapsulate(&kem_ciphertext, &secret_key);
        let cipher = Self::derive_cipher(shared_secret.as_bytes())?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &envelope[header_len..],
                    aad: &envelope[..header_len],
                },
            )
            .map_err(|_| {
                VaultError::CipherFailed(
                    "decryption failed: wrong private key or corrupted file".into(),
                )
            })
    }
}

fn decode_key(key: &str, which: &str) -> Result<Vec<u8>> {
    hex::decode(key.trim())
        .map_err(|e| VaultError::CipherFailed(format!("{} key is not valid hex: {}", which, e)))
}

/// File-level encrypt/decrypt with pre- and post-condition checks.
#[derive(Clone)]
pub struct CipherStage {
    cipher: Arc<dyn PqCipher>,
}

impl Default for CipherStage {
    fn default() -> Self {
        Self::new(Arc::new(MlKemCipher))
    }
}

impl CipherStage {
    pub fn new(cipher: Arc<dyn PqCipher>) -> Self {
        Self { cipher }
    }

    pub fn algorithm(&self) -> &'static str {
        self.cipher.algorithm()
    }

    #[instrument(skip(self, public_key))]
    pub fn encrypt_file(&self, input: &Path, output: &Path, public_key: &str) -> Result<()> {
        let plaintext = read_input(input)?;
        let envelope = self.cipher.encrypt(&plaintext, public_key)?;
        write_output(output, &envelope)?;
        info!(
            "Encrypted {:?} ({} -> {} bytes) with {}",
            input,
            plaintext.len(),
            envelope.len(),
            self.cipher.algorithm()
        );
        Ok(())
    }

    #[instrument(skip(self, private_key))]
    pub fn decrypt_file(&self, input: &Path, output: &Path, private_key: &str) -> Result<()> {
        let envelope = read_input(input)?;
        let plaintext = self.cipher.decrypt(&envelope, private_key)?;
        write_output(output, &plaintext)?;
        info!("Decrypted {:?} into {:?}", input, output);
        Ok(())
    }
}

fn read_input(input: &Path) -> Result<Vec<u8>> {
    if !input.is_file() {
        return Err(VaultError::CipherFailed(format!(
            "input file {} does not exist",
            input.display()
        )));
    }
    fs::read(input)
        .map_err(|e| VaultError::CipherFailed(format!("failed to read {}: {}", input.display(), e)))
}

fn write_output(output: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(output);
    let written = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, output));
    if let Err(e) = written {
        if tmp.exists() {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!("Failed to remove {:?}: {}", tmp, cleanup);
            }
        }
        return Err(VaultError::CipherFailed(format!(
            "failed to write {}: {}",
            output.display(),
            e
        )));
    }

    if !output.is_file() {
        return Err(VaultError::CipherFailed(format!(
            "output file {} was not created",
            output.display()
        )));
    }
    debug!("Wrote {} bytes to {:?}", bytes.len(), output);
    Ok(())
}

fn tmp_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    output.with_file_name(name)
}
