//! Key pair file loading.
//!
//! The file is a JSON object with `publicKey` and `privateKey` strings.
//! Keys are read-only input; nothing here ever writes them back.

use std::fmt;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, VaultError};

pub const PUBLIC_KEY_FIELD: &str = "publicKey";
pub const PRIVATE_KEY_FIELD: &str = "privateKey";

#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl KeyPair {
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            VaultError::ConfigInvalid(format!("cannot read key file {}: {}", path.display(), e))
        })?;
        let pair = Self::parse(&raw).map_err(|e| match e {
            VaultError::ConfigInvalid(msg) => {
                VaultError::ConfigInvalid(format!("key file {}: {}", path.display(), msg))
            }
            other => other,
        })?;
        debug!("Loaded key pair from {:?}", path);
        Ok(pair)
    }

    /// Parses key file contents, naming every missing or empty field.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let object = value
            .as_object()
            .ok_or_else(|| VaultError::ConfigInvalid("expected a JSON object".into()))?;

        let field = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let public_key = field(PUBLIC_KEY_FIELD);
        let private_key = field(PRIVATE_KEY_FIELD);
        match (public_key, private_key) {
            (Some(public_key), Some(private_key)) => Ok(Self {
                public_key,
                private_key,
            }),
            (public_key, private_key) => {
                let mut missing = Vec::new();
                if public_key.is_none() {
                    missing.push(PUBLIC_KEY_FIELD.to_string());
                }
                if private_key.is_none() {
                    missing.push(PRIVATE_KEY_FIELD.to_string());
                }
                Err(VaultError::KeysMissingFields(missing))
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &format!("{} hex chars", self.public_key.len()))
            .field("private_key", &"****")
            .finish()
    }
}
