//! Saved Wi-Fi credentials.
//!
//! One JSON record on disk:
//!
//! ```json
//! {"ssid": "home", "password": "secret123"}
//! ```
//!
//! A record without a non-empty `ssid` or without a `password` key is treated
//! as if nothing were stored.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::NetworkCredentials;

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing credentials at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a credential record.
    #[error("failed to parse credentials: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialRecord {
    #[serde(default)]
    ssid: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// File-backed store for a single [`NetworkCredentials`] record.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored credentials, if any usable record exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] for file-system errors other than "not found";
    /// [`StoreError::Parse`] when the file is not valid JSON.
    pub fn load(&self) -> Result<Option<NetworkCredentials>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let record: CredentialRecord = serde_json::from_str(&content).map_err(StoreError::Parse)?;
        match (record.ssid, record.password) {
            (Some(ssid), Some(password)) if !ssid.is_empty() => {
                Ok(Some(NetworkCredentials::new(ssid, password)))
            }
            _ => Ok(None),
        }
    }

    /// Replaces the stored record.
    pub fn save(&self, credentials: &NetworkCredentials) -> Result<(), StoreError> {
        let record = CredentialRecord {
            ssid: Some(credentials.ssid.clone()),
            password: Some(credentials.password.clone()),
        };
        let content = serde_json::to_string(&record).map_err(StoreError::Serialize)?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!("saved Wi-Fi credentials for '{}'", credentials.ssid);
        Ok(())
    }

    /// Deletes the stored record.  Deleting an absent record succeeds.
    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("cleared stored Wi-Fi credentials");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
