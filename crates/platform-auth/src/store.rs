//! Encrypted credential file
//!
//! Holds exactly one `CredentialRecord`, sealed with AES-256-GCM under a key
//! derived from the configured secret. Every save draws a fresh nonce and
//! writes through a temp file + rename, so a crash mid-write leaves the
//! previous record intact.
//!
//! Reads never fail: a missing file and an unreadable one both come back as
//! `None`, since the recovery for either is to authorize again. Corruption
//! is logged under its own kind so operators can tell the two apart.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::constants::{ENVELOPE_VERSION, KEY_DERIVATION_SALT};
use crate::error::{Error, Result};
use crate::secret::Secret;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// The persisted credential pair.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
}

impl CredentialRecord {
    /// All fields populated. Incomplete records are never written.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty() && self.expires_at > 0
    }
}

/// On-disk form: version tag, nonce and ciphertext, base64 encoded.
#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    nonce: String,
    ciphertext: String,
}

/// Single-record encrypted store backed by one file.
///
/// Writers (`save`, `clear`) are serialized by `write_lock`; readers are not.
pub struct CredentialStore {
    path: PathBuf,
    cipher: Aes256Gcm,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open a store at `path`, deriving the key from `secret`.
    ///
    /// Derivation is deterministic (Argon2id, fixed salt) and runs once
    /// here. Nothing is read from disk until `load`.
    pub fn new(path: PathBuf, secret: &Secret<String>) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Storage("encryption secret is empty".into()));
        }
        let key = derive_key(secret)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| Error::Storage(format!("initializing cipher: {e}")))?;
        info!(path = %path.display(), "credential store ready");
        Ok(Self {
            path,
            cipher,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encrypt and persist `record`, replacing any previous one.
    pub async fn save(&self, record: &CredentialRecord) -> Result<()> {
        if !record.is_complete() {
            return Err(Error::Storage("refusing to persist incomplete record".into()));
        }
        let plaintext = Zeroizing::new(
            serde_json::to_vec(record)
                .map_err(|e| Error::Storage(format!("serializing credential: {e}")))?,
        );

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| Error::Storage(format!("encrypting credential: {e}")))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| Error::Storage(format!("serializing envelope: {e}")))?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, &bytes).await
    }

    /// Read the stored record, or `None` if there is none or it cannot be
    /// decrypted.
    pub async fn load(&self) -> Option<CredentialRecord> {
        match self.read_record().await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    kind = e.kind(),
                    path = %self.path.display(),
                    error = %e,
                    "stored credential ignored, re-authorization required"
                );
                None
            }
        }
    }

    /// Delete the stored record. Absent is not an error.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "credential cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("removing credential file: {e}"))),
        }
    }

    async fn read_record(&self) -> Result<Option<CredentialRecord>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored credential");
                return Ok(None);
            }
            Err(e) => return Err(Error::StorageCorrupt(format!("reading file: {e}"))),
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| Error::StorageCorrupt(format!("parsing envelope: {e}")))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(Error::StorageCorrupt(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }

        let nonce = STANDARD
            .decode(&envelope.nonce)
            .map_err(|e| Error::StorageCorrupt(format!("decoding nonce: {e}")))?;
        if nonce.len() != NONCE_SIZE {
            return Err(Error::StorageCorrupt(format!(
                "nonce is {} bytes, expected {NONCE_SIZE}",
                nonce.len()
            )));
        }
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|e| Error::StorageCorrupt(format!("decoding ciphertext: {e}")))?;

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| {
                    Error::StorageCorrupt("decryption failed (wrong key or tampered file)".into())
                })?,
        );

        let record: CredentialRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::StorageCorrupt(format!("parsing credential: {e}")))?;
        if !record.is_complete() {
            return Err(Error::StorageCorrupt("stored record is incomplete".into()));
        }
        Ok(Some(record))
    }
}

fn derive_key(secret: &Secret<String>) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    Argon2::default()
        .hash_password_into(
            secret.expose().as_bytes(),
            KEY_DERIVATION_SALT,
            key.as_mut_slice(),
        )
        .map_err(|e| Error::Storage(format!("deriving storage key: {e}")))?;
    Ok(key)
}

/// Write `bytes` to `path` via a uniquely named temp file in the same
/// directory and a rename. The file is 0600 on unix.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Storage("credential path has no file name".into()))?;
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    ));

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| Error::Storage(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting credential file permissions: {e}")))?;
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Storage(format!("renaming temp credential file: {e}")));
    }

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}
