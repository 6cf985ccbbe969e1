//! Encrypted file token store using AES-256-GCM
//!
//! File layout: 12-byte nonce followed by the ciphertext of a JSON document
//! holding the record list. The cipher key is the SHA-256 digest of the
//! configured key material, so any string can serve as a key.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::record::{purge, take_matching, upsert};
use crate::{AccountSelector, StoreError, TokenRecord};

const NONCE_LEN: usize = 12;
const FORMAT_VERSION: u32 = 1;

/// Key material used by the `file` level when none is configured.
///
/// This only obfuscates the file; anyone with the binary can decrypt it.
pub const EMBEDDED_FILE_KEY: &str = "pc-cli/token-store/file/v1";

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    // Kept as raw values so one malformed entry does not lose the rest
    records: Vec<serde_json::Value>,
}

/// Token store persisted to a single encrypted file
#[derive(Clone)]
pub struct FileStore {
    path: PathBuf,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, key_material: &[u8]) -> Self {
        let digest = Sha256::digest(key_material);
        Self {
            path: path.into(),
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest)),
        }
    }

    /// File store keyed with [`EMBEDDED_FILE_KEY`]
    pub fn with_embedded_key(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EMBEDDED_FILE_KEY.as_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bad_key(&self) -> StoreError {
        StoreError::BadKey {
            path: self.path.clone(),
        }
    }

    async fn load(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let encrypted = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if encrypted.is_empty() {
            return Ok(Vec::new());
        }
        if encrypted.len() < NONCE_LEN {
            return Err(self.bad_key());
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| self.bad_key())?;

        let document: StoreDocument =
            serde_json::from_slice(&plaintext).map_err(|_| StoreError::Corrupt {
                path: self.path.clone(),
            })?;

        let mut records = Vec::with_capacity(document.records.len());
        for (index, value) in document.records.into_iter().enumerate() {
            match serde_json::from_value::<TokenRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(index, error = %e, path = ?self.path, "Skipping malformed token record"),
            }
        }

        debug!(count = records.len(), path = ?self.path, "Loaded token store");
        Ok(records)
    }

    async fn save(&self, records: &[TokenRecord]) -> Result<(), StoreError> {
        let document = StoreDocument {
            version: FORMAT_VERSION,
            records: records
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
        };
        let plaintext = serde_json::to_vec(&document)?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");
        write_private(&tmp_path, &output).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!(count = records.len(), path = ?self.path, "Saved token store");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let mut records = self.load().await?;
        let purged = purge(&mut records, Utc::now());
        if purged > 0 {
            debug!(purged, "Purged expired records");
            self.save(&records).await?;
        }
        Ok(records)
    }

    pub async fn set(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut records = self.load().await?;
        upsert(&mut records, record);
        self.save(&records).await
    }

    pub async fn delete(
        &self,
        selector: &AccountSelector,
        base_url: Option<&str>,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let mut records = self.load().await?;
        let removed = take_matching(&mut records, selector, base_url);
        if !removed.is_empty() {
            self.save(&records).await?;
        }
        Ok(removed)
    }

    /// Remove the file regardless of whether it can be decrypted
    pub async fn reset(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `contents` to a fresh file readable only by the owner
async fn write_private(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;

    // A leftover temp file keeps its old mode, so start from a new inode
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{fully_expired, record};

    #[tokio::test]
    async fn test_roundtrip_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.file.enc");

        let original = record("a", "alice");
        FileStore::with_embedded_key(&path)
            .set(original.clone())
            .await
            .unwrap();

        let reopened = FileStore::with_embedded_key(&path);
        assert_eq!(reopened.list().await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn test_file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.file.enc");
        let store = FileStore::with_embedded_key(&path);
        store.set(record("a", "alice")).await.unwrap();

        let raw = std::fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(!text.contains("access-a"));
        assert!(!text.contains("alice"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.file.enc");
        FileStore::with_embedded_key(&path)
            .set(record("a", "alice"))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_leftover_temp_file_does_not_widen_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.file.enc");
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, b"stale").unwrap();
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileStore::with_embedded_key(&path);
        store.set(record("a", "alice")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!tmp_path.exists());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_key_is_bad_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.file.enc");
        FileStore::new(&path, b"first")
            .set(record("a", "alice"))
            .await
            .unwrap();

        let err = FileStore::new(&path, b"second").list().await.unwrap_err();
        assert!(err.is_bad_key());

        // reset works without the key
        FileStore::new(&path, b"second").reset().await.unwrap();
        assert!(FileStore::new(&path, b"second").list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::with_embedded_key(dir.path().join("nested/tokens.file.enc"));
        assert!(store.list().await.unwrap().is_empty());
        store.reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.file.enc");
        let store = FileStore::with_embedded_key(&path);
        store.set(fully_expired("old", "old")).await.unwrap();
        store.set(record("a", "alice")).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
        let raw = store.load().await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].hash, "a");
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.file.enc");
        let store = FileStore::with_embedded_key(&path);
        store.set(record("a", "alice")).await.unwrap();

        // Write a document with one valid and one malformed entry
        let good = serde_json::to_value(record("b", "bob")).unwrap();
        let document = StoreDocument {
            version: FORMAT_VERSION,
            records: vec![serde_json::json!({"hash": 42}), good],
        };
        let plaintext = serde_json::to_vec(&document).unwrap();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut output = nonce.to_vec();
        output.extend(store.cipher.encrypt(&nonce, plaintext.as_slice()).unwrap());
        std::fs::write(&path, output).unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "bob");
    }
}
