//! The credential slot: one capability token, persisted across restarts.
//!
//! There is exactly one slot, not a collection; re-initializing overwrites.
//! Persistence is behind the [`CredentialBackend`] trait so orchestration
//! logic never knows whether the token lives in memory (tests, ephemeral
//! embedders) or in a JSON file on disk (the CLI).
//!
//! Initialization validates before it persists, and a failed validation
//! also *clears* whatever was stored before — a half-configured slot is
//! worse than an empty one, because `check_access` would keep steering runs
//! into an upload phase that can only fail.

use crate::error::Pdf2SheetError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// The persisted slot contents.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Set when the payload passed validation. Persisted explicitly so a
    /// reopened store can answer `check_access` without re-validating.
    pub initialized: bool,
    /// The opaque capability payload (a service-account key as JSON text).
    pub service_account_key: String,
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredential")
            .field("initialized", &self.initialized)
            .field("service_account_key", &"<redacted>")
            .finish()
    }
}

/// Where the slot lives.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Read the slot. `Ok(None)` when nothing is persisted.
    async fn load(&self) -> Result<Option<StoredCredential>, Pdf2SheetError>;
    /// Replace the slot contents.
    async fn store(&self, credential: &StoredCredential) -> Result<(), Pdf2SheetError>;
    /// Empty the slot. Succeeds when already empty.
    async fn clear(&self) -> Result<(), Pdf2SheetError>;
}

/// In-memory slot for tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<StoredCredential>>,
}

#[async_trait]
impl CredentialBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<StoredCredential>, Pdf2SheetError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    async fn store(&self, credential: &StoredCredential) -> Result<(), Pdf2SheetError> {
        *self.slot.lock().unwrap() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), Pdf2SheetError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}

/// JSON-file slot surviving process restarts.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialBackend for FileBackend {
    async fn load(&self) -> Result<Option<StoredCredential>, Pdf2SheetError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Pdf2SheetError::CredentialStorage {
                    reason: format!("read {}: {e}", self.path.display()),
                })
            }
        };
        let credential = serde_json::from_slice(&bytes).map_err(|e| {
            Pdf2SheetError::CredentialStorage {
                reason: format!("parse {}: {e}", self.path.display()),
            }
        })?;
        Ok(Some(credential))
    }

    async fn store(&self, credential: &StoredCredential) -> Result<(), Pdf2SheetError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Pdf2SheetError::CredentialStorage {
                    reason: format!("create {}: {e}", parent.display()),
                }
            })?;
        }
        let bytes = serde_json::to_vec_pretty(credential).map_err(|e| {
            Pdf2SheetError::CredentialStorage {
                reason: format!("encode credential: {e}"),
            }
        })?;
        tokio::fs::write(&self.path, bytes).await.map_err(|e| {
            Pdf2SheetError::CredentialStorage {
                reason: format!("write {}: {e}", self.path.display()),
            }
        })?;
        debug!("Credential persisted to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), Pdf2SheetError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Pdf2SheetError::CredentialStorage {
                reason: format!("remove {}: {e}", self.path.display()),
            }),
        }
    }
}

/// The single credential slot used by the storage relay.
pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
}

impl CredentialStore {
    /// A store over any backend.
    pub fn new(backend: Box<dyn CredentialBackend>) -> Self {
        Self { backend }
    }

    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::default()))
    }

    /// A store persisting to a JSON file.
    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileBackend::new(path)))
    }

    /// Validate and persist a capability payload.
    ///
    /// On any failure the slot is cleared before the error is returned.
    pub async fn initialize(&self, payload: &str) -> Result<(), Pdf2SheetError> {
        if let Err(reason) = validate_service_account_key(payload) {
            warn!("Credential payload rejected: {reason}");
            let _ = self.backend.clear().await;
            return Err(Pdf2SheetError::CredentialRejected { reason });
        }
        let credential = StoredCredential {
            initialized: true,
            service_account_key: payload.to_string(),
        };
        if let Err(e) = self.backend.store(&credential).await {
            let _ = self.backend.clear().await;
            return Err(e);
        }
        info!("Storage credential initialised");
        Ok(())
    }

    /// True iff a validated credential is currently persisted.
    ///
    /// Backend errors read as "no access"; this never verifies remote
    /// reachability.
    pub async fn check_access(&self) -> bool {
        matches!(self.backend.load().await, Ok(Some(c)) if c.initialized)
    }

    /// The opaque payload, when one is persisted and initialized.
    pub async fn credential(&self) -> Option<String> {
        match self.backend.load().await {
            Ok(Some(c)) if c.initialized => Some(c.service_account_key),
            _ => None,
        }
    }

    /// Empty the slot.
    pub async fn clear(&self) -> Result<(), Pdf2SheetError> {
        self.backend.clear().await
    }
}

/// A plausible service-account key: non-empty, well-formed JSON, an object.
///
/// Anything deeper (required fields, key validity) is the storage side's
/// concern; rejecting obvious garbage here keeps a doomed credential from
/// ever reaching `check_access`.
fn validate_service_account_key(payload: &str) -> Result<(), String> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err("payload is empty".to_string());
    }
    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| format!("not valid JSON: {e}"))?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = r#"{"type":"service_account","client_email":"svc@example.iam"}"#;

    #[tokio::test]
    async fn fresh_store_reports_no_access() {
        let store = CredentialStore::in_memory();
        assert!(!store.check_access().await);
        assert!(store.credential().await.is_none());
    }

    #[tokio::test]
    async fn initialize_then_check_access() {
        let store = CredentialStore::in_memory();
        store.initialize(KEY).await.unwrap();
        assert!(store.check_access().await);
        assert_eq!(store.credential().await.unwrap(), KEY);
    }

    #[tokio::test]
    async fn invalid_payload_clears_a_previous_credential() {
        let store = CredentialStore::in_memory();
        store.initialize(KEY).await.unwrap();

        let err = store.initialize("not json at all").await.unwrap_err();
        assert!(matches!(err, Pdf2SheetError::CredentialRejected { .. }));
        assert!(!store.check_access().await);
        assert!(store.credential().await.is_none());
    }

    #[tokio::test]
    async fn non_object_json_is_rejected() {
        let store = CredentialStore::in_memory();
        let err = store.initialize("[1,2,3]").await.unwrap_err();
        assert!(matches!(err, Pdf2SheetError::CredentialRejected { .. }));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let store = CredentialStore::in_memory();
        let err = store.initialize("   ").await.unwrap_err();
        assert!(matches!(err, Pdf2SheetError::CredentialRejected { .. }));
    }

    #[tokio::test]
    async fn reinitialize_overwrites_the_slot() {
        let store = CredentialStore::in_memory();
        store.initialize(KEY).await.unwrap();
        store.initialize(r#"{"type":"service_account","id":2}"#).await.unwrap();
        assert!(store.credential().await.unwrap().contains("\"id\":2"));
    }

    #[tokio::test]
    async fn file_backend_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::on_disk(&path);
        store.initialize(KEY).await.unwrap();
        drop(store);

        let reopened = CredentialStore::on_disk(&path);
        assert!(reopened.check_access().await);
        assert_eq!(reopened.credential().await.unwrap(), KEY);
    }

    #[tokio::test]
    async fn file_backend_clear_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::on_disk(&path);
        store.initialize(KEY).await.unwrap();
        store.clear().await.unwrap();
        assert!(!path.exists());
        assert!(!store.check_access().await);
        // Clearing an already-empty slot is fine.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_no_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{{not json").unwrap();

        let store = CredentialStore::on_disk(&path);
        assert!(!store.check_access().await);
        assert!(store.credential().await.is_none());
    }

    #[test]
    fn debug_redacts_the_key() {
        let c = StoredCredential {
            initialized: true,
            service_account_key: "super-secret".into(),
        };
        let dump = format!("{c:?}");
        assert!(!dump.contains("super-secret"), "got: {dump}");
    }
}
