//! Remote collaborators and the credential slot they share.
//!
//! The orchestrator never talks HTTP itself; it drives the two collaborator
//! traits defined here. Production adapters ([`ConvertApiClient`],
//! [`DriveRelayClient`]) speak the real wire contracts; tests substitute the
//! mockall mocks generated on the traits (exported under the
//! `test-export-mocks` feature so integration tests can use them too).

mod convert;
mod credentials;
mod storage;

pub use convert::{ConversionClient, ConvertApiClient, Converted};
pub use credentials::{
    CredentialBackend, CredentialStore, FileBackend, MemoryBackend, StoredCredential,
};
pub use storage::{DriveRelayClient, StorageUploader};

#[cfg(any(test, feature = "test-export-mocks"))]
pub use convert::MockConversionClient;
#[cfg(any(test, feature = "test-export-mocks"))]
pub use storage::MockStorageUploader;
