//! # Certificate Authority Store
//!
//! Persistence of CA and certificate records.
//!
//! Serial allocation is the only shared mutation in the system. A [`StoreTransaction`]
//! makes the locking explicit: [`StoreTransaction::get_active`] locks the row of the
//! active CA and the lock is held until the transaction commits or is dropped, so two
//! concurrent signers can never read the same serial counter.
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{CaId, CertificateAuthority, IssuedCertificate};

pub mod config;
pub mod file_store;

pub use file_store::FileStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "no valid certificate authority available: an authority must be generated before certificates can be issued"
    )]
    NoActiveAuthority,
    #[error("unknown certificate authority {0}")]
    UnknownAuthority(CaId),
    #[error("no certificate with serial {serial} issued by {authority}")]
    UnknownCertificate { authority: CaId, serial: u64 },
    #[error("{0} is already revoked")]
    AlreadyRevoked(String),
    #[error("certificate authority {0} is not locked by this transaction")]
    NotLocked(CaId),
    #[error("serial {serial} was already issued by {authority}")]
    DuplicateSerial { authority: CaId, serial: u64 },
    #[error("serial counter of {authority} would move back from {current} to {requested}")]
    SerialRegression {
        authority: CaId,
        current: u64,
        requested: u64,
    },
    #[error("certificate authority {0} already exists")]
    DuplicateAuthority(CaId),
    #[error("lock file {path:?} is still held by another process")]
    LockTimeout { path: PathBuf },
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("store document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which certificates to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateFilter {
    #[default]
    All,
    /// Not revoked.
    Valid,
    Revoked,
}

impl CertificateFilter {
    pub fn matches(&self, certificate: &IssuedCertificate) -> bool {
        match self {
            CertificateFilter::All => true,
            CertificateFilter::Valid => !certificate.is_revoked(),
            CertificateFilter::Revoked => certificate.is_revoked(),
        }
    }
}

/// A unit of work against the store.
///
/// Changes are staged until [`commit`](StoreTransaction::commit); dropping the transaction
/// discards them and releases the CA lock.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Returns the newest non-revoked CA and locks it for the rest of the transaction.
    async fn get_active(&mut self) -> Result<CertificateAuthority, StoreError>;

    /// Stages an update of the locked CA (its serial counter).
    fn persist(&mut self, authority: &CertificateAuthority) -> Result<(), StoreError>;

    /// Stages a new certificate issued by the locked CA.
    fn insert_certificate(&mut self, certificate: &IssuedCertificate) -> Result<(), StoreError>;

    /// Applies all staged changes at once.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CertificateAuthorityStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn create_authority(&self, authority: CertificateAuthority) -> Result<(), StoreError>;

    /// All authorities, newest first.
    async fn authorities(&self) -> Result<Vec<CertificateAuthority>, StoreError>;

    /// Revokes an authority. Revoking twice is rejected.
    async fn revoke_authority(
        &self,
        id: &CaId,
        at: DateTime<Utc>,
    ) -> Result<CertificateAuthority, StoreError>;

    /// Issued certificates matching `filter`, newest first.
    async fn certificates(
        &self,
        filter: CertificateFilter,
    ) -> Result<Vec<IssuedCertificate>, StoreError>;

    /// Revokes a certificate. Revoking twice is rejected.
    async fn revoke_certificate(
        &self,
        authority: &CaId,
        serial: u64,
        at: DateTime<Utc>,
    ) -> Result<IssuedCertificate, StoreError>;
}
