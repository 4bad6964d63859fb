//! # Data Model
//!
//! Certificate authorities and the certificates they issue.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod certificate;
pub use certificate::{
    CertificateKind, CertificateRequest, CertificateSubject, HostCertificateRequest,
    IssuedCertificate, SecurityZone, UserCertificateRequest,
};

/// Opaque, globally unique identifier of a certificate authority.
///
/// It is generated once when the authority is created and also names the file holding
/// the authority's private key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CaId(Uuid);

impl CaId {
    pub fn generate() -> Self {
        CaId(Uuid::new_v4())
    }
}

impl fmt::Display for CaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CaId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CaId(Uuid::parse_str(s)?))
    }
}

/// Whether an authority signs user or host keys.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaMode {
    User,
    Host,
}

impl CaMode {
    /// Comment embedded in the generated CA key.
    pub fn key_comment(&self) -> &'static str {
        match self {
            CaMode::User => "User CA",
            CaMode::Host => "Host CA",
        }
    }
}

impl fmt::Display for CaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaMode::User => write!(f, "user"),
            CaMode::Host => write!(f, "host"),
        }
    }
}

/// A certificate authority record.
///
/// The serial counter only ever moves forward and revocation is permanent. Both are
/// enforced by the mutators below; there is no way to lower the counter or clear
/// `revoked_at`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CertificateAuthority {
    id: CaId,
    mode: CaMode,
    public_key: String,
    comment: Option<String>,
    last_issued_serial_number: u64,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CertificateAuthority {
    /// Creates a fresh authority that has not issued anything yet.
    pub fn new(id: CaId, mode: CaMode, public_key: String, comment: Option<String>) -> Self {
        let now = Utc::now();
        CertificateAuthority {
            id,
            mode,
            public_key,
            comment,
            last_issued_serial_number: 0,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &CaId {
        &self.id
    }

    pub fn mode(&self) -> CaMode {
        self.mode
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn last_issued_serial_number(&self) -> u64 {
        self.last_issued_serial_number
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// The serial the next issued certificate receives, `None` once the counter is exhausted.
    pub fn next_serial_number(&self) -> Option<u64> {
        self.last_issued_serial_number.checked_add(1)
    }

    /// Moves the serial counter forward to `serial`.
    ///
    /// Returns `false` and leaves the counter untouched if `serial` is not strictly
    /// greater than the last issued one.
    pub fn advance_serial_number(&mut self, serial: u64) -> bool {
        if serial <= self.last_issued_serial_number {
            return false;
        }
        self.last_issued_serial_number = serial;
        self.updated_at = Utc::now();
        true
    }

    /// Marks the authority as revoked. Returns `false` if it already was.
    pub fn revoke(&mut self, at: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        self.revoked_at = Some(at);
        self.updated_at = at;
        true
    }

    #[cfg(test)]
    pub(crate) fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_last_issued_serial_number(mut self, serial: u64) -> Self {
        self.last_issued_serial_number = serial;
        self
    }
}
