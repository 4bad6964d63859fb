//! # Certificates
//!
//! A certificate starts out as a [`CertificateRequest`], becomes an [`IssuedCertificate`]
//! exactly once when the signer attaches a serial and the signed content, and may later be
//! revoked. There is no way back from revoked.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CaId;
use crate::signing_engine::options::CertificateOptions;

/// A named grouping whose identifier becomes a certificate principal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SecurityZone {
    pub identifier: String,
}

impl SecurityZone {
    pub fn new(identifier: impl Into<String>) -> Self {
        SecurityZone {
            identifier: identifier.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateKind {
    User,
    Host,
}

/// What the signer needs to know about a certificate, independent of its variant.
pub trait CertificateSubject {
    /// The certificate identity (`ssh-keygen -I`).
    fn identity(&self) -> &str;
    /// Principal names in zone order.
    fn principals(&self) -> Vec<String>;
    /// Capability restrictions. Host certificates carry none.
    fn options(&self) -> CertificateOptions;
    fn kind(&self) -> CertificateKind;
}

/// Request for a user certificate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserCertificateRequest {
    pub user_identifier: String,
    pub public_key: String,
    pub security_zones: Vec<SecurityZone>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub options: CertificateOptions,
}

impl UserCertificateRequest {
    pub fn new(user_identifier: impl Into<String>, public_key: impl Into<String>) -> Self {
        UserCertificateRequest {
            user_identifier: user_identifier.into(),
            public_key: public_key.into(),
            security_zones: Vec::new(),
            valid_from: None,
            valid_until: None,
            options: CertificateOptions::default(),
        }
    }

    /// Adds a zone unless one with the same identifier is already present.
    pub fn add_security_zone(&mut self, zone: SecurityZone) -> &mut Self {
        push_unique_zone(&mut self.security_zones, zone);
        self
    }
}

impl CertificateSubject for UserCertificateRequest {
    fn identity(&self) -> &str {
        &self.user_identifier
    }

    fn principals(&self) -> Vec<String> {
        zone_principals(&self.security_zones)
    }

    fn options(&self) -> CertificateOptions {
        self.options.clone()
    }

    fn kind(&self) -> CertificateKind {
        CertificateKind::User
    }
}

/// Request for a host certificate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HostCertificateRequest {
    pub fully_qualified_name: String,
    pub public_key: String,
    pub security_zones: Vec<SecurityZone>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl HostCertificateRequest {
    pub fn new(fully_qualified_name: impl Into<String>, public_key: impl Into<String>) -> Self {
        HostCertificateRequest {
            fully_qualified_name: fully_qualified_name.into(),
            public_key: public_key.into(),
            security_zones: Vec::new(),
            valid_from: None,
            valid_until: None,
        }
    }

    pub fn add_security_zone(&mut self, zone: SecurityZone) -> &mut Self {
        push_unique_zone(&mut self.security_zones, zone);
        self
    }
}

impl CertificateSubject for HostCertificateRequest {
    fn identity(&self) -> &str {
        &self.fully_qualified_name
    }

    fn principals(&self) -> Vec<String> {
        zone_principals(&self.security_zones)
    }

    fn options(&self) -> CertificateOptions {
        CertificateOptions::none()
    }

    fn kind(&self) -> CertificateKind {
        CertificateKind::Host
    }
}

fn push_unique_zone(zones: &mut Vec<SecurityZone>, zone: SecurityZone) {
    if !zones.iter().any(|z| z.identifier == zone.identifier) {
        zones.push(zone);
    }
}

fn zone_principals(zones: &[SecurityZone]) -> Vec<String> {
    zones.iter().map(|zone| zone.identifier.clone()).collect()
}

/// An unsigned certificate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CertificateRequest {
    User(UserCertificateRequest),
    Host(HostCertificateRequest),
}

impl CertificateRequest {
    pub fn public_key(&self) -> &str {
        match self {
            CertificateRequest::User(request) => &request.public_key,
            CertificateRequest::Host(request) => &request.public_key,
        }
    }

    pub fn security_zones(&self) -> &[SecurityZone] {
        match self {
            CertificateRequest::User(request) => &request.security_zones,
            CertificateRequest::Host(request) => &request.security_zones,
        }
    }

    pub fn valid_from(&self) -> Option<DateTime<Utc>> {
        match self {
            CertificateRequest::User(request) => request.valid_from,
            CertificateRequest::Host(request) => request.valid_from,
        }
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        match self {
            CertificateRequest::User(request) => request.valid_until,
            CertificateRequest::Host(request) => request.valid_until,
        }
    }

    fn subject(&self) -> &dyn CertificateSubject {
        match self {
            CertificateRequest::User(request) => request,
            CertificateRequest::Host(request) => request,
        }
    }
}

impl From<UserCertificateRequest> for CertificateRequest {
    fn from(request: UserCertificateRequest) -> Self {
        CertificateRequest::User(request)
    }
}

impl From<HostCertificateRequest> for CertificateRequest {
    fn from(request: HostCertificateRequest) -> Self {
        CertificateRequest::Host(request)
    }
}

impl CertificateSubject for CertificateRequest {
    fn identity(&self) -> &str {
        self.subject().identity()
    }

    fn principals(&self) -> Vec<String> {
        self.subject().principals()
    }

    fn options(&self) -> CertificateOptions {
        self.subject().options()
    }

    fn kind(&self) -> CertificateKind {
        self.subject().kind()
    }
}

/// A signed certificate.
///
/// The owning authority, the serial and the content are fixed at construction; only the
/// revocation timestamp can change, and only once.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IssuedCertificate {
    request: CertificateRequest,
    authority: CaId,
    serial_number: u64,
    content: String,
    revoked_at: Option<DateTime<Utc>>,
    issued_at: DateTime<Utc>,
}

impl IssuedCertificate {
    pub(crate) fn new(
        request: CertificateRequest,
        authority: CaId,
        serial_number: u64,
        content: String,
    ) -> Self {
        IssuedCertificate {
            request,
            authority,
            serial_number,
            content,
            revoked_at: None,
            issued_at: Utc::now(),
        }
    }

    pub fn authority(&self) -> &CaId {
        &self.authority
    }

    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    /// The certificate as written by the signing engine (OpenSSH format).
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Marks the certificate as revoked. Returns `false` if it already was.
    pub fn revoke(&mut self, at: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        self.revoked_at = Some(at);
        true
    }
}

impl CertificateSubject for IssuedCertificate {
    fn identity(&self) -> &str {
        self.request.identity()
    }

    fn principals(&self) -> Vec<String> {
        self.request.principals()
    }

    fn options(&self) -> CertificateOptions {
        self.request.options()
    }

    fn kind(&self) -> CertificateKind {
        self.request.kind()
    }
}
