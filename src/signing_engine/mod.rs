//! # Signing Engine
//!
//! The cryptographic side of issuance: CA key generation, signing of user and host keys
//! and fingerprinting. [`SshKeygen`] drives the OpenSSH `ssh-keygen` tool; everything
//! else in the crate talks to the [`SigningEngine`] trait so it can be tested without
//! spawning processes.
use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::CaMode;

pub mod arguments;
pub mod config;
pub mod fingerprint;
pub mod options;
pub mod ssh_keygen;
pub mod staging;
pub mod validity;

pub use options::CertificateOptions;
pub use ssh_keygen::SshKeygen;

/// Hard limit of principals in an OpenSSH certificate.
pub const MAX_PRINCIPALS: usize = 256;

/// Errors reported by a signing engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The signing tool could not be started.
    #[error("signing tool {executable} is not available: {source}")]
    ToolUnavailable {
        executable: String,
        #[source]
        source: io::Error,
    },
    /// The signing tool ran but did not produce a usable result.
    #[error("signing failed ({reason}): {diagnostics}")]
    SigningFailed { reason: String, diagnostics: String },
    #[error("signing tool did not finish within {0:?}")]
    SigningTimeout(Duration),
    #[error("too many principals: {0} given, at most {MAX_PRINCIPALS} allowed")]
    TooManyPrincipals(usize),
    #[error("staging I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Everything needed to turn a public key into a certificate.
#[derive(Debug, Clone)]
pub struct KeySigningRequest<'a> {
    pub ca_private_key: &'a Path,
    pub public_key: &'a str,
    pub identity: &'a str,
    pub principals: &'a [String],
    pub serial: u64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl KeySigningRequest<'_> {
    /// Rejects requests the certificate format cannot express.
    pub fn check_principals(&self) -> Result<(), EngineError> {
        if self.principals.len() > MAX_PRINCIPALS {
            return Err(EngineError::TooManyPrincipals(self.principals.len()));
        }
        Ok(())
    }
}

#[async_trait]
pub trait SigningEngine: Send + Sync {
    /// Creates a passphrase-less CA key pair at `private_key_path` and returns the public key.
    async fn generate_ca_key(
        &self,
        mode: CaMode,
        private_key_path: &Path,
    ) -> Result<String, EngineError>;

    /// Signs a user key and returns the certificate content.
    async fn sign_user_key(
        &self,
        request: &KeySigningRequest<'_>,
        options: &CertificateOptions,
    ) -> Result<String, EngineError>;

    /// Signs a host key and returns the certificate content. Host certificates carry no options.
    async fn sign_host_key(&self, request: &KeySigningRequest<'_>) -> Result<String, EngineError>;

    async fn extract_fingerprint(&self, certificate: &str) -> Result<String, EngineError>;

    /// Returns the randomart image of a certificate's key, border removed.
    async fn render_visual_fingerprint(&self, certificate: &str) -> Result<String, EngineError>;
}
