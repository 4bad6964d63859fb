//! # Request Validation
//!
//! Checks a [`CertificateRequest`] before any serial is reserved or any process is spawned.
use std::net::IpAddr;

use ssh_key::PublicKey;
use thiserror::Error;

use crate::model::{CertificateRequest, CertificateSubject};

/// Longest allowed security zone identifier.
pub const MAX_ZONE_IDENTIFIER_LENGTH: usize = 63;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("public key is not a valid OpenSSH public key: {0}")]
    InvalidPublicKey(String),
    #[error(
        "invalid security zone identifier {0:?}: expected 1 to 63 characters of a-z, 0-9, '_' or '-' starting with a letter"
    )]
    InvalidZoneIdentifier(String),
    #[error("at least one security zone is required")]
    NoPrincipals,
    #[error("validity window is empty: valid until is not after valid from")]
    EmptyValidityWindow,
    #[error("invalid source address {0:?}: expected an IP address or CIDR block")]
    InvalidSourceAddress(String),
    #[error("forced command must not contain NUL or line breaks")]
    InvalidForceCommand,
    #[error("certificate identity must not be empty")]
    MissingIdentity,
}

/// Validates everything the signer relies on.
pub fn validate_request(request: &CertificateRequest) -> Result<(), ValidationError> {
    if request.identity().trim().is_empty() {
        return Err(ValidationError::MissingIdentity);
    }

    PublicKey::from_openssh(request.public_key().trim())
        .map_err(|e| ValidationError::InvalidPublicKey(e.to_string()))?;

    if request.security_zones().is_empty() {
        return Err(ValidationError::NoPrincipals);
    }
    for zone in request.security_zones() {
        validate_zone_identifier(&zone.identifier)?;
    }

    if let (Some(from), Some(until)) = (request.valid_from(), request.valid_until()) {
        if until <= from {
            return Err(ValidationError::EmptyValidityWindow);
        }
    }

    let options = request.options();
    for address in &options.source_addresses {
        validate_source_address(address)?;
    }
    if let Some(command) = &options.force_command {
        if command.contains(['\0', '\n', '\r']) {
            return Err(ValidationError::InvalidForceCommand);
        }
    }

    Ok(())
}

/// Zone identifiers become principals, so they are restricted to a conservative alphabet.
pub fn validate_zone_identifier(identifier: &str) -> Result<(), ValidationError> {
    let valid = identifier.len() <= MAX_ZONE_IDENTIFIER_LENGTH
        && identifier
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_lowercase())
        && identifier
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidZoneIdentifier(identifier.to_string()))
    }
}

fn validate_source_address(address: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidSourceAddress(address.to_string());
    let address = address.trim();
    let (ip, prefix) = match address.split_once('/') {
        Some((ip, prefix)) => (ip, Some(prefix)),
        None => (address, None),
    };
    let ip: IpAddr = ip.parse().map_err(|_| invalid())?;
    if let Some(prefix) = prefix {
        let max = if ip.is_ipv4() { 32 } else { 128 };
        match prefix.parse::<u8>() {
            Ok(bits) if bits <= max => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}
