//! # Signer
//!
//! Turns a [`CertificateRequest`] into an [`IssuedCertificate`].
//!
//! Issuance runs in one store transaction: the active CA row is locked, the next serial is
//! reserved, the engine signs, and the advanced counter and the new certificate are
//! committed together. Any failure, and dropping the future midway, rolls the transaction
//! back, so no serial is consumed without a stored certificate.
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use log::{debug, info, warn};
use thiserror::Error;

use crate::model::{
    CaId, CaMode, CertificateAuthority, CertificateKind, CertificateRequest, CertificateSubject,
    IssuedCertificate,
};
use crate::signing_engine::{EngineError, KeySigningRequest, SigningEngine};
use crate::store::{CertificateAuthorityStore, StoreError};
use crate::validation::{ValidationError, validate_request};

#[derive(Debug, Error)]
pub enum SignError {
    #[error(
        "no valid certificate authority available: generate one before issuing certificates"
    )]
    NoActiveAuthority,
    #[error("private key of the active certificate authority is missing at {0:?}")]
    KeyMaterialMissing(PathBuf),
    #[error("serial numbers of certificate authority {0} are exhausted")]
    SerialExhausted(CaId),
    #[error("invalid certificate request: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SignError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoActiveAuthority => SignError::NoActiveAuthority,
            err => SignError::Store(err),
        }
    }
}

/// Issues certificates with the active certificate authority.
pub struct Signer<S, E> {
    store: S,
    engine: E,
    key_directory: PathBuf,
}

impl<S, E> Signer<S, E>
where
    S: CertificateAuthorityStore,
    E: SigningEngine,
{
    /// `key_directory` holds the CA private keys, one file per CA named after its identifier.
    pub fn new(store: S, engine: E, key_directory: impl Into<PathBuf>) -> Self {
        Signer {
            store,
            engine,
            key_directory: key_directory.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn private_key_path(&self, id: &CaId) -> PathBuf {
        self.key_directory.join(id.to_string())
    }

    /// Signs `request` with the active CA and records the result.
    pub async fn sign(&self, request: CertificateRequest) -> Result<IssuedCertificate, SignError> {
        validate_request(&request)?;

        let mut transaction = self.store.begin().await?;
        let mut authority = transaction.get_active().await?;
        let serial = authority
            .next_serial_number()
            .ok_or_else(|| SignError::SerialExhausted(authority.id().clone()))?;
        debug!(
            "reserved serial {} of certificate authority {}",
            serial,
            authority.id()
        );

        let ca_private_key = self.private_key_path(authority.id());
        if !ca_private_key.is_file() {
            warn!(
                "certificate authority {} has no private key at {:?}",
                authority.id(),
                ca_private_key
            );
            return Err(SignError::KeyMaterialMissing(ca_private_key));
        }

        let principals = request.principals();
        let signing_request = KeySigningRequest {
            ca_private_key: &ca_private_key,
            public_key: request.public_key(),
            identity: request.identity(),
            principals: &principals,
            serial,
            valid_from: request.valid_from(),
            valid_until: request.valid_until(),
        };
        let content = match request.kind() {
            CertificateKind::User => {
                self.engine
                    .sign_user_key(&signing_request, &request.options())
                    .await?
            }
            CertificateKind::Host => self.engine.sign_host_key(&signing_request).await?,
        };

        let certificate = IssuedCertificate::new(request, authority.id().clone(), serial, content);
        authority.advance_serial_number(serial);
        transaction.persist(&authority)?;
        transaction.insert_certificate(&certificate)?;
        transaction.commit().await?;

        info!(
            "issued {:?} certificate {} for {} with certificate authority {}",
            certificate.kind(),
            serial,
            certificate.identity(),
            authority.id()
        );
        Ok(certificate)
    }

    /// Generates a new CA key pair and registers the authority.
    ///
    /// The new authority is the newest one and therefore becomes the active one.
    pub async fn generate_authority(
        &self,
        mode: CaMode,
        comment: Option<String>,
    ) -> Result<CertificateAuthority, SignError> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.key_directory)
            .map_err(EngineError::Io)?;

        let id = CaId::generate();
        let public_key = self
            .engine
            .generate_ca_key(mode, &self.private_key_path(&id))
            .await?;
        let authority = CertificateAuthority::new(id, mode, public_key, comment);
        self.store.create_authority(authority.clone()).await?;
        info!(
            "certificate authority {} ({}) is now active",
            authority.id(),
            mode
        );
        Ok(authority)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{HostCertificateRequest, SecurityZone, UserCertificateRequest};
    use crate::signing_engine::CertificateOptions;
    use crate::store::{CertificateFilter, FileStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use ssh_key::rand_core::OsRng;
    use ssh_key::{Algorithm, PrivateKey};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        kind: CertificateKind,
        identity: String,
        principals: Vec<String>,
        serial: u64,
        directives: Vec<String>,
    }

    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<Call>>,
        fail: bool,
    }

    impl RecordingEngine {
        fn record(
            &self,
            kind: CertificateKind,
            request: &KeySigningRequest<'_>,
            directives: Vec<String>,
        ) -> Result<String, EngineError> {
            assert!(request.ca_private_key.is_file());
            self.calls.lock().unwrap().push(Call {
                kind,
                identity: request.identity.to_string(),
                principals: request.principals.to_vec(),
                serial: request.serial,
                directives,
            });
            if self.fail {
                return Err(EngineError::SigningFailed {
                    reason: "exit status: 255".to_string(),
                    diagnostics: "boom".to_string(),
                });
            }
            Ok(format!("cert-{}", request.serial))
        }
    }

    #[async_trait]
    impl SigningEngine for RecordingEngine {
        async fn generate_ca_key(
            &self,
            mode: CaMode,
            private_key_path: &Path,
        ) -> Result<String, EngineError> {
            fs::write(private_key_path, "private")?;
            Ok(format!("ssh-ed25519 AAAA {}", mode.key_comment()))
        }

        async fn sign_user_key(
            &self,
            request: &KeySigningRequest<'_>,
            options: &CertificateOptions,
        ) -> Result<String, EngineError> {
            self.record(CertificateKind::User, request, options.to_directives())
        }

        async fn sign_host_key(
            &self,
            request: &KeySigningRequest<'_>,
        ) -> Result<String, EngineError> {
            self.record(CertificateKind::Host, request, Vec::new())
        }

        async fn extract_fingerprint(&self, _certificate: &str) -> Result<String, EngineError> {
            Ok("SHA256:fake".to_string())
        }

        async fn render_visual_fingerprint(
            &self,
            _certificate: &str,
        ) -> Result<String, EngineError> {
            Ok(String::new())
        }
    }

    fn public_key() -> String {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        key.public_key().to_openssh().unwrap()
    }

    fn user_request(zones: &[&str]) -> CertificateRequest {
        let mut request = UserCertificateRequest::new("alice@example.com", public_key());
        for zone in zones {
            request.add_security_zone(SecurityZone::new(*zone));
        }
        request.into()
    }

    /// A signer whose store holds one authority with the given serial counter.
    async fn signer(
        engine: RecordingEngine,
        last_serial: u64,
    ) -> (Signer<FileStore, RecordingEngine>, CaId, TempDir) {
        let keys = tempdir().unwrap();
        let store = FileStore::in_memory();
        let authority = CertificateAuthority::new(
            CaId::generate(),
            CaMode::User,
            "ssh-ed25519 AAAA User CA".to_string(),
            None,
        )
        .with_last_issued_serial_number(last_serial);
        fs::write(keys.path().join(authority.id().to_string()), "private").unwrap();
        let id = authority.id().clone();
        store.create_authority(authority).await.unwrap();
        (Signer::new(store, engine, keys.path()), id, keys)
    }

    async fn last_serial(signer: &Signer<FileStore, RecordingEngine>) -> u64 {
        signer.store().authorities().await.unwrap()[0].last_issued_serial_number()
    }

    #[tokio::test]
    async fn issues_next_serial_and_records_certificate() {
        let (signer, id, _keys) = signer(RecordingEngine::default(), 5).await;

        let certificate = signer.sign(user_request(&["web-servers"])).await.unwrap();

        assert_eq!(certificate.serial_number(), 6);
        assert_eq!(certificate.authority(), &id);
        assert_eq!(certificate.content(), "cert-6");
        assert_eq!(last_serial(&signer).await, 6);

        let calls = signer.engine().calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![Call {
                kind: CertificateKind::User,
                identity: "alice@example.com".to_string(),
                principals: vec!["web-servers".to_string()],
                serial: 6,
                directives: Vec::new(),
            }]
        );

        let stored = signer
            .store()
            .certificates(CertificateFilter::All)
            .await
            .unwrap();
        assert_eq!(stored, vec![certificate]);
    }

    #[tokio::test]
    async fn host_requests_use_the_host_path() {
        let (signer, _id, _keys) = signer(RecordingEngine::default(), 0).await;
        let mut request = HostCertificateRequest::new("db1.example.com", public_key());
        request.add_security_zone(SecurityZone::new("databases"));

        let certificate = signer.sign(request.into()).await.unwrap();

        assert_eq!(certificate.kind(), CertificateKind::Host);
        let calls = signer.engine().calls.lock().unwrap().clone();
        assert_eq!(calls[0].kind, CertificateKind::Host);
        assert_eq!(calls[0].identity, "db1.example.com");
    }

    #[tokio::test]
    async fn engine_failure_consumes_no_serial() {
        let engine = RecordingEngine {
            fail: true,
            ..Default::default()
        };
        let (signer, _id, _keys) = signer(engine, 5).await;

        let err = signer.sign(user_request(&["web-servers"])).await.unwrap_err();

        assert!(matches!(
            err,
            SignError::Engine(EngineError::SigningFailed { .. })
        ));
        assert_eq!(last_serial(&signer).await, 5);
        assert!(
            signer
                .store()
                .certificates(CertificateFilter::All)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn no_authority_fails_without_signing() {
        let keys = tempdir().unwrap();
        let signer = Signer::new(
            FileStore::in_memory(),
            RecordingEngine::default(),
            keys.path(),
        );

        let err = signer.sign(user_request(&["web-servers"])).await.unwrap_err();

        assert!(matches!(err, SignError::NoActiveAuthority));
        assert!(signer.engine().calls.lock().unwrap().is_empty());
        assert!(
            signer
                .store()
                .certificates(CertificateFilter::All)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn revoked_authority_is_not_used() {
        let (signer, id, _keys) = signer(RecordingEngine::default(), 0).await;
        signer.store().revoke_authority(&id, Utc::now()).await.unwrap();

        let err = signer.sign(user_request(&["web-servers"])).await.unwrap_err();
        assert!(matches!(err, SignError::NoActiveAuthority));
    }

    #[tokio::test]
    async fn missing_key_material_is_reported() {
        let (signer, id, keys) = signer(RecordingEngine::default(), 3).await;
        fs::remove_file(keys.path().join(id.to_string())).unwrap();

        let err = signer.sign(user_request(&["web-servers"])).await.unwrap_err();

        match err {
            SignError::KeyMaterialMissing(path) => {
                assert_eq!(path, keys.path().join(id.to_string()))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(last_serial(&signer).await, 3);
        assert!(signer.engine().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_serials_are_reported() {
        let (signer, id, _keys) = signer(RecordingEngine::default(), u64::MAX).await;

        let err = signer.sign(user_request(&["web-servers"])).await.unwrap_err();
        assert!(matches!(err, SignError::SerialExhausted(exhausted) if exhausted == id));
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_store() {
        let (signer, _id, _keys) = signer(RecordingEngine::default(), 0).await;

        let err = signer.sign(user_request(&[])).await.unwrap_err();
        assert!(matches!(
            err,
            SignError::Validation(ValidationError::NoPrincipals)
        ));
        assert_eq!(last_serial(&signer).await, 0);
    }

    #[tokio::test]
    async fn generated_authority_becomes_active() {
        let (signer, old, keys) = signer(RecordingEngine::default(), 9).await;

        let authority = signer
            .generate_authority(CaMode::Host, Some("rotation".to_string()))
            .await
            .unwrap();

        assert_ne!(authority.id(), &old);
        assert_eq!(authority.last_issued_serial_number(), 0);
        assert_eq!(authority.public_key(), "ssh-ed25519 AAAA Host CA");
        assert!(keys.path().join(authority.id().to_string()).is_file());

        let certificate = signer.sign(user_request(&["web-servers"])).await.unwrap();
        assert_eq!(certificate.authority(), authority.id());
        assert_eq!(certificate.serial_number(), 1);
    }
}
