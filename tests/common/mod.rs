#![allow(dead_code)]
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, PrivateKey};
use tokio::sync::Notify;

use ssh_zone_ca::model::{CaMode, SecurityZone, UserCertificateRequest};
use ssh_zone_ca::signing_engine::{
    CertificateOptions, EngineError, KeySigningRequest, SigningEngine,
};

pub fn init_logging() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }
    let _ = env_logger::try_init();
}

pub fn public_key() -> String {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    key.public_key().to_openssh().unwrap()
}

pub fn user_request(identity: &str, zones: &[&str]) -> UserCertificateRequest {
    let mut request = UserCertificateRequest::new(identity, public_key());
    for zone in zones {
        request.add_security_zone(SecurityZone::new(*zone));
    }
    request
}

/// `true` when an `ssh-keygen` binary can be started.
pub fn ssh_keygen_available() -> bool {
    match std::process::Command::new("ssh-keygen")
        .arg("-?")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
    {
        Ok(_) => true,
        Err(e) => {
            eprintln!("ssh-keygen not available, skipping: {}", e);
            false
        }
    }
}

/// Signing engine that records serials instead of running `ssh-keygen`.
#[derive(Default)]
pub struct FakeEngine {
    pub serials: Mutex<Vec<u64>>,
    /// Time each signing call takes.
    pub delay: Option<Duration>,
    /// While set, signing calls never finish.
    pub hang: AtomicBool,
    pub started: Notify,
    pub fail: AtomicBool,
}

impl FakeEngine {
    pub fn with_delay(delay: Duration) -> Self {
        FakeEngine {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn signed_serials(&self) -> Vec<u64> {
        self.serials.lock().unwrap().clone()
    }

    async fn sign(&self, request: &KeySigningRequest<'_>) -> Result<String, EngineError> {
        self.started.notify_one();
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::SigningFailed {
                reason: "exit status: 1".to_string(),
                diagnostics: "fake failure".to_string(),
            });
        }
        self.serials.lock().unwrap().push(request.serial);
        Ok(format!(
            "ssh-ed25519-cert-v01@openssh.com AAAA{} {}",
            request.serial, request.identity
        ))
    }
}

#[async_trait]
impl SigningEngine for FakeEngine {
    async fn generate_ca_key(
        &self,
        mode: CaMode,
        private_key_path: &Path,
    ) -> Result<String, EngineError> {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        fs::write(
            private_key_path,
            key.to_openssh(ssh_key::LineEnding::LF).unwrap().as_bytes(),
        )?;
        let mut public_key = key.public_key().clone();
        public_key.set_comment(mode.key_comment());
        Ok(public_key.to_openssh().unwrap())
    }

    async fn sign_user_key(
        &self,
        request: &KeySigningRequest<'_>,
        _options: &CertificateOptions,
    ) -> Result<String, EngineError> {
        self.sign(request).await
    }

    async fn sign_host_key(&self, request: &KeySigningRequest<'_>) -> Result<String, EngineError> {
        self.sign(request).await
    }

    async fn extract_fingerprint(&self, _certificate: &str) -> Result<String, EngineError> {
        Ok("SHA256:fake".to_string())
    }

    async fn render_visual_fingerprint(&self, _certificate: &str) -> Result<String, EngineError> {
        Ok("+---[ED25519 256]---+".to_string())
    }
}
