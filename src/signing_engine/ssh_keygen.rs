//! # ssh-keygen
//!
//! [`SigningEngine`] implementation that shells out to OpenSSH's `ssh-keygen`.
//!
//! Every invocation runs with piped output, a wall-clock timeout and `kill_on_drop`, so a
//! hanging tool is killed both on timeout and when the caller abandons the future.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::arguments::Arguments;
use super::config::SigningConfig;
use super::fingerprint::{parse_fingerprint, parse_visual_fingerprint};
use super::staging::{StagedKey, staging_prefix};
use super::validity::format_validity_interval;
use super::{CertificateOptions, EngineError, KeySigningRequest, SigningEngine};
use crate::model::CaMode;

pub const PARAM_CA_KEY: &str = "-s";
pub const PARAM_CERTIFICATE_IDENTITY: &str = "-I";
pub const PARAM_COMMENT: &str = "-C";
pub const PARAM_FILENAME: &str = "-f";
pub const PARAM_HOST_CERTIFICATE: &str = "-h";
pub const PARAM_NEW_PASSPHRASE: &str = "-N";
pub const PARAM_OPTION: &str = "-O";
pub const PARAM_PRINCIPALS: &str = "-n";
pub const PARAM_QUIET: &str = "-q";
pub const PARAM_SERIAL_NUMBER: &str = "-z";
pub const PARAM_SHOW_FINGERPRINT: &str = "-l";
pub const PARAM_TYPE: &str = "-t";
pub const PARAM_VALIDITY_INTERVAL: &str = "-V";
pub const PARAM_VERBOSE: &str = "-v";

pub const KEY_TYPE_ED25519: &str = "ed25519";

/// Reads from standard input when passed as a file name.
const STDIN_FILE: &str = "-";

/// Signing engine backed by the `ssh-keygen` binary.
#[derive(Debug, Clone)]
pub struct SshKeygen {
    executable: String,
    staging_directory: PathBuf,
    timeout: Duration,
}

impl SshKeygen {
    pub fn new(config: &SigningConfig) -> Self {
        SshKeygen {
            executable: config.executable.clone(),
            staging_directory: config.staging_directory.clone(),
            timeout: config.timeout,
        }
    }

    /// Runs `ssh-keygen` with `arguments`, feeding `input` to its stdin, and returns stdout.
    async fn execute(&self, arguments: &Arguments, input: Option<&str>) -> Result<String, EngineError> {
        let args = arguments.build();
        debug!("running {} {:?}", self.executable, args);

        let mut command = Command::new(&self.executable);
        command
            .args(&args)
            .env("TZ", "UTC")
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                error!("failed to start {}: {}", self.executable, e);
                EngineError::ToolUnavailable {
                    executable: self.executable.clone(),
                    source: e,
                }
            }
            _ => EngineError::Io(e),
        })?;

        let stdin = child.stdin.take();
        let run = async move {
            if let (Some(mut stdin), Some(input)) = (stdin, input) {
                match stdin.write_all(input.as_bytes()).await {
                    // the exit status and stderr tell what went wrong
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        debug!("{} closed its input early", self.executable);
                    }
                    result => result?,
                }
                // closing stdin ends the input
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                // dropping the future dropped the child, which kills it
                error!(
                    "{} did not finish within {}",
                    self.executable,
                    humantime::format_duration(self.timeout)
                );
                return Err(EngineError::SigningTimeout(self.timeout));
            }
        };

        if !output.status.success() {
            let diagnostics = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "{} reported an error ({}): {}",
                self.executable, output.status, diagnostics
            );
            return Err(EngineError::SigningFailed {
                reason: output.status.to_string(),
                diagnostics,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Stages the public key, runs the signing command and reads the certificate back.
    ///
    /// The staged files are removed when `staged` goes out of scope, on every path out of
    /// this function.
    async fn sign_staged(
        &self,
        request: &KeySigningRequest<'_>,
        kind: &str,
        options: Vec<String>,
        host_certificate: bool,
    ) -> Result<String, EngineError> {
        request.check_principals()?;

        let staged = StagedKey::write(
            &self.staging_directory,
            &staging_prefix(request.identity, kind),
            request.public_key,
        )?;

        let arguments = Arguments::new()
            .flag(PARAM_CA_KEY, request.ca_private_key)
            .flag(PARAM_CERTIFICATE_IDENTITY, request.identity)
            .flag(PARAM_PRINCIPALS, request.principals.join(","))
            .flag(
                PARAM_VALIDITY_INTERVAL,
                format_validity_interval(request.valid_from, request.valid_until),
            )
            .flag(PARAM_SERIAL_NUMBER, request.serial)
            .flag(PARAM_OPTION, options)
            .flag(PARAM_HOST_CERTIFICATE, host_certificate)
            .switch(PARAM_QUIET)
            .positional(staged.public_key_path());

        self.execute(&arguments, None).await?;

        let certificate = staged.read_certificate()?;
        info!(
            "signed {} certificate for {} with serial {}",
            kind, request.identity, request.serial
        );
        Ok(certificate)
    }
}

fn public_key_path_for(private_key_path: &Path) -> PathBuf {
    let mut path = private_key_path.as_os_str().to_os_string();
    path.push(".pub");
    PathBuf::from(path)
}

#[async_trait]
impl SigningEngine for SshKeygen {
    async fn generate_ca_key(
        &self,
        mode: CaMode,
        private_key_path: &Path,
    ) -> Result<String, EngineError> {
        if private_key_path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("CA key {:?} already exists", private_key_path),
            )
            .into());
        }
        if let Some(parent) = private_key_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let arguments = Arguments::new()
            .flag(PARAM_COMMENT, mode.key_comment())
            .flag(PARAM_TYPE, KEY_TYPE_ED25519)
            .flag(PARAM_NEW_PASSPHRASE, "")
            .switch(PARAM_QUIET)
            .flag(PARAM_FILENAME, private_key_path);
        self.execute(&arguments, None).await?;

        let public_key = fs::read_to_string(public_key_path_for(private_key_path))?;
        info!("generated {} CA key at {:?}", mode, private_key_path);
        Ok(public_key.trim_end().to_string())
    }

    async fn sign_user_key(
        &self,
        request: &KeySigningRequest<'_>,
        options: &CertificateOptions,
    ) -> Result<String, EngineError> {
        self.sign_staged(request, "user", options.to_directives(), false)
            .await
    }

    async fn sign_host_key(&self, request: &KeySigningRequest<'_>) -> Result<String, EngineError> {
        self.sign_staged(request, "host", Vec::new(), true).await
    }

    async fn extract_fingerprint(&self, certificate: &str) -> Result<String, EngineError> {
        let arguments = Arguments::new()
            .switch(PARAM_SHOW_FINGERPRINT)
            .flag(PARAM_FILENAME, STDIN_FILE);
        let output = self.execute(&arguments, Some(certificate)).await?;
        parse_fingerprint(&output).ok_or_else(|| EngineError::SigningFailed {
            reason: "unrecognized fingerprint output".to_string(),
            diagnostics: output.trim().to_string(),
        })
    }

    async fn render_visual_fingerprint(&self, certificate: &str) -> Result<String, EngineError> {
        let arguments = Arguments::new()
            .switch(PARAM_SHOW_FINGERPRINT)
            .switch(PARAM_VERBOSE)
            .flag(PARAM_FILENAME, STDIN_FILE);
        let output = self.execute(&arguments, Some(certificate)).await?;
        parse_visual_fingerprint(&output).ok_or_else(|| EngineError::SigningFailed {
            reason: "unrecognized visual fingerprint output".to_string(),
            diagnostics: output.trim().to_string(),
        })
    }
}
