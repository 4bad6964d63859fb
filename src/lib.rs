use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use log::info;

pub mod config;
pub mod model;
pub mod signer;
pub mod signing_engine;
pub mod store;
pub mod validation;

pub use crate::signer::{SignError, Signer};

use crate::model::{
    CaId, CaMode, CertificateAuthority, CertificateRequest, CertificateSubject,
    HostCertificateRequest, IssuedCertificate, SecurityZone, UserCertificateRequest,
};
use crate::signing_engine::config::SigningConfig;
use crate::signing_engine::{CertificateOptions, SigningEngine, SshKeygen};
use crate::store::{CertificateAuthorityStore, CertificateFilter, FileStore};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// config file path
    #[arg(short = 'c', long)]
    config_file: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// manage certificate authorities
    Authority {
        #[command(subcommand)]
        command: AuthorityCommand,
    },
    /// issue a certificate with the active certificate authority
    Sign {
        #[command(subcommand)]
        command: SignCommand,
    },
    /// inspect and revoke issued certificates
    Certificates {
        #[command(subcommand)]
        command: CertificatesCommand,
    },
    /// print the fingerprint of a certificate or public key file
    Fingerprint {
        file: PathBuf,
        /// print the randomart image instead
        #[arg(long, default_value_t = false)]
        visual: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AuthorityCommand {
    /// generate a new key pair; the new authority becomes the active one
    Generate {
        #[arg(long, value_enum, default_value_t = CaMode::User)]
        mode: CaMode,
        #[arg(long)]
        comment: Option<String>,
    },
    /// list all authorities, newest first
    List,
    /// revoke an authority, it will never sign again
    Revoke { id: CaId },
}

#[derive(Subcommand, Debug)]
enum SignCommand {
    /// sign a user key
    User {
        /// certificate identity
        #[arg(long)]
        user: String,
        #[command(flatten)]
        common: SignArgs,
        #[command(flatten)]
        capabilities: CapabilityArgs,
    },
    /// sign a host key
    Host {
        /// fully qualified host name
        #[arg(long)]
        host: String,
        #[command(flatten)]
        common: SignArgs,
    },
}

#[derive(Args, Debug)]
struct SignArgs {
    /// public key file to sign
    #[arg(long)]
    public_key: PathBuf,
    /// security zone identifiers, used as principals
    #[arg(long = "zone", required = true, value_delimiter = ',')]
    zones: Vec<String>,
    /// start of validity (RFC 3339), open if omitted
    #[arg(long)]
    valid_from: Option<DateTime<Utc>>,
    /// end of validity (RFC 3339), open if omitted
    #[arg(long, conflicts_with = "valid_for")]
    valid_until: Option<DateTime<Utc>>,
    /// validity length, counted from --valid-from or now
    #[arg(long)]
    valid_for: Option<humantime::Duration>,
    /// write the certificate here instead of stdout
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

impl SignArgs {
    fn validity(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let valid_until = match &self.valid_for {
            Some(length) => {
                let start = self.valid_from.unwrap_or_else(Utc::now);
                let length = chrono::Duration::from_std(**length)
                    .context("validity length out of range")?;
                Some(
                    start
                        .checked_add_signed(length)
                        .context("validity length out of range")?,
                )
            }
            None => self.valid_until,
        };
        Ok((self.valid_from, valid_until))
    }

    fn read_public_key(&self) -> Result<String> {
        let key = fs::read_to_string(&self.public_key)
            .with_context(|| format!("failed to read public key {:?}", self.public_key))?;
        Ok(key.trim().to_string())
    }

    fn zones(&self) -> impl Iterator<Item = SecurityZone> + '_ {
        self.zones.iter().map(|zone| SecurityZone::new(zone.trim()))
    }
}

#[derive(Args, Debug)]
struct CapabilityArgs {
    #[arg(long, default_value_t = false)]
    no_agent_forwarding: bool,
    #[arg(long, default_value_t = false)]
    no_port_forwarding: bool,
    #[arg(long, default_value_t = false)]
    no_x11_forwarding: bool,
    #[arg(long, default_value_t = false)]
    no_pty: bool,
    #[arg(long, default_value_t = false)]
    no_user_rc: bool,
    /// command forced on every login with this certificate
    #[arg(long)]
    force_command: Option<String>,
    /// addresses or CIDR blocks the certificate may be used from
    #[arg(long = "source-address", value_delimiter = ',')]
    source_addresses: Vec<String>,
}

impl From<CapabilityArgs> for CertificateOptions {
    fn from(args: CapabilityArgs) -> Self {
        CertificateOptions {
            agent_forwarding: !args.no_agent_forwarding,
            port_forwarding: !args.no_port_forwarding,
            x11_forwarding: !args.no_x11_forwarding,
            pty: !args.no_pty,
            user_rc: !args.no_user_rc,
            force_command: args.force_command,
            source_addresses: args.source_addresses,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CertificatesCommand {
    /// list issued certificates, newest first
    List {
        /// only certificates that are not revoked
        #[arg(long, default_value_t = false, conflicts_with = "revoked")]
        valid: bool,
        /// only revoked certificates
        #[arg(long, default_value_t = false)]
        revoked: bool,
    },
    /// revoke an issued certificate
    Revoke {
        #[arg(long)]
        authority: CaId,
        #[arg(long)]
        serial: u64,
    },
}

fn build_request(command: SignCommand) -> Result<(CertificateRequest, Option<PathBuf>)> {
    match command {
        SignCommand::User {
            user,
            common,
            capabilities,
        } => {
            let mut request = UserCertificateRequest::new(user, common.read_public_key()?);
            for zone in common.zones() {
                request.add_security_zone(zone);
            }
            (request.valid_from, request.valid_until) = common.validity()?;
            request.options = capabilities.into();
            Ok((request.into(), common.output))
        }
        SignCommand::Host { host, common } => {
            let mut request = HostCertificateRequest::new(host, common.read_public_key()?);
            for zone in common.zones() {
                request.add_security_zone(zone);
            }
            (request.valid_from, request.valid_until) = common.validity()?;
            Ok((request.into(), common.output))
        }
    }
}

fn write_certificate(certificate: &IssuedCertificate, output: Option<&Path>) -> Result<()> {
    let content = certificate.content().trim_end();
    match output {
        Some(path) => {
            fs::write(path, format!("{}\n", content))
                .with_context(|| format!("failed to write certificate to {:?}", path))?;
            info!("certificate written to {:?}", path);
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn print_authorities(authorities: &[CertificateAuthority]) {
    let active = authorities
        .iter()
        .filter(|ca| !ca.is_revoked())
        .max_by_key(|ca| ca.created_at())
        .map(|ca| ca.id().clone());
    for ca in authorities {
        let status = match ca.revoked_at() {
            Some(at) => format!("revoked {}", at.to_rfc3339()),
            None if Some(ca.id()) == active.as_ref() => "active".to_string(),
            None => "valid".to_string(),
        };
        println!(
            "{}\t{}\t{}\tlast serial {}\tcreated {}\t{}",
            ca.id(),
            ca.mode(),
            status,
            ca.last_issued_serial_number(),
            ca.created_at().to_rfc3339(),
            ca.comment().unwrap_or_default()
        );
    }
}

fn print_certificates(certificates: &[IssuedCertificate]) {
    for certificate in certificates {
        let status = match certificate.revoked_at() {
            Some(at) => format!("revoked {}", at.to_rfc3339()),
            None => "valid".to_string(),
        };
        println!(
            "{}\t{}\t{:?}\t{}\t{}\t{}\tissued {}",
            certificate.authority(),
            certificate.serial_number(),
            certificate.kind(),
            certificate.identity(),
            certificate.principals().join(","),
            status,
            certificate.issued_at().to_rfc3339()
        );
    }
}

/// Time a waiting process allows on top of one signing call of the lock holder.
const LOCK_WAIT_MARGIN: Duration = Duration::from_secs(30);

/// Another process holds a CA row for up to one signing call, so waiting for the row has
/// to outlast the signing timeout.
fn store_lock_wait(signing: &SigningConfig) -> Duration {
    signing.timeout.saturating_add(LOCK_WAIT_MARGIN)
}

pub async fn run(args: CliArgs) -> Result<()> {
    if env::var("RUST_LOG").is_err() {
        // no other thread reads the environment yet
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }
    let _ = env_logger::try_init();

    let config = config::read_config(&args.config_file)?;
    let store =
        FileStore::open(&config.ca.state_file)?.with_lock_wait(store_lock_wait(&config.signing));
    let engine = SshKeygen::new(&config.signing);
    let signer = Signer::new(store, engine, config.ca.key_directory.clone());

    match args.command {
        Command::Authority { command } => match command {
            AuthorityCommand::Generate { mode, comment } => {
                let authority = signer.generate_authority(mode, comment).await?;
                println!("{}", authority.id());
                println!("{}", authority.public_key());
            }
            AuthorityCommand::List => {
                print_authorities(&signer.store().authorities().await?);
            }
            AuthorityCommand::Revoke { id } => {
                let authority = signer.store().revoke_authority(&id, Utc::now()).await?;
                info!(
                    "certificate authority {} revoked after {} certificate(s)",
                    authority.id(),
                    authority.last_issued_serial_number()
                );
            }
        },
        Command::Sign { command } => {
            let (request, output) = build_request(command)?;
            let certificate = signer.sign(request).await?;
            write_certificate(&certificate, output.as_deref())?;
        }
        Command::Certificates { command } => match command {
            CertificatesCommand::List { valid, revoked } => {
                let filter = match (valid, revoked) {
                    (true, _) => CertificateFilter::Valid,
                    (_, true) => CertificateFilter::Revoked,
                    _ => CertificateFilter::All,
                };
                print_certificates(&signer.store().certificates(filter).await?);
            }
            CertificatesCommand::Revoke { authority, serial } => {
                signer
                    .store()
                    .revoke_certificate(&authority, serial, Utc::now())
                    .await?;
            }
        },
        Command::Fingerprint { file, visual } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {:?}", file))?;
            let engine = signer.engine();
            if visual {
                println!("{}", engine.render_visual_fingerprint(&content).await?);
            } else {
                println!("{}", engine.extract_fingerprint(&content).await?);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn lock_wait_outlasts_signing_timeout() {
        let mut signing = SigningConfig {
            executable: "ssh-keygen".to_string(),
            staging_directory: PathBuf::from("staging"),
            timeout: Duration::from_secs(300),
        };
        assert_eq!(store_lock_wait(&signing), Duration::from_secs(330));

        signing.timeout = crate::signing_engine::config::DEFAULT_TIMEOUT;
        assert!(store_lock_wait(&signing) > signing.timeout);
    }

    #[test]
    fn sign_user_arguments() {
        let args = CliArgs::try_parse_from([
            "ssh-zone-ca",
            "-c",
            "config.toml",
            "sign",
            "user",
            "--user",
            "alice",
            "--public-key",
            "id_ed25519.pub",
            "--zone",
            "web-servers,databases",
            "--valid-from",
            "2024-01-01T00:00:00Z",
            "--valid-for",
            "1h",
            "--no-pty",
            "--source-address",
            "10.0.0.0/8",
        ])
        .unwrap();

        let Command::Sign {
            command:
                SignCommand::User {
                    user,
                    common,
                    capabilities,
                },
        } = args.command
        else {
            panic!("expected sign user");
        };
        assert_eq!(user, "alice");
        assert_eq!(common.zones, vec!["web-servers", "databases"]);
        let (from, until) = common.validity().unwrap();
        assert_eq!(from.unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(until.unwrap().to_rfc3339(), "2024-01-01T01:00:00+00:00");

        let options = CertificateOptions::from(capabilities);
        assert!(!options.pty);
        assert!(options.agent_forwarding);
        assert_eq!(options.source_addresses, vec!["10.0.0.0/8"]);
    }

    #[test]
    fn valid_until_and_valid_for_conflict() {
        let result = CliArgs::try_parse_from([
            "ssh-zone-ca",
            "-c",
            "config.toml",
            "sign",
            "host",
            "--host",
            "db1.example.com",
            "--public-key",
            "host.pub",
            "--zone",
            "databases",
            "--valid-until",
            "2024-01-01T00:00:00Z",
            "--valid-for",
            "1h",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn sign_requires_a_zone() {
        let result = CliArgs::try_parse_from([
            "ssh-zone-ca",
            "-c",
            "config.toml",
            "sign",
            "host",
            "--host",
            "db1.example.com",
            "--public-key",
            "host.pub",
        ]);
        assert!(result.is_err());
    }
}
