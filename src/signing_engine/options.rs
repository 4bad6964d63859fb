//! # Certificate Options
//!
//! Capability restrictions of a user certificate and their flattening into the
//! `-O` directives passed to `ssh-keygen`.
#[cfg(feature = "arbitrary")]
use arbitrary::Arbitrary;
use serde::{Deserialize, Serialize};

pub const OPTION_NO_AGENT_FORWARDING: &str = "no-agent-forwarding";
pub const OPTION_NO_PORT_FORWARDING: &str = "no-port-forwarding";
pub const OPTION_NO_X11_FORWARDING: &str = "no-x11-forwarding";
pub const OPTION_NO_PTY: &str = "no-pty";
pub const OPTION_NO_USER_RC: &str = "no-user-rc";
pub const OPTION_FORCE_COMMAND: &str = "force-command";
pub const OPTION_SOURCE_ADDRESS: &str = "source-address";

/// Capability toggles and restrictions of a user certificate.
///
/// Every capability is permitted by default; only restrictions end up in the certificate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(Arbitrary))]
#[serde(default)]
pub struct CertificateOptions {
    pub agent_forwarding: bool,
    pub port_forwarding: bool,
    pub x11_forwarding: bool,
    pub pty: bool,
    pub user_rc: bool,
    /// Command executed instead of whatever the user asks for.
    pub force_command: Option<String>,
    /// CIDR blocks the certificate may be used from.
    pub source_addresses: Vec<String>,
}

impl Default for CertificateOptions {
    fn default() -> Self {
        CertificateOptions {
            agent_forwarding: true,
            port_forwarding: true,
            x11_forwarding: true,
            pty: true,
            user_rc: true,
            force_command: None,
            source_addresses: Vec::new(),
        }
    }
}

impl CertificateOptions {
    /// Options that produce no directives at all, as used for host certificates.
    pub fn none() -> Self {
        CertificateOptions::default()
    }

    /// Flattens the options into `ssh-keygen -O` directives.
    ///
    /// Disabled capabilities become bare directive names, the forced command and the
    /// source-address list become `name=value`. Permitted capabilities and empty values are
    /// left out. The order is fixed, so equal options always give equal directives.
    pub fn to_directives(&self) -> Vec<String> {
        let disabled = [
            (OPTION_NO_AGENT_FORWARDING, !self.agent_forwarding),
            (OPTION_NO_PORT_FORWARDING, !self.port_forwarding),
            (OPTION_NO_X11_FORWARDING, !self.x11_forwarding),
            (OPTION_NO_PTY, !self.pty),
            (OPTION_NO_USER_RC, !self.user_rc),
        ];
        let mut directives: Vec<String> = disabled
            .iter()
            .filter(|(_, disabled)| *disabled)
            .map(|(name, _)| name.to_string())
            .collect();

        if let Some(command) = self.force_command.as_deref().filter(|c| !c.is_empty()) {
            directives.push(format!(
                "{}={}",
                OPTION_FORCE_COMMAND,
                escape_whitespace(command)
            ));
        }

        let addresses: Vec<&str> = self
            .source_addresses
            .iter()
            .map(|address| address.trim())
            .filter(|address| !address.is_empty())
            .collect();
        if !addresses.is_empty() {
            directives.push(format!(
                "{}={}",
                OPTION_SOURCE_ADDRESS,
                escape_whitespace(&addresses.join(","))
            ));
        }

        directives
    }
}

/// Prefixes every whitespace character with a backslash.
fn escape_whitespace(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_whitespace() {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_produce_no_directives() {
        assert!(CertificateOptions::default().to_directives().is_empty());
    }

    #[test]
    fn disabled_capabilities_are_bare_names_in_fixed_order() {
        let options = CertificateOptions {
            agent_forwarding: false,
            port_forwarding: false,
            x11_forwarding: false,
            pty: false,
            user_rc: false,
            ..Default::default()
        };
        assert_eq!(
            options.to_directives(),
            vec![
                "no-agent-forwarding",
                "no-port-forwarding",
                "no-x11-forwarding",
                "no-pty",
                "no-user-rc",
            ]
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let options = CertificateOptions {
            pty: false,
            force_command: Some("uptime".to_string()),
            source_addresses: vec!["10.0.0.0/8".to_string()],
            ..Default::default()
        };
        assert_eq!(options.to_directives(), options.clone().to_directives());
    }

    #[test]
    fn force_command_whitespace_is_escaped() {
        let options = CertificateOptions {
            force_command: Some("echo hello".to_string()),
            ..Default::default()
        };
        assert_eq!(options.to_directives(), vec![r"force-command=echo\ hello"]);
    }

    #[test]
    fn empty_values_are_omitted() {
        let options = CertificateOptions {
            force_command: Some(String::new()),
            source_addresses: vec![],
            ..Default::default()
        };
        assert!(options.to_directives().is_empty());

        let options = CertificateOptions {
            source_addresses: vec!["  ".to_string()],
            ..Default::default()
        };
        assert!(options.to_directives().is_empty());
    }

    #[test]
    fn source_addresses_are_trimmed_and_joined() {
        let options = CertificateOptions {
            pty: false,
            source_addresses: vec![" 10.0.0.0/8".to_string(), "192.168.1.0/24 ".to_string()],
            ..Default::default()
        };
        assert_eq!(
            options.to_directives(),
            vec!["no-pty", "source-address=10.0.0.0/8,192.168.1.0/24"]
        );
    }
}
