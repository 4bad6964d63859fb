//! # Configuration
//!
//! This module handles the reading and parsing of the main configuration file.
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use crate::signing_engine::config::SigningConfig;
use crate::store::config::CaConfig;

/// The main configuration of the certificate authority.
#[derive(Deserialize, Debug)]
pub struct Config {
    /// Key material and record locations.
    pub ca: CaConfig,
    /// The signing tool configuration.
    pub signing: SigningConfig,
}

/// A trait for inserting the configuration root path into a configuration struct.
///
/// This is used to resolve relative paths in the configuration.
pub(crate) trait InsertConfigRoot {
    /// Inserts the configuration root path into the configuration struct.
    ///
    /// # Arguments
    ///
    /// * `config_root` - The root path of the configuration file.
    fn insert_config_path(&mut self, config_root: &PathBuf) -> Result<()>;
    /// Checks if the paths in the configuration are valid.
    fn check_paths(&self) -> Result<()>;
}

/// Reads and parses the main configuration file.
///
/// # Arguments
///
/// * `file_path` - The path to the configuration file.
///
/// # Returns
///
/// A `Result` containing the parsed `Config` or an error.
pub fn read_config(file_path: &str) -> Result<Config> {
    let config_path: PathBuf = PathBuf::from(file_path);
    let config_root = match config_path.exists() {
        false => {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Config file {} not found", file_path),
            )
            .into());
        }
        true => config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
    };

    let mut config_file = File::open(file_path)?;
    let mut config = String::new();
    let _ = config_file.read_to_string(&mut config)?;

    let mut config: Config = toml::from_str(&config)?;
    config.ca.insert_config_path(&config_root)?;
    config.ca.check_paths()?;
    config.signing.insert_config_path(&config_root)?;
    config.signing.check_paths()?;

    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn read_config_test() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let mut config_file = File::create(&config_path).unwrap();
        let config_content = r#"
[ca]
key_directory = "keys"
state_file = "/var/lib/ssh-zone-ca/state.json"

[signing]
staging_directory = "staging"
timeout = "1m"
"#;
        config_file.write_all(config_content.as_bytes()).unwrap();

        let config = read_config(config_path.to_str().unwrap()).unwrap();
        assert_eq!(config.ca.key_directory, dir.path().join("keys"));
        assert_eq!(
            config.ca.state_file,
            PathBuf::from("/var/lib/ssh-zone-ca/state.json")
        );
        assert_eq!(config.signing.executable, "ssh-keygen");
        assert_eq!(config.signing.staging_directory, dir.path().join("staging"));
        assert_eq!(config.signing.timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = read_config(path.to_str().unwrap()).unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn key_directory_must_be_a_directory() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("keys")).unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[ca]\nkey_directory = \"keys\"\nstate_file = \"state.json\"\n\n[signing]\nstaging_directory = \"staging\"\n",
        )
        .unwrap();
        assert!(read_config(config_path.to_str().unwrap()).is_err());
    }
}
