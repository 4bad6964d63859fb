//! # CA Configuration
//!
//! Locations of the CA key material and of the CA/certificate records.
use std::io;
use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

use crate::config::InsertConfigRoot;

/// Configuration for the certificate authorities.
#[derive(Deserialize, Debug, Clone)]
pub struct CaConfig {
    /// Directory holding one private key file per CA, named after the CA identifier.
    pub key_directory: PathBuf,
    /// JSON document with all CA and certificate records.
    pub state_file: PathBuf,
}

impl InsertConfigRoot for CaConfig {
    /// Inserts the configuration root path into the CA configuration.
    ///
    /// # Arguments
    ///
    /// * `config_root` - The root path of the configuration file.
    fn insert_config_path(&mut self, config_root: &PathBuf) -> Result<()> {
        if !self.key_directory.has_root() {
            self.key_directory = config_root.join(&self.key_directory);
        }
        if !self.state_file.has_root() {
            self.state_file = config_root.join(&self.state_file);
        }
        Ok(())
    }

    fn check_paths(&self) -> Result<()> {
        if self.key_directory.exists() && !self.key_directory.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CA key directory {:?} is not a directory", self.key_directory),
            )
            .into());
        }
        if self.state_file.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("state file {:?} is a directory", self.state_file),
            )
            .into());
        }
        Ok(())
    }
}
