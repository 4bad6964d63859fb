//! # Signing Configuration
//!
//! Where `ssh-keygen` lives, where it stages files and how long it may take.
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Deserializer};

use crate::config::InsertConfigRoot;

pub const DEFAULT_EXECUTABLE: &str = "ssh-keygen";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration of the `ssh-keygen` signing engine.
#[derive(Deserialize, Debug, Clone)]
pub struct SigningConfig {
    /// The `ssh-keygen` binary. Bare names are looked up in `PATH`.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Directory for the temporary files of a signing call.
    pub staging_directory: PathBuf,
    /// Wall-clock limit for a single `ssh-keygen` run, e.g. `"30s"`.
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
}

fn default_executable() -> String {
    DEFAULT_EXECUTABLE.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    duration_str::parse(&text).map_err(serde::de::Error::custom)
}

impl InsertConfigRoot for SigningConfig {
    /// Resolves the staging directory, and an executable given as a relative path,
    /// against the directory of the configuration file.
    fn insert_config_path(&mut self, config_root: &PathBuf) -> Result<()> {
        if !self.staging_directory.has_root() {
            self.staging_directory = config_root.join(&self.staging_directory);
        }
        let executable = Path::new(&self.executable);
        if executable.components().count() > 1 && !executable.has_root() {
            self.executable = config_root.join(executable).to_string_lossy().to_string();
        }
        Ok(())
    }

    fn check_paths(&self) -> Result<()> {
        if self.staging_directory.exists() && !self.staging_directory.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "staging directory {:?} is not a directory",
                    self.staging_directory
                ),
            )
            .into());
        }
        Ok(())
    }
}
