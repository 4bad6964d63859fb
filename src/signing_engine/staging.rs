//! Scoped staging files for signing.
//!
//! The public key handed to `ssh-keygen` is written to a temporary file in the staging
//! directory; `ssh-keygen` writes the certificate next to it. Both files are removed when
//! the [`StagedKey`] is dropped, no matter how the signing call ended.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::{Builder, NamedTempFile};

/// Suffix of staged public keys. `ssh-keygen` strips it when naming the certificate.
pub const STAGING_SUFFIX: &str = ".pub";

const MAX_PREFIX_IDENTITY_LEN: usize = 64;

#[derive(Debug)]
pub struct StagedKey {
    public_key: NamedTempFile,
    certificate_path: PathBuf,
}

impl StagedKey {
    /// Writes `contents` to a new file named `<prefix><random>.pub` in `staging_dir`.
    pub fn write(staging_dir: &Path, prefix: &str, contents: &str) -> io::Result<Self> {
        fs::create_dir_all(staging_dir)?;
        let mut public_key = Builder::new()
            .prefix(prefix)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(staging_dir)?;
        public_key.write_all(contents.as_bytes())?;
        if !contents.ends_with('\n') {
            public_key.write_all(b"\n")?;
        }
        public_key.flush()?;

        let certificate_path = certificate_path_for(public_key.path());
        debug!("staged public key at {}", public_key.path().display());
        Ok(StagedKey {
            public_key,
            certificate_path,
        })
    }

    pub fn public_key_path(&self) -> &Path {
        self.public_key.path()
    }

    /// Where `ssh-keygen` puts the certificate for the staged key.
    pub fn certificate_path(&self) -> &Path {
        &self.certificate_path
    }

    pub fn read_certificate(&self) -> io::Result<String> {
        fs::read_to_string(&self.certificate_path)
    }
}

impl Drop for StagedKey {
    fn drop(&mut self) {
        match fs::remove_file(&self.certificate_path) {
            Ok(()) => debug!("removed {}", self.certificate_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "failed to remove staged certificate {}: {}",
                self.certificate_path.display(),
                e
            ),
        }
        // the public key file is removed by NamedTempFile
    }
}

/// `foo.pub` becomes `foo-cert.pub`, anything else gets `-cert.pub` appended.
pub fn certificate_path_for(public_key_path: &Path) -> PathBuf {
    let file_name = public_key_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = file_name.strip_suffix(".pub").unwrap_or(&file_name);
    public_key_path.with_file_name(format!("{}-cert.pub", stem))
}

/// Builds the staging prefix `<identity>_<kind>_staging_` with the identity reduced to
/// file-name safe characters.
pub fn staging_prefix(identity: &str, kind: &str) -> String {
    let safe: String = identity
        .chars()
        .take(MAX_PREFIX_IDENTITY_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}_staging_", safe, kind)
}
