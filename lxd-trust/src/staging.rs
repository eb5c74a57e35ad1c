//! Short-lived on-disk copies of the cluster credential.
//!
//! TLS material is loaded from files, so the credential is written to a
//! protected directory right before the TLS configuration is built and removed
//! right after. [`StagedCredentials`] removes the files when dropped, which
//! also covers early returns on error paths.

use crate::credential::ClusterCredential;
use crate::prelude::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// File name of the staged client certificate.
pub const CLIENT_CERT_FILE: &str = "client.crt";
/// File name of the staged client private key.
pub const CLIENT_KEY_FILE: &str = "client.key";
/// File name of the staged server CA certificate.
pub const SERVER_CERT_FILE: &str = "server.crt";

/// Errors that may arise staging credential files.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StagingError {
    /// A credential file could not be written.
    #[error("failed writing credential file {path}")]
    Write {
        /// The file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Credential files staged in one directory, removed on drop.
#[derive(Debug)]
pub struct StagedCredentials {
    client_cert: PathBuf,
    client_key: PathBuf,
    server_cert: PathBuf,
}

impl StagedCredentials {
    /// Writes the credential's PEM material to `dir` with owner-only permissions.
    ///
    /// Existing files of the same name are truncated and overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Write`] if any file cannot be written. Files
    /// already written by this call are removed again.
    pub fn stage(dir: &Path, credential: &ClusterCredential) -> Result<Self, StagingError> {
        let staged = Self {
            client_cert: dir.join(CLIENT_CERT_FILE),
            client_key: dir.join(CLIENT_KEY_FILE),
            server_cert: dir.join(SERVER_CERT_FILE),
        };

        write_private(&staged.client_cert, credential.client_cert())?;
        write_private(&staged.client_key, credential.client_key())?;
        write_private(&staged.server_cert, credential.server_ca())?;

        debug!("staged credential files in {}", dir.display());
        Ok(staged)
    }

    /// Path of the staged client certificate.
    pub fn client_cert(&self) -> &Path {
        &self.client_cert
    }

    /// Path of the staged client private key.
    pub fn client_key(&self) -> &Path {
        &self.client_key
    }

    /// Path of the staged server CA certificate.
    pub fn server_cert(&self) -> &Path {
        &self.server_cert
    }

    /// Removes the staged files now.
    pub fn clear(self) {
        drop(self);
    }

    fn remove_all(&self) {
        for path in [&self.client_cert, &self.client_key, &self.server_cert] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed removing {}: {e}", path.display()),
            }
        }
    }
}

impl Drop for StagedCredentials {
    fn drop(&mut self) {
        self.remove_all();
    }
}

fn write_private(path: &Path, contents: &str) -> Result<(), StagingError> {
    let write = || -> io::Result<()> {
        let mut file = open_private(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    };

    write().map_err(|source| {
        // A half-written key must not outlive the failed call.
        let _ = fs::remove_file(path);
        StagingError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
