//! Mirror of the current access token on disk.
//!
//! Lets a restarted client resume its session, like a browser keeping the
//! token in a cookie. Written with 0o600 permissions on unix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::AuthError;

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
    saved_at: String,
}

#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored token, if any.
    ///
    /// A missing or unreadable file is `None`; only a token that fails to
    /// decode is an error.
    pub fn load(&self) -> Result<Option<Credential>, AuthError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!("failed to read credential file: {e}");
                return Ok(None);
            }
        };

        let stored: StoredCredential = match serde_json::from_str(&data) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("failed to parse credential file: {e}");
                return Ok(None);
            }
        };

        Credential::from_token(stored.access_token).map(Some)
    }

    pub fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stored = StoredCredential {
            access_token: credential.token().to_string(),
            saved_at: chrono::Utc::now().to_rfc3339(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&stored)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.path, perms);
        }

        Ok(())
    }

    pub fn remove(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save or remove without failing the caller; the mirror is best effort.
    pub(crate) fn sync(&self, credential: Option<&Credential>) {
        let result = match credential {
            Some(credential) => self.save(credential),
            None => self.remove(),
        };
        if let Err(e) = result {
            tracing::warn!("failed to update credential file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::credential::tests::mint;

    fn temp_file(name: &str) -> CredentialFile {
        let dir = std::env::temp_dir().join(format!("parlor_auth_test_{}", uuid::Uuid::new_v4()));
        CredentialFile::new(dir.join(name))
    }

    #[test]
    fn save_load_remove() {
        let file = temp_file("credential.json");
        let credential =
            Credential::from_token(mint("u-1", Utc::now() + Duration::minutes(5))).unwrap();

        assert!(file.load().unwrap().is_none());

        file.save(&credential).unwrap();
        assert_eq!(file.load().unwrap(), Some(credential));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        file.remove().unwrap();
        assert!(file.load().unwrap().is_none());
        file.remove().unwrap();
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let file = temp_file("credential.json");
        std::fs::create_dir_all(file.path().parent().unwrap()).unwrap();
        std::fs::write(file.path(), "{not json").unwrap();

        assert!(file.load().unwrap().is_none());
    }
}
