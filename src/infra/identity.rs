//! Visitor identity derivation backed by a persisted process-wide salt.
//!
//! The salt is generated once, on first startup, and never rotated
//! automatically. Rotating it (deleting the file) severs every prior
//! visitor correlation.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::crypto::hash_visitor_address;
use crate::domain::VisitorId;

use super::{AnalyticsError, Result};

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Salt file name inside the data directory
pub const SALT_FILE_NAME: &str = ".salt";

/// Secret salt mixed into every visitor hash.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse stored salt bytes. A wrong length is never repaired.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SALT_LEN] = bytes.try_into().map_err(|_| {
            AnalyticsError::Salt(format!(
                "salt file holds {} bytes, expected {SALT_LEN}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    fn generate() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Salt(<redacted>)")
    }
}

/// Loads the salt from `<data_dir>/.salt`, creating it exactly once.
///
/// In-process callers are serialized by a mutex around the cached value.
/// Concurrent processes race on a hard link of a fully written temp file:
/// the link either publishes our salt or fails with `AlreadyExists`, in which
/// case the winner's salt is read back.
pub struct SaltStore {
    path: PathBuf,
    cached: Mutex<Option<Salt>>,
}

impl SaltStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SALT_FILE_NAME),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the salt, generating and persisting it if no salt file exists.
    pub fn load_or_create(&self) -> Result<Salt> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(salt) = cached.as_ref() {
            return Ok(salt.clone());
        }

        let salt = match read_salt(&self.path)? {
            Some(salt) => {
                debug!(path = %self.path.display(), "Loaded existing salt");
                salt
            }
            None => publish_salt(&self.path)?,
        };
        *cached = Some(salt.clone());
        Ok(salt)
    }

    /// Return the salt only if it already exists on disk.
    pub fn load_existing(&self) -> Result<Salt> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(salt) = cached.as_ref() {
            return Ok(salt.clone());
        }
        let salt = read_salt(&self.path)?.ok_or_else(|| {
            AnalyticsError::Salt(format!("no salt at {}", self.path.display()))
        })?;
        *cached = Some(salt.clone());
        Ok(salt)
    }
}

fn read_salt(path: &Path) -> Result<Option<Salt>> {
    match fs::read(path) {
        Ok(bytes) => Salt::from_slice(&bytes).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn publish_salt(path: &Path) -> Result<Salt> {
    let dir = path
        .parent()
        .ok_or_else(|| AnalyticsError::Salt("salt path has no parent directory".into()))?;
    fs::create_dir_all(dir)?;

    let salt = Salt::generate();
    let tmp = dir.join(format!("{SALT_FILE_NAME}.{}.tmp", uuid::Uuid::new_v4()));
    write_private(&tmp, salt.as_bytes())?;

    let linked = fs::hard_link(&tmp, path);
    // The temp name is ours alone; a leftover file is harmless.
    let _ = fs::remove_file(&tmp);

    match linked {
        Ok(()) => {
            info!(path = %path.display(), "Generated new visitor salt");
            Ok(salt)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "Lost salt creation race, using existing salt");
            read_salt(path)?
                .ok_or_else(|| AnalyticsError::Salt("salt disappeared after creation race".into()))
        }
        Err(e) => Err(e.into()),
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Derives anonymized visitor identities from raw client addresses.
#[derive(Debug, Clone)]
pub struct IdentityHasher {
    salt: Salt,
}

impl IdentityHasher {
    pub fn new(salt: Salt) -> Self {
        Self { salt }
    }

    /// `hex(SHA-256(salt || address))`. The address is not retained.
    pub fn identify(&self, address: &str) -> VisitorId {
        VisitorId::from_hash(&hash_visitor_address(self.salt.as_bytes(), address))
    }
}
