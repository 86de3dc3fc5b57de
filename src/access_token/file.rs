//! File-backed access token store.
//!
//! Mirrors the token to a path on a volume shared with the consumer (for
//! example an `emptyDir` mounted into the application container). The file
//! is written owner-only; the in-memory mirror is wiped alongside the file on
//! delete.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{AccessTokenStore, wipe_slot};
use crate::{Error, Result};

/// Access token persisted to a file.
pub struct FileAccessToken {
    path: PathBuf,
    mirror: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl FileAccessToken {
    /// Create a store writing to `path`. Nothing touches the disk until the
    /// first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirror: Mutex::new(None),
        }
    }

    /// Path of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        file.write_all(data)?;
        file.sync_all()?;

        // `mode` only applies on creation; tighten a pre-existing file too.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Overwrite the file content with zeros before unlinking it.
    fn shred_file(&self) -> io::Result<()> {
        let len = fs::metadata(&self.path)?.len();
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let zeros = vec![0u8; usize::try_from(len).unwrap_or(0)];
        file.write_all(&zeros)?;
        file.sync_all()?;
        drop(file);
        fs::remove_file(&self.path)
    }
}

impl AccessTokenStore for FileAccessToken {
    fn read(&self) -> Result<Zeroizing<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(data) => {
                let data = Zeroizing::new(data);
                if data.is_empty() {
                    Err(Error::NoData)
                } else {
                    Ok(data)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NoData),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&self, data: Vec<u8>) -> Result<()> {
        let data = Zeroizing::new(data);
        if data.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let mut mirror = self.mirror.lock();
        self.write_file(&data)?;
        drop(wipe_slot(&mut mirror));
        *mirror = Some(data);

        debug!(path = %self.path.display(), "Access token written");
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut mirror = self.mirror.lock();
        if wipe_slot(&mut mirror).is_none() {
            debug!("Access token mirror already cleared");
        }

        match self.shred_file() {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted access token file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Access token file does not exist");
                Err(Error::TokenFileMissing(self.path.clone()))
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to delete access token file");
                Err(Error::Io(e))
            }
        }
    }
}

impl fmt::Debug for FileAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAccessToken")
            .field("path", &self.path)
            .field("populated", &self.mirror.lock().is_some())
            .finish()
    }
}
