//! Temp-file payload store shared between processes.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, instrument};

use super::{PayloadError, PayloadStore};
use crate::protocol::PayloadRef;

/// Stores each payload as a file in one directory. Both ends must be
/// configured with the same directory.
#[derive(Debug)]
pub struct TempFileStore {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl TempFileStore {
    /// Default location: `$TMPDIR/deckbridge`.
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join("deckbridge")
    }

    /// Open (creating if needed) a store rooted at `dir`.
    #[instrument(level = "debug", skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, PayloadError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;
        let dir = fs::canonicalize(dir).map_err(|source| io_error(dir, source))?;
        Ok(Self {
            dir,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map a location back to a path, refusing anything outside the store.
    fn resolve(&self, payload: &PayloadRef) -> Result<PathBuf, PayloadError> {
        let path = PathBuf::from(&payload.location);
        let parent = path
            .parent()
            .and_then(|p| fs::canonicalize(p).ok())
            .ok_or_else(|| PayloadError::ForeignLocation(payload.location.clone()))?;
        if parent != self.dir || path.file_name().is_none() {
            return Err(PayloadError::ForeignLocation(payload.location.clone()));
        }
        Ok(path)
    }
}

fn io_error(path: &Path, source: io::Error) -> PayloadError {
    PayloadError::Io {
        location: path.display().to_string(),
        source,
    }
}

impl PayloadStore for TempFileStore {
    fn put(&self, data: &[u8]) -> Result<PayloadRef, PayloadError> {
        let len: u32 = data
            .len()
            .try_into()
            .map_err(|_| PayloadError::TooLarge(data.len()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = self
            .dir
            .join(format!("payload-{}-{}.bin", std::process::id(), id));
        let mut file = File::create(&path).map_err(|source| io_error(&path, source))?;
        file.write_all(data)
            .map_err(|source| io_error(&path, source))?;
        debug!(path = %path.display(), len, "Payload written");
        Ok(PayloadRef::new(path.to_string_lossy(), len))
    }

    fn read(&self, payload: &PayloadRef) -> Result<Vec<u8>, PayloadError> {
        let path = self.resolve(payload)?;
        let file = File::open(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                PayloadError::Missing {
                    location: payload.location.clone(),
                }
            } else {
                io_error(&path, source)
            }
        })?;
        let mut data = Vec::with_capacity(payload.len as usize);
        file.take(u64::from(payload.len))
            .read_to_end(&mut data)
            .map_err(|source| io_error(&path, source))?;
        if data.len() < payload.len as usize {
            return Err(PayloadError::Truncated {
                location: payload.location.clone(),
                declared: payload.len,
                found: data.len(),
            });
        }
        Ok(data)
    }

    fn release(&self, payload: &PayloadRef) -> Result<(), PayloadError> {
        let path = self.resolve(payload)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Payload released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(&path, source)),
        }
    }
}
