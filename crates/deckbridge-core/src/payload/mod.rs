//! Out-of-band payload channel.
//!
//! Pixel data is too large for the control channel, so the sender parks it
//! in a [`PayloadStore`] and sends only a [`PayloadRef`]. Ownership moves
//! with the message: the receiver reads the payload and then releases it.

pub mod file;
pub mod memory;

pub use file::TempFileStore;
pub use memory::MemoryStore;

use thiserror::Error;
use tracing::warn;

use crate::protocol::PayloadRef;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Payload {location} is missing")]
    Missing { location: String },

    #[error("Payload {location} truncated: declared {declared} bytes, found {found}")]
    Truncated {
        location: String,
        declared: u32,
        found: usize,
    },

    #[error("Payload declares {declared} bytes, target needs {expected}")]
    LengthMismatch { declared: u32, expected: usize },

    #[error("Payload of {0} bytes exceeds the wire limit")]
    TooLarge(usize),

    #[error("Payload location {0} does not belong to this store")]
    ForeignLocation(String),

    #[error("IO error on {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

/// Storage for in-flight pixel payloads.
pub trait PayloadStore: Send + Sync {
    /// Park `data` and return a reference the peer can resolve.
    fn put(&self, data: &[u8]) -> Result<PayloadRef, PayloadError>;

    /// Read exactly `payload.len` bytes.
    fn read(&self, payload: &PayloadRef) -> Result<Vec<u8>, PayloadError>;

    /// Delete the payload. Releasing an already-missing payload succeeds.
    fn release(&self, payload: &PayloadRef) -> Result<(), PayloadError>;

    /// Release, logging instead of failing. Leftover payloads are a leak,
    /// never a reason to stop.
    fn discard(&self, payload: &PayloadRef) {
        if let Err(e) = self.release(payload) {
            warn!(payload = %payload, error = %e, "Failed to release payload");
        }
    }

    /// Read the payload, then release it whether or not the read succeeded.
    fn consume(&self, payload: &PayloadRef) -> Result<Vec<u8>, PayloadError> {
        let result = self.read(payload);
        self.discard(payload);
        result
    }
}
