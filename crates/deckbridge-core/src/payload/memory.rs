//! In-memory payload store for tests and single-process setups.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{PayloadError, PayloadStore};
use crate::protocol::PayloadRef;
use crate::queue::lock_unpoisoned;

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads not yet released.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.blobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, payload: &PayloadRef) -> bool {
        lock_unpoisoned(&self.blobs).contains_key(&payload.location)
    }

    /// Store bytes under an explicit location, bypassing `put`.
    pub fn insert_raw(&self, location: &str, data: Vec<u8>) {
        lock_unpoisoned(&self.blobs).insert(location.to_string(), data);
    }
}

impl PayloadStore for MemoryStore {
    fn put(&self, data: &[u8]) -> Result<PayloadRef, PayloadError> {
        let len: u32 = data
            .len()
            .try_into()
            .map_err(|_| PayloadError::TooLarge(data.len()))?;
        let location = format!("mem:{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        lock_unpoisoned(&self.blobs).insert(location.clone(), data.to_vec());
        Ok(PayloadRef::new(location, len))
    }

    fn read(&self, payload: &PayloadRef) -> Result<Vec<u8>, PayloadError> {
        let blobs = lock_unpoisoned(&self.blobs);
        let data = blobs
            .get(&payload.location)
            .ok_or_else(|| PayloadError::Missing {
                location: payload.location.clone(),
            })?;
        let declared = payload.len as usize;
        if data.len() < declared {
            return Err(PayloadError::Truncated {
                location: payload.location.clone(),
                declared: payload.len,
                found: data.len(),
            });
        }
        Ok(data[..declared].to_vec())
    }

    fn release(&self, payload: &PayloadRef) -> Result<(), PayloadError> {
        lock_unpoisoned(&self.blobs).remove(&payload.location);
        Ok(())
    }
}
