//! Mock message sink for testing.

use std::sync::{Arc, Mutex, PoisonError};

use super::traits::{MessageSink, TransportError};
use crate::protocol::Message;

/// Mock connection that captures every sent message.
#[derive(Clone)]
pub struct MockConnection {
    /// Captured sends.
    sent: Arc<Mutex<Vec<Message>>>,
    /// Whether the peer is "connected".
    connected: Arc<Mutex<bool>>,
    name: String,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: &str) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            name: name.to_string(),
        }
    }

    /// Get all captured messages.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Take and clear captured messages.
    pub fn take_sent(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Simulate the peer going away.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSink for MockConnection {
    fn send(&self, msg: &Message) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(msg.clone());
        Ok(())
    }

    fn close(&self) {
        self.disconnect();
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}
