//! Message channel abstraction.
//!
//! Defines the `MessageSink` trait for the outbound half of a connection,
//! allowing different implementations (TCP, mock, etc.).

use crate::protocol::{FrameError, Message, ProtocolError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {message}")]
    ConnectFailed { addr: String, message: String },

    #[error("Failed to bind {addr}: {message}")]
    BindFailed { addr: String, message: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of a message channel.
///
/// Implementations must be safe to call from several threads; each call
/// delivers exactly one whole frame.
pub trait MessageSink: Send + Sync {
    /// Send one message.
    fn send(&self, msg: &Message) -> Result<(), TransportError>;

    /// Close the channel. Further sends fail with `Disconnected`.
    fn close(&self);

    /// Whether the channel is still usable.
    fn is_connected(&self) -> bool;

    /// Human readable peer description for logs.
    fn peer(&self) -> String;
}
