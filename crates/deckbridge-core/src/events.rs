//! Event system for UI decoupling.
//!
//! The device session reports what it does through a [`BridgeObserver`], so
//! a console, a log or a test can follow along without the session knowing
//! who is listening.

use std::fmt;

use crate::protocol::{ButtonIndex, PanelIndex};
use crate::render::RenderTarget;

/// Which side of the bridge moved a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "IN"),
            Direction::Outbound => write!(f, "OUT"),
        }
    }
}

/// Events emitted by the device session.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A panel was opened at startup.
    PanelAttached {
        panel: PanelIndex,
        columns: u16,
        rows: u16,
    },
    /// A client became the active connection.
    ClientConnected { id: u64, peer: String },
    /// The active client went away.
    ClientDisconnected { id: u64, peer: String },
    /// A raw key transition was forwarded.
    ButtonChanged {
        panel: PanelIndex,
        button: ButtonIndex,
        is_down: bool,
    },
    /// Key transitions were dropped because no client was connected.
    EventsDropped { panel: PanelIndex, count: usize },
    /// A render job was queued.
    JobQueued { target: RenderTarget },
    /// A queued job was replaced before it was drawn.
    JobSuperseded { target: RenderTarget },
    /// A job was drawn.
    Rendered { target: RenderTarget },
    /// A job failed and was discarded.
    JobFailed { target: RenderTarget, reason: String },
    /// A request was dropped before reaching the render queue.
    RequestRejected { message: String, reason: String },
    /// Message sent or received.
    Message {
        direction: Direction,
        kind: &'static str,
    },
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait BridgeObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &BridgeEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl BridgeObserver for NullObserver {
    fn on_event(&self, _event: &BridgeEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl BridgeObserver for TracingObserver {
    fn on_event(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::PanelAttached {
                panel,
                columns,
                rows,
            } => {
                tracing::info!(panel, grid = %format!("{}x{}", columns, rows), "Panel attached");
            }
            BridgeEvent::ClientConnected { id, peer } => {
                tracing::info!(client = id, peer = %peer, "Client connected");
            }
            BridgeEvent::ClientDisconnected { id, peer } => {
                tracing::info!(client = id, peer = %peer, "Client disconnected");
            }
            BridgeEvent::ButtonChanged {
                panel,
                button,
                is_down,
            } => {
                tracing::debug!(panel, button, is_down, "Button changed");
            }
            BridgeEvent::EventsDropped { panel, count } => {
                tracing::debug!(panel, count, "No client, key events dropped");
            }
            BridgeEvent::JobQueued { target } => {
                tracing::trace!(target = %target, "Render job queued");
            }
            BridgeEvent::JobSuperseded { target } => {
                tracing::debug!(target = %target, "Render job superseded");
            }
            BridgeEvent::Rendered { target } => {
                tracing::trace!(target = %target, "Rendered");
            }
            BridgeEvent::JobFailed { target, reason } => {
                tracing::warn!(target = %target, "Render job failed: {}", reason);
            }
            BridgeEvent::RequestRejected { message, reason } => {
                tracing::warn!(message = %message, "Request rejected: {}", reason);
            }
            BridgeEvent::Message { direction, kind } => {
                tracing::trace!(dir = %direction, kind = %kind, "Message");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Observer that records every event for later inspection.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<BridgeEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<BridgeEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl BridgeObserver for RecordingObserver {
        fn on_event(&self, event: &BridgeEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
