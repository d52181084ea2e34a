//! Deckbridge-Core: drive button-and-display panels from another process.
//!
//! A server owns the panels and a single client talks to it over a loopback
//! TCP connection. The client paints colors and images onto buttons or whole
//! panels and polls edge-triggered button state once per host frame.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Message kinds, framing, geometry and color types
//! - **Transport**: Message channel abstraction (TCP, mock)
//! - **Payload**: Out-of-band pixel storage (temp files, memory)
//! - **Driver**: Panel hardware contract plus a simulated driver
//! - **Image**: Pixel format conversion into driver bitmaps
//! - **Session**: Server-side panel ownership, render coalescing, key forwarding
//! - **Server**: Accept loop and fixed-interval tick loop
//! - **Client**: Panel proxies with edge-triggered button state
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use deckbridge_core::{ButtonPos, ClientConfig, DeckClient, Rgb};
//!
//! let mut client = DeckClient::connect(&ClientConfig::default()).expect("connect failed");
//! loop {
//!     client.tick();
//!     if let Some(panel) = client.panel(0) {
//!         if panel.is_down(ButtonPos::new(0, 0)) {
//!             panel.set_button_color(ButtonPos::new(0, 0), Rgb::new(255, 0, 0)).ok();
//!         }
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

pub mod button;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod image;
pub mod payload;
pub mod protocol;
pub mod queue;
pub mod render;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use button::{ButtonGrid, ButtonState};
pub use client::{DeckClient, Inbox, PanelProxy, SurfaceProducer};
pub use config::{ClientConfig, ServerConfig};
pub use driver::{
    ButtonFace, DrawOp, DriverError, KeyEvent, PanelDevice, PanelDriver, SimulatedDriver,
    SimulatedPanelHandle,
};
pub use error::{BridgeError, ConnectivityError, TargetError};
pub use events::{BridgeEvent, BridgeObserver, NullObserver, TracingObserver};
pub use image::{Bitmap, ImageError, ImagePipeline, PixelBuffer, PixelFormat};
pub use payload::{MemoryStore, PayloadError, PayloadStore, TempFileStore};
pub use protocol::{
    ButtonIndex, ButtonPos, Dimensions, Message, PanelGeometry, PanelIndex, PayloadRef,
    ProtocolError, Rgb,
};
pub use render::{RenderJob, RenderQueue, RenderTarget};
pub use server::{Clock, Server, ShutdownHandle, SystemClock};
pub use session::{DeviceSession, Dispatch, RenderStats};
pub use transport::{MessageSink, MockConnection, TcpConnection, TransportError};
