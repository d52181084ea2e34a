//! Protocol module - wire definitions shared by client and server.

pub mod constants;
pub mod frame;
pub mod message;
pub mod types;

pub use constants::*;
pub use frame::{FrameError, encode_frame, encode_message, read_frame, write_frame};
pub use message::{Message, PayloadRef, ProtocolError, kind_name};
pub use types::{ButtonIndex, ButtonPos, Dimensions, PanelGeometry, PanelIndex, Rgb};
