//! Error taxonomy shared across the bridge.
//!
//! Each layer has its own error enum; [`BridgeError`] wraps them for callers
//! that only need to report a failure.

use thiserror::Error;

use crate::driver::DriverError;
use crate::image::ImageError;
use crate::payload::PayloadError;
use crate::protocol::{ButtonIndex, ButtonPos, PanelIndex, ProtocolError};
use crate::transport::TransportError;

/// A request addressed something that does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Panel {panel} out of range ({count} panels)")]
    PanelOutOfRange { panel: PanelIndex, count: usize },

    #[error("Button {button} out of range on panel {panel} ({count} buttons)")]
    ButtonOutOfRange {
        panel: PanelIndex,
        button: ButtonIndex,
        count: usize,
    },

    #[error("Button {pos} outside the {columns}x{rows} grid of panel {panel}")]
    PositionOutOfRange {
        panel: PanelIndex,
        pos: ButtonPos,
        columns: u16,
        rows: u16,
    },
}

/// The operation needs a peer or panel that is not there. These are no-ops
/// for the caller, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("No client connected")]
    NoClient,

    #[error("Panel {0} is not connected")]
    PanelNotPresent(PanelIndex),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
