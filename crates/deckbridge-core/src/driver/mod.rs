//! Panel driver module.

pub mod simulated;
pub mod traits;

pub use simulated::{ButtonFace, DrawOp, SimulatedDriver, SimulatedPanelHandle};
pub use traits::{DriverError, KeyEvent, KeyListener, PanelDevice, PanelDriver};
