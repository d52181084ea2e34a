//! Panel driver abstraction.
//!
//! Everything device specific lives behind these traits:
//! - Hardware backends for a particular panel model
//! - The in-memory simulator used by tests and the demo server

use thiserror::Error;

use crate::image::Bitmap;
use crate::protocol::{ButtonIndex, PanelGeometry, Rgb};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Panel enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("Button {button} out of range (panel has {count})")]
    ButtonOutOfRange { button: ButtonIndex, count: usize },

    #[error("Bitmap is {actual}, device expects {expected}")]
    BitmapSize { expected: String, actual: String },

    #[error("Draw failed: {0}")]
    DrawFailed(String),

    #[error("Panel closed")]
    Closed,
}

/// A raw, level-triggered key transition reported by a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub button: ButtonIndex,
    pub is_down: bool,
}

impl KeyEvent {
    pub fn down(button: ButtonIndex) -> Self {
        Self {
            button,
            is_down: true,
        }
    }

    pub fn up(button: ButtonIndex) -> Self {
        Self {
            button,
            is_down: false,
        }
    }
}

/// Callback invoked on the driver's own thread once per key transition.
pub type KeyListener = Box<dyn Fn(KeyEvent) + Send + Sync>;

/// One opened panel.
pub trait PanelDevice: Send + Sync {
    /// Button grid and pixel size of this panel.
    fn geometry(&self) -> PanelGeometry;

    /// Fill one button with a solid color.
    fn set_button_color(&self, button: ButtonIndex, color: Rgb) -> Result<(), DriverError>;

    /// Draw a button-sized bitmap onto one button.
    fn set_button_bitmap(&self, button: ButtonIndex, bitmap: &Bitmap) -> Result<(), DriverError>;

    /// Draw a panel-sized bitmap across the whole surface.
    fn draw_full_screen(&self, bitmap: &Bitmap) -> Result<(), DriverError>;

    /// Install the key transition callback, replacing any previous one.
    fn set_key_listener(&self, listener: KeyListener);

    /// Release the device handle.
    fn close(&self);
}

/// Source of panels, consulted once at startup.
pub trait PanelDriver {
    /// Open every attached panel, in a stable order.
    fn enumerate(&self) -> Result<Vec<Box<dyn PanelDevice>>, DriverError>;
}
