//! In-memory panel driver.
//!
//! Panels keep the last face drawn on every button plus the full-screen
//! bitmap, log recent draw calls, and let the owner inject key transitions as
//! if the hardware reported them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use super::traits::{DriverError, KeyEvent, KeyListener, PanelDevice, PanelDriver};
use crate::image::Bitmap;
use crate::protocol::{ButtonIndex, Dimensions, PanelGeometry, Rgb};
use crate::queue::lock_unpoisoned;

/// Number of draw calls a simulated panel remembers.
pub const DRAW_LOG_CAPACITY: usize = 256;

/// What a simulated button currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonFace {
    Blank,
    Color(Rgb),
    Bitmap(Bitmap),
}

/// One recorded draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOp {
    ButtonColor { button: ButtonIndex, color: Rgb },
    ButtonBitmap { button: ButtonIndex },
    FullScreen,
}

#[derive(Debug)]
struct SimState {
    faces: Vec<ButtonFace>,
    screen: Option<Bitmap>,
    draws: VecDeque<DrawOp>,
    closed: bool,
}

impl SimState {
    fn record(&mut self, op: DrawOp) {
        if self.draws.len() == DRAW_LOG_CAPACITY {
            self.draws.pop_front();
        }
        self.draws.push_back(op);
    }
}

struct SimPanel {
    serial: String,
    geometry: PanelGeometry,
    state: Mutex<SimState>,
    listener: Mutex<Option<KeyListener>>,
}

impl SimPanel {
    fn check_open(&self, state: &SimState) -> Result<(), DriverError> {
        if state.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_button(&self, button: ButtonIndex) -> Result<(), DriverError> {
        if self.geometry.contains_index(button) {
            Ok(())
        } else {
            Err(DriverError::ButtonOutOfRange {
                button,
                count: self.geometry.button_count(),
            })
        }
    }

    fn check_size(bitmap: &Bitmap, expected: Dimensions) -> Result<(), DriverError> {
        if bitmap.dimensions() == expected {
            Ok(())
        } else {
            Err(DriverError::BitmapSize {
                expected: expected.to_string(),
                actual: bitmap.dimensions().to_string(),
            })
        }
    }

    fn emit(&self, event: KeyEvent) {
        let listener = lock_unpoisoned(&self.listener);
        match listener.as_ref() {
            Some(listener) => listener(event),
            None => debug!(serial = %self.serial, ?event, "Key event with no listener"),
        }
    }
}

/// Driver exposing a fixed set of simulated panels.
pub struct SimulatedDriver {
    panels: Vec<Arc<SimPanel>>,
}

impl SimulatedDriver {
    pub fn new(count: usize, geometry: PanelGeometry) -> Self {
        let panels = (0..count)
            .map(|i| {
                Arc::new(SimPanel {
                    serial: format!("SIM{:04}", i),
                    geometry,
                    state: Mutex::new(SimState {
                        faces: vec![ButtonFace::Blank; geometry.button_count()],
                        screen: None,
                        draws: VecDeque::with_capacity(DRAW_LOG_CAPACITY),
                        closed: false,
                    }),
                    listener: Mutex::new(None),
                })
            })
            .collect();
        Self { panels }
    }

    /// Test/console handle for the panel at `index`.
    pub fn handle(&self, index: usize) -> Option<SimulatedPanelHandle> {
        self.panels.get(index).map(|panel| SimulatedPanelHandle {
            panel: Arc::clone(panel),
        })
    }

    pub fn handles(&self) -> Vec<SimulatedPanelHandle> {
        (0..self.panels.len()).filter_map(|i| self.handle(i)).collect()
    }
}

impl PanelDriver for SimulatedDriver {
    fn enumerate(&self) -> Result<Vec<Box<dyn PanelDevice>>, DriverError> {
        Ok(self
            .panels
            .iter()
            .map(|panel| {
                Box::new(SimulatedPanel {
                    panel: Arc::clone(panel),
                }) as Box<dyn PanelDevice>
            })
            .collect())
    }
}

/// Device side of a simulated panel, handed to the session.
pub struct SimulatedPanel {
    panel: Arc<SimPanel>,
}

impl PanelDevice for SimulatedPanel {
    fn geometry(&self) -> PanelGeometry {
        self.panel.geometry
    }

    fn set_button_color(&self, button: ButtonIndex, color: Rgb) -> Result<(), DriverError> {
        self.panel.check_button(button)?;
        let mut state = lock_unpoisoned(&self.panel.state);
        self.panel.check_open(&state)?;
        state.faces[button as usize] = ButtonFace::Color(color);
        state.record(DrawOp::ButtonColor { button, color });
        trace!(serial = %self.panel.serial, button, %color, "Button color");
        Ok(())
    }

    fn set_button_bitmap(&self, button: ButtonIndex, bitmap: &Bitmap) -> Result<(), DriverError> {
        self.panel.check_button(button)?;
        SimPanel::check_size(bitmap, self.panel.geometry.button_dimensions())?;
        let mut state = lock_unpoisoned(&self.panel.state);
        self.panel.check_open(&state)?;
        state.faces[button as usize] = ButtonFace::Bitmap(bitmap.clone());
        state.record(DrawOp::ButtonBitmap { button });
        trace!(serial = %self.panel.serial, button, "Button bitmap");
        Ok(())
    }

    fn draw_full_screen(&self, bitmap: &Bitmap) -> Result<(), DriverError> {
        let geometry = self.panel.geometry;
        SimPanel::check_size(bitmap, geometry.deck_dimensions())?;
        let mut state = lock_unpoisoned(&self.panel.state);
        self.panel.check_open(&state)?;
        // A full-screen draw replaces whatever each button showed.
        let px = geometry.button_pixels;
        for index in 0..geometry.button_count() {
            if let Some(pos) = geometry.position_of(index as ButtonIndex) {
                state.faces[index] = ButtonFace::Bitmap(bitmap.crop(
                    u32::from(pos.column) * px,
                    u32::from(pos.row) * px,
                    geometry.button_dimensions(),
                ));
            }
        }
        state.screen = Some(bitmap.clone());
        state.record(DrawOp::FullScreen);
        trace!(serial = %self.panel.serial, "Full screen");
        Ok(())
    }

    fn set_key_listener(&self, listener: KeyListener) {
        *lock_unpoisoned(&self.panel.listener) = Some(listener);
    }

    fn close(&self) {
        lock_unpoisoned(&self.panel.state).closed = true;
        lock_unpoisoned(&self.panel.listener).take();
        debug!(serial = %self.panel.serial, "Panel closed");
    }
}

/// Observer/controller side of a simulated panel.
#[derive(Clone)]
pub struct SimulatedPanelHandle {
    panel: Arc<SimPanel>,
}

impl SimulatedPanelHandle {
    pub fn serial(&self) -> &str {
        &self.panel.serial
    }

    pub fn geometry(&self) -> PanelGeometry {
        self.panel.geometry
    }

    /// Report a key going down.
    pub fn key_down(&self, button: ButtonIndex) {
        self.panel.emit(KeyEvent::down(button));
    }

    /// Report a key going up.
    pub fn key_up(&self, button: ButtonIndex) {
        self.panel.emit(KeyEvent::up(button));
    }

    /// Down followed immediately by up.
    pub fn press(&self, button: ButtonIndex) {
        self.key_down(button);
        self.key_up(button);
    }

    pub fn face(&self, button: ButtonIndex) -> Option<ButtonFace> {
        lock_unpoisoned(&self.panel.state)
            .faces
            .get(button as usize)
            .cloned()
    }

    pub fn screen(&self) -> Option<Bitmap> {
        lock_unpoisoned(&self.panel.state).screen.clone()
    }

    /// The most recent draw calls, oldest first.
    pub fn draws(&self) -> Vec<DrawOp> {
        lock_unpoisoned(&self.panel.state)
            .draws
            .iter()
            .copied()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        lock_unpoisoned(&self.panel.state).closed
    }

    pub fn has_listener(&self) -> bool {
        lock_unpoisoned(&self.panel.listener).is_some()
    }
}
