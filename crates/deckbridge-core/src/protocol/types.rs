//! Addressing and color types shared by both ends of the bridge.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::{BYTES_PER_PIXEL, DEFAULT_BUTTON_PIXELS, DEFAULT_COLUMNS, DEFAULT_ROWS};
use super::message::ProtocolError;

/// Index of a panel, stable for the lifetime of a server session.
pub type PanelIndex = u16;

/// Linear button index (`row * columns + column`) as carried on the wire.
pub type ButtonIndex = u16;

/// A solid color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Width and height of a pixel surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of a wire pixel buffer covering this surface.
    pub fn byte_len(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// (column, row) position of a button, (0, 0) being the top left key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ButtonPos {
    pub column: u16,
    pub row: u16,
}

impl ButtonPos {
    pub const fn new(column: u16, row: u16) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for ButtonPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.column, self.row)
    }
}

/// Button grid layout and pixel size of a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelGeometry {
    pub columns: u16,
    pub rows: u16,
    /// Edge length of one (square) button in pixels.
    pub button_pixels: u32,
}

impl Default for PanelGeometry {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            rows: DEFAULT_ROWS,
            button_pixels: DEFAULT_BUTTON_PIXELS,
        }
    }
}

impl PanelGeometry {
    pub fn button_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn button_dimensions(&self) -> Dimensions {
        Dimensions::new(self.button_pixels, self.button_pixels)
    }

    pub fn deck_dimensions(&self) -> Dimensions {
        Dimensions::new(
            self.button_pixels * u32::from(self.columns),
            self.button_pixels * u32::from(self.rows),
        )
    }

    pub fn contains(&self, pos: ButtonPos) -> bool {
        pos.column < self.columns && pos.row < self.rows
    }

    pub fn contains_index(&self, index: ButtonIndex) -> bool {
        (index as usize) < self.button_count()
    }

    /// Linear index of `pos`, or `None` when it lies outside the grid.
    pub fn index_of(&self, pos: ButtonPos) -> Option<ButtonIndex> {
        self.contains(pos).then(|| pos.row * self.columns + pos.column)
    }

    /// Check that the grid is non-empty, every button has a `ButtonIndex`
    /// and a full-panel image fits a wire payload.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let invalid = |reason| ProtocolError::InvalidGeometry {
            columns: self.columns,
            rows: self.rows,
            button_pixels: self.button_pixels,
            reason,
        };
        if self.columns == 0 || self.rows == 0 {
            return Err(invalid("grid has no buttons"));
        }
        if self.button_pixels == 0 {
            return Err(invalid("buttons have no pixels"));
        }
        if self.button_count() > usize::from(ButtonIndex::MAX) {
            return Err(invalid("too many buttons"));
        }
        let deck_bytes = self
            .button_pixels
            .checked_mul(u32::from(self.columns))
            .zip(self.button_pixels.checked_mul(u32::from(self.rows)))
            .and_then(|(width, height)| width.checked_mul(height))
            .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL as u32));
        if deck_bytes.is_none() {
            return Err(invalid("panel image too large"));
        }
        Ok(())
    }

    pub fn position_of(&self, index: ButtonIndex) -> Option<ButtonPos> {
        self.contains_index(index)
            .then(|| ButtonPos::new(index % self.columns, index / self.columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_geometry() {
        let geometry = PanelGeometry::default();
        assert_eq!(geometry.button_count(), 32);
        assert_eq!(geometry.deck_dimensions(), Dimensions::new(1152, 576));
        assert_eq!(geometry.button_dimensions().byte_len(), 144 * 144 * 4);
    }

    #[test]
    fn test_index_mapping() {
        let geometry = PanelGeometry::default();
        assert_eq!(geometry.index_of(ButtonPos::new(3, 2)), Some(19));
        assert_eq!(geometry.position_of(19), Some(ButtonPos::new(3, 2)));
        assert_eq!(geometry.index_of(ButtonPos::new(8, 0)), None);
        assert_eq!(geometry.index_of(ButtonPos::new(0, 4)), None);
        assert_eq!(geometry.position_of(32), None);
    }

    #[test]
    fn test_geometry_validation() {
        assert!(PanelGeometry::default().validate().is_ok());
        let bad = [
            PanelGeometry {
                button_pixels: 0,
                ..Default::default()
            },
            PanelGeometry {
                rows: 0,
                ..Default::default()
            },
            PanelGeometry {
                columns: 256,
                rows: 256,
                button_pixels: 1,
            },
            PanelGeometry {
                columns: 8,
                rows: 4,
                button_pixels: 40_000,
            },
        ];
        for geometry in bad {
            assert!(
                matches!(geometry.validate(), Err(ProtocolError::InvalidGeometry { .. })),
                "{:?} accepted",
                geometry
            );
        }
    }

    #[test]
    fn test_rgb_display() {
        assert_eq!(Rgb::new(255, 16, 0).to_string(), "#FF1000");
    }
}
