// Transport
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 20;

/// Largest frame body accepted on the control channel. Pixel data never
/// travels inline, so frames stay small.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
pub const FRAME_HEADER_SIZE: usize = 4;

// Panel geometry (reference model: 8x4 keys of 144x144 px)
pub const DEFAULT_COLUMNS: u16 = 8;
pub const DEFAULT_ROWS: u16 = 4;
pub const DEFAULT_BUTTON_PIXELS: u32 = 144;

/// Bytes per pixel in the wire pixel format (A, R, G, B).
pub const BYTES_PER_PIXEL: usize = 4;

// Message kinds: client -> server
pub const MSG_SET_BUTTON_COLOR: u8 = 0x01;
pub const MSG_SET_BUTTON_IMAGE: u8 = 0x02;
pub const MSG_SET_DECK_COLOR: u8 = 0x03;
pub const MSG_SET_DECK_IMAGE: u8 = 0x04;

// Message kinds: server -> client
pub const MSG_SET_BUTTON_STATE: u8 = 0x10;
pub const MSG_PANEL_CONNECTIVITY: u8 = 0x11;

// Either direction
pub const MSG_GOODBYE: u8 = 0x1F;
