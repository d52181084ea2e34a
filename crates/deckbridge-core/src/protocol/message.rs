//! Wire messages exchanged between the client proxy and the device session.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use super::constants::*;
use super::types::{ButtonIndex, PanelIndex, Rgb};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Empty message body")]
    Empty,
    #[error("Unknown message kind 0x{0:02X}")]
    UnknownKind(u8),
    #[error("Truncated {kind} message")]
    Truncated { kind: &'static str },
    #[error("Payload location is not valid UTF-8")]
    InvalidLocation,
    #[error("Payload location too long: {0} bytes")]
    LocationTooLong(usize),
    #[error("Unexpected {kind} message from {origin}")]
    UnexpectedDirection {
        kind: &'static str,
        origin: &'static str,
    },
    #[error("Invalid panel geometry {columns}x{rows} at {button_pixels}px: {reason}")]
    InvalidGeometry {
        columns: u16,
        rows: u16,
        button_pixels: u32,
        reason: &'static str,
    },
    #[error("Frame error: {0}")]
    Frame(#[from] super::frame::FrameError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Out-of-band handle to a pixel payload: where it lives and how many bytes
/// the sender wrote there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadRef {
    pub location: String,
    pub len: u32,
}

impl PayloadRef {
    pub fn new(location: impl Into<String>, len: u32) -> Self {
        Self {
            location: location.into(),
            len,
        }
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.location, self.len)
    }
}

/// Every message kind the bridge speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Paint one button with a solid color.
    SetButtonColor {
        panel: PanelIndex,
        button: ButtonIndex,
        color: Rgb,
    },
    /// Draw a button-sized pixel payload onto one button.
    SetButtonImage {
        panel: PanelIndex,
        button: ButtonIndex,
        payload: PayloadRef,
    },
    /// Paint the whole panel surface with a solid color.
    SetDeckColor { panel: PanelIndex, color: Rgb },
    /// Draw a panel-sized pixel payload over the whole surface.
    SetDeckImage {
        panel: PanelIndex,
        payload: PayloadRef,
    },
    /// A physical key transition (server -> client).
    SetButtonState {
        panel: PanelIndex,
        button: ButtonIndex,
        is_down: bool,
    },
    /// A panel became available or went away (server -> client).
    PanelConnectivityChanged { panel: PanelIndex, connected: bool },
    /// The sender is closing the connection.
    Goodbye,
}

impl Message {
    pub fn kind(&self) -> u8 {
        match self {
            Message::SetButtonColor { .. } => MSG_SET_BUTTON_COLOR,
            Message::SetButtonImage { .. } => MSG_SET_BUTTON_IMAGE,
            Message::SetDeckColor { .. } => MSG_SET_DECK_COLOR,
            Message::SetDeckImage { .. } => MSG_SET_DECK_IMAGE,
            Message::SetButtonState { .. } => MSG_SET_BUTTON_STATE,
            Message::PanelConnectivityChanged { .. } => MSG_PANEL_CONNECTIVITY,
            Message::Goodbye => MSG_GOODBYE,
        }
    }

    pub fn name(&self) -> &'static str {
        kind_name(self.kind())
    }

    /// Panel the message addresses, if any.
    pub fn panel(&self) -> Option<PanelIndex> {
        match self {
            Message::SetButtonColor { panel, .. }
            | Message::SetButtonImage { panel, .. }
            | Message::SetDeckColor { panel, .. }
            | Message::SetDeckImage { panel, .. }
            | Message::SetButtonState { panel, .. }
            | Message::PanelConnectivityChanged { panel, .. } => Some(*panel),
            Message::Goodbye => None,
        }
    }

    /// Encode into a frame body: kind byte followed by big-endian fields.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(16);
        buf.write_u8(self.kind())?;
        match self {
            Message::SetButtonColor {
                panel,
                button,
                color,
            } => {
                buf.write_u16::<BigEndian>(*panel)?;
                buf.write_u16::<BigEndian>(*button)?;
                write_rgb(&mut buf, *color)?;
            }
            Message::SetButtonImage {
                panel,
                button,
                payload,
            } => {
                buf.write_u16::<BigEndian>(*panel)?;
                buf.write_u16::<BigEndian>(*button)?;
                write_payload(&mut buf, payload)?;
            }
            Message::SetDeckColor { panel, color } => {
                buf.write_u16::<BigEndian>(*panel)?;
                write_rgb(&mut buf, *color)?;
            }
            Message::SetDeckImage { panel, payload } => {
                buf.write_u16::<BigEndian>(*panel)?;
                write_payload(&mut buf, payload)?;
            }
            Message::SetButtonState {
                panel,
                button,
                is_down,
            } => {
                buf.write_u16::<BigEndian>(*panel)?;
                buf.write_u16::<BigEndian>(*button)?;
                buf.write_u8(u8::from(*is_down))?;
            }
            Message::PanelConnectivityChanged { panel, connected } => {
                buf.write_u16::<BigEndian>(*panel)?;
                buf.write_u8(u8::from(*connected))?;
            }
            Message::Goodbye => {}
        }
        Ok(buf)
    }

    /// Decode a frame body. Trailing bytes after the known fields are ignored.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let (&kind, fields) = body.split_first().ok_or(ProtocolError::Empty)?;
        let name = kind_name(kind);
        let mut cursor = Cursor::new(fields);
        let truncated = |_: std::io::Error| ProtocolError::Truncated { kind: name };

        let msg = match kind {
            MSG_SET_BUTTON_COLOR => Message::SetButtonColor {
                panel: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                button: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                color: read_rgb(&mut cursor).map_err(truncated)?,
            },
            MSG_SET_BUTTON_IMAGE => Message::SetButtonImage {
                panel: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                button: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                payload: read_payload(&mut cursor, name)?,
            },
            MSG_SET_DECK_COLOR => Message::SetDeckColor {
                panel: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                color: read_rgb(&mut cursor).map_err(truncated)?,
            },
            MSG_SET_DECK_IMAGE => Message::SetDeckImage {
                panel: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                payload: read_payload(&mut cursor, name)?,
            },
            MSG_SET_BUTTON_STATE => Message::SetButtonState {
                panel: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                button: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                is_down: cursor.read_u8().map_err(truncated)? != 0,
            },
            MSG_PANEL_CONNECTIVITY => Message::PanelConnectivityChanged {
                panel: cursor.read_u16::<BigEndian>().map_err(truncated)?,
                connected: cursor.read_u8().map_err(truncated)? != 0,
            },
            MSG_GOODBYE => Message::Goodbye,
            other => return Err(ProtocolError::UnknownKind(other)),
        };
        Ok(msg)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::SetButtonColor {
                panel,
                button,
                color,
            } => write!(f, "SetButtonColor[{panel}:{button}] {color}"),
            Message::SetButtonImage {
                panel,
                button,
                payload,
            } => write!(f, "SetButtonImage[{panel}:{button}] {payload}"),
            Message::SetDeckColor { panel, color } => write!(f, "SetDeckColor[{panel}] {color}"),
            Message::SetDeckImage { panel, payload } => {
                write!(f, "SetDeckImage[{panel}] {payload}")
            }
            Message::SetButtonState {
                panel,
                button,
                is_down,
            } => write!(
                f,
                "SetButtonState[{panel}:{button}] {}",
                if *is_down { "down" } else { "up" }
            ),
            Message::PanelConnectivityChanged { panel, connected } => write!(
                f,
                "PanelConnectivityChanged[{panel}] {}",
                if *connected { "connected" } else { "disconnected" }
            ),
            Message::Goodbye => write!(f, "Goodbye"),
        }
    }
}

/// Human readable name for a kind byte.
pub fn kind_name(kind: u8) -> &'static str {
    match kind {
        MSG_SET_BUTTON_COLOR => "SetButtonColor",
        MSG_SET_BUTTON_IMAGE => "SetButtonImage",
        MSG_SET_DECK_COLOR => "SetDeckColor",
        MSG_SET_DECK_IMAGE => "SetDeckImage",
        MSG_SET_BUTTON_STATE => "SetButtonState",
        MSG_PANEL_CONNECTIVITY => "PanelConnectivityChanged",
        MSG_GOODBYE => "Goodbye",
        _ => "Unknown",
    }
}

fn write_rgb(buf: &mut Vec<u8>, color: Rgb) -> std::io::Result<()> {
    buf.write_u8(color.r)?;
    buf.write_u8(color.g)?;
    buf.write_u8(color.b)
}

fn read_rgb(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Rgb> {
    Ok(Rgb {
        r: cursor.read_u8()?,
        g: cursor.read_u8()?,
        b: cursor.read_u8()?,
    })
}

fn write_payload(buf: &mut Vec<u8>, payload: &PayloadRef) -> Result<(), ProtocolError> {
    let location = payload.location.as_bytes();
    let loc_len: u16 = location
        .len()
        .try_into()
        .map_err(|_| ProtocolError::LocationTooLong(location.len()))?;
    buf.write_u32::<BigEndian>(payload.len)?;
    buf.write_u16::<BigEndian>(loc_len)?;
    buf.extend_from_slice(location);
    Ok(())
}

fn read_payload(
    cursor: &mut Cursor<&[u8]>,
    kind: &'static str,
) -> Result<PayloadRef, ProtocolError> {
    let truncated = |_: std::io::Error| ProtocolError::Truncated { kind };
    let len = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    let loc_len = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let mut location = vec![0u8; loc_len as usize];
    cursor.read_exact(&mut location).map_err(truncated)?;
    let location = String::from_utf8(location).map_err(|_| ProtocolError::InvalidLocation)?;
    Ok(PayloadRef { location, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_button_image_layout() {
        let msg = Message::SetButtonImage {
            panel: 1,
            button: 19,
            payload: PayloadRef::new("/tmp/p.bin", 82944),
        };
        let body = msg.encode().unwrap();
        assert_eq!(body[0], MSG_SET_BUTTON_IMAGE);
        assert_eq!(&body[1..3], &[0x00, 0x01]);
        assert_eq!(&body[3..5], &[0x00, 19]);
        assert_eq!(&body[5..9], &82944u32.to_be_bytes());
        assert_eq!(&body[9..11], &[0x00, 10]);
        assert_eq!(&body[11..], b"/tmp/p.bin");
        assert_eq!(Message::decode(&body).unwrap(), msg);
    }

    #[test]
    fn test_button_state_decodes() {
        let body = [MSG_SET_BUTTON_STATE, 0x00, 0x02, 0x00, 0x07, 0x01];
        let msg = Message::decode(&body).unwrap();
        assert_eq!(
            msg,
            Message::SetButtonState {
                panel: 2,
                button: 7,
                is_down: true
            }
        );
        assert_eq!(msg.panel(), Some(2));
    }

    #[test]
    fn test_unknown_kind() {
        let err = Message::decode(&[0x7E, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(0x7E)));
    }

    #[test]
    fn test_truncated_color() {
        let err = Message::decode(&[MSG_SET_DECK_COLOR, 0x00, 0x00, 0xFF]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                kind: "SetDeckColor"
            }
        ));
    }

    #[test]
    fn test_truncated_location() {
        let mut body = Message::SetDeckImage {
            panel: 0,
            payload: PayloadRef::new("mem:1", 4),
        }
        .encode()
        .unwrap();
        body.truncate(body.len() - 2);
        assert!(Message::decode(&body).is_err());
    }

    #[test]
    fn test_empty_body() {
        assert!(matches!(Message::decode(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_goodbye_is_bare_kind() {
        assert_eq!(Message::Goodbye.encode().unwrap(), vec![MSG_GOODBYE]);
        assert_eq!(Message::Goodbye.panel(), None);
    }
}
