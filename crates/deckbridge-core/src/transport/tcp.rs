//! TCP loopback transport.

use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::traits::{MessageSink, TransportError};
use crate::protocol::{Message, ProtocolError, encode_message, read_frame};

/// Outbound half of a TCP connection.
pub struct TcpConnection {
    stream: Mutex<TcpStream>,
    peer: SocketAddr,
    open: AtomicBool,
}

impl TcpConnection {
    /// Wrap an accepted or connected stream. Returns the sink together with
    /// a reader over a cloned handle of the same socket.
    pub fn from_stream(stream: TcpStream) -> Result<(Self, MessageReader), TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let reader = MessageReader::new(stream.try_clone()?);
        Ok((
            Self {
                stream: Mutex::new(stream),
                peer,
                open: AtomicBool::new(true),
            },
            reader,
        ))
    }

    /// Connect to `addr`, retrying with exponential backoff.
    #[instrument(level = "info")]
    pub fn connect(
        addr: &str,
        max_attempts: u32,
    ) -> Result<(Self, MessageReader), TransportError> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;
        loop {
            match Self::connect_once(addr) {
                Ok(pair) => {
                    info!(peer = %pair.0.peer, attempt, "Connected");
                    return Ok(pair);
                }
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    info!(attempt, max_attempts, error = %e, ?delay, "Connect failed, retrying");
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, Duration::from_secs(2));
                    attempt += 1;
                }
            }
        }
    }

    fn connect_once(addr: &str) -> Result<(Self, MessageReader), TransportError> {
        let connect_failed = |message: String| TransportError::ConnectFailed {
            addr: addr.to_string(),
            message,
        };
        let target = addr
            .to_socket_addrs()
            .map_err(|e| connect_failed(e.to_string()))?
            .next()
            .ok_or_else(|| connect_failed("address did not resolve".into()))?;
        let stream = TcpStream::connect(target).map_err(|e| connect_failed(e.to_string()))?;
        Self::from_stream(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl MessageSink for TcpConnection {
    fn send(&self, msg: &Message) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let frame = encode_message(msg)?;
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = std::io::Write::write_all(&mut *stream, &frame) {
            self.open.store(false, Ordering::SeqCst);
            return Err(TransportError::SendFailed(e.to_string()));
        }
        debug!(peer = %self.peer, msg = %msg, "Sent");
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(peer = %self.peer, error = %e, "Shutdown after peer already closed");
            }
            info!(peer = %self.peer, "Connection closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// Inbound half of a TCP connection.
pub struct MessageReader {
    reader: BufReader<TcpStream>,
}

impl MessageReader {
    fn new(stream: TcpStream) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Block until the next decodable message arrives.
    ///
    /// Frames that fail to decode are logged and skipped; the length prefix
    /// keeps the stream in sync. Returns `Ok(None)` on clean close.
    pub fn next_message(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            let Some(body) = read_frame(&mut self.reader)? else {
                return Ok(None);
            };
            match Message::decode(&body) {
                Ok(msg) => return Ok(Some(msg)),
                Err(ProtocolError::UnknownKind(kind)) => {
                    debug!(kind = %format!("0x{:02X}", kind), "Ignoring unknown message kind");
                }
                Err(e) => {
                    warn!(error = %e, "Dropping malformed frame");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PayloadRef, Rgb, encode_frame};
    use std::io::Write;
    use std::net::TcpListener;

    fn pair() -> ((TcpConnection, MessageReader), (TcpConnection, MessageReader)) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let client = TcpConnection::connect(&addr, 1).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        (client, TcpConnection::from_stream(accepted).unwrap())
    }

    #[test]
    fn test_messages_cross_in_order() {
        let ((client, _client_rx), (_server, mut server_rx)) = pair();
        let first = Message::SetDeckColor {
            panel: 0,
            color: Rgb::new(10, 20, 30),
        };
        let second = Message::SetButtonImage {
            panel: 0,
            button: 3,
            payload: PayloadRef::new("mem:7", 16),
        };
        client.send(&first).unwrap();
        client.send(&second).unwrap();

        assert_eq!(server_rx.next_message().unwrap(), Some(first));
        assert_eq!(server_rx.next_message().unwrap(), Some(second));
    }

    #[test]
    fn test_unknown_kind_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let (_sink, mut rx) = TcpConnection::from_stream(accepted).unwrap();

        raw.write_all(&encode_frame(&[0x7E, 1, 2, 3]).unwrap())
            .unwrap();
        raw.write_all(&encode_message(&Message::Goodbye).unwrap())
            .unwrap();

        assert_eq!(rx.next_message().unwrap(), Some(Message::Goodbye));
    }

    #[test]
    fn test_close_ends_peer_stream() {
        let ((client, _client_rx), (_server, mut server_rx)) = pair();
        client.close();
        assert!(!client.is_connected());
        assert!(matches!(
            client.send(&Message::Goodbye),
            Err(TransportError::Disconnected)
        ));
        assert_eq!(server_rx.next_message().unwrap(), None);
    }
}
