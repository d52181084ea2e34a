//! TCP front end for a [`DeviceSession`].
//!
//! One accept thread, one reader thread per connection, and the tick loop on
//! the caller's thread.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::events::BridgeObserver;
use crate::protocol::DEFAULT_HOST;
use crate::session::{DeviceSession, Dispatch};
use crate::transport::{MessageReader, TcpConnection, TransportError};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Time source for the tick loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Cloneable stop flag for a running server.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct Server<O: BridgeObserver> {
    listener: TcpListener,
    session: Arc<DeviceSession<O>>,
    tick_interval: Duration,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownHandle,
}

impl<O: BridgeObserver + 'static> Server<O> {
    /// Listen on the loopback interface at the configured port.
    #[instrument(skip_all, fields(port = config.port))]
    pub fn bind(config: &ServerConfig, session: Arc<DeviceSession<O>>) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", DEFAULT_HOST, config.port);
        let bind_failed = |e: io::Error| TransportError::BindFailed {
            addr: addr.clone(),
            message: e.to_string(),
        };
        let listener = TcpListener::bind(&addr).map_err(bind_failed)?;
        listener.set_nonblocking(true).map_err(bind_failed)?;
        let local = listener.local_addr()?;
        info!(addr = %local, "Listening");
        Ok(Self {
            listener,
            session,
            tick_interval: config.tick_interval(),
            clock: Arc::new(SystemClock),
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn session(&self) -> &Arc<DeviceSession<O>> {
        &self.session
    }

    /// Serve until the shutdown handle fires, then shut the session down.
    pub fn run(self) -> Result<(), TransportError> {
        let acceptor = {
            let listener = self.listener.try_clone()?;
            let session = Arc::clone(&self.session);
            let shutdown = self.shutdown.clone();
            thread::Builder::new()
                .name("deckbridge-accept".into())
                .spawn(move || accept_loop(listener, session, shutdown))?
        };

        self.tick_loop();

        self.session.shutdown();
        if acceptor.join().is_err() {
            warn!("Accept thread panicked");
        }
        info!("Server stopped");
        Ok(())
    }

    fn tick_loop(&self) {
        let mut next = self.clock.now();
        while !self.shutdown.is_triggered() {
            self.session.tick();
            next += self.tick_interval;
            let now = self.clock.now();
            if next > now {
                self.clock.sleep(next - now);
            } else {
                // Running behind: start the next interval from now.
                next = now;
            }
        }
    }
}

fn accept_loop<O: BridgeObserver + 'static>(
    listener: TcpListener,
    session: Arc<DeviceSession<O>>,
    shutdown: ShutdownHandle,
) {
    while !shutdown.is_triggered() {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(peer = %addr, error = %e, "Rejecting connection");
                    continue;
                }
                match TcpConnection::from_stream(stream) {
                    Ok((conn, reader)) => {
                        let id = session.attach_client(Arc::new(conn));
                        if let Err(e) = spawn_reader(Arc::clone(&session), id, reader) {
                            warn!(peer = %addr, error = %e, "Failed to start reader");
                            session.detach_client(id);
                        }
                    }
                    Err(e) => warn!(peer = %addr, error = %e, "Rejecting connection"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("Accept loop finished");
}

fn spawn_reader<O: BridgeObserver + 'static>(
    session: Arc<DeviceSession<O>>,
    id: u64,
    mut reader: MessageReader,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("deckbridge-client-{id}"))
        .spawn(move || {
            loop {
                match reader.next_message() {
                    Ok(Some(msg)) => {
                        if session.handle_message(id, msg) == Dispatch::Close {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(client = id, "Peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(client = id, error = %e, "Connection lost");
                        break;
                    }
                }
            }
            session.detach_client(id);
        })
}
