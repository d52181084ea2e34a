//! Device session - owns the panels and drives button and render passes.
//!
//! Three kinds of threads touch a session:
//!
//! - driver threads push raw key events through the installed listeners
//! - the connection reader feeds [`DeviceSession::handle_message`]
//! - the tick loop calls [`DeviceSession::tick`]
//!
//! They meet only at mutex-guarded queues, and no lock is held across driver
//! or network I/O.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::driver::{DriverError, KeyEvent, PanelDevice, PanelDriver};
use crate::error::TargetError;
use crate::events::{BridgeEvent, BridgeObserver, Direction, TracingObserver};
use crate::image::{Bitmap, ImagePipeline};
use crate::payload::{PayloadError, PayloadStore};
use crate::protocol::{Dimensions, Message, PanelGeometry, PanelIndex, ProtocolError};
use crate::queue::{EventQueue, lock_unpoisoned};
use crate::render::{JobContent, RenderJob, RenderQueue, RenderTarget};
use crate::transport::MessageSink;

/// Identifies one accepted connection.
pub type ClientId = u64;

/// What the connection reader should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Close,
}

struct PanelSlot {
    index: PanelIndex,
    device: Box<dyn PanelDevice>,
    geometry: PanelGeometry,
    pending: Arc<EventQueue<KeyEvent>>,
}

struct ActiveClient {
    id: ClientId,
    sink: Arc<dyn MessageSink>,
}

/// Outcome of one render pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered: usize,
    pub failed: usize,
}

/// The server-side session: panels by index, the active client, and the
/// pending render jobs.
pub struct DeviceSession<O: BridgeObserver> {
    panels: Vec<PanelSlot>,
    jobs: Mutex<RenderQueue>,
    client: Mutex<Option<ActiveClient>>,
    next_client: AtomicU64,
    pipeline: ImagePipeline,
    observer: Arc<O>,
    shut_down: AtomicBool,
}

impl DeviceSession<TracingObserver> {
    /// Create a session with the default tracing observer.
    pub fn new(driver: &dyn PanelDriver, store: Arc<dyn PayloadStore>) -> Result<Self, DriverError> {
        Self::with_observer(driver, store, Arc::new(TracingObserver))
    }
}

impl<O: BridgeObserver> DeviceSession<O> {
    /// Enumerate the driver's panels once and start listening for keys.
    #[instrument(skip_all)]
    pub fn with_observer(
        driver: &dyn PanelDriver,
        store: Arc<dyn PayloadStore>,
        observer: Arc<O>,
    ) -> Result<Self, DriverError> {
        let devices = driver.enumerate()?;
        let mut panels = Vec::with_capacity(devices.len());
        for (i, device) in devices.into_iter().enumerate() {
            let index = PanelIndex::try_from(i)
                .map_err(|_| DriverError::EnumerationFailed(format!("too many panels: {}", i + 1)))?;
            let geometry = device.geometry();
            let pending = Arc::new(EventQueue::new());
            let queue = Arc::clone(&pending);
            device.set_key_listener(Box::new(move |event: KeyEvent| {
                if geometry.contains_index(event.button) {
                    queue.push(event);
                } else {
                    warn!(panel = index, button = event.button, "Driver reported unknown button");
                }
            }));
            observer.on_event(&BridgeEvent::PanelAttached {
                panel: index,
                columns: geometry.columns,
                rows: geometry.rows,
            });
            panels.push(PanelSlot {
                index,
                device,
                geometry,
                pending,
            });
        }
        info!(panels = panels.len(), "Device session ready");
        Ok(Self {
            panels,
            jobs: Mutex::new(RenderQueue::new()),
            client: Mutex::new(None),
            next_client: AtomicU64::new(1),
            pipeline: ImagePipeline::new(store),
            observer,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }

    pub fn geometry(&self, panel: PanelIndex) -> Option<PanelGeometry> {
        self.panels.get(panel as usize).map(|slot| slot.geometry)
    }

    pub fn has_client(&self) -> bool {
        lock_unpoisoned(&self.client).is_some()
    }

    pub fn pending_jobs(&self) -> usize {
        lock_unpoisoned(&self.jobs).len()
    }

    fn active_sink(&self) -> Option<Arc<dyn MessageSink>> {
        lock_unpoisoned(&self.client)
            .as_ref()
            .map(|client| Arc::clone(&client.sink))
    }

    fn send(&self, sink: &dyn MessageSink, msg: &Message) -> bool {
        match sink.send(msg) {
            Ok(()) => {
                self.observer.on_event(&BridgeEvent::Message {
                    direction: Direction::Outbound,
                    kind: msg.name(),
                });
                true
            }
            Err(e) => {
                warn!(peer = %sink.peer(), kind = msg.name(), error = %e, "Send failed");
                false
            }
        }
    }

    /// Make `sink` the active client, replacing (and closing) any previous
    /// one. Every panel is announced before the client becomes visible to
    /// the tick loop, so announcements precede any other message.
    #[instrument(skip_all, fields(peer = %sink.peer()))]
    pub fn attach_client(&self, sink: Arc<dyn MessageSink>) -> ClientId {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        if self.is_shut_down() {
            info!("Session shut down, refusing client");
            sink.close();
            return id;
        }
        if let Some(old) = lock_unpoisoned(&self.client).take() {
            info!(old = old.id, "Replacing active client");
            self.release_client(old);
        }

        for slot in &self.panels {
            let announce = Message::PanelConnectivityChanged {
                panel: slot.index,
                connected: true,
            };
            if !self.send(sink.as_ref(), &announce) {
                break;
            }
        }

        let peer = sink.peer();
        let previous = {
            let mut slot = lock_unpoisoned(&self.client);
            // Shutdown raises the flag before taking the client slot.
            if self.is_shut_down() {
                drop(slot);
                info!("Session shut down during attach, refusing client");
                sink.close();
                return id;
            }
            slot.replace(ActiveClient { id, sink })
        };
        if let Some(old) = previous {
            self.release_client(old);
        }
        self.observer
            .on_event(&BridgeEvent::ClientConnected { id, peer });
        id
    }

    /// Forget client `id` if it is still the active one. Queued work is
    /// dropped, not replayed to the next client.
    pub fn detach_client(&self, id: ClientId) -> bool {
        match self.take_client(id) {
            Some(client) => {
                self.release_client(client);
                true
            }
            None => false,
        }
    }

    fn take_client(&self, id: ClientId) -> Option<ActiveClient> {
        let mut slot = lock_unpoisoned(&self.client);
        match slot.as_ref() {
            Some(active) if active.id == id => slot.take(),
            _ => None,
        }
    }

    fn release_client(&self, client: ActiveClient) {
        let dropped = self.drop_pending_jobs();
        debug!(client = client.id, jobs = dropped, "Dropped queued jobs");
        self.disconnect(client);
    }

    /// Close the client's connection and forget its undelivered key events.
    /// Queued render jobs are left alone.
    fn disconnect(&self, client: ActiveClient) {
        client.sink.close();
        let mut events = 0;
        for slot in &self.panels {
            events += slot.pending.clear();
        }
        debug!(client = client.id, events, "Dropped queued key events");
        self.observer.on_event(&BridgeEvent::ClientDisconnected {
            id: client.id,
            peer: client.sink.peer(),
        });
    }

    fn drop_pending_jobs(&self) -> usize {
        let jobs = lock_unpoisoned(&self.jobs).take_all();
        for job in &jobs {
            if let Some(payload) = job.payload() {
                self.pipeline.store().discard(payload);
            }
        }
        jobs.len()
    }

    fn is_active(&self, id: ClientId) -> bool {
        lock_unpoisoned(&self.client)
            .as_ref()
            .is_some_and(|client| client.id == id)
    }

    /// Dispatch one inbound message from client `from`.
    pub fn handle_message(&self, from: ClientId, msg: Message) -> Dispatch {
        self.observer.on_event(&BridgeEvent::Message {
            direction: Direction::Inbound,
            kind: msg.name(),
        });

        if !self.is_active(from) {
            debug!(client = from, kind = msg.name(), "Message from inactive client");
            if let Some(job) = RenderJob::from_message(&msg) {
                self.release(&job);
            }
            return Dispatch::Close;
        }

        match msg {
            Message::SetButtonColor { .. }
            | Message::SetButtonImage { .. }
            | Message::SetDeckColor { .. }
            | Message::SetDeckImage { .. } => {
                if let Some(job) = RenderJob::from_message(&msg) {
                    self.enqueue(job, &msg);
                }
                Dispatch::Continue
            }
            Message::SetButtonState { .. } | Message::PanelConnectivityChanged { .. } => {
                let e = ProtocolError::UnexpectedDirection {
                    kind: msg.name(),
                    origin: "client",
                };
                warn!(error = %e, "Ignoring message");
                Dispatch::Continue
            }
            Message::Goodbye => {
                info!(client = from, "Client said goodbye");
                // Requests sent before the goodbye still get drawn.
                if let Some(client) = self.take_client(from) {
                    self.disconnect(client);
                }
                Dispatch::Close
            }
        }
    }

    fn release(&self, job: &RenderJob) {
        if let Some(payload) = job.payload() {
            self.pipeline.store().discard(payload);
        }
    }

    /// Target dimensions for `target`, or why it cannot be drawn.
    fn resolve(&self, target: RenderTarget) -> Result<(&PanelSlot, Dimensions), TargetError> {
        let panel = target.panel();
        let slot = self
            .panels
            .get(panel as usize)
            .ok_or(TargetError::PanelOutOfRange {
                panel,
                count: self.panels.len(),
            })?;
        match target {
            RenderTarget::Deck { .. } => Ok((slot, slot.geometry.deck_dimensions())),
            RenderTarget::Button { button, .. } => {
                if slot.geometry.contains_index(button) {
                    Ok((slot, slot.geometry.button_dimensions()))
                } else {
                    Err(TargetError::ButtonOutOfRange {
                        panel,
                        button,
                        count: slot.geometry.button_count(),
                    })
                }
            }
        }
    }

    fn reject(&self, job: &RenderJob, msg: &Message, reason: String) {
        warn!(message = %msg, reason = %reason, "Dropping request");
        self.release(job);
        self.observer.on_event(&BridgeEvent::RequestRejected {
            message: msg.to_string(),
            reason,
        });
    }

    fn enqueue(&self, job: RenderJob, msg: &Message) {
        let dims = match self.resolve(job.target) {
            Ok((_, dims)) => dims,
            Err(e) => return self.reject(&job, msg, e.to_string()),
        };
        if let Some(payload) = job.payload() {
            let expected = dims.byte_len();
            if payload.len as usize != expected {
                let e = PayloadError::LengthMismatch {
                    declared: payload.len,
                    expected,
                };
                return self.reject(&job, msg, e.to_string());
            }
        }

        let target = job.target;
        let superseded = lock_unpoisoned(&self.jobs).push(job);
        self.observer.on_event(&BridgeEvent::JobQueued { target });
        if let Some(old) = superseded {
            self.release(&old);
            self.observer
                .on_event(&BridgeEvent::JobSuperseded { target: old.target });
        }
    }

    /// One pass of the session loop: forward key events, then render.
    pub fn tick(&self) -> RenderStats {
        self.button_pass();
        self.render_pass()
    }

    /// Forward every queued key event, in arrival order, to the client.
    pub fn button_pass(&self) {
        let sink = self.active_sink();
        for slot in &self.panels {
            let events = slot.pending.drain();
            if events.is_empty() {
                continue;
            }
            let Some(sink) = sink.as_ref() else {
                self.observer.on_event(&BridgeEvent::EventsDropped {
                    panel: slot.index,
                    count: events.len(),
                });
                continue;
            };
            for event in events {
                let msg = Message::SetButtonState {
                    panel: slot.index,
                    button: event.button,
                    is_down: event.is_down,
                };
                if !self.send(sink.as_ref(), &msg) {
                    break;
                }
                self.observer.on_event(&BridgeEvent::ButtonChanged {
                    panel: slot.index,
                    button: event.button,
                    is_down: event.is_down,
                });
            }
        }
    }

    /// Apply pending jobs: every full-panel job first, then every button
    /// job, so button updates are what remains visible when both are queued.
    #[instrument(level = "trace", skip(self))]
    pub fn render_pass(&self) -> RenderStats {
        let (decks, buttons) = {
            let mut jobs = lock_unpoisoned(&self.jobs);
            (jobs.take_decks(), jobs.take_buttons())
        };
        let mut stats = RenderStats::default();
        for job in decks.into_iter().chain(buttons) {
            let target = job.target;
            match self.apply(job) {
                Ok(()) => {
                    stats.rendered += 1;
                    self.observer.on_event(&BridgeEvent::Rendered { target });
                }
                Err(reason) => {
                    stats.failed += 1;
                    self.observer
                        .on_event(&BridgeEvent::JobFailed { target, reason });
                }
            }
        }
        stats
    }

    fn apply(&self, job: RenderJob) -> Result<(), String> {
        let (slot, dims) = match self.resolve(job.target) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.release(&job);
                return Err(e.to_string());
            }
        };
        let device = slot.device.as_ref();
        let drawn = match (job.target, job.content) {
            (RenderTarget::Deck { .. }, JobContent::Color(color)) => {
                device.draw_full_screen(&Bitmap::solid(dims, color))
            }
            (RenderTarget::Button { button, .. }, JobContent::Color(color)) => {
                device.set_button_color(button, color)
            }
            (target, JobContent::Image(payload)) => {
                let bitmap = self
                    .pipeline
                    .load(&payload, dims)
                    .map_err(|e| e.to_string())?;
                match target {
                    RenderTarget::Deck { .. } => device.draw_full_screen(&bitmap),
                    RenderTarget::Button { button, .. } => device.set_button_bitmap(button, &bitmap),
                }
            }
        };
        drawn.map_err(|e| e.to_string())
    }

    /// Tell the client every panel is gone, close the connection, drop
    /// queued work and release every panel. Safe to call more than once.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = lock_unpoisoned(&self.client).take();
        if let Some(client) = client {
            for slot in &self.panels {
                let farewell = Message::PanelConnectivityChanged {
                    panel: slot.index,
                    connected: false,
                };
                if !self.send(client.sink.as_ref(), &farewell) {
                    break;
                }
            }
            self.release_client(client);
        } else {
            self.drop_pending_jobs();
        }
        for slot in &self.panels {
            slot.device.close();
        }
        info!("Device session shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
