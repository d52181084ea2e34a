//! Client proxy - the host-side view of the panels behind a session.
//!
//! Inbound messages are queued by the connection's reader thread and only
//! applied when the host calls [`DeckClient::tick`], once per host frame.
//! Render calls are fire-and-forget: pixels go to the payload store, the
//! message goes out, nothing is awaited.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, instrument, warn};

use crate::button::{ButtonGrid, ButtonState};
use crate::config::ClientConfig;
use crate::driver::KeyEvent;
use crate::error::{BridgeError, ConnectivityError, TargetError};
use crate::image::PixelBuffer;
use crate::payload::{PayloadStore, TempFileStore};
use crate::protocol::{ButtonIndex, ButtonPos, Message, PanelGeometry, PanelIndex, PayloadRef, Rgb};
use crate::queue::EventQueue;
use crate::transport::{MessageSink, TcpConnection};

/// Host-side source of frames for a streamed target.
pub trait SurfaceProducer: Send {
    /// Latest frame, sized for the bound target.
    fn capture_frame(&mut self) -> PixelBuffer;
}

impl<F> SurfaceProducer for F
where
    F: FnMut() -> PixelBuffer + Send,
{
    fn capture_frame(&mut self) -> PixelBuffer {
        self()
    }
}

/// Cloneable handle the reader thread uses to hand messages to the client.
#[derive(Clone)]
pub struct Inbox {
    queue: Arc<EventQueue<Message>>,
}

impl Inbox {
    pub fn deliver(&self, msg: Message) {
        self.queue.push(msg);
    }
}

/// Outbound path shared by every panel proxy.
#[derive(Clone)]
struct Link {
    sink: Arc<dyn MessageSink>,
    store: Arc<dyn PayloadStore>,
}

impl Link {
    fn send(&self, msg: &Message) -> Result<(), BridgeError> {
        if !self.sink.is_connected() {
            return Err(ConnectivityError::NoClient.into());
        }
        self.sink.send(msg)?;
        Ok(())
    }

    /// Park `pixels` in the store and send the message built around the
    /// reference. The payload is released again if the send fails.
    fn send_image(
        &self,
        pixels: &[u8],
        build: impl FnOnce(PayloadRef) -> Message,
    ) -> Result<(), BridgeError> {
        if !self.sink.is_connected() {
            return Err(ConnectivityError::NoClient.into());
        }
        let payload = self.store.put(pixels)?;
        let msg = build(payload.clone());
        if let Err(e) = self.sink.send(&msg) {
            self.store.discard(&payload);
            return Err(e.into());
        }
        Ok(())
    }
}

/// One panel announced by the server.
pub struct PanelProxy {
    index: PanelIndex,
    geometry: PanelGeometry,
    buttons: ButtonGrid,
    link: Link,
    button_streams: BTreeMap<ButtonIndex, Box<dyn SurfaceProducer>>,
    deck_stream: Option<Box<dyn SurfaceProducer>>,
}

impl PanelProxy {
    fn new(index: PanelIndex, geometry: PanelGeometry, link: Link) -> Self {
        Self {
            index,
            geometry,
            buttons: ButtonGrid::new(geometry),
            link,
            button_streams: BTreeMap::new(),
            deck_stream: None,
        }
    }

    pub fn index(&self) -> PanelIndex {
        self.index
    }

    pub fn geometry(&self) -> PanelGeometry {
        self.geometry
    }

    fn button_index(&self, pos: ButtonPos) -> Result<ButtonIndex, TargetError> {
        self.geometry
            .index_of(pos)
            .ok_or(TargetError::PositionOutOfRange {
                panel: self.index,
                pos,
                columns: self.geometry.columns,
                rows: self.geometry.rows,
            })
    }

    pub fn set_button_color(&self, pos: ButtonPos, color: Rgb) -> Result<(), BridgeError> {
        let button = self.button_index(pos)?;
        self.link.send(&Message::SetButtonColor {
            panel: self.index,
            button,
            color,
        })
    }

    /// Send an image for one button. Images of another size are rescaled.
    pub fn set_button_image(&self, pos: ButtonPos, image: &PixelBuffer) -> Result<(), BridgeError> {
        let button = self.button_index(pos)?;
        self.send_button_image(button, image)
    }

    fn send_button_image(&self, button: ButtonIndex, image: &PixelBuffer) -> Result<(), BridgeError> {
        let pixels = image.to_wire(self.geometry.button_dimensions(), true)?;
        let panel = self.index;
        self.link.send_image(&pixels, |payload| Message::SetButtonImage {
            panel,
            button,
            payload,
        })
    }

    pub fn set_deck_color(&self, color: Rgb) -> Result<(), BridgeError> {
        self.link.send(&Message::SetDeckColor {
            panel: self.index,
            color,
        })
    }

    /// Send a full-panel image. It must match the deck size exactly.
    pub fn set_deck_image(&self, image: &PixelBuffer) -> Result<(), BridgeError> {
        let pixels = image.to_wire(self.geometry.deck_dimensions(), false)?;
        let panel = self.index;
        self.link
            .send_image(&pixels, |payload| Message::SetDeckImage { panel, payload })
    }

    pub fn state(&self, pos: ButtonPos) -> ButtonState {
        self.buttons.state_at(pos)
    }

    /// True for the one tick in which the button went down.
    pub fn is_down(&self, pos: ButtonPos) -> bool {
        self.state(pos) == ButtonState::Down
    }

    pub fn is_held(&self, pos: ButtonPos) -> bool {
        self.state(pos) == ButtonState::Held
    }

    /// True for the one tick in which the button came up.
    pub fn is_up(&self, pos: ButtonPos) -> bool {
        self.state(pos) == ButtonState::Up
    }

    /// Forward a frame from `producer` to the button every tick, replacing
    /// any producer already bound there.
    pub fn stream_to_button(
        &mut self,
        pos: ButtonPos,
        producer: Box<dyn SurfaceProducer>,
    ) -> Result<Option<Box<dyn SurfaceProducer>>, TargetError> {
        let button = self.button_index(pos)?;
        Ok(self.button_streams.insert(button, producer))
    }

    pub fn stop_button_stream(&mut self, pos: ButtonPos) -> Option<Box<dyn SurfaceProducer>> {
        let button = self.geometry.index_of(pos)?;
        self.button_streams.remove(&button)
    }

    pub fn stream_to_deck(
        &mut self,
        producer: Box<dyn SurfaceProducer>,
    ) -> Option<Box<dyn SurfaceProducer>> {
        self.deck_stream.replace(producer)
    }

    pub fn stop_deck_stream(&mut self) -> Option<Box<dyn SurfaceProducer>> {
        self.deck_stream.take()
    }

    pub fn stream_count(&self) -> usize {
        self.button_streams.len() + usize::from(self.deck_stream.is_some())
    }

    fn run_streams(&mut self) {
        if let Some(mut producer) = self.deck_stream.take() {
            let frame = producer.capture_frame();
            if let Err(e) = self.set_deck_image(&frame) {
                warn!(panel = self.index, error = %e, "Deck stream frame dropped");
            }
            self.deck_stream = Some(producer);
        }
        let mut streams = std::mem::take(&mut self.button_streams);
        for (&button, producer) in streams.iter_mut() {
            let frame = producer.capture_frame();
            if let Err(e) = self.send_button_image(button, &frame) {
                warn!(panel = self.index, button, error = %e, "Button stream frame dropped");
            }
        }
        self.button_streams = streams;
    }

    fn advance(&mut self, events: Vec<KeyEvent>) {
        self.run_streams();
        self.buttons.tick(events);
    }
}

/// Connection to a device session plus the panels it announced.
pub struct DeckClient {
    link: Link,
    geometry: PanelGeometry,
    inbox: Inbox,
    panels: BTreeMap<PanelIndex, PanelProxy>,
    reader: Option<JoinHandle<()>>,
}

impl DeckClient {
    /// Build a client around an existing sink. Inbound messages are fed
    /// through [`DeckClient::inbox`].
    pub fn new(
        sink: Arc<dyn MessageSink>,
        store: Arc<dyn PayloadStore>,
        geometry: PanelGeometry,
    ) -> Self {
        Self {
            link: Link { sink, store },
            geometry,
            inbox: Inbox {
                queue: Arc::new(EventQueue::new()),
            },
            panels: BTreeMap::new(),
            reader: None,
        }
    }

    /// Connect over TCP and start the reader thread.
    #[instrument(skip_all, fields(addr = %config.address()))]
    pub fn connect(config: &ClientConfig) -> Result<Self, BridgeError> {
        let dir = config
            .payload_dir
            .clone()
            .unwrap_or_else(TempFileStore::default_dir);
        let store = Arc::new(TempFileStore::new(dir)?);
        let (conn, mut reader) = TcpConnection::connect(&config.address(), config.connect_attempts)?;
        let mut client = Self::new(Arc::new(conn), store, config.geometry);

        let inbox = client.inbox();
        let handle = thread::Builder::new()
            .name("deckbridge-reader".into())
            .spawn(move || {
                loop {
                    match reader.next_message() {
                        Ok(Some(msg)) => inbox.deliver(msg),
                        Ok(None) => {
                            debug!("Server closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Connection lost");
                            break;
                        }
                    }
                }
            })
            .map_err(crate::transport::TransportError::from)?;
        client.reader = Some(handle);
        Ok(client)
    }

    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.link.sink.is_connected()
    }

    /// Apply everything received since the last call. Newly announced
    /// panels are registered, withdrawn ones dropped, bound streams run, and
    /// every button state ages and then takes its new events.
    pub fn tick(&mut self) {
        let mut events: HashMap<PanelIndex, Vec<KeyEvent>> = HashMap::new();
        for msg in self.inbox.queue.drain() {
            match msg {
                Message::PanelConnectivityChanged {
                    panel,
                    connected: true,
                } => {
                    if !self.panels.contains_key(&panel) {
                        info!(panel, "Panel connected");
                        self.panels
                            .insert(panel, PanelProxy::new(panel, self.geometry, self.link.clone()));
                    }
                }
                Message::PanelConnectivityChanged {
                    panel,
                    connected: false,
                } => {
                    if self.panels.remove(&panel).is_some() {
                        info!(panel, "Panel disconnected");
                    }
                    events.remove(&panel);
                }
                Message::SetButtonState {
                    panel,
                    button,
                    is_down,
                } => {
                    if self.panels.contains_key(&panel) {
                        events
                            .entry(panel)
                            .or_default()
                            .push(KeyEvent { button, is_down });
                    } else {
                        debug!(panel, button, "Key event for unknown panel");
                    }
                }
                Message::Goodbye => {
                    info!("Server said goodbye");
                }
                other => {
                    warn!(kind = other.name(), "Ignoring unexpected message from server");
                }
            }
        }

        for (index, panel) in self.panels.iter_mut() {
            panel.advance(events.remove(index).unwrap_or_default());
        }
    }

    pub fn panel(&self, index: PanelIndex) -> Option<&PanelProxy> {
        self.panels.get(&index)
    }

    pub fn panel_mut(&mut self, index: PanelIndex) -> Option<&mut PanelProxy> {
        self.panels.get_mut(&index)
    }

    pub fn panels(&self) -> impl Iterator<Item = &PanelProxy> {
        self.panels.values()
    }

    /// Say goodbye and close the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.link.sink.is_connected() {
            if let Err(e) = self.link.sink.send(&Message::Goodbye) {
                debug!(error = %e, "Goodbye not delivered");
            }
            self.link.sink.close();
        }
        self.panels.clear();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }
}

impl Drop for DeckClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Bitmap, PixelFormat};
    use crate::payload::MemoryStore;
    use crate::protocol::Dimensions;
    use crate::transport::MockConnection;

    fn small() -> PanelGeometry {
        PanelGeometry {
            columns: 4,
            rows: 2,
            button_pixels: 4,
        }
    }

    fn client() -> (DeckClient, MockConnection, Arc<MemoryStore>) {
        let conn = MockConnection::new();
        let store = Arc::new(MemoryStore::new());
        let client = DeckClient::new(
            Arc::new(conn.clone()),
            store.clone() as Arc<dyn PayloadStore>,
            small(),
        );
        (client, conn, store)
    }

    fn announce(client: &DeckClient, panel: PanelIndex) {
        client.inbox().deliver(Message::PanelConnectivityChanged {
            panel,
            connected: true,
        });
    }

    fn key(client: &DeckClient, button: ButtonIndex, is_down: bool) {
        client.inbox().deliver(Message::SetButtonState {
            panel: 0,
            button,
            is_down,
        });
    }

    #[test]
    fn test_panels_follow_connectivity() {
        let (mut client, _conn, _store) = client();
        assert!(client.panel(0).is_none());

        announce(&client, 0);
        announce(&client, 1);
        client.tick();
        assert_eq!(client.panels().count(), 2);

        client.inbox().deliver(Message::PanelConnectivityChanged {
            panel: 1,
            connected: false,
        });
        client.tick();
        assert!(client.panel(1).is_none());
        assert_eq!(client.panel(0).unwrap().index(), 0);
    }

    #[test]
    fn test_edges_visible_for_one_tick() {
        let (mut client, _conn, _store) = client();
        announce(&client, 0);
        client.tick();

        let pos = ButtonPos::new(3, 1);
        let button = small().index_of(pos).unwrap();
        key(&client, button, true);
        client.tick();
        assert!(client.panel(0).unwrap().is_down(pos));
        client.tick();
        assert!(client.panel(0).unwrap().is_held(pos));
        key(&client, button, false);
        client.tick();
        assert!(client.panel(0).unwrap().is_up(pos));
        client.tick();
        assert_eq!(client.panel(0).unwrap().state(pos), ButtonState::NoInput);
    }

    #[test]
    fn test_events_in_same_batch_as_announcement_apply() {
        let (mut client, _conn, _store) = client();
        announce(&client, 0);
        key(&client, 2, true);
        client.tick();
        assert!(client.panel(0).unwrap().is_down(ButtonPos::new(2, 0)));
    }

    #[test]
    fn test_color_commands() {
        let (mut client, conn, _store) = client();
        announce(&client, 0);
        client.tick();
        let panel = client.panel(0).unwrap();

        panel
            .set_button_color(ButtonPos::new(1, 1), Rgb::new(1, 2, 3))
            .unwrap();
        panel.set_deck_color(Rgb::new(4, 5, 6)).unwrap();
        assert_eq!(
            conn.sent(),
            vec![
                Message::SetButtonColor {
                    panel: 0,
                    button: 5,
                    color: Rgb::new(1, 2, 3)
                },
                Message::SetDeckColor {
                    panel: 0,
                    color: Rgb::new(4, 5, 6)
                },
            ]
        );

        let err = panel
            .set_button_color(ButtonPos::new(4, 0), Rgb::BLACK)
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Target(TargetError::PositionOutOfRange { .. })
        ));
        assert_eq!(conn.sent().len(), 2);
    }

    #[test]
    fn test_button_image_is_normalised_and_parked() {
        let (mut client, conn, store) = client();
        announce(&client, 0);
        client.tick();

        let rgb = PixelBuffer::new(
            Dimensions::new(2, 2),
            PixelFormat::Rgb24,
            vec![10, 20, 30].repeat(4),
        )
        .unwrap();
        client
            .panel(0)
            .unwrap()
            .set_button_image(ButtonPos::new(0, 0), &rgb)
            .unwrap();

        let sent = conn.take_sent();
        let Message::SetButtonImage { payload, .. } = &sent[0] else {
            panic!("expected an image message, got {sent:?}");
        };
        let bytes = store.read(payload).unwrap();
        assert_eq!(bytes.len(), small().button_dimensions().byte_len());
        assert_eq!(&bytes[..4], &[0xFF, 10, 20, 30]);
        let bitmap = Bitmap::from_wire(&bytes, small().button_dimensions()).unwrap();
        assert_eq!(bitmap.rgb_at(3, 3), Rgb::new(10, 20, 30));
    }

    #[test]
    fn test_deck_image_must_match() {
        let (mut client, conn, store) = client();
        announce(&client, 0);
        client.tick();

        let wrong = PixelBuffer::solid(Dimensions::new(3, 3), Rgb::BLACK);
        let err = client.panel(0).unwrap().set_deck_image(&wrong).unwrap_err();
        assert!(matches!(err, BridgeError::Image(_)));
        assert!(conn.sent().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_disconnected_sink_is_a_noop() {
        let (mut client, conn, store) = client();
        announce(&client, 0);
        client.tick();
        conn.disconnect();

        let frame = PixelBuffer::solid(small().deck_dimensions(), Rgb::BLACK);
        let err = client.panel(0).unwrap().set_deck_image(&frame).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Connectivity(ConnectivityError::NoClient)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_streams_forward_one_frame_per_tick() {
        let (mut client, conn, store) = client();
        announce(&client, 0);
        client.tick();

        let dims = small().button_dimensions();
        let mut shade = 0u8;
        let producer = move || {
            shade += 1;
            PixelBuffer::solid(dims, Rgb::new(shade, 0, 0))
        };
        let panel = client.panel_mut(0).unwrap();
        assert!(
            panel
                .stream_to_button(ButtonPos::new(1, 0), Box::new(producer))
                .unwrap()
                .is_none()
        );
        let deck_dims = small().deck_dimensions();
        panel.stream_to_deck(Box::new(move || PixelBuffer::solid(deck_dims, Rgb::BLACK)));
        assert_eq!(panel.stream_count(), 2);

        client.tick();
        client.tick();
        let sent = conn.take_sent();
        assert_eq!(sent.len(), 4);
        assert!(matches!(sent[0], Message::SetDeckImage { .. }));
        assert!(matches!(sent[1], Message::SetButtonImage { button: 1, .. }));
        assert_eq!(store.len(), 4);

        // Rebinding replaces; unbinding stops.
        let panel = client.panel_mut(0).unwrap();
        let replaced = panel
            .stream_to_button(ButtonPos::new(1, 0), Box::new(move || PixelBuffer::solid(dims, Rgb::BLACK)))
            .unwrap();
        assert!(replaced.is_some());
        assert!(panel.stop_button_stream(ButtonPos::new(1, 0)).is_some());
        assert!(panel.stop_deck_stream().is_some());
        client.tick();
        assert!(conn.sent().is_empty());
    }

    #[test]
    fn test_close_says_goodbye() {
        let (mut client, conn, _store) = client();
        announce(&client, 0);
        client.tick();
        client.close();
        assert_eq!(conn.sent(), vec![Message::Goodbye]);
        assert!(!conn.is_connected());
        assert!(client.panel(0).is_none());
        client.close();
        assert_eq!(conn.sent().len(), 1);
    }
}
