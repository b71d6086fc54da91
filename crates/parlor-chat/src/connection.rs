use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use parlor_auth::TokenStore;
use parlor_types::events::{ChatEvent, ConnectionState};
use parlor_types::models::Room;

use crate::error::ChatError;
use crate::frame::decode_frame;
use crate::timeline::{ContentMeasure, MessageTimeline};
use crate::transport::{FrameSink, FrameStream, LiveStream, StreamParams, Transport};

/// How long a closing stream may keep delivering frames after the close
/// frame went out before it is reported closed anyway.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Give up opening a stream after this long. `None` waits for the transport.
    pub connect_timeout: Option<Duration>,
    pub close_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            close_grace: CLOSE_GRACE,
        }
    }
}

enum Command {
    SwitchTo(Room),
    Close,
    Reconnect,
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
}

enum StreamCommand {
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Close,
}

enum StreamEvent {
    Opened,
    Frame(String),
    Closed,
    Failed(ChatError),
}

struct Envelope {
    stream: Uuid,
    event: StreamEvent,
}

struct StreamHandle {
    id: Uuid,
    room: Room,
    commands: mpsc::UnboundedSender<StreamCommand>,
    task: JoinHandle<()>,
}

/// Handle to the chat connection.
///
/// All handles talk to one driver task that owns the connection state, the
/// live stream and the timeline. Commands are applied in the order they are
/// issued. The driver stops once every handle is dropped, closing the stream.
#[derive(Clone)]
pub struct ChatConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ChatConnection {
    /// Start the driver. Stream credentials are read from `tokens` each time a
    /// stream is opened.
    pub fn spawn<T: Transport>(
        transport: T,
        tokens: TokenStore,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        Self::spawn_with_timeline(transport, tokens, config, MessageTimeline::new())
    }

    pub fn spawn_with_timeline<T, M>(
        transport: T,
        tokens: TokenStore,
        config: ConnectionConfig,
        timeline: MessageTimeline<M>,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>)
    where
        T: Transport,
        M: ContentMeasure + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            transport: Arc::new(transport),
            tokens,
            config,
            state: ConnectionState::Idle,
            stream: None,
            timeline,
            events: event_tx,
            state_tx,
            envelope_tx,
        };
        tokio::spawn(driver.run(command_rx, envelope_rx));

        let handle = Self {
            commands: command_tx,
            state: state_rx,
        };
        (handle, event_rx)
    }

    /// Make `room` the one live room. The previous stream, if any, is fully
    /// closed before the new one is opened.
    pub fn switch_to(&self, room: Room) -> Result<(), ChatError> {
        self.command(Command::SwitchTo(room))
    }

    pub fn close(&self) -> Result<(), ChatError> {
        self.command(Command::Close)
    }

    /// Re-open the current room with a fresh credential, or retry an errored one.
    pub fn reconnect(&self) -> Result<(), ChatError> {
        self.command(Command::Reconnect)
    }

    /// Send a raw text message on the open stream.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let (reply, response) = oneshot::channel();
        self.command(Command::Send { text, reply })?;
        response.await.map_err(|_| ChatError::Shutdown)?
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate` and return that state.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, ChatError> {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ChatError::Shutdown)?;
        Ok((*matched).clone())
    }

    fn command(&self, command: Command) -> Result<(), ChatError> {
        self.commands.send(command).map_err(|_| ChatError::Shutdown)
    }
}

struct Driver<T, M> {
    transport: Arc<T>,
    tokens: TokenStore,
    config: ConnectionConfig,
    state: ConnectionState,
    stream: Option<StreamHandle>,
    timeline: MessageTimeline<M>,
    events: mpsc::UnboundedSender<ChatEvent>,
    state_tx: watch::Sender<ConnectionState>,
    envelope_tx: mpsc::UnboundedSender<Envelope>,
}

impl<T: Transport, M: ContentMeasure> Driver<T, M> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut envelopes: mpsc::UnboundedReceiver<Envelope>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(envelope) = envelopes.recv() => self.on_envelope(envelope),
            }
        }

        if let Some(stream) = self.stream.take() {
            debug!(room = %stream.room.id, "all handles dropped, closing stream");
            let _ = stream.commands.send(StreamCommand::Close);
            let _ = stream.task.await;
        }
        debug!("chat connection driver stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SwitchTo(room) => self.switch_to(room),
            Command::Close => self.close(),
            Command::Reconnect => self.reconnect(),
            Command::Send { text, reply } => self.send(text, reply),
        }
    }

    fn switch_to(&mut self, room: Room) {
        match self.state.clone() {
            ConnectionState::Open(current) | ConnectionState::Connecting(current)
                if current == room =>
            {
                debug!(room = %room.id, "already on room");
            }
            ConnectionState::Idle | ConnectionState::Errored { .. } => self.connect(room),
            ConnectionState::Open(_)
            | ConnectionState::Connecting(_)
            | ConnectionState::Reconnecting(_) => {
                self.close_then(ConnectionState::Closing(Some(room)));
            }
            ConnectionState::Closing(_) => self.set_state(ConnectionState::Closing(Some(room))),
        }
    }

    fn close(&mut self) {
        match self.state.clone() {
            ConnectionState::Idle => {}
            ConnectionState::Errored { .. } => self.set_state(ConnectionState::Idle),
            ConnectionState::Closing(_) => self.set_state(ConnectionState::Closing(None)),
            ConnectionState::Open(_)
            | ConnectionState::Connecting(_)
            | ConnectionState::Reconnecting(_) => self.close_then(ConnectionState::Closing(None)),
        }
    }

    fn reconnect(&mut self) {
        match self.state.clone() {
            ConnectionState::Open(room) => self.close_then(ConnectionState::Reconnecting(room)),
            ConnectionState::Errored {
                room: Some(room), ..
            } => self.connect(room),
            other => debug!("nothing to reconnect in state {:?}", other),
        }
    }

    fn send(&mut self, text: String, reply: oneshot::Sender<Result<(), ChatError>>) {
        let stream = match (&self.state, &self.stream) {
            (ConnectionState::Open(_), Some(stream)) => stream,
            _ => {
                let _ = reply.send(Err(ChatError::NotOpen));
                return;
            }
        };
        if let Err(mpsc::error::SendError(StreamCommand::Send { reply, .. })) =
            stream.commands.send(StreamCommand::Send { text, reply })
        {
            let _ = reply.send(Err(ChatError::NotOpen));
        }
    }

    /// Enter `next` and ask the current stream to close; the state resolves
    /// when the stream reports back.
    fn close_then(&mut self, next: ConnectionState) {
        self.set_state(next);
        match &self.stream {
            Some(stream) => {
                let _ = stream.commands.send(StreamCommand::Close);
            }
            None => self.stream_ended(None),
        }
    }

    fn connect(&mut self, room: Room) {
        let Some(credential) = self.tokens.current() else {
            self.fail(Some(room), ChatError::NoCredential);
            return;
        };

        if let Some(stale) = self.stream.take() {
            warn!(room = %stale.room.id, "opening a stream while another is live, aborting it");
            stale.task.abort();
        }

        let id = Uuid::new_v4();
        let params = StreamParams::new(&room, &credential);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_stream(
            id,
            self.transport.clone(),
            params,
            command_rx,
            self.envelope_tx.clone(),
            self.config,
        ));

        info!(room = %room.id, stream = %id, "connecting to room");
        self.stream = Some(StreamHandle {
            id,
            room: room.clone(),
            commands: command_tx,
            task,
        });
        self.set_state(ConnectionState::Connecting(room));
    }

    fn fail(&mut self, room: Option<Room>, error: ChatError) {
        let room_id = room.as_ref().map(|r| r.id.clone());
        warn!(room = ?room_id, "failed to open chat stream: {}", error);

        let reason = error.to_string();
        self.emit(ChatEvent::TransportFailed {
            room_id,
            error: reason.clone(),
        });
        self.set_state(ConnectionState::Errored { room, reason });
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        let current = self.stream.as_ref().map(|s| s.id);
        if current != Some(envelope.stream) {
            trace!(stream = %envelope.stream, "ignoring event from retired stream");
            return;
        }

        match envelope.event {
            StreamEvent::Opened => {
                if let ConnectionState::Connecting(room) = self.state.clone() {
                    info!(room = %room.id, "chat stream open");
                    self.set_state(ConnectionState::Open(room));
                }
            }
            StreamEvent::Frame(text) => self.on_frame(&text),
            StreamEvent::Closed => self.stream_ended(None),
            StreamEvent::Failed(e) => self.stream_ended(Some(e)),
        }
    }

    fn on_frame(&mut self, text: &str) {
        let ConnectionState::Open(room) = &self.state else {
            trace!("dropping frame outside the open state");
            return;
        };
        let room_id = room.id.clone();

        let mut batch = match decode_frame(text) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(room = %room_id, "dropping malformed frame: {}", e);
                self.emit(ChatEvent::DecodeFailed {
                    room_id,
                    error: e.to_string(),
                });
                return;
            }
        };

        let received = batch.len();
        batch.retain_mut(|message| {
            if message.room_id.is_empty() {
                message.room_id = room_id.clone();
            }
            message.room_id == room_id
        });
        if batch.len() < received {
            debug!(
                room = %room_id,
                "dropped {} messages addressed to other rooms",
                received - batch.len()
            );
        }

        let merge = self.timeline.merge(batch);
        trace!(room = %room_id, inserted = merge.inserted, "merged frame");
        if merge.inserted == 0 {
            return;
        }
        let event = ChatEvent::Timeline {
            room_id,
            messages: merge.messages.to_vec(),
            inserted: merge.inserted,
            scroll_adjustment: merge.scroll_adjustment,
        };
        self.emit(event);
    }

    fn stream_ended(&mut self, error: Option<ChatError>) {
        self.stream = None;

        match self.state.clone() {
            ConnectionState::Closing(Some(next)) => self.connect(next),
            ConnectionState::Closing(None) => self.set_state(ConnectionState::Idle),
            ConnectionState::Reconnecting(room) => self.connect(room),
            ConnectionState::Open(room) => {
                let reason = error.map_or_else(|| "closed by peer".to_string(), |e| e.to_string());
                warn!(room = %room.id, "chat stream lost: {}", reason);
                self.emit(ChatEvent::ConnectionLost {
                    room_id: room.id.clone(),
                    reason: reason.clone(),
                });
                self.set_state(ConnectionState::Errored {
                    room: Some(room),
                    reason,
                });
            }
            ConnectionState::Connecting(room) => {
                let error = error
                    .unwrap_or_else(|| ChatError::Transport("stream closed while opening".into()));
                self.fail(Some(room), error);
            }
            ConnectionState::Idle | ConnectionState::Errored { .. } => {}
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next.clone());
        debug!(from = ?previous, to = ?next, "connection state");

        self.state_tx.send_replace(next.clone());
        self.emit(ChatEvent::StateChanged(next));

        if let ConnectionState::Open(room) = previous {
            self.timeline.reset();
            self.emit(ChatEvent::TimelineReset { room_id: room.id });
        }
    }

    fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            trace!("chat event receiver dropped");
        }
    }
}

/// Own one live stream: open it, forward its frames, send on request and
/// close it gracefully. Every outcome ends with a `Closed` or `Failed`
/// envelope.
async fn run_stream<T: Transport>(
    id: Uuid,
    transport: Arc<T>,
    params: StreamParams,
    mut commands: mpsc::UnboundedReceiver<StreamCommand>,
    envelopes: mpsc::UnboundedSender<Envelope>,
    config: ConnectionConfig,
) {
    let report = |event: StreamEvent| {
        let _ = envelopes.send(Envelope { stream: id, event });
    };

    let connect = async {
        match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, transport.connect(&params))
                .await
                .unwrap_or_else(|_| Err(ChatError::Timeout)),
            None => transport.connect(&params).await,
        }
    };

    let opened = tokio::select! {
        result = connect => result,
        _ = close_requested(&mut commands) => {
            debug!(room = %params.room_id, "stream abandoned before it opened");
            report(StreamEvent::Closed);
            return;
        }
    };

    let LiveStream {
        mut sink,
        mut frames,
    } = match opened {
        Ok(live) => live,
        Err(e) => {
            report(StreamEvent::Failed(e));
            return;
        }
    };
    report(StreamEvent::Opened);

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    trace!(room = %params.room_id, "frame: {} bytes", text.len());
                    report(StreamEvent::Frame(text));
                }
                Some(Err(e)) => {
                    report(StreamEvent::Failed(e));
                    return;
                }
                None => {
                    report(StreamEvent::Closed);
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(StreamCommand::Send { text, reply }) => {
                    let _ = reply.send(sink.send(text).await);
                }
                Some(StreamCommand::Close) | None => {
                    close_gracefully(&mut sink, &mut frames, config.close_grace).await;
                    debug!(room = %params.room_id, "stream closed");
                    report(StreamEvent::Closed);
                    return;
                }
            },
        }
    }
}

async fn close_requested(commands: &mut mpsc::UnboundedReceiver<StreamCommand>) {
    loop {
        match commands.recv().await {
            Some(StreamCommand::Send { reply, .. }) => {
                let _ = reply.send(Err(ChatError::NotOpen));
            }
            Some(StreamCommand::Close) | None => return,
        }
    }
}

/// Send the close frame, then discard inbound frames until the peer finishes
/// closing or `grace` runs out.
async fn close_gracefully(sink: &mut FrameSink, frames: &mut FrameStream, grace: Duration) {
    let drain = async {
        if let Err(e) = sink.close().await {
            debug!("close frame not sent: {}", e);
            return;
        }
        while let Some(frame) = frames.next().await {
            if let Err(e) = frame {
                debug!("error while closing: {}", e);
                break;
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        debug!("peer did not finish closing within {:?}", grace);
    }
}
