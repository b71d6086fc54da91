use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;
use url::Url;

use parlor_auth::Credential;
use parlor_types::models::Room;

use crate::error::ChatError;

/// Connection parameters for one room's stream.
#[derive(Clone)]
pub struct StreamParams {
    pub room_id: String,
    pub subject_id: String,
    pub display_name: String,
    pub access_token: String,
}

impl StreamParams {
    pub fn new(room: &Room, credential: &Credential) -> Self {
        Self {
            room_id: room.id.clone(),
            subject_id: credential.subject_id().to_string(),
            display_name: credential.display_name(),
            access_token: credential.token().to_string(),
        }
    }
}

impl fmt::Debug for StreamParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamParams")
            .field("room_id", &self.room_id)
            .field("subject_id", &self.subject_id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChatError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// An open stream, split into its outbound and inbound halves.
///
/// The inbound half ends (`None`) when the peer closes the stream.
pub struct LiveStream {
    pub sink: FrameSink,
    pub frames: FrameStream,
}

/// Opens live streams. One call per stream; the connection never asks for a
/// second stream before the previous one has closed.
pub trait Transport: Send + Sync + 'static {
    fn connect(
        &self,
        params: &StreamParams,
    ) -> impl Future<Output = Result<LiveStream, ChatError>> + Send;
}

/// [`Transport`] over the chat service's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base: Url,
}

impl WsTransport {
    /// `chat_url` may be given as http(s); it is mapped to ws(s).
    pub fn new(chat_url: &str) -> Result<Self, ChatError> {
        let mut base = Url::parse(chat_url)?;
        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChatError::Transport(format!(
                    "unsupported chat url scheme: {other}"
                )));
            }
        };
        base.set_scheme(scheme)
            .map_err(|_| ChatError::Transport(format!("cannot use {scheme} for {chat_url}")))?;
        Ok(Self { base })
    }

    /// `{base}/api/chat/rooms/{room}?access_token=…&user_id=…&nickname=…`
    pub fn stream_url(&self, params: &StreamParams) -> Result<Url, ChatError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ChatError::Transport(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["api", "chat", "rooms", params.room_id.as_str()]);
        url.query_pairs_mut()
            .clear()
            .append_pair("access_token", &params.access_token)
            .append_pair("user_id", &params.subject_id)
            .append_pair("nickname", &params.display_name);
        Ok(url)
    }
}

impl Transport for WsTransport {
    async fn connect(&self, params: &StreamParams) -> Result<LiveStream, ChatError> {
        let url = self.stream_url(params)?;
        debug!(room = %params.room_id, "opening WebSocket");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(ChatError::from)
            .with(|text: String| future::ready(Ok::<_, ChatError>(WsMessage::text(text))));

        let frames = stream.filter_map(|message| {
            future::ready(match message {
                Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Binary(data)) => Some(
                    String::from_utf8(data.to_vec())
                        .map_err(|e| ChatError::Transport(format!("binary frame is not UTF-8: {e}"))),
                ),
                Ok(WsMessage::Close(frame)) => {
                    debug!("peer closed stream: {:?}", frame);
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(LiveStream {
            sink: Box::pin(sink),
            frames: Box::pin(frames),
        })
    }
}
