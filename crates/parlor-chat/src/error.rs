use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid stream address: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("no credential to open the stream with")]
    NoCredential,

    #[error("connection is not open")]
    NotOpen,

    #[error("message body is empty")]
    EmptyMessage,

    #[error("timed out opening stream")]
    Timeout,

    #[error("chat connection has shut down")]
    Shutdown,
}
