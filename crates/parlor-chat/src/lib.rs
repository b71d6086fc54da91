//! The live chat stream and the message timeline it feeds.
//!
//! [`ChatConnection`] keeps exactly one stream open for the selected room,
//! and [`MessageTimeline`] keeps that room's messages ordered and unique.

pub mod connection;
pub mod error;
pub mod frame;
pub mod timeline;
pub mod transport;

pub use connection::{ChatConnection, ConnectionConfig};
pub use error::ChatError;
pub use frame::decode_frame;
pub use timeline::{ByteExtent, ContentMeasure, Merge, MessageTimeline};
pub use transport::{LiveStream, StreamParams, Transport, WsTransport};
