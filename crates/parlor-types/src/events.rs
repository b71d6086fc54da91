use serde::{Deserialize, Serialize};

use crate::models::{Message, Room};

/// Lifecycle of the single live chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting(Room),
    Open(Room),
    /// Waiting for the current stream to close; then connect to the room, if any.
    Closing(Option<Room>),
    Reconnecting(Room),
    Errored {
        room: Option<Room>,
        reason: String,
    },
}

impl ConnectionState {
    /// Room the state is bound to, or heading for.
    pub fn room(&self) -> Option<&Room> {
        match self {
            Self::Idle => None,
            Self::Connecting(room) | Self::Open(room) | Self::Reconnecting(room) => Some(room),
            Self::Closing(next) => next.as_ref(),
            Self::Errored { room, .. } => room.as_ref(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Events surfaced by the chat connection to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    StateChanged(ConnectionState),

    /// The timeline for the open room changed.
    Timeline {
        room_id: String,
        messages: Vec<Message>,
        inserted: usize,
        /// Change in rendered content extent; add to the scroll offset to keep
        /// a bottom-anchored viewport still.
        scroll_adjustment: i64,
    },

    /// The timeline was emptied because the stream left `Open`.
    TimelineReset { room_id: String },

    /// An inbound frame could not be decoded and was dropped.
    DecodeFailed { room_id: String, error: String },

    /// The open stream closed without being asked to.
    ConnectionLost { room_id: String, reason: String },

    /// Opening a stream failed.
    TransportFailed {
        room_id: Option<String>,
        error: String,
    },
}

/// Authentication status of the process-wide session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    LoggedOut,
    Active,
    /// Refresh failed; the user must log in again.
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_reports_next_room() {
        let next = Room::new("b", "Bravo");
        assert_eq!(
            ConnectionState::Closing(Some(next.clone())).room(),
            Some(&next)
        );
        assert_eq!(ConnectionState::Closing(None).room(), None);
    }

    #[test]
    fn events_are_adjacently_tagged() {
        let event = ChatEvent::ConnectionLost {
            room_id: "a".into(),
            reason: "eof".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ConnectionLost");
        assert_eq!(json["data"]["room_id"], "a");
    }
}
