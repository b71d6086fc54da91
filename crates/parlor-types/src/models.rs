use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A chat message as delivered by the live stream.
///
/// The chat service's field names differ from ours, hence the aliases.
/// `room_id` may be absent on the wire; the connection stamps it with the
/// room of the stream the frame arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "message_id")]
    pub id: String,
    #[serde(default, alias = "roomId")]
    pub room_id: String,
    #[serde(alias = "user_id", alias = "userId")]
    pub sender_id: String,
    #[serde(default, alias = "nickname", skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(alias = "message", alias = "text")]
    pub body: String,
    #[serde(alias = "time_created", alias = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Timeline ordering key: creation time, ties broken by id.
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }

    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_chat_service_field_names() {
        let msg: Message = serde_json::from_str(
            r#"{
                "id": "m1",
                "user_id": "u1",
                "nickname": "Ada_Lovelace",
                "message": "hello",
                "time_created": "2024-05-01T10:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(msg.sender_id, "u1");
        assert_eq!(msg.sender_name.as_deref(), Some("Ada_Lovelace"));
        assert_eq!(msg.body, "hello");
        assert!(msg.room_id.is_empty());
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let at = "2024-05-01T10:00:00Z".parse().unwrap();
        let a = Message {
            id: "y".into(),
            room_id: "r".into(),
            sender_id: "u".into(),
            sender_name: None,
            body: String::new(),
            created_at: at,
        };
        let b = Message { id: "z".into(), ..a.clone() };

        assert_eq!(a.cmp_order(&b), Ordering::Less);
    }
}
