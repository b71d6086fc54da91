use serde_json::Value;

use parlor_types::models::Message;

use crate::error::ChatError;

/// Decode an inbound text frame: either one message object or an array of
/// them (the history batch sent right after connecting).
pub fn decode_frame(text: &str) -> Result<Vec<Message>, ChatError> {
    let value: Value = serde_json::from_str(text)?;
    let messages: Vec<Message> = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_message() {
        let batch = decode_frame(
            r#"{"id":"m1","room_id":"r1","user_id":"u1","message":"hi","time_created":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "hi");
        assert_eq!(batch[0].room_id, "r1");
    }

    #[test]
    fn batch_keeps_wire_order() {
        let batch = decode_frame(
            r#"[
                {"id":"b","user_id":"u1","message":"second","time_created":"2024-05-01T10:00:01Z"},
                {"id":"a","user_id":"u1","message":"first","time_created":"2024-05-01T10:00:00Z"}
            ]"#,
        )
        .unwrap();
        let ids: Vec<_> = batch.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn empty_batch_is_fine() {
        assert!(decode_frame("[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(decode_frame("{oops"), Err(ChatError::Decode(_))));
        assert!(matches!(decode_frame(r#"{"id":"m1"}"#), Err(ChatError::Decode(_))));
        assert!(matches!(decode_frame(r#""just text""#), Err(ChatError::Decode(_))));
        assert!(matches!(
            decode_frame(r#"[{"id":"m1","user_id":"u","message":"x","time_created":"yesterday"}]"#),
            Err(ChatError::Decode(_))
        ));
    }
}
