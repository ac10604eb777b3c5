use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use teloxide::types::Update;

/// Inbound bot update as delivered to the webhook.
///
/// Only `update_id` is interpreted; every other field is carried untouched so the
/// bot pipeline can decode it with the full update schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    pub update_id: i64,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl UpdateEnvelope {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn into_update(self) -> Result<Update, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_unknown_fields() {
        let envelope =
            UpdateEnvelope::parse(br#"{"update_id": 7, "message": {"text": "hi"}}"#).unwrap();
        assert_eq!(envelope.update_id, 7);
        assert!(envelope.body.contains_key("message"));
    }

    #[test]
    fn rejects_non_envelopes() {
        assert!(UpdateEnvelope::parse(b"not json").is_err());
        assert!(UpdateEnvelope::parse(b"[1, 2]").is_err());
        assert!(UpdateEnvelope::parse(br#"{"message": {}}"#).is_err());
        assert!(UpdateEnvelope::parse(br#"{"update_id": "seven"}"#).is_err());
    }
}
