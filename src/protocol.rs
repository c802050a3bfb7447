//! Wire protocol for the subscriber connection.
//!
//! Inbound control messages arrive as JSON text frames and are checked
//! against a fixed schema before they reach the subscription handler.
//! Outbound traffic is one of three shapes: a sensor-list update, an
//! acknowledgment, or an error notice.

use crate::registry::{SensorRecord, SensorRegistry};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// The only resource class this simulator serves.
pub const SUBSCRIPTION_TARGET: &str = "heatpump";

/// Rejection of an inbound control message.
///
/// The `Display` text of each variant is exactly what goes back to the peer
/// in an `{"error": ...}` reply.
#[derive(ThisError, Debug)]
pub enum ValidationError {
    #[error("Malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid message type: {0}")]
    InvalidType(String),

    #[error("Invalid subscription target")]
    InvalidTarget,
}

/// What a validated control message asks the handler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// A control message that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub action: ControlAction,
    /// Replacement fleet carried by the message, if any. Already applied to
    /// the registry by the time the message is returned.
    pub list: Option<Vec<SensorRecord>>,
}

#[derive(Deserialize)]
struct RawControl {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    list: Option<Vec<SensorRecord>>,
}

/// Parse and validate a raw control payload.
///
/// When the message carries a non-null `list`, the shared registry is
/// wholesale-replaced with it before the message is returned. The side
/// effect is deliberate: seeding the fleet and subscribing to it is a single
/// round trip, so validation here is not a pure function.
pub fn validate(
    payload: &str,
    registry: &SensorRegistry,
) -> Result<ControlMessage, ValidationError> {
    let raw: RawControl = serde_json::from_str(payload)?;

    let action = match raw.kind.as_str() {
        "subscribe" => ControlAction::Subscribe,
        "unsubscribe" => ControlAction::Unsubscribe,
        other => return Err(ValidationError::InvalidType(other.to_string())),
    };

    if raw.target.as_deref() != Some(SUBSCRIPTION_TARGET) {
        return Err(ValidationError::InvalidTarget);
    }

    if let Some(list) = &raw.list {
        registry.replace(list.clone());
    }

    Ok(ControlMessage {
        action,
        list: raw.list,
    })
}

/// Messages pushed to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    SensorsList {
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "dateTime")]
        date_time: String,
        list: Vec<SensorRecord>,
    },
    Ack {
        ack: bool,
    },
    Error {
        error: String,
    },
}

impl OutboundMessage {
    /// A sensor-list update stamped with the current time.
    pub fn sensors_list(list: Vec<SensorRecord>) -> Self {
        OutboundMessage::SensorsList {
            kind: "sensors_list".to_string(),
            date_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            list,
        }
    }

    pub fn ack() -> Self {
        OutboundMessage::Ack { ack: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            error: message.into(),
        }
    }

    /// Wire encoding of this message.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{SensorState, default_fleet};

    fn registry() -> SensorRegistry {
        SensorRegistry::new(default_fleet())
    }

    #[test]
    fn test_valid_subscribe() {
        let msg = validate(
            r#"{"type":"subscribe","target":"heatpump","list":null}"#,
            &registry(),
        )
        .unwrap();
        assert_eq!(msg.action, ControlAction::Subscribe);
        assert!(msg.list.is_none());
    }

    #[test]
    fn test_valid_unsubscribe() {
        let msg = validate(
            r#"{"type":"unsubscribe","target":"heatpump"}"#,
            &registry(),
        )
        .unwrap();
        assert_eq!(msg.action, ControlAction::Unsubscribe);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let err = validate("", &registry()).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = validate(
            r#"{"type":"resubscribe","target":"heatpump"}"#,
            &registry(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid message type: resubscribe");
    }

    #[test]
    fn test_wrong_target_rejected() {
        let err = validate(
            r#"{"type":"subscribe","target":"thermostat"}"#,
            &registry(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid subscription target");
    }

    #[test]
    fn test_missing_target_rejected() {
        let err = validate(r#"{"type":"subscribe"}"#, &registry()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTarget));
    }

    #[test]
    fn test_list_replaces_registry() {
        let registry = registry();
        let msg = validate(
            r#"{"type":"subscribe","target":"heatpump","list":[{"type":"heatpump","name":"seeded","state":-1,"temperature":7.5}]}"#,
            &registry,
        )
        .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "seeded");
        assert_eq!(snapshot[0].state, SensorState::Error);
        assert_eq!(msg.list.as_deref(), Some(snapshot.as_slice()));
    }

    #[test]
    fn test_invalid_message_leaves_registry_untouched() {
        let registry = registry();
        let before = registry.snapshot();
        let _ = validate(
            r#"{"type":"subscribe","target":"thermostat","list":[{"type":"heatpump","name":"x","state":0,"temperature":0.0}]}"#,
            &registry,
        )
        .unwrap_err();
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_outbound_shapes() {
        let ack = serde_json::to_value(OutboundMessage::ack()).unwrap();
        assert_eq!(ack, serde_json::json!({"ack": true}));

        let error = serde_json::to_value(OutboundMessage::error("boom")).unwrap();
        assert_eq!(error, serde_json::json!({"error": "boom"}));

        let update = OutboundMessage::sensors_list(default_fleet());
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "sensors_list");
        assert!(json["dateTime"].is_string());
        assert_eq!(json["list"].as_array().unwrap().len(), default_fleet().len());
    }
}
