//! Broker messages and the metric events decoded from them
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A message as delivered by the broker, before any decoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key, if any
    pub key: Option<Vec<u8>>,
    /// Message payload, if any
    pub payload: Option<Vec<u8>>,
}

impl RawMessage {
    /// Create a message with a payload and no key
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: Some(payload.into()),
        }
    }
}

/// One device metric reading
///
/// Every field except `parameter_name` is optional on the wire; defaults are
/// applied when the event is turned into a warehouse row, not here. Unknown
/// keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Device category
    #[serde(default)]
    pub device_type: Option<String>,
    /// Device host name
    #[serde(default)]
    pub device_name: Option<String>,
    /// Interface the reading belongs to
    #[serde(default)]
    pub interface_name: Option<String>,
    /// Source-specific parameter name, normalized later
    pub parameter_name: String,
    /// Raw counter value
    #[serde(default)]
    pub raw_value: Option<i64>,
    /// Derived numeric value
    #[serde(default)]
    pub value: Option<f64>,
    /// Reading timestamp as sent by the source
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Topic tag stamped by the upstream collector
    #[serde(rename = "1data-kafka-topic-name", default)]
    pub kafka_topic: Option<String>,
    /// Source system tag stamped by the upstream collector
    #[serde(rename = "1data-source-system", default)]
    pub source_system: Option<String>,
}

/// Decode one broker message into a [`MetricEvent`]
pub fn parse_event(message: &RawMessage) -> Result<MetricEvent, ParseError> {
    let payload = message.payload.as_deref().ok_or(ParseError::EmptyPayload {
        partition: message.partition,
        offset: message.offset,
    })?;

    serde_json::from_slice(payload).map_err(|source| ParseError::Malformed {
        partition: message.partition,
        offset: message.offset,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(payload: &str) -> RawMessage {
        RawMessage::new("metrics", 0, 17, payload)
    }

    #[test]
    fn test_parse_full_event() {
        let event = parse_event(&message(
            r#"{
                "device_type": "router",
                "device_name": "edge-01",
                "interface_name": "ge-0/0/1",
                "parameter_name": "ifInOctets",
                "raw_value": 123456,
                "value": 12.5,
                "timestamp": "2024-03-01T10:00:00Z",
                "1data-kafka-topic-name": "metrics",
                "1data-source-system": "Collector"
            }"#,
        ))
        .unwrap();

        assert_eq!(event.device_name.as_deref(), Some("edge-01"));
        assert_eq!(event.parameter_name, "ifInOctets");
        assert_eq!(event.raw_value, Some(123456));
        assert_eq!(event.value, Some(12.5));
        assert_eq!(event.kafka_topic.as_deref(), Some("metrics"));
        assert_eq!(event.source_system.as_deref(), Some("Collector"));
    }

    #[test]
    fn test_parse_minimal_event() {
        let event = parse_event(&message(r#"{"parameter_name": "cpu", "extra": [1, 2]}"#)).unwrap();
        assert_eq!(event.parameter_name, "cpu");
        assert_eq!(event.device_name, None);
        assert_eq!(event.raw_value, None);
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = parse_event(&message("{not json")).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { offset: 17, .. }));
    }

    #[test]
    fn test_parse_rejects_type_mismatch() {
        let err = parse_event(&message(r#"{"parameter_name": "cpu", "raw_value": "12"}"#)).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_parameter_name() {
        assert!(parse_event(&message(r#"{"device_name": "edge-01"}"#)).is_err());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(parse_event(&message("[1, 2, 3]")).is_err());
        assert!(parse_event(&message("null")).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_payload() {
        let mut msg = message("{}");
        msg.payload = None;
        let err = parse_event(&msg).unwrap_err();
        assert!(matches!(err, ParseError::EmptyPayload { partition: 0, offset: 17 }));
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        let msg = RawMessage::new("metrics", 1, 5, vec![0xff, 0xfe, 0x00]);
        assert!(parse_event(&msg).is_err());
    }
}
