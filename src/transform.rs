//! Event → warehouse row mapping
//!
//! A [`WarehouseRow`] is the flat column set written to the metrics table,
//! together with its idempotency key. The key is what the warehouse uses to
//! collapse duplicate inserts, so it must only depend on the event itself.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::event::MetricEvent;
use crate::normalize::NormalizationCache;

/// Fixed aggregation window of the upstream collector
pub const COLLECTION_INTERVAL: &str = "60m";

/// Source system recorded when the event carries no tag
pub const DEFAULT_SOURCE_SYSTEM: &str = "Maestro";

/// Column values of one metrics table row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowContent {
    /// Timestamp string exactly as received
    pub event_timestamp: Option<String>,
    /// Event time in epoch seconds, or ingestion time when unparseable
    pub event_epoch: i64,
    /// Always [`COLLECTION_INTERVAL`]
    pub collection_interval: String,
    /// Device host name
    pub device_name: Option<String>,
    /// Device category
    pub device_type: Option<String>,
    /// Not provided by the source; always null
    pub device_ip_address: Option<String>,
    /// Interface name
    pub interface_name: Option<String>,
    /// Canonical metric name
    pub metric_type: String,
    /// Raw counter value, 0 when absent
    pub raw_value: i64,
    /// Derived numeric value
    pub value: Option<f64>,
    /// Metric name as sent by the source
    pub source_metric_type: String,
    /// Originating system
    pub source_system: String,
}

/// A row ready for insertion, keyed for deduplication
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseRow {
    /// Deterministic idempotency key
    pub insert_id: String,
    /// Column values
    pub content: RowContent,
}

/// Turns parsed events into warehouse rows
#[derive(Debug, Clone)]
pub struct RowTransformer {
    cache: Arc<NormalizationCache>,
}

impl RowTransformer {
    /// Create a transformer backed by a loaded normalization cache
    pub fn new(cache: Arc<NormalizationCache>) -> Self {
        Self { cache }
    }

    /// Map an event, using the current time as ingestion time
    pub fn transform(&self, event: &MetricEvent) -> WarehouseRow {
        self.transform_at(event, Utc::now())
    }

    /// Map an event with an explicit ingestion time
    pub fn transform_at(&self, event: &MetricEvent, ingested_at: DateTime<Utc>) -> WarehouseRow {
        let content = RowContent {
            event_timestamp: event.timestamp.clone(),
            event_epoch: event_epoch(event.timestamp.as_deref(), ingested_at),
            collection_interval: COLLECTION_INTERVAL.to_string(),
            device_name: event.device_name.clone(),
            device_type: event.device_type.clone(),
            device_ip_address: None,
            interface_name: event.interface_name.clone(),
            metric_type: self.cache.normalize(&event.parameter_name).to_string(),
            raw_value: event.raw_value.unwrap_or(0),
            value: event.value,
            source_metric_type: event.parameter_name.clone(),
            source_system: event
                .source_system
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE_SYSTEM.to_string()),
        };

        WarehouseRow {
            insert_id: idempotency_key(event),
            content,
        }
    }
}

/// Epoch seconds for a source timestamp
///
/// Accepts RFC 3339 with any offset, then the ISO offset form without seconds
/// (`2024-03-01T10:00Z`), then chrono's relaxed UTC form. Anything else,
/// including a missing timestamp, yields `ingested_at`.
pub fn event_epoch(timestamp: Option<&str>, ingested_at: DateTime<Utc>) -> i64 {
    let Some(ts) = timestamp.map(str::trim).filter(|ts| !ts.is_empty()) else {
        return ingested_at.timestamp();
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
        return parsed.timestamp();
    }
    if let Some(epoch) = parse_minute_precision(ts) {
        return epoch;
    }
    if let Ok(parsed) = ts.parse::<DateTime<Utc>>() {
        return parsed.timestamp();
    }
    ingested_at.timestamp()
}

fn parse_minute_precision(ts: &str) -> Option<i64> {
    if let Some(naive) = ts.strip_suffix(['Z', 'z']) {
        return NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M")
            .ok()
            .map(|dt| dt.and_utc().timestamp());
    }
    DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M%:z")
        .ok()
        .map(|dt| dt.timestamp())
}

/// SHA-256 over `device_name|parameter_name|timestamp|raw_value`, lowercase hex
///
/// Absent parts hash as empty strings.
pub fn idempotency_key(event: &MetricEvent) -> String {
    let raw_value = event.raw_value.map(|v| v.to_string()).unwrap_or_default();
    let material = format!(
        "{}|{}|{}|{}",
        event.device_name.as_deref().unwrap_or(""),
        event.parameter_name,
        event.timestamp.as_deref().unwrap_or(""),
        raw_value
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}
