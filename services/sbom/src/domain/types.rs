use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::SbomServiceError;

/// Inbound topic carrying upstream scan-completion events.
pub const CODE_SCAN_TOPIC: &str = "code-scan-results";

/// Sideline topic for inbound messages that cannot be processed.
pub const CODE_SCAN_DLQ_TOPIC: &str = "code-scan-results.dlq";

/// Consumer-group id for the scan consumer; partition assignment across
/// replicas comes from the broker.
pub const CODE_SCAN_CONSUMER_GROUP: &str = "sbom-code-scan-consumer";

/// Outbound topic for SBOM lifecycle and warning events.
pub const SBOM_EVENTS_TOPIC: &str = "sbom-events";

/// The one inbound event type this service acts on.
pub const EVENT_TYPE_CODE_SCAN_DONE: &str = "CODE_SCAN_DONE";

/// Usage-accounting resource name reserved per generated SBOM.
pub const SBOM_UPLOAD_RESOURCE: &str = "sbom_upload";

/// Source tag for SBOM rows derived from scan events.
pub const SBOM_SOURCE_AUTO_CODE_SCAN: &str = "auto-code-scan";

/// Publish attempts after which an outbox row becomes terminally `failed`.
pub const MAX_OUTBOX_ATTEMPTS: i32 = 12;

/// Outbox payload: JSON values are marshalled on insert, raw bytes pass
/// through (and must themselves be valid JSON for the jsonb column).
#[derive(Debug, Clone)]
pub enum OutboxPayload {
    Raw(Vec<u8>),
    Json(Value),
}

impl OutboxPayload {
    pub fn into_json(self) -> Result<Value, SbomServiceError> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Raw(bytes) => serde_json::from_slice(&bytes)
                .map_err(|_| SbomServiceError::InvalidOutboxMessage("payload is not valid JSON")),
        }
    }
}

/// What producers hand to the outbox for asynchronous delivery.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub topic: String,
    pub event_type: Option<String>,
    pub key: Option<String>,
    pub payload: OutboxPayload,
    pub headers: HashMap<String, String>,
    /// When set, a unique constraint collapses duplicate inserts silently.
    pub dedup_key: Option<String>,
}

impl OutboxMessage {
    pub fn validate(&self) -> Result<(), SbomServiceError> {
        if self.topic.is_empty() {
            return Err(SbomServiceError::InvalidOutboxMessage(
                "topic must not be empty",
            ));
        }
        match &self.payload {
            OutboxPayload::Json(Value::Null) => Err(SbomServiceError::InvalidOutboxMessage(
                "payload must not be null",
            )),
            OutboxPayload::Raw(bytes) if bytes.is_empty() => Err(
                SbomServiceError::InvalidOutboxMessage("payload must not be empty"),
            ),
            _ => Ok(()),
        }
    }
}

/// Outbox row owned by a dispatcher between claim and finalisation.
#[derive(Debug, Clone)]
pub struct ClaimedOutboxEvent {
    pub id: Uuid,
    pub topic: String,
    pub event_key: Option<String>,
    pub event_type: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub attempts: i32,
}

/// Source-code manifest embedded in a scan event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
}

/// Normalised inbound scan-completion event (envelope and legacy wire
/// shapes both decode into this).
#[derive(Debug, Clone)]
pub struct CodeScanEvent {
    pub event_type: String,
    pub project_id: i64,
    pub project: String,
    pub findings: Vec<serde_json::Map<String, Value>>,
    pub manifests: Vec<Manifest>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// CycloneDX document produced by the manifest parser.
#[derive(Debug, Clone)]
pub struct ParsedSbom {
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub format: String,
    pub data: Vec<u8>,
}

/// Outcome of one `check_and_consume_usage` round-trip.
#[derive(Debug, Clone)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub message: String,
    pub next_reset: Option<DateTime<Utc>>,
}

/// SBOM document to persist, upsert-keyed by `(project_name, manifest_name)`.
#[derive(Debug, Clone, Copy)]
pub struct NewSbomRecord<'a> {
    pub project_id: i64,
    pub project_name: &'a str,
    pub manifest_name: &'a str,
    pub sbom_json: &'a [u8],
    pub source: &'a str,
    pub object_url: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertedSbom {
    pub id: Uuid,
    pub outcome: UpsertOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_rejects_empty_topic() {
        let msg = OutboxMessage {
            topic: String::new(),
            event_type: None,
            key: None,
            payload: OutboxPayload::Json(json!({"ok": true})),
            headers: HashMap::new(),
            dedup_key: None,
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn validate_rejects_null_payload() {
        let msg = OutboxMessage {
            topic: "sbom-events".to_owned(),
            event_type: None,
            key: None,
            payload: OutboxPayload::Json(Value::Null),
            headers: HashMap::new(),
            dedup_key: None,
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn validate_accepts_json_payload() {
        let msg = OutboxMessage {
            topic: "sbom-events".to_owned(),
            event_type: Some("sbom.batch_created".to_owned()),
            key: Some("project-42".to_owned()),
            payload: OutboxPayload::Json(json!({"project_id": 42})),
            headers: HashMap::new(),
            dedup_key: Some("sbom-batch:42:2025-01-01T00:00:00Z".to_owned()),
        };
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn raw_payload_passes_through_as_json() {
        let payload = OutboxPayload::Raw(br#"{"a":1}"#.to_vec());
        assert_eq!(payload.into_json().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn raw_payload_must_be_valid_json() {
        let payload = OutboxPayload::Raw(b"not json".to_vec());
        assert!(payload.into_json().is_err());
    }
}
