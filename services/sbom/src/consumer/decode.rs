use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::types::{CodeScanEvent, EVENT_TYPE_CODE_SCAN_DONE, Manifest};
use crate::error::ProcessingError;

/// Current wire shape: typed envelope with the scan payload under `data`.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    project_name: String,
    #[serde(default, deserialize_with = "data_if_present")]
    data: Option<Value>,
}

/// Keeps an explicit `"data": null` distinguishable from a missing key: any
/// present value, null included, selects the envelope branch.
fn data_if_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopePayload {
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    project_id: i64,
    #[serde(default)]
    project: String,
    #[serde(default)]
    project_name: String,
    #[serde(default)]
    findings: Vec<serde_json::Map<String, Value>>,
    #[serde(default)]
    manifests: Vec<Manifest>,
}

/// Pre-envelope producers put the payload fields at the top level, with
/// `timestamp` in place of `occurred_at`.
#[derive(Debug, Deserialize)]
struct LegacyPayload {
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    project_id: i64,
    #[serde(default)]
    project: String,
    #[serde(default)]
    project_name: String,
    #[serde(default)]
    findings: Vec<serde_json::Map<String, Value>>,
    #[serde(default)]
    manifests: Vec<Manifest>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Decode an inbound message, envelope shape first, legacy shape as
/// fallback. Malformed JSON (either shape) is a permanent error.
pub fn decode_code_scan_event(raw: &[u8]) -> Result<CodeScanEvent, ProcessingError> {
    if let Ok(envelope) = serde_json::from_slice::<EventEnvelope>(raw) {
        if !envelope.kind.is_empty() {
            if let Some(data) = envelope.data {
                // Null data still decodes on the envelope path, to an empty
                // payload that required-field validation then rejects.
                let payload: EnvelopePayload = if data.is_null() {
                    EnvelopePayload::default()
                } else {
                    serde_json::from_value(data).map_err(|err| {
                        ProcessingError::permanent(anyhow!("invalid envelope data: {err}"))
                    })?
                };

                let project = [
                    payload.project.trim(),
                    payload.project_name.trim(),
                    envelope.project_name.trim(),
                ]
                .into_iter()
                .find(|candidate| !candidate.is_empty())
                .unwrap_or_default()
                .to_owned();

                let mut event_type = normalize_event_type(&payload.event_type, &envelope.kind);
                if event_type.is_empty() {
                    event_type = EVENT_TYPE_CODE_SCAN_DONE.to_owned();
                }

                return Ok(CodeScanEvent {
                    event_type,
                    project_id: payload.project_id,
                    project,
                    findings: payload.findings,
                    manifests: payload.manifests,
                    timestamp: envelope.occurred_at,
                });
            }
        }
    }

    let legacy: LegacyPayload = serde_json::from_slice(raw)
        .map_err(|err| ProcessingError::permanent(anyhow!("invalid JSON payload: {err}")))?;

    let project = if legacy.project.is_empty() {
        legacy.project_name
    } else {
        legacy.project
    };

    Ok(CodeScanEvent {
        event_type: normalize_event_type(&legacy.event_type, ""),
        project_id: legacy.project_id,
        project,
        findings: legacy.findings,
        manifests: legacy.manifests,
        timestamp: legacy.timestamp,
    })
}

/// Required-field validation. Failures are permanent: retrying the same
/// bytes can never produce the missing fields.
pub fn validate_code_scan_event(event: &CodeScanEvent) -> Result<(), ProcessingError> {
    if event.project_id == 0 {
        return Err(ProcessingError::permanent(anyhow!("missing project_id")));
    }
    if event.project.trim().is_empty() {
        return Err(ProcessingError::permanent(anyhow!("missing project name")));
    }
    if event.event_type.trim().is_empty() {
        return Err(ProcessingError::permanent(anyhow!("missing event_type")));
    }
    Ok(())
}

fn normalize_event_type(primary: &str, fallback: &str) -> String {
    let candidate = primary.trim();
    let candidate = if candidate.is_empty() {
        fallback.trim()
    } else {
        candidate
    };
    candidate.to_uppercase().replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_bytes() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "code.scan.done",
            "version": 1,
            "occurred_at": "2025-01-01T00:00:00Z",
            "project_name": "web",
            "data": {
                "event_type": "CODE_SCAN_DONE",
                "project_id": 42,
                "project": "web",
                "findings": [{"check_id": "x", "severity": "LOW"}],
                "manifests": [{"name": "go.mod", "content": "module x"}],
            },
        }))
        .unwrap()
    }

    #[test]
    fn decodes_envelope_shape() {
        let event = decode_code_scan_event(&envelope_bytes()).unwrap();
        assert_eq!(event.event_type, "CODE_SCAN_DONE");
        assert_eq!(event.project_id, 42);
        assert_eq!(event.project, "web");
        assert_eq!(event.manifests.len(), 1);
        assert_eq!(event.manifests[0].content, "module x");
        assert_eq!(
            event.timestamp.unwrap().to_rfc3339(),
            "2025-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn decodes_legacy_shape() {
        let raw = serde_json::to_vec(&json!({
            "event_type": "code.scan.done",
            "project_id": 7,
            "project_name": "api",
            "findings": [],
            "timestamp": "2025-06-15T10:30:00Z",
        }))
        .unwrap();

        let event = decode_code_scan_event(&raw).unwrap();
        assert_eq!(event.event_type, "CODE_SCAN_DONE");
        assert_eq!(event.project_id, 7);
        assert_eq!(event.project, "api");
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn invalid_json_is_permanent() {
        let err = decode_code_scan_event(b"{not json").unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn invalid_envelope_data_is_permanent() {
        let raw = serde_json::to_vec(&json!({
            "type": "code.scan.done",
            "data": "not an object",
        }))
        .unwrap();
        let err = decode_code_scan_event(&raw).unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn null_envelope_data_takes_the_envelope_branch() {
        // Legacy-looking fields next to an explicit null `data` must not be
        // picked up by the legacy fallback.
        let raw = serde_json::to_vec(&json!({
            "type": "code.scan.done",
            "data": null,
            "event_type": "CODE_SCAN_DONE",
            "project_id": 42,
            "project": "web",
        }))
        .unwrap();

        let event = decode_code_scan_event(&raw).unwrap();
        assert_eq!(event.project_id, 0);
        assert_eq!(event.project, "");
        assert!(validate_code_scan_event(&event).unwrap_err().is_permanent());
    }

    #[test]
    fn missing_envelope_data_falls_back_to_legacy() {
        let raw = serde_json::to_vec(&json!({
            "type": "code.scan.done",
            "event_type": "CODE_SCAN_DONE",
            "project_id": 42,
            "project": "web",
        }))
        .unwrap();

        let event = decode_code_scan_event(&raw).unwrap();
        assert_eq!(event.project_id, 42);
        assert_eq!(event.project, "web");
        assert!(validate_code_scan_event(&event).is_ok());
    }

    #[test]
    fn envelope_project_name_is_the_last_fallback() {
        let raw = serde_json::to_vec(&json!({
            "type": "code.scan.done",
            "project_name": "outer",
            "data": {"project_id": 3},
        }))
        .unwrap();
        let event = decode_code_scan_event(&raw).unwrap();
        assert_eq!(event.project, "outer");
    }

    #[test]
    fn empty_envelope_event_type_defaults_to_code_scan_done() {
        let raw = serde_json::to_vec(&json!({
            "type": "   ",
            "data": {"project_id": 3, "project": "web"},
        }))
        .unwrap();
        // Whitespace `type` passes the envelope guard but normalizes to
        // empty, so the envelope default kicks in.
        let event = decode_code_scan_event(&raw).unwrap();
        assert_eq!(event.event_type, "CODE_SCAN_DONE");

        let raw = serde_json::to_vec(&json!({
            "type": "code.scan.done",
            "data": {"event_type": "", "project_id": 3, "project": "web"},
        }))
        .unwrap();
        let event = decode_code_scan_event(&raw).unwrap();
        assert_eq!(event.event_type, "CODE_SCAN_DONE");
    }

    #[test]
    fn normalization_uppercases_and_maps_dots() {
        assert_eq!(normalize_event_type("code.scan.done", ""), "CODE_SCAN_DONE");
        assert_eq!(normalize_event_type("  ", "code.scan.done"), "CODE_SCAN_DONE");
        assert_eq!(normalize_event_type("custom_event", ""), "CUSTOM_EVENT");
    }

    #[test]
    fn validation_requires_project_id_name_and_type() {
        let mut event = decode_code_scan_event(&envelope_bytes()).unwrap();
        assert!(validate_code_scan_event(&event).is_ok());

        event.project_id = 0;
        assert!(validate_code_scan_event(&event).unwrap_err().is_permanent());

        let mut event = decode_code_scan_event(&envelope_bytes()).unwrap();
        event.project = "  ".to_owned();
        assert!(validate_code_scan_event(&event).is_err());

        let mut event = decode_code_scan_event(&envelope_bytes()).unwrap();
        event.event_type = String::new();
        assert!(validate_code_scan_event(&event).is_err());
    }
}
