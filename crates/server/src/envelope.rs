//! Response envelope
//!
//! Wire types for the chat API. Field names are legacy-stable: clients
//! parse `SlotInfo.original_text` and friends verbatim, so the structs
//! here never rename. Error payloads are sanitized through a keyword
//! denylist before serialization; user-visible strings only ever come
//! from the fixed per-code map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use task_router_core::{ErrorDetail, InboundContext, SlotMap};
use task_router_engine::TurnOutcome;

/// Chat turn request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub input: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

/// Transient request context, merged over the session for one turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
    #[serde(default)]
    pub client_system_id: Option<String>,
    #[serde(default)]
    pub request_trace_id: Option<String>,
    #[serde(default)]
    pub business_context: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub temp_preferences: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl RequestContext {
    pub fn into_inbound(self) -> InboundContext {
        let device = self.device_info.unwrap_or_default();
        InboundContext {
            device_platform: device.platform,
            user_agent: device.user_agent,
            ip_address: device.ip_address,
            language: device.language,
            location: self.location,
            client_system_id: self.client_system_id,
            request_trace_id: self.request_trace_id,
            business_context: self.business_context.unwrap_or_default(),
            temp_preferences: self.temp_preferences.unwrap_or_default(),
        }
    }
}

/// One slot in the response (legacy field names preserved verbatim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotInfo {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    pub is_validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

pub fn slots_to_wire(slots: &SlotMap) -> BTreeMap<String, SlotInfo> {
    slots
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                SlotInfo {
                    value: value.final_text(),
                    confidence: Some(value.confidence),
                    source: value.source.as_str().to_string(),
                    original_text: Some(value.raw_text.clone()),
                    is_validated: value.is_valid(),
                    validation_error: value.error.clone(),
                },
            )
        })
        .collect()
}

/// Successful chat payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatData {
    pub response: String,
    pub session_id: String,
    pub conversation_turn: u32,
    pub intent: Option<String>,
    pub confidence: f32,
    pub slots: BTreeMap<String, SlotInfo>,
    pub status: task_router_engine::ReplyStatus,
    pub response_type: task_router_engine::ResponseKind,
    pub next_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_slots: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguous_intents: Option<Vec<task_router_engine::AmbiguousIntent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl ChatData {
    pub fn from_outcome(outcome: TurnOutcome, session_id: &str) -> Self {
        fn none_if_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
            if items.is_empty() {
                None
            } else {
                Some(items)
            }
        }
        Self {
            response: outcome.reply,
            session_id: session_id.to_string(),
            conversation_turn: outcome.turn_index + 1,
            intent: outcome.intent,
            confidence: outcome.confidence,
            slots: slots_to_wire(&outcome.slots),
            status: outcome.status,
            response_type: outcome.response_kind,
            next_action: outcome.next_action,
            missing_slots: none_if_empty(outcome.missing_slots),
            validation_errors: if outcome.validation_errors.is_empty() {
                None
            } else {
                Some(outcome.validation_errors)
            },
            ambiguous_intents: none_if_empty(outcome.ambiguous_intents),
            api_result: outcome.api_result,
            suggestions: none_if_empty(outcome.suggestions),
        }
    }
}

/// The success envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: T,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, request_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "ok".to_string(),
            data,
            error: None,
            timestamp: Utc::now(),
            request_id: request_id.into(),
        }
    }
}

/// The failure envelope (§ error contract): user-safe message, sanitized
/// details, operator metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    pub error: ErrorBody,
    pub metadata: ErrorMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub category: String,
    pub severity: task_router_core::ErrorSeverity,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMetadata {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub processing_time_ms: u64,
}

impl ErrorEnvelope {
    pub fn from_detail(
        detail: &ErrorDetail,
        request_id: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        let details = sanitize(serde_json::to_value(&detail.context).unwrap_or_default());
        Self {
            success: false,
            message: detail.user_message().to_string(),
            error: ErrorBody {
                code: detail.code.as_str().to_string(),
                category: detail.category.as_str().to_string(),
                severity: detail.severity,
                details,
                remediation: detail.remediation.clone(),
            },
            metadata: ErrorMetadata {
                timestamp: Utc::now(),
                request_id: request_id.into(),
                processing_time_ms,
            },
        }
    }
}

/// Keys whose values never leave the process.
const DENYLIST: [&str; 9] = [
    "password",
    "passwd",
    "token",
    "secret",
    "api_key",
    "apikey",
    "authorization",
    "cookie",
    "credential",
];

/// Recursively blank out denylisted keys before serialization.
pub fn sanitize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(key, inner)| {
                    let lowered = key.to_lowercase();
                    if DENYLIST.iter().any(|d| lowered.contains(d)) {
                        (key, serde_json::Value::String("***".to_string()))
                    } else {
                        (key, sanitize(inner))
                    }
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sanitize).collect())
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_router_core::{ErrorCode, NormalizedValue, SlotValue};

    #[test]
    fn test_sanitize_denylist_recursive() {
        let value = serde_json::json!({
            "user": "u1",
            "password": "hunter2",
            "nested": { "api_key": "sk-123", "city": "北京" },
            "list": [{ "Authorization": "Bearer x" }]
        });
        let clean = sanitize(value);
        assert_eq!(clean["password"], "***");
        assert_eq!(clean["nested"]["api_key"], "***");
        assert_eq!(clean["nested"]["city"], "北京");
        assert_eq!(clean["list"][0]["Authorization"], "***");
    }

    #[test]
    fn test_error_envelope_uses_fixed_message() {
        let detail = task_router_core::ErrorDetail::new(
            ErrorCode::Storage,
            "pool exhausted at 10.0.0.3:9042",
        );
        let envelope = ErrorEnvelope::from_detail(&detail, "req-1", 12);
        assert!(!envelope.success);
        // The operator message never reaches the user-facing field.
        assert!(!envelope.message.contains("10.0.0.3"));
        assert_eq!(envelope.error.code, "E6000");
        assert_eq!(envelope.metadata.request_id, "req-1");
    }

    #[test]
    fn test_slot_wire_names() {
        let mut slots = SlotMap::new();
        let mut value = SlotValue::extracted("departure_city", "北京", 0.9);
        value.set_valid(NormalizedValue::Text("北京".to_string()));
        slots.insert(value);

        let wire = slots_to_wire(&slots);
        let json = serde_json::to_value(wire.get("departure_city").unwrap()).unwrap();
        assert_eq!(json["value"], "北京");
        assert_eq!(json["source"], "user_input");
        assert_eq!(json["is_validated"], true);
        assert_eq!(json["original_text"], "北京");
        assert!(json.get("validation_error").is_none());
    }

    #[test]
    fn test_chat_request_parses_full_context() {
        let raw = serde_json::json!({
            "user_id": "u1",
            "input": "我想订机票",
            "session_id": "s1",
            "context": {
                "device_info": { "platform": "ios", "ip_address": "1.2.3.4" },
                "request_trace_id": "trace-9",
                "temp_preferences": { "time_pressure": 0.8 }
            }
        });
        let request: ChatRequest = serde_json::from_value(raw).unwrap();
        let inbound = request.context.unwrap().into_inbound();
        assert_eq!(inbound.device_platform.as_deref(), Some("ios"));
        assert_eq!(inbound.request_trace_id.as_deref(), Some("trace-9"));
        assert_eq!(
            inbound.temp_preferences.get("time_pressure").unwrap(),
            &serde_json::json!(0.8)
        );
    }
}
