//! CDP Protocol Envelope
//!
//! Request/response/event framing shared by every domain.
//! Domain payloads live with the crates that interpret them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ProtocolError>,
}

/// Error object carried in a failed response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl CDPEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
            session_id: None,
        }
    }

    /// Domain prefix of the method ("DOM" for "DOM.setChildNodes")
    pub fn domain(&self) -> &str {
        self.method
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.method)
    }
}

/// Unified CDP Message (response or event)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

/// Target Info from Target.getTargetInfo
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetInfo {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub url: String,
    pub attached: bool,
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Result of Target.getTargets
#[derive(Debug, Clone, Deserialize)]
pub struct GetTargetsResult {
    #[serde(rename = "targetInfos")]
    pub target_infos: Vec<TargetInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_discriminates_response_and_event() {
        let response: CDPMessage =
            serde_json::from_value(json!({ "id": 7, "result": { "nodeId": 3 } })).unwrap();
        assert!(matches!(response, CDPMessage::Response(r) if r.id == 7));

        let event: CDPMessage = serde_json::from_value(json!({
            "method": "DOM.documentUpdated",
            "params": {},
            "sessionId": "S1"
        }))
        .unwrap();
        match event {
            CDPMessage::Event(e) => {
                assert_eq!(e.domain(), "DOM");
                assert_eq!(e.session_id.as_deref(), Some("S1"));
            }
            _ => panic!("Expected event"),
        }
    }

    #[test]
    fn test_error_response() {
        let msg: CDPMessage = serde_json::from_value(json!({
            "id": 1,
            "error": { "code": -32000, "message": "Could not find node with given id" }
        }))
        .unwrap();
        match msg {
            CDPMessage::Response(r) => {
                let error = r.error.unwrap();
                assert_eq!(error.code, -32000);
            }
            _ => panic!("Expected response"),
        }
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let request = CDPRequest {
            id: 1,
            method: "Tracing.getCategories".to_string(),
            params: None,
            session_id: None,
        };
        let text = serde_json::to_string(&request).unwrap();
        assert_eq!(text, r#"{"id":1,"method":"Tracing.getCategories"}"#);
    }
}
