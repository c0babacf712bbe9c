use serde::{Deserialize, Serialize};

/// A single conversation turn.
///
/// `role` is passed through untouched; the backend decides which roles it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /chat`.
///
/// Only used to shape-check the inbound payload. The proxy forwards the
/// original bytes, so fields not declared here still reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation turns in order.
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Shape-check a raw request body.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// JSON body of every error produced by the proxy itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_order() {
        let body = br#"{"messages":[
            {"role":"system","content":"be brief"},
            {"role":"user","content":"hi"},
            {"role":"assistant","content":"hello"}
        ]}"#;

        let request = ChatRequest::parse(body).unwrap();
        let roles: Vec<_> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
    }

    #[test]
    fn test_parse_accepts_unknown_role_and_extra_fields() {
        let body = br#"{"messages":[{"role":"narrator","content":"x","name":"n"}],"temperature":0.2}"#;
        let request = ChatRequest::parse(body).unwrap();
        assert_eq!(request.messages[0].role, "narrator");
    }

    #[test]
    fn test_parse_empty_messages() {
        let request = ChatRequest::parse(br#"{"messages":[]}"#).unwrap();
        assert!(request.messages.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        assert!(ChatRequest::parse(br#"{"messages":[{"role":"user"}]}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_non_string_content() {
        assert!(ChatRequest::parse(br#"{"messages":[{"role":"user","content":42}]}"#).is_err());
    }
}
