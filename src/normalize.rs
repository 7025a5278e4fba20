use serde_json::Value;

use crate::error::AppError;
use crate::models::{CanonicalRequest, ChatMessage};

/// Legacy single-prompt fields accepted in priority order when no
/// `messages` array is present.
const PROMPT_FIELDS: &[&str] = &["input", "inputs", "prompt", "message"];

/// Builds the canonical request from an untyped client body.
///
/// A non-empty `messages` array wins; otherwise the first non-empty legacy
/// prompt field is synthesized into a single user message. A body that can
/// produce no message at all is a terminal validation failure, so nothing
/// empty ever reaches the upstream invoker.
pub fn normalize_request(body: &Value, default_model: &str) -> Result<CanonicalRequest, AppError> {
    let messages = extract_messages(body)?;

    let model_key = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_model)
        .to_string();

    Ok(CanonicalRequest {
        messages,
        model_key,
        max_tokens: body
            .get("max_tokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        temperature: body
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|v| v as f32),
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn extract_messages(body: &Value) -> Result<Vec<ChatMessage>, AppError> {
    if let Some(items) = body.get("messages").and_then(Value::as_array) {
        if !items.is_empty() {
            return Ok(items
                .iter()
                .map(|item| ChatMessage {
                    role: item
                        .get("role")
                        .and_then(Value::as_str)
                        .unwrap_or("user")
                        .to_string(),
                    content: coerce_to_string(item.get("content")),
                })
                .collect());
        }
    }

    for field in PROMPT_FIELDS {
        if let Some(value) = body.get(*field) {
            let content = coerce_to_string(Some(value));
            if !content.is_empty() {
                return Ok(vec![ChatMessage::new("user", content)]);
            }
        }
    }

    Err(AppError::invalid_request(
        "request contains no messages and no prompt field",
    ))
}

/// Non-string content is stringified, never dropped.
fn coerce_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_array_passes_through_in_order() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "bye"}
            ],
            "model": "chat-default"
        });
        let req = normalize_request(&body, "fallback").expect("normalize");
        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[0].role, "system");
        assert_eq!(req.messages[3].content, "bye");
        assert_eq!(req.model_key, "chat-default");
        assert!(!req.stream);
    }

    #[test]
    fn missing_role_defaults_to_user() {
        let body = json!({"messages": [{"content": "hi"}]});
        let req = normalize_request(&body, "d").expect("normalize");
        assert_eq!(req.messages[0].role, "user");
    }

    #[test]
    fn non_string_content_is_stringified_not_dropped() {
        let body = json!({"messages": [
            {"role": "user", "content": {"nested": true}},
            {"role": "user", "content": 42}
        ]});
        let req = normalize_request(&body, "d").expect("normalize");
        assert_eq!(req.messages[0].content, r#"{"nested":true}"#);
        assert_eq!(req.messages[1].content, "42");
    }

    #[test]
    fn legacy_prompt_field_becomes_single_user_message() {
        for field in ["input", "inputs", "prompt", "message"] {
            let body = json!({ field: "hello there" });
            let req = normalize_request(&body, "d").expect("normalize");
            assert_eq!(req.messages, vec![ChatMessage::new("user", "hello there")]);
        }
    }

    #[test]
    fn empty_body_is_invalid_request() {
        let err = normalize_request(&json!({}), "d").expect_err("should fail");
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidRequest);
    }

    #[test]
    fn empty_messages_array_falls_back_to_prompt() {
        let body = json!({"messages": [], "prompt": "hi"});
        let req = normalize_request(&body, "d").expect("normalize");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].content, "hi");
    }

    #[test]
    fn empty_prompt_string_is_invalid() {
        let err = normalize_request(&json!({"prompt": ""}), "d").expect_err("should fail");
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidRequest);
    }

    #[test]
    fn absent_model_defaults() {
        let body = json!({"prompt": "hi"});
        let req = normalize_request(&body, "chat-default").expect("normalize");
        assert_eq!(req.model_key, "chat-default");
    }

    #[test]
    fn tuning_fields_pass_through() {
        let body = json!({"prompt": "hi", "max_tokens": 64, "temperature": 0.2, "stream": true});
        let req = normalize_request(&body, "d").expect("normalize");
        assert_eq!(req.max_tokens, Some(64));
        assert_eq!(req.temperature, Some(0.2));
        assert!(req.stream);
    }
}
