use serde_json::Value;

use crate::models::Dialect;
use crate::translate::{TURN_END, TURN_START};

/// Provider artifacts stripped from raw-dialect output before it reaches
/// the caller.
const CONTROL_TOKENS: &[&str] = &[
    TURN_START,
    TURN_END,
    "<|im_start|>",
    "<|im_end|>",
    "<|assistant|>",
    "<|endoftext|>",
    "</s>",
];

/// Produces the canonical `response` value for a buffered upstream body.
///
/// Extraction failure is not an error: when no known path matches, the
/// parsed body (or the body string itself when it is not JSON) is returned
/// unmodified as a degraded but successful result.
pub fn normalize_response(raw_body: &str, dialect: Dialect) -> Value {
    let parsed: Value = match serde_json::from_str(raw_body) {
        Ok(value) => value,
        Err(_) => return Value::String(raw_body.to_string()),
    };
    match extract_text(&parsed) {
        Some(text) => match dialect {
            Dialect::RawTemplate => Value::String(sanitize(&text)),
            Dialect::ChatJson => Value::String(text),
        },
        None => parsed,
    }
}

/// Ordered extraction paths over the shapes providers are known to return.
pub fn extract_text(body: &Value) -> Option<String> {
    if let Some(text) = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return Some(text.to_string());
    }
    if let Some(text) = body.pointer("/choices/0/text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    if let Some(text) = body.get("generated_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    if let Some(text) = body
        .pointer("/0/generated_text")
        .and_then(Value::as_str)
    {
        return Some(text.to_string());
    }
    if let Some(text) = body.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    body.as_str().map(str::to_string)
}

/// Removes control tokens to a fixed point, strips leading Markdown heading
/// markers, and trims. Idempotent: sanitizing clean text changes nothing.
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let before = out.len();
        for token in CONTROL_TOKENS {
            if out.contains(token) {
                out = out.replace(token, "");
            }
        }
        if out.len() == before {
            break;
        }
    }
    // stripping a heading run can expose another one ("# # title"), so
    // strip to a fixed point; the result never begins with '#' or space
    let mut rest = out.trim();
    loop {
        let stripped = rest.trim_start_matches('#').trim_start();
        if stripped.len() == rest.len() {
            break;
        }
        rest = stripped;
    }
    rest.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_json_message_content_wins() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}, "text": "nope"}]
        });
        assert_eq!(extract_text(&body), Some("hi".to_string()));
    }

    #[test]
    fn completion_text_path() {
        let body = json!({"choices": [{"text": "completion"}]});
        assert_eq!(extract_text(&body), Some("completion".to_string()));
    }

    #[test]
    fn generated_text_bare_and_array_forms() {
        assert_eq!(
            extract_text(&json!({"generated_text": "raw"})),
            Some("raw".to_string())
        );
        assert_eq!(
            extract_text(&json!([{"generated_text": "first"}, {"generated_text": "second"}])),
            Some("first".to_string())
        );
    }

    #[test]
    fn output_text_and_bare_string() {
        assert_eq!(
            extract_text(&json!({"output_text": "out"})),
            Some("out".to_string())
        );
        assert_eq!(extract_text(&json!("just text")), Some("just text".to_string()));
    }

    #[test]
    fn unknown_shape_degrades_to_parsed_body() {
        let raw = r#"{"weird":{"shape":1}}"#;
        let out = normalize_response(raw, Dialect::ChatJson);
        assert_eq!(out, json!({"weird": {"shape": 1}}));
    }

    #[test]
    fn non_json_body_becomes_string_response() {
        let out = normalize_response("plain bytes", Dialect::ChatJson);
        assert_eq!(out, Value::String("plain bytes".to_string()));
    }

    #[test]
    fn raw_dialect_output_is_sanitized() {
        let raw = json!({"generated_text": "## Answer<|turn_end|>"}).to_string();
        let out = normalize_response(&raw, Dialect::RawTemplate);
        assert_eq!(out, Value::String("Answer".to_string()));
    }

    #[test]
    fn chat_dialect_output_is_not_sanitized() {
        let raw = json!({"choices": [{"message": {"content": "# Heading"}}]}).to_string();
        let out = normalize_response(&raw, Dialect::ChatJson);
        assert_eq!(out, Value::String("# Heading".to_string()));
    }

    #[test]
    fn sanitize_strips_tokens_and_heading_markers() {
        assert_eq!(sanitize("<|turn_start|>assistant\nhi</s>"), "assistant\nhi");
        assert_eq!(sanitize("### Title"), "Title");
        assert_eq!(sanitize("  padded  "), "padded");
    }

    #[test]
    fn sanitize_strips_repeated_heading_runs() {
        assert_eq!(sanitize("# # title"), "title");
        assert_eq!(sanitize("#\n#x"), "x");
        assert_eq!(sanitize("# ## # deep"), "deep");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "plain",
            "## Heading",
            "# # title",
            "#\n#x",
            "# ## # deep",
            "<|turn_end|>tail",
            "<|turn_<|turn_start|>start|>nested",
            "  # <|im_end|> mixed  ",
            "",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {:?}", input);
        }
    }
}
