use crate::models::{
    CanonicalRequest, ChatMessage, ChatPayload, CompletionPayload, Dialect, ModelProfile,
    RawParameters, RawPayload, UpstreamPayload,
};

pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Fixed so callers that supply no system prompt see stable behavior.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const TURN_START: &str = "<|turn_start|>";
pub const TURN_END: &str = "<|turn_end|>";

/// Renders the canonical request into the dialect the resolved profile
/// requires, for the given candidate upstream id.
pub fn translate(req: &CanonicalRequest, profile: &ModelProfile, candidate: &str) -> UpstreamPayload {
    match profile.dialect {
        Dialect::ChatJson => UpstreamPayload::Chat(ChatPayload {
            model: candidate.to_string(),
            messages: req.messages.clone(),
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            stream: req.stream,
        }),
        Dialect::RawTemplate => UpstreamPayload::Raw(RawPayload {
            inputs: render_template(&req.messages),
            parameters: RawParameters {
                max_new_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                return_full_text: false,
                stream: req.stream,
            },
        }),
    }
}

/// Raw-completion payload for the dialect-mismatch fallback: same canonical
/// messages, same model, flattened prompt instead of chat markup.
pub fn completion_fallback(req: &CanonicalRequest, candidate: &str) -> UpstreamPayload {
    UpstreamPayload::Completion(CompletionPayload {
        model: candidate.to_string(),
        prompt: flatten_prompt(&req.messages),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        stream: req.stream,
    })
}

/// Chat-markup encoding for providers with no native concept of turns.
/// A default system turn is prepended when the caller supplied none, and
/// the trailing open assistant marker tells the upstream to generate the
/// continuation.
pub fn render_template(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    if messages.first().map(|m| m.role.as_str()) != Some("system") {
        push_turn(&mut out, "system", DEFAULT_SYSTEM_PROMPT);
    }
    for message in messages {
        push_turn(&mut out, &message.role, &message.content);
    }
    out.push_str(TURN_START);
    out.push_str("assistant\n");
    out
}

fn push_turn(out: &mut String, role: &str, content: &str) {
    out.push_str(TURN_START);
    out.push_str(role);
    out.push('\n');
    out.push_str(content);
    out.push_str(TURN_END);
    out.push('\n');
}

/// Role-labelled line-by-line flattening, used only for the raw-completion
/// fallback where chat markup would confuse a plain completion endpoint.
pub fn flatten_prompt(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(&message.role);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }
    out.push_str("assistant:");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<ChatMessage>) -> CanonicalRequest {
        CanonicalRequest {
            messages,
            model_key: "custom".to_string(),
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    fn profile(dialect: Dialect) -> ModelProfile {
        ModelProfile {
            model_key: "custom".to_string(),
            upstream_id: "acme/private-7b".to_string(),
            dialect,
            endpoint_template: "https://infer.example.com/models/{model}".to_string(),
            requires_auth_header: true,
            fallback_ids: vec![],
        }
    }

    /// Re-parses rendered chat markup back into (role, content) pairs.
    fn parse_turns(rendered: &str) -> Vec<(String, String)> {
        let mut turns = Vec::new();
        let mut rest = rendered;
        while let Some(start) = rest.find(TURN_START) {
            let after = &rest[start + TURN_START.len()..];
            let Some(end) = after.find(TURN_END) else {
                break; // open assistant turn
            };
            let turn = &after[..end];
            let (role, content) = turn.split_once('\n').expect("role line");
            turns.push((role.to_string(), content.to_string()));
            rest = &after[end + TURN_END.len()..];
        }
        turns
    }

    #[test]
    fn chat_json_payload_is_verbatim_with_defaults() {
        let req = request(vec![
            ChatMessage::new("user", "hi"),
            ChatMessage::new("assistant", "hello"),
        ]);
        let payload = translate(&req, &profile(Dialect::ChatJson), "gpt-4o-mini");
        match payload {
            UpstreamPayload::Chat(chat) => {
                assert_eq!(chat.model, "gpt-4o-mini");
                assert_eq!(chat.messages, req.messages);
                assert_eq!(chat.max_tokens, DEFAULT_MAX_TOKENS);
                assert_eq!(chat.temperature, DEFAULT_TEMPERATURE);
                assert!(!chat.stream);
            }
            other => panic!("expected chat payload, got {:?}", other),
        }
    }

    #[test]
    fn chat_json_keeps_caller_tuning() {
        let mut req = request(vec![ChatMessage::new("user", "hi")]);
        req.max_tokens = Some(32);
        req.temperature = Some(0.1);
        req.stream = true;
        match translate(&req, &profile(Dialect::ChatJson), "gpt-4o-mini") {
            UpstreamPayload::Chat(chat) => {
                assert_eq!(chat.max_tokens, 32);
                assert_eq!(chat.temperature, 0.1);
                assert!(chat.stream);
            }
            other => panic!("expected chat payload, got {:?}", other),
        }
    }

    #[test]
    fn raw_template_prepends_default_system_turn() {
        let req = request(vec![ChatMessage::new("user", "hello")]);
        let rendered = render_template(&req.messages);
        assert!(rendered.starts_with(&format!(
            "{}system\n{}{}\n",
            TURN_START, DEFAULT_SYSTEM_PROMPT, TURN_END
        )));
        assert!(rendered.ends_with(&format!("{}assistant\n", TURN_START)));
        let turns = parse_turns(&rendered);
        assert_eq!(turns[0], ("system".to_string(), DEFAULT_SYSTEM_PROMPT.to_string()));
        assert_eq!(turns[1], ("user".to_string(), "hello".to_string()));
    }

    #[test]
    fn raw_template_keeps_caller_system_turn() {
        let messages = vec![
            ChatMessage::new("system", "be terse"),
            ChatMessage::new("user", "hi"),
        ];
        let turns = parse_turns(&render_template(&messages));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], ("system".to_string(), "be terse".to_string()));
    }

    #[test]
    fn template_round_trips_roles_and_content_in_order() {
        let messages = vec![
            ChatMessage::new("system", "sys"),
            ChatMessage::new("user", "first"),
            ChatMessage::new("assistant", "second\nwith newline"),
            ChatMessage::new("user", "third"),
        ];
        let turns = parse_turns(&render_template(&messages));
        let original: Vec<(String, String)> = messages
            .iter()
            .map(|m| (m.role.clone(), m.content.clone()))
            .collect();
        assert_eq!(turns, original);
    }

    #[test]
    fn default_system_turn_is_deterministic() {
        let messages = vec![ChatMessage::new("user", "hello")];
        assert_eq!(render_template(&messages), render_template(&messages));
    }

    #[test]
    fn raw_payload_never_returns_full_text() {
        let req = request(vec![ChatMessage::new("user", "hello")]);
        match translate(&req, &profile(Dialect::RawTemplate), "acme/private-7b") {
            UpstreamPayload::Raw(raw) => {
                assert!(!raw.parameters.return_full_text);
                assert_eq!(raw.parameters.max_new_tokens, DEFAULT_MAX_TOKENS);
            }
            other => panic!("expected raw payload, got {:?}", other),
        }
    }

    #[test]
    fn flattened_prompt_is_line_per_role_not_markup() {
        let req = request(vec![
            ChatMessage::new("system", "sys"),
            ChatMessage::new("user", "hi"),
        ]);
        match completion_fallback(&req, "gpt-3.5-turbo-instruct") {
            UpstreamPayload::Completion(completion) => {
                assert_eq!(completion.prompt, "system: sys\nuser: hi\nassistant:");
                assert!(!completion.prompt.contains(TURN_START));
            }
            other => panic!("expected completion payload, got {:?}", other),
        }
    }
}
