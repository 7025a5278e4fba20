use serde::{Deserialize, Serialize};

/// One conversational turn. Order inside a request is conversation order
/// and is preserved end-to-end.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// The single internal representation of a chat call, independent of the
/// client payload shape. Built once per inbound request, immutable after.
#[derive(Clone, Debug)]
pub struct CanonicalRequest {
    pub messages: Vec<ChatMessage>,
    pub model_key: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Structured chat JSON (OpenAI-style `messages` array).
    ChatJson,
    /// One flattened prompt string rendered with turn delimiters.
    RawTemplate,
}

/// Read-only description of one logical model, built once at startup.
#[derive(Clone, Debug)]
pub struct ModelProfile {
    pub model_key: String,
    pub upstream_id: String,
    pub dialect: Dialect,
    pub endpoint_template: String,
    pub requires_auth_header: bool,
    pub fallback_ids: Vec<String>,
}

impl ModelProfile {
    /// Candidate upstream identifiers in invocation order: the primary id
    /// followed by any configured alternates.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.upstream_id.as_str())
            .chain(self.fallback_ids.iter().map(String::as_str))
    }
}

/// Audit record of one upstream invocation try.
#[derive(Clone, Debug, Serialize)]
pub struct UpstreamAttempt {
    pub candidate_id: String,
    pub dialect: Dialect,
    pub http_status: Option<u16>,
    pub raw_body: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UpstreamPayload {
    Chat(ChatPayload),
    Raw(RawPayload),
    Completion(CompletionPayload),
}

impl UpstreamPayload {
    pub fn is_chat(&self) -> bool {
        matches!(self, UpstreamPayload::Chat(_))
    }
}

/// ChatJson dialect request body.
#[derive(Debug, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// RawTemplate dialect request body.
#[derive(Debug, Serialize)]
pub struct RawPayload {
    pub inputs: String,
    pub parameters: RawParameters,
}

#[derive(Debug, Serialize)]
pub struct RawParameters {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub return_full_text: bool,
    pub stream: bool,
}

/// Legacy completion body used when a ChatJson upstream rejects the model
/// as "not a chat model".
#[derive(Debug, Serialize)]
pub struct CompletionPayload {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}
