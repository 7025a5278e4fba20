use std::collections::HashMap;

use crate::config::ModelsConfig;
use crate::models::{Dialect, ModelProfile};

/// Read-only logical-model table, built once at startup. Lookup never
/// fails: unknown keys degrade to the configured default profile so an
/// unfamiliar model name never breaks a caller.
#[derive(Clone, Debug)]
pub struct ModelTable {
    profiles: HashMap<String, ModelProfile>,
    default_key: String,
}

impl ModelTable {
    pub fn from_config(models: &ModelsConfig) -> Self {
        let profiles = models
            .profiles
            .iter()
            .map(|(key, profile)| {
                let dialect = match profile.dialect.as_deref() {
                    Some("chat_json") => Dialect::ChatJson,
                    Some("raw_template") => Dialect::RawTemplate,
                    _ => infer_dialect(&profile.upstream_id),
                };
                (
                    key.clone(),
                    ModelProfile {
                        model_key: key.clone(),
                        upstream_id: profile.upstream_id.clone(),
                        dialect,
                        endpoint_template: profile.endpoint.clone(),
                        requires_auth_header: profile.requires_auth_header,
                        fallback_ids: profile.fallback_ids.clone(),
                    },
                )
            })
            .collect();
        Self {
            profiles,
            default_key: models.default.clone(),
        }
    }

    pub fn resolve(&self, model_key: &str) -> &ModelProfile {
        self.profiles
            .get(model_key)
            .unwrap_or_else(|| &self.profiles[&self.default_key])
    }
}

/// Namespaced identifiers ("org/model") denote custom or private models
/// with no native chat API; bare identifiers are public chat models.
fn infer_dialect(upstream_id: &str) -> Dialect {
    if upstream_id.contains('/') {
        Dialect::RawTemplate
    } else {
        Dialect::ChatJson
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;

    fn table() -> ModelTable {
        let mut profiles = HashMap::new();
        profiles.insert(
            "chat-default".to_string(),
            ProfileConfig {
                upstream_id: "gpt-4o-mini".to_string(),
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                dialect: None,
                requires_auth_header: true,
                fallback_ids: vec![],
            },
        );
        profiles.insert(
            "custom".to_string(),
            ProfileConfig {
                upstream_id: "acme/private-7b".to_string(),
                endpoint: "https://infer.example.com/models/{model}".to_string(),
                dialect: None,
                requires_auth_header: true,
                fallback_ids: vec!["acme/private-7b-v2".to_string()],
            },
        );
        ModelTable::from_config(&ModelsConfig {
            default: "chat-default".to_string(),
            profiles,
        })
    }

    #[test]
    fn known_key_resolves() {
        let table = table();
        assert_eq!(table.resolve("custom").upstream_id, "acme/private-7b");
    }

    #[test]
    fn unknown_key_degrades_to_default() {
        let table = table();
        let profile = table.resolve("never-heard-of-it");
        assert_eq!(profile.model_key, "chat-default");
    }

    #[test]
    fn dialect_inferred_from_id_shape() {
        let table = table();
        assert_eq!(table.resolve("chat-default").dialect, Dialect::ChatJson);
        assert_eq!(table.resolve("custom").dialect, Dialect::RawTemplate);
    }

    #[test]
    fn explicit_dialect_wins_over_inference() {
        let mut profiles = HashMap::new();
        profiles.insert(
            "odd".to_string(),
            ProfileConfig {
                upstream_id: "bare-id".to_string(),
                endpoint: "https://x/{model}".to_string(),
                dialect: Some("raw_template".to_string()),
                requires_auth_header: false,
                fallback_ids: vec![],
            },
        );
        let table = ModelTable::from_config(&ModelsConfig {
            default: "odd".to_string(),
            profiles,
        });
        assert_eq!(table.resolve("odd").dialect, Dialect::RawTemplate);
    }

    #[test]
    fn candidates_keep_order() {
        let table = table();
        let ids: Vec<&str> = table.resolve("custom").candidates().collect();
        assert_eq!(ids, vec!["acme/private-7b", "acme/private-7b-v2"]);
    }
}
