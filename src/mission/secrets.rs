//! `${secrets.NAME}` substitution.
//!
//! Secrets are never interpolated into a commander or agent's prompt by
//! name-to-value lookup the way `{{vars.*}}` is. Instead the prompt carries
//! only the secret's name and description; the literal `${secrets.NAME}`
//! placeholder is substituted with the real value at tool-call time, just
//! before the call leaves the process, so it is never logged or echoed back
//! by the model.

use std::collections::HashMap;

use crate::types::SecretValue;

/// A secret registered with the runtime: its name and description are safe
/// to put in a prompt, its value is not.
#[derive(Clone)]
pub struct SecretDeclaration {
    pub name: String,
    pub description: String,
    pub value: SecretValue,
}

/// The set of secrets available to a mission's tasks.
#[derive(Clone, Default)]
pub struct SecretRegistry {
    secrets: HashMap<String, SecretDeclaration>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, secret: SecretDeclaration) {
        self.secrets.insert(secret.name.clone(), secret);
    }

    /// Names and descriptions only, suitable for injection into a system
    /// prompt so the model knows which `${secrets.NAME}` placeholders exist.
    pub fn prompt_catalog(&self) -> Vec<(String, String)> {
        let mut catalog: Vec<_> = self
            .secrets
            .values()
            .map(|s| (s.name.clone(), s.description.clone()))
            .collect();
        catalog.sort_by(|a, b| a.0.cmp(&b.0));
        catalog
    }

    /// Replace every `${secrets.NAME}` occurrence in `text` with the
    /// registered secret's rendered value. Unknown names are left verbatim.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            match rest.find("${secrets.") {
                None => {
                    out.push_str(rest);
                    break;
                }
                Some(start) => {
                    out.push_str(&rest[..start]);
                    let after = &rest[start + "${secrets.".len()..];
                    match after.find('}') {
                        None => {
                            out.push_str(&rest[start..]);
                            break;
                        }
                        Some(end) => {
                            let name = &after[..end];
                            match self.secrets.get(name) {
                                Some(secret) => {
                                    out.push_str(&render(secret.value.reveal()));
                                }
                                None => {
                                    out.push_str("${secrets.");
                                    out.push_str(name);
                                    out.push('}');
                                }
                            }
                            rest = &after[end + 1..];
                        }
                    }
                }
            }
        }
        out
    }
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_one() -> SecretRegistry {
        let mut registry = SecretRegistry::new();
        registry.register(SecretDeclaration {
            name: "api_key".to_string(),
            description: "the upstream API key".to_string(),
            value: SecretValue::new(json!("sk-test-123")),
        });
        registry
    }

    #[test]
    fn substitutes_a_known_secret() {
        let registry = registry_with_one();
        let out = registry.substitute("Authorization: Bearer ${secrets.api_key}");
        assert_eq!(out, "Authorization: Bearer sk-test-123");
    }

    #[test]
    fn leaves_unknown_secret_verbatim() {
        let registry = registry_with_one();
        let out = registry.substitute("${secrets.missing}");
        assert_eq!(out, "${secrets.missing}");
    }

    #[test]
    fn prompt_catalog_never_exposes_values() {
        let registry = registry_with_one();
        let catalog = registry.prompt_catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].0, "api_key");
        assert_eq!(catalog[0].1, "the upstream API key");
    }
}
