//! Webhook Template Layer (§4.7): a fixed, read-only table of named
//! templates. Adding a template is a code change, not a runtime operation —
//! this is deliberately not backed by a general templating crate, since the
//! only operation needed is literal `{{VAR}}` substitution into a JSON
//! skeleton.

use once_cell::sync::Lazy;
use regex::Regex;
use relay_common::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TemplateVariable {
    pub name: &'static str,
    pub required: bool,
    pub validation: Option<&'static str>,
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct WebhookTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub config_skeleton: &'static str,
    pub variables: &'static [TemplateVariable],
    pub example_payloads: &'static [&'static str],
}

pub static TEMPLATES: Lazy<Vec<WebhookTemplate>> = Lazy::new(|| {
    vec![
        WebhookTemplate {
            id: "slack-notification",
            name: "Slack incoming webhook",
            description: "Posts a plain-text message to a Slack channel via an incoming webhook URL.",
            config_skeleton: r#"{"url":"{{SLACK_WEBHOOK_URL}}","method":"POST","headers":{"Content-Type":"application/json"}}"#,
            variables: &[TemplateVariable {
                name: "SLACK_WEBHOOK_URL",
                required: true,
                validation: Some(r"^https://hooks\.slack\.com/services/.+$"),
                default: None,
            }],
            example_payloads: &[r#"{"text":"event fired"}"#],
        },
        WebhookTemplate {
            id: "generic-json",
            name: "Generic JSON POST",
            description: "A plain JSON POST to an arbitrary URL with an optional bearer token.",
            config_skeleton: r#"{"url":"{{TARGET_URL}}","method":"POST","headers":{"Authorization":"Bearer {{BEARER_TOKEN}}"}}"#,
            variables: &[
                TemplateVariable {
                    name: "TARGET_URL",
                    required: true,
                    validation: Some(r"^https?://.+$"),
                    default: None,
                },
                TemplateVariable {
                    name: "BEARER_TOKEN",
                    required: false,
                    validation: None,
                    default: Some(""),
                },
            ],
            example_payloads: &[r#"{"event":"example"}"#],
        },
    ]
});

pub fn find(id: &str) -> Option<&'static WebhookTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

pub fn list() -> &'static [WebhookTemplate] {
    &TEMPLATES
}

impl WebhookTemplate {
    /// Substitute `{{VAR}}` tokens in the skeleton with caller-supplied
    /// values, falling back to each variable's default, and failing with
    /// `Invalid` on a missing required variable or a value that doesn't pass
    /// its regex validation.
    pub fn instantiate(&self, values: &HashMap<String, String>) -> Result<Value> {
        let mut rendered = self.config_skeleton.to_string();

        for variable in self.variables {
            let value = values
                .get(variable.name)
                .map(String::as_str)
                .or(variable.default)
                .ok_or_else(|| Error::Invalid {
                    reason: format!("missing required template variable {}", variable.name),
                })?;

            if variable.required && value.is_empty() {
                return Err(Error::Invalid {
                    reason: format!("required template variable {} is empty", variable.name),
                });
            }

            if let Some(pattern) = variable.validation {
                let re = Regex::new(pattern).map_err(|e| Error::Invalid {
                    reason: format!("template {} has an invalid validation pattern: {e}", self.id),
                })?;
                if !value.is_empty() && !re.is_match(value) {
                    return Err(Error::Invalid {
                        reason: format!("{} does not match required format", variable.name),
                    });
                }
            }

            rendered = rendered.replace(&format!("{{{{{}}}}}", variable.name), value);
        }

        serde_json::from_str(&rendered).map_err(Error::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiates_with_all_required_values() {
        let template = find("slack-notification").unwrap();
        let mut values = HashMap::new();
        values.insert(
            "SLACK_WEBHOOK_URL".into(),
            "https://hooks.slack.com/services/T000/B000/xxx".into(),
        );
        let config = template.instantiate(&values).unwrap();
        assert_eq!(config["url"], "https://hooks.slack.com/services/T000/B000/xxx");
    }

    #[test]
    fn missing_required_variable_is_invalid() {
        let template = find("slack-notification").unwrap();
        let err = template.instantiate(&HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }

    #[test]
    fn validation_regex_rejects_bad_value() {
        let template = find("slack-notification").unwrap();
        let mut values = HashMap::new();
        values.insert("SLACK_WEBHOOK_URL".into(), "https://evil.example.com".into());
        let err = template.instantiate(&values).unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }

    #[test]
    fn optional_variable_falls_back_to_default() {
        let template = find("generic-json").unwrap();
        let mut values = HashMap::new();
        values.insert("TARGET_URL".into(), "https://example.com/hook".into());
        let config = template.instantiate(&values).unwrap();
        assert_eq!(config["headers"]["Authorization"], "Bearer ");
    }
}
