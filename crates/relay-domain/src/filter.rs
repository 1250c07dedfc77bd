use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// A single leaf comparison against a payload field, identified by a
/// dot-separated path (`"data.status"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FieldComparison {
    Equals { path: String, value: Value },
    Contains { path: String, value: String },
    StartsWith { path: String, value: String },
    EndsWith { path: String, value: String },
    Regex { path: String, pattern: String },
    Gt { path: String, value: f64 },
    Lt { path: String, value: f64 },
}

impl FieldComparison {
    fn path(&self) -> &str {
        match self {
            FieldComparison::Equals { path, .. }
            | FieldComparison::Contains { path, .. }
            | FieldComparison::StartsWith { path, .. }
            | FieldComparison::EndsWith { path, .. }
            | FieldComparison::Regex { path, .. }
            | FieldComparison::Gt { path, .. }
            | FieldComparison::Lt { path, .. } => path,
        }
    }

    fn evaluate(&self, payload: &Value) -> bool {
        let Some(field) = resolve_path(payload, self.path()) else {
            return false;
        };
        match self {
            FieldComparison::Equals { value, .. } => field == value,
            FieldComparison::Contains { value, .. } => {
                field.as_str().is_some_and(|s| s.contains(value.as_str()))
            }
            FieldComparison::StartsWith { value, .. } => {
                field.as_str().is_some_and(|s| s.starts_with(value.as_str()))
            }
            FieldComparison::EndsWith { value, .. } => {
                field.as_str().is_some_and(|s| s.ends_with(value.as_str()))
            }
            FieldComparison::Regex { pattern, .. } => regex::Regex::new(pattern)
                .ok()
                .zip(field.as_str())
                .is_some_and(|(re, s)| re.is_match(s)),
            FieldComparison::Gt { value, .. } => field.as_f64().is_some_and(|f| f > *value),
            FieldComparison::Lt { value, .. } => field.as_f64().is_some_and(|f| f < *value),
        }
    }
}

fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |acc, segment| acc.get(segment))
}

/// A compound matching rule: an event-type allow-list, a channel allow-list,
/// and an AND/OR tree of field comparisons, per §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPredicate {
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub condition: Option<FilterCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterCondition {
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
    Compare(FieldComparison),
}

impl FilterCondition {
    fn evaluate(&self, payload: &Value) -> bool {
        match self {
            FilterCondition::And(children) => children.iter().all(|c| c.evaluate(payload)),
            FilterCondition::Or(children) => children.iter().any(|c| c.evaluate(payload)),
            FilterCondition::Compare(cmp) => cmp.evaluate(payload),
        }
    }
}

impl FilterPredicate {
    /// An endpoint matches an event when the event-type and channel
    /// allow-lists (empty means "any") pass, and the condition tree (if
    /// any) evaluates true against the payload.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.iter().any(|t| t == &event.event_type) {
            return false;
        }
        if !self.channels.is_empty() && !self.channels.iter().any(|c| c == &event.channel) {
            return false;
        }
        match &self.condition {
            Some(condition) => condition.evaluate(&event.payload),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_event(event_type: &str, payload: Value) -> Event {
        Event::new(
            Uuid::new_v4(),
            "org:1:orders".into(),
            event_type.into(),
            payload,
            "user-1".into(),
            None,
        )
    }

    #[test]
    fn empty_predicate_matches_everything() {
        let predicate = FilterPredicate {
            event_types: vec![],
            channels: vec![],
            condition: None,
        };
        assert!(predicate.matches(&sample_event("order.created", json!({}))));
    }

    #[test]
    fn event_type_allow_list_filters() {
        let predicate = FilterPredicate {
            event_types: vec!["order.created".into()],
            channels: vec![],
            condition: None,
        };
        assert!(predicate.matches(&sample_event("order.created", json!({}))));
        assert!(!predicate.matches(&sample_event("order.cancelled", json!({}))));
    }

    #[test]
    fn compound_and_or_condition() {
        let predicate = FilterPredicate {
            event_types: vec![],
            channels: vec![],
            condition: Some(FilterCondition::And(vec![
                FilterCondition::Compare(FieldComparison::Equals {
                    path: "status".into(),
                    value: json!("paid"),
                }),
                FilterCondition::Or(vec![
                    FilterCondition::Compare(FieldComparison::Gt {
                        path: "amount".into(),
                        value: 100.0,
                    }),
                    FilterCondition::Compare(FieldComparison::StartsWith {
                        path: "sku".into(),
                        value: "PROMO-".into(),
                    }),
                ]),
            ])),
        };

        assert!(predicate.matches(&sample_event(
            "order.created",
            json!({"status": "paid", "amount": 150.0, "sku": "X"})
        )));
        assert!(predicate.matches(&sample_event(
            "order.created",
            json!({"status": "paid", "amount": 1.0, "sku": "PROMO-1"})
        )));
        assert!(!predicate.matches(&sample_event(
            "order.created",
            json!({"status": "pending", "amount": 150.0, "sku": "X"})
        )));
    }
}
