//! Validation errors, flash messages and the shapes they take inside the
//! `errors` prop.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name to every message raised for it.
pub type ValidationErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl FlashLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FlashLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub message: String,
}

impl FlashMessage {
    pub fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Keeps the first message of every field that has one.
pub fn first_messages(errors: &ValidationErrors) -> BTreeMap<String, String> {
    errors
        .iter()
        .filter_map(|(field, messages)| {
            messages
                .first()
                .map(|message| (field.clone(), message.clone()))
        })
        .collect()
}

/// Reads validation errors out of any JSON shape the `errors` prop can take:
/// flat `{field: msg}`, multi `{field: [msg]}` or bagged `{bag: {field: msg}}`.
/// Non-string leaves are ignored.
pub fn normalize_validation_errors(value: &Value) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if let Value::Object(map) = value {
        for (field, nested) in map {
            collect_messages(&mut errors, field, nested);
        }
    }
    errors
}

fn collect_messages(errors: &mut ValidationErrors, field: &str, value: &Value) {
    match value {
        Value::String(message) => {
            errors.insert(field.to_string(), vec![message.clone()]);
        }
        Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect();
            if !messages.is_empty() {
                errors.insert(field.to_string(), messages);
            }
        }
        Value::Object(map) => {
            for (nested_field, nested) in map {
                collect_messages(errors, nested_field, nested);
            }
        }
        _ => {}
    }
}

/// Rewrites the `errors` prop into `{bag: ...}` form for an error-bag request.
///
/// Flat maps become the bag; multi-message maps keep the first message per
/// field; maps that already hold bags are kept and gain an empty `bag` entry
/// when missing; anything else becomes `{bag: {}}`.
pub fn scope_errors_to_bag(errors: Option<Value>, bag: &str) -> Value {
    let Some(Value::Object(map)) = errors else {
        return bagged(bag, Map::new());
    };

    if map.is_empty() || map.values().all(Value::is_string) {
        return bagged(bag, map);
    }

    if map.values().all(Value::is_array) {
        let flat = map
            .into_iter()
            .filter_map(|(field, messages)| {
                let first = messages.as_array()?.first()?.clone();
                Some((field, first))
            })
            .collect();
        return bagged(bag, flat);
    }

    if map.values().all(Value::is_object) {
        let mut map = map;
        map.entry(bag.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        return Value::Object(map);
    }

    bagged(bag, Map::new())
}

fn bagged(bag: &str, errors: Map<String, Value>) -> Value {
    let mut wrapper = Map::new();
    wrapper.insert(bag.to_string(), Value::Object(errors));
    Value::Object(wrapper)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn flat_errors_move_under_the_bag() {
        let scoped = scope_errors_to_bag(Some(json!({"email": "required"})), "login");
        assert_eq!(scoped, json!({"login": {"email": "required"}}));
    }

    #[test]
    fn multi_message_errors_keep_the_first_message() {
        let scoped = scope_errors_to_bag(
            Some(json!({"email": ["required", "invalid"], "name": []})),
            "signup",
        );
        assert_eq!(scoped, json!({"signup": {"email": "required"}}));
    }

    #[test]
    fn bagged_errors_gain_missing_bag() {
        let scoped = scope_errors_to_bag(Some(json!({"other": {"a": "b"}})), "login");
        assert_eq!(scoped, json!({"other": {"a": "b"}, "login": {}}));

        let untouched = scope_errors_to_bag(Some(json!({"login": {"a": "b"}})), "login");
        assert_eq!(untouched, json!({"login": {"a": "b"}}));
    }

    #[test]
    fn empty_or_unknown_shapes_become_empty_bag() {
        assert_eq!(scope_errors_to_bag(None, "x"), json!({"x": {}}));
        assert_eq!(scope_errors_to_bag(Some(json!({})), "x"), json!({"x": {}}));
        assert_eq!(scope_errors_to_bag(Some(json!("oops")), "x"), json!({"x": {}}));
        assert_eq!(
            scope_errors_to_bag(Some(json!({"a": 1, "b": "c"})), "x"),
            json!({"x": {}})
        );
    }

    #[test]
    fn normalisation_reads_every_shape() {
        let errors = normalize_validation_errors(&json!({
            "email": "required",
            "tags": ["too many", 3],
            "login": {"password": "short"}
        }));
        assert_eq!(errors["email"], vec!["required"]);
        assert_eq!(errors["tags"], vec!["too many"]);
        assert_eq!(errors["password"], vec!["short"]);
        assert!(normalize_validation_errors(&Value::Null).is_empty());
    }

    #[test]
    fn first_messages_skips_empty_fields() {
        let mut errors = ValidationErrors::new();
        errors.insert("email".into(), vec!["required".into(), "invalid".into()]);
        errors.insert("name".into(), Vec::new());

        let flat = first_messages(&errors);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["email"], "required");
    }
}
