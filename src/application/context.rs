//! Per-request state accumulated while a handler runs: context-level props,
//! view data, page metadata and the lazy prop memo.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::error::PropError;
use crate::domain::page::{ScrollPropConfig, push_unique};
use crate::domain::props::{LazyProp, Prop, Props};
use crate::domain::protocol::{PROP_ERRORS, PROP_FLASH, PROP_OLD};
use crate::domain::validation::{FlashLevel, FlashMessage, ValidationErrors, first_messages};

#[derive(Debug, Default)]
pub struct RequestContext {
    props: Props,
    view_data: BTreeMap<String, Value>,
    match_props_on: Vec<String>,
    scroll_props: BTreeMap<String, ScrollPropConfig>,
    encrypt_history: Option<bool>,
    clear_history: bool,
    lazy_memo: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn view_data(&self) -> &BTreeMap<String, Value> {
        &self.view_data
    }

    pub fn with_prop(&mut self, key: impl Into<String>, prop: impl Into<Prop>) -> &mut Self {
        self.props.insert(key.into(), prop.into());
        self
    }

    pub fn with_lazy_prop(&mut self, key: impl Into<String>, lazy: LazyProp) -> &mut Self {
        self.with_prop(key, Prop::Lazy(lazy))
    }

    /// Serialises `value` into view data for the root template.
    pub fn with_view_data<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, PropError> {
        self.view_data
            .insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Merges field errors into the flat `errors` prop. A non-flat existing
    /// value is replaced.
    pub fn with_errors<I, K, V>(&mut self, errors: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut current = self.string_map(PROP_ERRORS);
        for (field, message) in errors {
            current.insert(field.into(), Value::String(message.into()));
        }
        self.props
            .insert(PROP_ERRORS.to_string(), Prop::Value(Value::Object(current)));
        self
    }

    pub fn with_error(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        let field: String = field.into();
        let message: String = message.into();
        self.with_errors([(field, message)])
    }

    /// Adds the first message of every field.
    pub fn with_validation_errors(&mut self, errors: &ValidationErrors) -> &mut Self {
        if errors.is_empty() {
            return self;
        }
        self.with_errors(first_messages(errors))
    }

    pub fn with_flash(&mut self, level: FlashLevel, message: impl Into<String>) -> &mut Self {
        let mut flash = self.string_map(PROP_FLASH);
        flash.insert(level.as_str().to_string(), Value::String(message.into()));
        self.props
            .insert(PROP_FLASH.to_string(), Prop::Value(Value::Object(flash)));
        self
    }

    pub fn with_flash_messages<'a, I>(&mut self, messages: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a FlashMessage>,
    {
        for message in messages {
            self.with_flash(message.level, message.message.clone());
        }
        self
    }

    pub fn with_flash_success(&mut self, message: impl Into<String>) -> &mut Self {
        self.with_flash(FlashLevel::Success, message)
    }

    pub fn with_flash_info(&mut self, message: impl Into<String>) -> &mut Self {
        self.with_flash(FlashLevel::Info, message)
    }

    pub fn with_flash_warning(&mut self, message: impl Into<String>) -> &mut Self {
        self.with_flash(FlashLevel::Warning, message)
    }

    pub fn with_flash_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.with_flash(FlashLevel::Error, message)
    }

    /// Echoes submitted input back to the next page as the `old` prop.
    pub fn with_old_input(&mut self, input: Map<String, Value>) -> &mut Self {
        self.props
            .insert(PROP_OLD.to_string(), Prop::Value(Value::Object(input)));
        self
    }

    pub fn with_match_props_on<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            if !key.trim().is_empty() {
                push_unique(&mut self.match_props_on, key);
            }
        }
        self
    }

    /// Attaches a scroll descriptor without wrapping the prop itself.
    pub fn with_scroll_prop(&mut self, key: impl Into<String>, config: ScrollPropConfig) -> &mut Self {
        self.scroll_props.insert(key.into(), config);
        self
    }

    pub fn encrypt_history(&mut self, encrypt: bool) -> &mut Self {
        self.encrypt_history = Some(encrypt);
        self
    }

    pub fn clear_history(&mut self) -> &mut Self {
        self.clear_history = true;
        self
    }

    pub fn match_props_on(&self) -> &[String] {
        &self.match_props_on
    }

    pub fn scroll_props(&self) -> &BTreeMap<String, ScrollPropConfig> {
        &self.scroll_props
    }

    pub fn encrypt_history_override(&self) -> Option<bool> {
        self.encrypt_history
    }

    pub fn clears_history(&self) -> bool {
        self.clear_history
    }

    /// Protocol props worth carrying across a redirect, as one JSON object.
    pub fn flash_payload(&self) -> Option<Value> {
        let payload: Map<String, Value> = [PROP_ERRORS, PROP_OLD, PROP_FLASH]
            .into_iter()
            .filter_map(|key| {
                let value = self.props.get(key)?.as_value()?;
                let non_empty = value.as_object().is_some_and(|map| !map.is_empty());
                non_empty.then(|| (key.to_string(), value.clone()))
            })
            .collect();
        (!payload.is_empty()).then_some(Value::Object(payload))
    }

    /// Restores protocol props flashed by the previous request. Values of the
    /// wrong shape are ignored, and props already set on this request win.
    pub fn restore_flashed(&mut self, payload: &Value) {
        let Some(map) = payload.as_object() else {
            return;
        };

        for key in [PROP_FLASH, PROP_ERRORS] {
            match map.get(key) {
                Some(Value::Object(values))
                    if !values.is_empty() && values.values().all(Value::is_string) =>
                {
                    self.restore_prop(key, Value::Object(values.clone()));
                }
                _ => {}
            }
        }

        match map.get(PROP_OLD) {
            Some(Value::Object(values)) if !values.is_empty() => {
                self.restore_prop(PROP_OLD, Value::Object(values.clone()));
            }
            _ => {}
        }
    }

    fn restore_prop(&mut self, key: &str, value: Value) {
        self.props
            .entry(key.to_string())
            .or_insert(Prop::Value(value));
    }

    fn string_map(&self, key: &str) -> Map<String, Value> {
        match self.props.get(key).and_then(Prop::as_value) {
            Some(Value::Object(map)) if map.values().all(Value::is_string) => map.clone(),
            _ => Map::new(),
        }
    }

    /// Context props alongside the lazy memo, borrowed together for a build.
    pub(crate) fn split_for_build(&mut self) -> (&Props, &mut HashMap<String, Value>) {
        (&self.props, &mut self.lazy_memo)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn value_of(ctx: &RequestContext, key: &str) -> Value {
        ctx.props()
            .get(key)
            .and_then(Prop::as_value)
            .cloned()
            .expect("plain prop")
    }

    #[test]
    fn errors_merge_into_flat_map() {
        let mut ctx = RequestContext::new();
        ctx.with_error("email", "required");
        ctx.with_errors([("name", "too short")]);
        ctx.with_error("email", "invalid");

        assert_eq!(
            value_of(&ctx, "errors"),
            json!({"email": "invalid", "name": "too short"})
        );
    }

    #[test]
    fn non_flat_errors_are_replaced() {
        let mut ctx = RequestContext::new();
        ctx.with_prop("errors", json!({"email": ["a", "b"]}));
        ctx.with_error("name", "required");

        assert_eq!(value_of(&ctx, "errors"), json!({"name": "required"}));
    }

    #[test]
    fn validation_errors_keep_first_message() {
        let mut ctx = RequestContext::new();
        let mut errors = ValidationErrors::new();
        errors.insert("email".into(), vec!["required".into(), "invalid".into()]);
        ctx.with_validation_errors(&errors);

        assert_eq!(value_of(&ctx, "errors"), json!({"email": "required"}));
    }

    #[test]
    fn flash_levels_accumulate() {
        let mut ctx = RequestContext::new();
        ctx.with_flash_success("saved").with_flash_warning("check input");

        assert_eq!(
            value_of(&ctx, "flash"),
            json!({"success": "saved", "warning": "check input"})
        );
    }

    #[test]
    fn match_props_on_skips_blanks_and_duplicates() {
        let mut ctx = RequestContext::new();
        ctx.with_match_props_on(["id", "", "id", "slug"]);
        assert_eq!(ctx.match_props_on(), ["id", "slug"]);
    }

    #[test]
    fn flash_payload_round_trips_into_next_request() {
        let mut first = RequestContext::new();
        first.with_error("email", "required").with_flash_error("failed");
        first.with_old_input(Map::from_iter([("email".to_string(), json!("a@b"))]));
        first.with_prop("users", json!([1, 2]));

        let payload = first.flash_payload().expect("payload");
        assert!(payload.get("users").is_none());

        let mut next = RequestContext::new();
        next.with_flash_info("already here");
        next.restore_flashed(&payload);

        assert_eq!(value_of(&next, "errors"), json!({"email": "required"}));
        assert_eq!(value_of(&next, "old"), json!({"email": "a@b"}));
        assert_eq!(value_of(&next, "flash"), json!({"info": "already here"}));
    }

    #[test]
    fn malformed_flash_shapes_are_ignored() {
        let mut ctx = RequestContext::new();
        ctx.restore_flashed(&json!({"errors": {"email": ["a"]}, "flash": "nope", "old": []}));
        assert!(ctx.props().is_empty());

        ctx.restore_flashed(&json!("not an object"));
        assert!(ctx.props().is_empty());
    }

    #[test]
    fn empty_context_has_no_flash_payload() {
        assert!(RequestContext::new().flash_payload().is_none());
    }
}
