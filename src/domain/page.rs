//! The page payload sent to the client, plus the SSR fragment returned by the
//! external renderer.
//!
//! Every map is a `BTreeMap` so that two identical pages serialise to the same
//! bytes; the SSR cache digests that serialisation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-side merge behaviour recorded for a prop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeKind {
    #[default]
    Append,
    Prepend,
    Deep,
}

/// Paging descriptor for an infinite-scroll prop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPropConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub page_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_page: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<Value>,
}

impl ScrollPropConfig {
    pub fn new(page_name: impl Into<String>) -> Self {
        Self {
            page_name: page_name.into(),
            ..Self::default()
        }
    }

    pub fn with_previous_page(mut self, page: impl Into<Value>) -> Self {
        self.previous_page = Some(page.into());
        self
    }

    pub fn with_next_page(mut self, page: impl Into<Value>) -> Self {
        self.next_page = Some(page.into());
        self
    }

    pub fn with_current_page(mut self, page: impl Into<Value>) -> Self {
        self.current_page = Some(page.into());
        self
    }
}

/// Once-prop bookkeeping: which prop the once key maps to and when the
/// client copy expires (unix milliseconds, `null` when it never does).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OncePropConfig {
    pub prop: String,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub component: String,
    pub props: BTreeMap<String, Value>,
    pub url: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypt_history: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_history: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deferred_props: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_props: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prepend_props: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deep_merge_props: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_props_on: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scroll_props: BTreeMap<String, ScrollPropConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub once_props: BTreeMap<String, OncePropConfig>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Page {
    pub fn new(
        component: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            props: BTreeMap::new(),
            url: url.into(),
            version: version.into(),
            encrypt_history: false,
            clear_history: false,
            deferred_props: BTreeMap::new(),
            merge_props: Vec::new(),
            prepend_props: Vec::new(),
            deep_merge_props: Vec::new(),
            match_props_on: Vec::new(),
            scroll_props: BTreeMap::new(),
            once_props: BTreeMap::new(),
        }
    }

    pub fn defer(&mut self, group: &str, key: &str) {
        let names = self.deferred_props.entry(group.to_string()).or_default();
        push_unique(names, key);
    }

    /// Records the merge behaviour for `key`. A key sits in at most one of the
    /// merge, prepend and deep-merge lists; the latest assignment wins.
    pub fn assign_merge(&mut self, key: &str, kind: MergeKind) {
        self.merge_props.retain(|name| name != key);
        self.prepend_props.retain(|name| name != key);
        self.deep_merge_props.retain(|name| name != key);
        let target = match kind {
            MergeKind::Append => &mut self.merge_props,
            MergeKind::Prepend => &mut self.prepend_props,
            MergeKind::Deep => &mut self.deep_merge_props,
        };
        target.push(key.to_string());
    }

    pub fn match_on(&mut self, key: &str) {
        if key.trim().is_empty() {
            return;
        }
        push_unique(&mut self.match_props_on, key);
    }

    pub fn record_once(&mut self, once_key: &str, prop: &str, expires_at: Option<i64>) {
        self.once_props.insert(
            once_key.to_string(),
            OncePropConfig {
                prop: prop.to_string(),
                expires_at,
            },
        );
    }
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|item| item == value) {
        list.push(value.to_string());
    }
}

/// Markup produced by the external SSR renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrFragment {
    pub head: Vec<String>,
    pub body: String,
}

impl SsrFragment {
    pub fn head_html(&self) -> String {
        self.head.join("\n")
    }
}
