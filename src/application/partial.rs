//! Partial reload planning.
//!
//! Turns the directive headers of a request into an immutable plan that the
//! resolver consults for every prop key.

use std::collections::HashSet;

use axum::http::HeaderMap;

use crate::domain::protocol::{
    FORCED_PROPS, HEADER_ERROR_BAG, HEADER_EXCEPT_ONCE_PROPS, HEADER_PARTIAL_COMPONENT,
    HEADER_PARTIAL_EXCEPT, HEADER_PARTIAL_ONLY, HEADER_RESET, HEADER_SCROLL_MERGE_INTENT,
};

/// Raw directive header values of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadDirectives {
    pub partial_component: Option<String>,
    pub only: Option<String>,
    pub except: Option<String>,
    pub reset: Option<String>,
    pub except_once: Option<String>,
    pub error_bag: Option<String>,
    pub scroll_merge_intent: Option<String>,
}

impl ReloadDirectives {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            partial_component: read(HEADER_PARTIAL_COMPONENT),
            only: read(HEADER_PARTIAL_ONLY),
            except: read(HEADER_PARTIAL_EXCEPT),
            reset: read(HEADER_RESET),
            except_once: read(HEADER_EXCEPT_ONCE_PROPS),
            error_bag: read(HEADER_ERROR_BAG),
            scroll_merge_intent: read(HEADER_SCROLL_MERGE_INTENT),
        }
    }

    /// Trimmed error bag name, if one was requested.
    pub fn error_bag(&self) -> Option<&str> {
        self.error_bag
            .as_deref()
            .map(str::trim)
            .filter(|bag| !bag.is_empty())
    }
}

/// Which non-forced props a render includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropFilter {
    /// Full render: everything is included.
    All,
    /// Partial reload with an only-list; an empty set includes nothing.
    Only(HashSet<String>),
    /// Partial reload with an except-list; an empty set excludes nothing.
    Except(HashSet<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrollMergeIntent {
    #[default]
    Append,
    Prepend,
}

impl ScrollMergeIntent {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(value) if value.trim().eq_ignore_ascii_case("prepend") => Self::Prepend,
            _ => Self::Append,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialReloadPlan {
    filter: PropFilter,
    reset: HashSet<String>,
    except_once: HashSet<String>,
    force_include: HashSet<String>,
    scroll_merge_intent: ScrollMergeIntent,
}

impl PartialReloadPlan {
    /// Builds the plan for rendering `component`.
    ///
    /// The request is partial only when it targets the component being
    /// rendered and carries a non-blank only- or except-list. When both lists
    /// are present the except-list wins.
    pub fn new(directives: &ReloadDirectives, component: &str, csrf_prop: Option<&str>) -> Self {
        let targets_component = directives.partial_component.as_deref() == Some(component);
        let only = non_blank(directives.only.as_deref());
        let except = non_blank(directives.except.as_deref());

        let filter = match (targets_component, only, except) {
            (true, _, Some(except)) => PropFilter::Except(parse_header_list(except)),
            (true, Some(only), None) => PropFilter::Only(parse_header_list(only)),
            _ => PropFilter::All,
        };

        let mut force_include: HashSet<String> =
            FORCED_PROPS.iter().map(|key| key.to_string()).collect();
        if let Some(csrf_prop) = csrf_prop.filter(|name| !name.is_empty()) {
            force_include.insert(csrf_prop.to_string());
        }

        Self {
            filter,
            reset: parse_header_list(directives.reset.as_deref().unwrap_or_default()),
            except_once: parse_header_list(directives.except_once.as_deref().unwrap_or_default()),
            force_include,
            scroll_merge_intent: ScrollMergeIntent::parse(
                directives.scroll_merge_intent.as_deref(),
            ),
        }
    }

    /// A plan for a full, non-partial render.
    pub fn full() -> Self {
        Self::new(&ReloadDirectives::default(), "", None)
    }

    pub fn filter(&self) -> &PropFilter {
        &self.filter
    }

    pub fn is_partial(&self) -> bool {
        !matches!(self.filter, PropFilter::All)
    }

    pub fn is_forced(&self, key: &str) -> bool {
        self.force_include.contains(key)
    }

    pub fn should_include(&self, key: &str) -> bool {
        if self.is_forced(key) {
            return true;
        }
        match &self.filter {
            PropFilter::All => true,
            PropFilter::Except(except) => !except.contains(key),
            PropFilter::Only(only) => only.contains(key),
        }
    }

    /// True when an only-list is in force and names `key`.
    pub fn explicitly_included(&self, key: &str) -> bool {
        matches!(&self.filter, PropFilter::Only(only) if only.contains(key))
    }

    pub fn is_reset(&self, key: &str) -> bool {
        self.reset.contains(key)
    }

    /// A once prop is skipped when the client already holds it, unless the
    /// reload asks for it by name.
    pub fn skips_once(&self, once_key: &str, prop_key: &str) -> bool {
        self.except_once.contains(once_key) && !self.explicitly_included(prop_key)
    }

    pub fn scroll_merge_intent(&self) -> ScrollMergeIntent {
        self.scroll_merge_intent
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|raw| !raw.trim().is_empty())
}

/// Splits a comma-separated header value, trimming entries and dropping blanks.
pub fn parse_header_list(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
