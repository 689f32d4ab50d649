//! Page assembly: merges the shared, context and per-call prop layers and
//! runs every surviving key through the resolver.

use std::collections::HashSet;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::page::Page;
use crate::domain::props::{Props, ResolveContext};
use crate::domain::protocol::PROP_ERRORS;
use crate::domain::validation::scope_errors_to_bag;

use super::context::RequestContext;
use super::partial::{PartialReloadPlan, ReloadDirectives};
use super::resolver::PropResolver;

const SOURCE: &str = "application::builder";

/// Request-derived inputs to a page build.
#[derive(Debug, Clone)]
pub struct PageRequest<'a> {
    pub directives: &'a ReloadDirectives,
    pub scope: ResolveContext,
}

pub struct PageBuilder<'a> {
    shared: &'a Props,
    version: &'a str,
    csrf_prop: Option<&'a str>,
    encrypt_history: bool,
}

impl<'a> PageBuilder<'a> {
    pub fn new(shared: &'a Props, version: &'a str) -> Self {
        Self {
            shared,
            version,
            csrf_prop: None,
            encrypt_history: false,
        }
    }

    /// Name of the CSRF prop when a token provider is configured.
    pub fn csrf_prop(mut self, name: Option<&'a str>) -> Self {
        self.csrf_prop = name;
        self
    }

    pub fn encrypt_history(mut self, encrypt: bool) -> Self {
        self.encrypt_history = encrypt;
        self
    }

    pub async fn build(
        &self,
        component: &str,
        props: &Props,
        context: &mut RequestContext,
        request: PageRequest<'_>,
    ) -> Page {
        let started = Instant::now();
        let plan = PartialReloadPlan::new(request.directives, component, self.csrf_prop);
        let mut page = Page::new(component, request.scope.url.clone(), self.version);

        {
            let (context_props, memo) = context.split_for_build();
            let overridden: HashSet<&str> = context_props
                .keys()
                .chain(props.keys())
                .map(String::as_str)
                .collect();

            let shared = self
                .shared
                .iter()
                .filter(|(key, _)| !overridden.contains(key.as_str()));
            let contextual = context_props
                .iter()
                .filter(|(key, _)| !props.contains_key(key.as_str()));

            let mut resolver = PropResolver::new(&plan, request.scope, memo);
            for (key, prop) in shared.chain(contextual).chain(props.iter()) {
                resolver.resolve(&mut page, key, prop).await;
            }
        }

        apply_context_meta(&mut page, context, self.encrypt_history);

        page.props
            .entry(PROP_ERRORS.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(bag) = request.directives.error_bag() {
            let errors = page.props.remove(PROP_ERRORS);
            page.props
                .insert(PROP_ERRORS.to_string(), scope_errors_to_bag(errors, bag));
        }

        debug!(
            target = SOURCE,
            op = "build",
            component,
            partial = plan.is_partial(),
            props = page.props.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built page"
        );
        page
    }
}

fn apply_context_meta(page: &mut Page, context: &RequestContext, encrypt_default: bool) {
    for key in context.match_props_on() {
        page.match_on(key);
    }
    for (key, config) in context.scroll_props() {
        page.scroll_props
            .entry(key.clone())
            .or_insert_with(|| config.clone());
    }
    page.encrypt_history = context
        .encrypt_history_override()
        .unwrap_or(encrypt_default);
    page.clear_history = context.clears_history();
}
