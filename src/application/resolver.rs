//! Per-key prop resolution.
//!
//! Each prop goes through the same state machine: record wrapper metadata on
//! the page, decide inclusion against the reload plan, then either emit the
//! value or recurse into the wrapped payload.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::error::PropError;
use crate::domain::page::{MergeKind, Page};
use crate::domain::props::{LazyProp, Prop, ResolveContext};

use super::partial::{PartialReloadPlan, ScrollMergeIntent};

const SOURCE: &str = "application::resolver";

pub(crate) struct PropResolver<'a> {
    plan: &'a PartialReloadPlan,
    scope: ResolveContext,
    memo: &'a mut HashMap<String, Value>,
    /// Keys promoted by an `Always` wrapper during this build.
    forced: HashSet<String>,
}

impl<'a> PropResolver<'a> {
    pub(crate) fn new(
        plan: &'a PartialReloadPlan,
        scope: ResolveContext,
        memo: &'a mut HashMap<String, Value>,
    ) -> Self {
        Self {
            plan,
            scope,
            memo,
            forced: HashSet::new(),
        }
    }

    fn includes(&self, key: &str) -> bool {
        self.forced.contains(key) || self.plan.should_include(key)
    }

    pub(crate) fn resolve<'s>(
        &'s mut self,
        page: &'s mut Page,
        key: &'s str,
        prop: &'s Prop,
    ) -> BoxFuture<'s, ()> {
        async move {
            match prop {
                Prop::Value(value) => {
                    if self.includes(key) {
                        page.props.insert(key.to_string(), value.clone());
                    }
                }
                Prop::Lazy(lazy) => {
                    if self.includes(key) {
                        if let Some(value) = self.evaluate(key, lazy).await {
                            page.props.insert(key.to_string(), value);
                        }
                    }
                }
                Prop::Once(once) => {
                    let once_key = once.once_key(key);
                    page.record_once(once_key, key, once.expires_at_millis());
                    if self.plan.skips_once(once_key, key) {
                        return;
                    }
                    self.resolve(page, key, &once.inner).await;
                }
                Prop::Deferred { group, inner } => {
                    page.defer(group, key);
                    if self.plan.explicitly_included(key) {
                        self.resolve(page, key, inner).await;
                    }
                }
                Prop::Optional(inner) => {
                    if self.plan.explicitly_included(key) {
                        self.resolve(page, key, inner).await;
                    }
                }
                Prop::Always(inner) => {
                    self.forced.insert(key.to_string());
                    self.resolve(page, key, inner).await;
                }
                Prop::Merge { strategy, inner } => {
                    if !self.plan.is_reset(key) {
                        page.assign_merge(key, strategy.kind());
                    }
                    if self.includes(key) {
                        self.resolve(page, key, inner).await;
                    }
                }
                Prop::Scroll { config, inner } => {
                    page.scroll_props.insert(key.to_string(), config.clone());
                    if !self.plan.is_reset(key) {
                        let kind = match self.plan.scroll_merge_intent() {
                            ScrollMergeIntent::Prepend => MergeKind::Prepend,
                            ScrollMergeIntent::Append => MergeKind::Append,
                        };
                        page.assign_merge(key, kind);
                    }
                    if self.includes(key) {
                        self.resolve(page, key, inner).await;
                    }
                }
            }
        }
        .boxed()
    }

    /// Evaluates a lazy prop at most once per request; failures are logged
    /// and the prop is left out.
    async fn evaluate(&mut self, key: &str, lazy: &LazyProp) -> Option<Value> {
        if let Some(value) = self.memo.get(key) {
            return Some(value.clone());
        }

        let started = Instant::now();
        let cancellation = self.scope.cancellation.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(PropError::Cancelled),
            result = lazy.evaluate(self.scope.clone()) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                debug!(
                    target = SOURCE,
                    op = "evaluate_lazy",
                    prop = key,
                    result = "ok",
                    elapsed_ms,
                    "Resolved lazy prop"
                );
                self.memo.insert(key.to_string(), value.clone());
                Some(value)
            }
            Err(err) => {
                counter!("inertia_prop_failure_total", "kind" => err.kind()).increment(1);
                warn!(
                    target = SOURCE,
                    op = "evaluate_lazy",
                    prop = key,
                    result = "error",
                    elapsed_ms,
                    error = %err,
                    "Lazy prop failed; omitting it from the page"
                );
                None
            }
        }
    }
}
