//! Prop values and the wrappers that change how the page builder treats them.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::HeaderMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use super::error::PropError;
use super::page::{MergeKind, ScrollPropConfig};
use super::protocol::DEFAULT_DEFERRED_GROUP;

/// Props keyed by name. Ordered so page output is deterministic.
pub type Props = BTreeMap<String, Prop>;

/// Builds a [`Props`] map from `(name, prop)` pairs.
pub fn props<I, K, P>(entries: I) -> Props
where
    I: IntoIterator<Item = (K, P)>,
    K: Into<String>,
    P: Into<Prop>,
{
    entries
        .into_iter()
        .map(|(key, prop)| (key.into(), prop.into()))
        .collect()
}

/// Request-scoped inputs handed to lazy prop resolvers.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub headers: HeaderMap,
    pub url: String,
    pub cancellation: CancellationToken,
}

impl ResolveContext {
    pub fn new(headers: HeaderMap, url: impl Into<String>) -> Self {
        Self {
            headers,
            url: url.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

type LazyFn = dyn Fn(ResolveContext) -> BoxFuture<'static, Result<Value, PropError>> + Send + Sync;

/// A value computed only when the page actually includes it.
#[derive(Clone)]
pub struct LazyProp {
    resolver: Arc<LazyFn>,
}

impl LazyProp {
    pub fn new<F, Fut, T>(resolver: F) -> Self
    where
        F: Fn(ResolveContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PropError>> + Send + 'static,
        T: Serialize,
    {
        Self {
            resolver: Arc::new(move |ctx| {
                resolver(ctx)
                    .map(|result| result.and_then(|value| Ok(serde_json::to_value(value)?)))
                    .boxed()
            }),
        }
    }

    /// Wraps a synchronous zero-argument function.
    pub fn from_fn<F, T>(resolver: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize,
    {
        let resolver = Arc::new(resolver);
        Self::new(move |_ctx| {
            let resolver = Arc::clone(&resolver);
            async move { Ok::<_, PropError>(resolver()) }
        })
    }

    pub async fn evaluate(&self, ctx: ResolveContext) -> Result<Value, PropError> {
        (self.resolver)(ctx).await
    }
}

impl fmt::Debug for LazyProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazyProp(..)")
    }
}

/// Merge flags carried by [`Prop::Merge`]. Prepend beats deep when both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStrategy {
    pub prepend: bool,
    pub deep: bool,
}

impl MergeStrategy {
    pub fn kind(self) -> MergeKind {
        if self.prepend {
            MergeKind::Prepend
        } else if self.deep {
            MergeKind::Deep
        } else {
            MergeKind::Append
        }
    }
}

/// A once prop: sent on first visit, then skipped while the client still has it.
#[derive(Debug, Clone)]
pub struct OnceProp {
    pub key: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub inner: Box<Prop>,
}

impl OnceProp {
    pub fn new(inner: impl Into<Prop>) -> Self {
        Self {
            key: None,
            expires_at: None,
            inner: Box::new(inner.into()),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn expires_at(mut self, at: OffsetDateTime) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// The once key, falling back to the prop key when unset or blank.
    pub fn once_key<'a>(&'a self, prop_key: &'a str) -> &'a str {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => prop_key,
        }
    }

    pub fn expires_at_millis(&self) -> Option<i64> {
        self.expires_at
            .map(|at| (at.unix_timestamp_nanos() / 1_000_000) as i64)
    }
}

#[derive(Clone)]
pub enum Prop {
    Value(Value),
    Lazy(LazyProp),
    Deferred { group: String, inner: Box<Prop> },
    Optional(Box<Prop>),
    Always(Box<Prop>),
    Merge { strategy: MergeStrategy, inner: Box<Prop> },
    Scroll { config: ScrollPropConfig, inner: Box<Prop> },
    Once(OnceProp),
}

impl Prop {
    /// Serialises `value` into a plain prop.
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, PropError> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    pub fn lazy<F, Fut, T>(resolver: F) -> Self
    where
        F: Fn(ResolveContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PropError>> + Send + 'static,
        T: Serialize,
    {
        Self::Lazy(LazyProp::new(resolver))
    }

    pub fn from_fn<F, T>(resolver: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize,
    {
        Self::Lazy(LazyProp::from_fn(resolver))
    }

    /// Deferred prop in the `"default"` group.
    pub fn defer(inner: impl Into<Prop>) -> Self {
        Self::defer_in(DEFAULT_DEFERRED_GROUP, inner)
    }

    /// Deferred prop in a named group; a blank group means `"default"`.
    pub fn defer_in(group: impl Into<String>, inner: impl Into<Prop>) -> Self {
        let group = group.into();
        let group = if group.is_empty() {
            DEFAULT_DEFERRED_GROUP.to_string()
        } else {
            group
        };
        Self::Deferred {
            group,
            inner: Box::new(inner.into()),
        }
    }

    pub fn optional(inner: impl Into<Prop>) -> Self {
        Self::Optional(Box::new(inner.into()))
    }

    pub fn always(inner: impl Into<Prop>) -> Self {
        Self::Always(Box::new(inner.into()))
    }

    pub fn merge(inner: impl Into<Prop>) -> Self {
        Self::merge_with(MergeStrategy::default(), inner)
    }

    pub fn prepend(inner: impl Into<Prop>) -> Self {
        Self::merge_with(
            MergeStrategy {
                prepend: true,
                deep: false,
            },
            inner,
        )
    }

    pub fn deep_merge(inner: impl Into<Prop>) -> Self {
        Self::merge_with(
            MergeStrategy {
                prepend: false,
                deep: true,
            },
            inner,
        )
    }

    pub fn merge_with(strategy: MergeStrategy, inner: impl Into<Prop>) -> Self {
        Self::Merge {
            strategy,
            inner: Box::new(inner.into()),
        }
    }

    pub fn scroll(inner: impl Into<Prop>, config: ScrollPropConfig) -> Self {
        Self::Scroll {
            config,
            inner: Box::new(inner.into()),
        }
    }

    pub fn once(inner: impl Into<Prop>) -> Self {
        Self::Once(OnceProp::new(inner))
    }

    /// Plain JSON payload, if this is an unwrapped value.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Debug for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Lazy(lazy) => lazy.fmt(f),
            Self::Deferred { group, inner } => f
                .debug_struct("Deferred")
                .field("group", group)
                .field("inner", inner)
                .finish(),
            Self::Optional(inner) => f.debug_tuple("Optional").field(inner).finish(),
            Self::Always(inner) => f.debug_tuple("Always").field(inner).finish(),
            Self::Merge { strategy, inner } => f
                .debug_struct("Merge")
                .field("strategy", strategy)
                .field("inner", inner)
                .finish(),
            Self::Scroll { config, inner } => f
                .debug_struct("Scroll")
                .field("config", config)
                .field("inner", inner)
                .finish(),
            Self::Once(once) => once.fmt(f),
        }
    }
}

impl From<Value> for Prop {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Prop {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Prop {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<LazyProp> for Prop {
    fn from(value: LazyProp) -> Self {
        Self::Lazy(value)
    }
}

impl From<OnceProp> for Prop {
    fn from(value: OnceProp) -> Self {
        Self::Once(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn blank_defer_group_falls_back_to_default() {
        match Prop::defer_in("", json!(1)) {
            Prop::Deferred { group, .. } => assert_eq!(group, "default"),
            other => panic!("unexpected prop: {other:?}"),
        }
    }

    #[test]
    fn merge_strategy_prefers_prepend_over_deep() {
        let strategy = MergeStrategy {
            prepend: true,
            deep: true,
        };
        assert_eq!(strategy.kind(), MergeKind::Prepend);
        assert_eq!(
            MergeStrategy {
                prepend: false,
                deep: true
            }
            .kind(),
            MergeKind::Deep
        );
        assert_eq!(MergeStrategy::default().kind(), MergeKind::Append);
    }

    #[test]
    fn once_key_falls_back_to_prop_key() {
        let once = OnceProp::new(json!(1));
        assert_eq!(once.once_key("plans"), "plans");

        let keyed = OnceProp::new(json!(1)).key("plans_v2");
        assert_eq!(keyed.once_key("plans"), "plans_v2");

        let blank = OnceProp::new(json!(1)).key("");
        assert_eq!(blank.once_key("plans"), "plans");
    }

    #[test]
    fn once_expiry_is_reported_in_unix_millis() {
        let once = OnceProp::new(json!(1)).expires_at(datetime!(2024-01-01 00:00:00.250 UTC));
        assert_eq!(once.expires_at_millis(), Some(1_704_067_200_250));
    }

    #[tokio::test]
    async fn lazy_prop_serialises_its_output() {
        let lazy = LazyProp::new(|ctx: ResolveContext| async move {
            Ok::<_, PropError>(json!({"url": ctx.url}))
        });
        let value = lazy
            .evaluate(ResolveContext::new(HeaderMap::new(), "/users"))
            .await
            .expect("lazy value");
        assert_eq!(value, json!({"url": "/users"}));
    }

    #[tokio::test]
    async fn from_fn_wraps_sync_closures() {
        let lazy = LazyProp::from_fn(|| vec![1, 2, 3]);
        let value = lazy
            .evaluate(ResolveContext::new(HeaderMap::new(), "/"))
            .await
            .expect("lazy value");
        assert_eq!(value, json!([1, 2, 3]));
    }
}
