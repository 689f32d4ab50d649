//! Session storage used to carry protocol props across a redirect.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use crate::domain::error::BoxError;

pub const DEFAULT_SESSION_COOKIE: &str = "inertia_session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request carries no session identifier")]
    MissingSession,
    #[error("session backend failed: {0}")]
    Backend(#[source] BoxError),
}

impl SessionError {
    pub fn backend(source: impl Into<BoxError>) -> Self {
        Self::Backend(source.into())
    }
}

/// Key/value session access scoped to the request identified by `headers`.
///
/// Flashed values are read at most once: `get_flash` removes what it returns.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, headers: &HeaderMap, key: &str) -> Result<Option<Value>, SessionError>;

    async fn set(&self, headers: &HeaderMap, key: &str, value: Value) -> Result<(), SessionError>;

    async fn delete(&self, headers: &HeaderMap, key: &str) -> Result<(), SessionError>;

    async fn flash(
        &self,
        headers: &HeaderMap,
        key: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        self.set(headers, key, value).await
    }

    async fn get_flash(
        &self,
        headers: &HeaderMap,
        key: &str,
    ) -> Result<Option<Value>, SessionError> {
        let value = self.get(headers, key).await?;
        if value.is_some() {
            self.delete(headers, key).await?;
        }
        Ok(value)
    }
}

/// Process-local store keyed by a session cookie.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    cookie: String,
    sessions: Arc<DashMap<String, HashMap<String, Value>>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_COOKIE)
    }
}

impl MemorySessionStore {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        cookie_value(headers, &self.cookie)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, headers: &HeaderMap, key: &str) -> Result<Option<Value>, SessionError> {
        let Some(id) = self.session_id(headers) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&id)
            .and_then(|session| session.get(key).cloned()))
    }

    async fn set(&self, headers: &HeaderMap, key: &str, value: Value) -> Result<(), SessionError> {
        let id = self
            .session_id(headers)
            .ok_or(SessionError::MissingSession)?;
        self.sessions
            .entry(id)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, headers: &HeaderMap, key: &str) -> Result<(), SessionError> {
        let Some(id) = self.session_id(headers) else {
            return Ok(());
        };
        let emptied = match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.remove(key);
                session.is_empty()
            }
            None => false,
        };
        if emptied {
            self.sessions.remove_if(&id, |_, session| session.is_empty());
        }
        Ok(())
    }

    async fn get_flash(
        &self,
        headers: &HeaderMap,
        key: &str,
    ) -> Result<Option<Value>, SessionError> {
        let Some(id) = self.session_id(headers) else {
            return Ok(None);
        };
        let value = self
            .sessions
            .get_mut(&id)
            .and_then(|mut session| session.remove(key));
        self.sessions.remove_if(&id, |_, session| session.is_empty());
        Ok(value)
    }
}

/// Value of the named cookie across every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;

    fn with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(value).expect("cookie header"),
        );
        headers
    }

    #[test]
    fn cookie_value_finds_named_pair() {
        let headers = with_cookie("theme=dark; inertia_session=abc123 ; other=1");
        assert_eq!(
            cookie_value(&headers, "inertia_session").as_deref(),
            Some("abc123")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[tokio::test]
    async fn flash_is_read_once() {
        let store = MemorySessionStore::default();
        let headers = with_cookie("inertia_session=s1");

        store
            .flash(&headers, "props", json!({"flash": {"success": "saved"}}))
            .await
            .expect("flash");

        let first = store.get_flash(&headers, "props").await.expect("get flash");
        assert_eq!(first, Some(json!({"flash": {"success": "saved"}})));
        let second = store.get_flash(&headers, "props").await.expect("get flash");
        assert_eq!(second, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_isolated_by_cookie() {
        let store = MemorySessionStore::default();
        let alice = with_cookie("inertia_session=alice");
        let bob = with_cookie("inertia_session=bob");

        store.set(&alice, "user", json!("alice")).await.expect("set");

        assert_eq!(store.get(&alice, "user").await.expect("get"), Some(json!("alice")));
        assert_eq!(store.get(&bob, "user").await.expect("get"), None);
    }

    #[tokio::test]
    async fn writes_without_session_cookie_fail() {
        let store = MemorySessionStore::default();
        let err = store
            .set(&HeaderMap::new(), "user", json!(1))
            .await
            .expect_err("no session");
        assert!(matches!(err, SessionError::MissingSession));
        assert_eq!(store.get(&HeaderMap::new(), "user").await.expect("get"), None);
    }

    #[tokio::test]
    async fn delete_drops_empty_sessions() {
        let store = MemorySessionStore::default();
        let headers = with_cookie("inertia_session=s1");
        store.set(&headers, "a", json!(1)).await.expect("set");
        store.delete(&headers, "a").await.expect("delete");
        assert!(store.is_empty());
    }
}
