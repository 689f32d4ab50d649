//! Server-side rendering through an external renderer process.
//!
//! The serialised page is posted to the renderer, which answers with a
//! `{head, body}` fragment. Transient failures are retried a bounded number
//! of times and successful renders are cached by page digest.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cache::{SsrCache, SsrCacheConfig, content_digest};
use crate::domain::error::BoxError;
use crate::domain::page::{Page, SsrFragment};

const SOURCE: &str = "application::ssr";

pub const DEFAULT_SSR_URL: &str = "http://127.0.0.1:13714/render";
pub const DEFAULT_SSR_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_SSR_MAX_RETRIES: u32 = 1;
pub const DEFAULT_SSR_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Raw answer from the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// Zero when no status line was received.
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug, Error)]
#[error("ssr transport failed: {message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Sends render requests to the external renderer.
#[async_trait]
pub trait SsrTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<TransportResponse, TransportError>;

    /// Drops pooled connections before a retry.
    fn reset(&self) {}
}

#[derive(Debug, Error)]
pub enum SsrError {
    #[error("failed to serialise page for ssr: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("ssr renderer answered with status {status}")]
    BadStatus { status: u16 },
    #[error("failed to decode ssr response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("ssr render timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("ssr render cancelled")]
    Cancelled,
}

impl SsrError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Serialize(_) => "serialize",
            Self::Transport(_) => "transport",
            Self::BadStatus { .. } => "bad_status",
            Self::Decode(_) => "decode",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrConfig {
    pub url: String,
    /// Per-render budget covering every attempt. Zero means unbounded.
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Statuses worth retrying. Empty means any status >= 500.
    pub retry_statuses: Vec<u16>,
    pub disable_retries: bool,
}

impl Default for SsrConfig {
    fn default() -> Self {
        let cache = SsrCacheConfig::default();
        Self {
            url: DEFAULT_SSR_URL.to_string(),
            timeout: DEFAULT_SSR_TIMEOUT,
            headers: BTreeMap::new(),
            cache_ttl: cache.ttl,
            cache_max_entries: cache.max_entries,
            max_retries: DEFAULT_SSR_MAX_RETRIES,
            retry_delay: DEFAULT_SSR_RETRY_DELAY,
            retry_statuses: Vec::new(),
            disable_retries: false,
        }
    }
}

impl SsrConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn cache_config(&self) -> SsrCacheConfig {
        SsrCacheConfig {
            ttl: self.cache_ttl,
            max_entries: self.cache_max_entries,
        }
    }

    /// Fills retry defaults; `None` when no renderer URL is configured.
    pub fn normalized(mut self) -> Option<Self> {
        if self.url.trim().is_empty() {
            return None;
        }
        if self.disable_retries {
            self.max_retries = 0;
        } else if self.max_retries == 0 {
            self.max_retries = DEFAULT_SSR_MAX_RETRIES;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = DEFAULT_SSR_RETRY_DELAY;
        }
        Some(self)
    }
}

/// Whether a response status warrants another attempt.
pub fn should_retry_status(status: u16, retry_statuses: &[u16]) -> bool {
    if status == 0 {
        return true;
    }
    if retry_statuses.is_empty() {
        return status >= 500;
    }
    retry_statuses.contains(&status)
}

pub struct SsrRenderer {
    config: SsrConfig,
    headers: HeaderMap,
    transport: Arc<dyn SsrTransport>,
    cache: Option<SsrCache>,
}

impl std::fmt::Debug for SsrRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrRenderer")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl SsrRenderer {
    /// Returns `None` when SSR is effectively disabled (blank URL).
    pub fn new(config: SsrConfig, transport: Arc<dyn SsrTransport>) -> Option<Self> {
        let config = config.normalized()?;
        let headers = request_headers(&config.headers);
        let cache = SsrCache::new(&config.cache_config());
        Some(Self {
            config,
            headers,
            transport,
            cache,
        })
    }

    pub fn config(&self) -> &SsrConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&SsrCache> {
        self.cache.as_ref()
    }

    pub async fn render(
        &self,
        page: &Page,
        cancellation: &CancellationToken,
    ) -> Result<SsrFragment, SsrError> {
        let started = Instant::now();
        let outcome = self.render_page(page, cancellation).await;
        let elapsed = started.elapsed();
        histogram!("inertia_ssr_render_ms").record(elapsed.as_secs_f64() * 1000.0);

        if let Err(err) = &outcome {
            error!(
                target = SOURCE,
                op = "render",
                url = %self.config.url,
                component = %page.component,
                result = err.kind(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "SSR render failed"
            );
        }
        outcome
    }

    async fn render_page(
        &self,
        page: &Page,
        cancellation: &CancellationToken,
    ) -> Result<SsrFragment, SsrError> {
        let payload = serde_json::to_vec(page).map_err(SsrError::Serialize)?;
        let key = content_digest(&payload);

        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!(
                target = SOURCE,
                op = "render",
                component = %page.component,
                result = "cache_hit",
                "Served SSR fragment from cache"
            );
            return Ok(cached);
        }

        let scope = CallScope::new(cancellation, self.config.timeout);
        let response = self.post_with_retries(Bytes::from(payload), &scope).await?;
        let response = response?;

        if response.status >= 400 {
            return Err(SsrError::BadStatus {
                status: response.status,
            });
        }

        let fragment: SsrFragment =
            serde_json::from_slice(&response.body).map_err(SsrError::Decode)?;

        if let Some(cache) = &self.cache {
            cache.set(&key, &fragment);
        }
        Ok(fragment)
    }

    /// Runs the attempt loop. The outer error is a done scope (timeout or
    /// cancellation); the inner result is the last attempt's outcome.
    async fn post_with_retries(
        &self,
        payload: Bytes,
        scope: &CallScope,
    ) -> Result<Result<TransportResponse, TransportError>, SsrError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            scope.ensure_active()?;
            let outcome = scope
                .run(
                    self.transport
                        .post(&self.config.url, payload.clone(), &self.headers),
                )
                .await?;

            let retryable = match &outcome {
                Err(_) => true,
                Ok(response) => should_retry_status(response.status, &self.config.retry_statuses),
            };
            if !retryable || attempt >= attempts {
                return Ok(outcome);
            }

            self.transport.reset();
            counter!("inertia_ssr_retry_total").increment(1);
            warn!(
                target = SOURCE,
                op = "post",
                attempt,
                url = %self.config.url,
                status = outcome.as_ref().map(|response| response.status).unwrap_or(0),
                error = %outcome.as_ref().err().map(|err| err.to_string()).unwrap_or_default(),
                "Retrying SSR request"
            );
            scope.sleep(self.config.retry_delay).await?;
            attempt += 1;
        }
    }
}

fn request_headers(configured: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    for (name, value) in configured {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(
                target = SOURCE,
                op = "request_headers",
                header = %name,
                result = "skipped",
                "Ignoring invalid SSR request header"
            ),
        }
    }
    headers
}

/// Cancellation plus an optional deadline, observed by every await in one
/// render call.
struct CallScope {
    cancellation: CancellationToken,
    deadline: Option<tokio::time::Instant>,
    timeout: Duration,
}

impl CallScope {
    fn new(cancellation: &CancellationToken, timeout: Duration) -> Self {
        let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);
        Self {
            cancellation: cancellation.clone(),
            deadline,
            timeout,
        }
    }

    fn ensure_active(&self) -> Result<(), SsrError> {
        if self.cancellation.is_cancelled() {
            return Err(SsrError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if tokio::time::Instant::now() >= deadline => Err(SsrError::Timeout {
                timeout: self.timeout,
            }),
            _ => Ok(()),
        }
    }

    async fn run<F: Future>(&self, future: F) -> Result<F::Output, SsrError> {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(SsrError::Cancelled),
            _ = expired => Err(SsrError::Timeout { timeout: self.timeout }),
            output = future => Ok(output),
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), SsrError> {
        self.run(tokio::time::sleep(delay)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    type Script = Box<dyn Fn(usize) -> Result<TransportResponse, TransportError> + Send + Sync>;

    struct ScriptedTransport {
        calls: AtomicUsize,
        resets: AtomicUsize,
        bodies: Mutex<Vec<Bytes>>,
        script: Script,
    }

    impl ScriptedTransport {
        fn new(
            script: impl Fn(usize) -> Result<TransportResponse, TransportError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                bodies: Mutex::new(Vec::new()),
                script: Box::new(script),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SsrTransport for ScriptedTransport {
        async fn post(
            &self,
            _url: &str,
            body: Bytes,
            headers: &HeaderMap,
        ) -> Result<TransportResponse, TransportError> {
            assert_eq!(
                headers.get(header::CONTENT_TYPE).map(HeaderValue::as_bytes),
                Some(&b"application/json"[..])
            );
            self.bodies.lock().expect("bodies lock").push(body);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)(call)
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl SsrTransport for HangingTransport {
        async fn post(
            &self,
            _url: &str,
            _body: Bytes,
            _headers: &HeaderMap,
        ) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn ok(body: serde_json::Value) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: 200,
            body: Bytes::from(body.to_string()),
        })
    }

    fn status(code: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: code,
            body: Bytes::new(),
        })
    }

    fn page() -> Page {
        let mut page = Page::new("Home", "/", "v1");
        page.props.insert("errors".into(), json!({}));
        page
    }

    fn config() -> SsrConfig {
        SsrConfig {
            url: "http://renderer.test/render".into(),
            ..SsrConfig::default()
        }
    }

    #[test]
    fn retry_policy_matches_status_rules() {
        assert!(should_retry_status(0, &[]));
        assert!(should_retry_status(0, &[503]));
        assert!(should_retry_status(502, &[]));
        assert!(!should_retry_status(404, &[]));
        assert!(should_retry_status(429, &[429]));
        assert!(!should_retry_status(500, &[429]));
    }

    #[test]
    fn normalisation_fills_defaults() {
        assert!(SsrConfig::new("  ").normalized().is_none());

        let zeroed = SsrConfig {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            ..config()
        }
        .normalized()
        .expect("enabled");
        assert_eq!(zeroed.max_retries, 1);
        assert_eq!(zeroed.retry_delay, Duration::from_millis(10));

        let disabled = SsrConfig {
            max_retries: 5,
            disable_retries: true,
            ..config()
        }
        .normalized()
        .expect("enabled");
        assert_eq!(disabled.max_retries, 0);
    }

    #[tokio::test]
    async fn renders_and_caches_fragment() {
        let transport = ScriptedTransport::new(|_| ok(json!({"head": ["<title>x</title>"], "body": "<div>x</div>"})));
        let renderer = SsrRenderer::new(config(), transport.clone()).expect("ssr enabled");
        let token = CancellationToken::new();

        let first = renderer.render(&page(), &token).await.expect("render");
        let second = renderer.render(&page(), &token).await.expect("render");

        assert_eq!(first, second);
        assert_eq!(first.head, vec!["<title>x</title>"]);
        assert_eq!(transport.calls(), 1);

        let sent = transport.bodies.lock().expect("bodies lock")[0].clone();
        let decoded: Page = serde_json::from_slice(&sent).expect("page json");
        assert_eq!(decoded, page());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let transport = ScriptedTransport::new(|call| match call {
            0 => Err(TransportError::new("connection refused")),
            1 => status(503),
            _ => ok(json!({"body": "<main/>"})),
        });
        let renderer = SsrRenderer::new(
            SsrConfig {
                max_retries: 2,
                ..config()
            },
            transport.clone(),
        )
        .expect("ssr enabled");

        let fragment = renderer
            .render(&page(), &CancellationToken::new())
            .await
            .expect("render");

        assert_eq!(fragment.body, "<main/>");
        assert!(fragment.head.is_empty());
        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.resets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let transport = ScriptedTransport::new(|_| status(502));
        let renderer = SsrRenderer::new(config(), transport.clone()).expect("ssr enabled");

        let err = renderer
            .render(&page(), &CancellationToken::new())
            .await
            .expect_err("bad status");

        assert!(matches!(err, SsrError::BadStatus { status: 502 }));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_once() {
        let transport = ScriptedTransport::new(|_| status(404));
        let renderer = SsrRenderer::new(config(), transport.clone()).expect("ssr enabled");

        let err = renderer
            .render(&page(), &CancellationToken::new())
            .await
            .expect_err("bad status");

        assert!(matches!(err, SsrError::BadStatus { status: 404 }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_retries_make_a_single_attempt() {
        let transport = ScriptedTransport::new(|_| Err(TransportError::new("boom")));
        let renderer = SsrRenderer::new(
            SsrConfig {
                max_retries: 3,
                disable_retries: true,
                ..config()
            },
            transport.clone(),
        )
        .expect("ssr enabled");

        let err = renderer
            .render(&page(), &CancellationToken::new())
            .await
            .expect_err("transport error");

        assert!(matches!(err, SsrError::Transport(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let transport = ScriptedTransport::new(|_| {
            Ok(TransportResponse {
                status: 200,
                body: Bytes::from_static(b"not json"),
            })
        });
        let renderer = SsrRenderer::new(config(), transport).expect("ssr enabled");

        let err = renderer
            .render(&page(), &CancellationToken::new())
            .await
            .expect_err("decode error");
        assert!(matches!(err, SsrError::Decode(_)));
        assert!(renderer.cache().is_some_and(|cache| cache.is_empty()));
    }

    #[tokio::test]
    async fn timeout_stops_a_hanging_renderer() {
        let renderer = SsrRenderer::new(
            SsrConfig {
                timeout: Duration::from_millis(20),
                ..config()
            },
            Arc::new(HangingTransport),
        )
        .expect("ssr enabled");

        let err = renderer
            .render(&page(), &CancellationToken::new())
            .await
            .expect_err("timeout");
        assert!(matches!(err, SsrError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancelled_caller_makes_no_attempt() {
        let transport = ScriptedTransport::new(|_| ok(json!({"body": ""})));
        let renderer = SsrRenderer::new(config(), transport.clone()).expect("ssr enabled");
        let token = CancellationToken::new();
        token.cancel();

        let err = renderer.render(&page(), &token).await.expect_err("cancelled");
        assert!(matches!(err, SsrError::Cancelled));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_cache_posts_every_time() {
        let transport = ScriptedTransport::new(|_| ok(json!({"body": "x"})));
        let renderer = SsrRenderer::new(
            SsrConfig {
                cache_ttl: Duration::ZERO,
                ..config()
            },
            transport.clone(),
        )
        .expect("ssr enabled");
        let token = CancellationToken::new();

        renderer.render(&page(), &token).await.expect("render");
        renderer.render(&page(), &token).await.expect("render");
        assert!(renderer.cache().is_none());
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn configured_headers_extend_content_type() {
        let mut configured = BTreeMap::new();
        configured.insert("X-Render-Token".to_string(), "secret".to_string());
        configured.insert("bad header".to_string(), "x".to_string());

        let headers = request_headers(&configured);
        assert_eq!(headers.get("x-render-token").map(HeaderValue::as_bytes), Some(&b"secret"[..]));
        assert_eq!(headers.len(), 2);
    }
}
