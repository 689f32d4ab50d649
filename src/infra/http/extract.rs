//! Per-request handle given to handlers: renders pages, issues protocol-aware
//! redirects and turns handler errors into responses.

use std::convert::Infallible;

use axum::{
    extract::{FromRef, FromRequestParts, OriginalUri},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{Html, IntoResponse, Response},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::application::context::RequestContext;
use crate::application::engine::Inertia;
use crate::application::error::{ErrorReport, InertiaError, RenderError};
use crate::application::partial::ReloadDirectives;
use crate::domain::error::BoxError;
use crate::domain::props::{Props, ResolveContext};
use crate::domain::protocol::{HEADER_INERTIA, HEADER_PRECOGNITION, HEADER_VERSION};
use crate::domain::validation::ValidationErrors;
use crate::presentation::views::{ErrorView, RootView, render_html_response};

use super::response::{
    external_redirect_response, found_response, is_external_redirect, page_json_response,
    resolve_redirect_target,
};

const SOURCE: &str = "infra::http::extract";

/// What the protocol needs to know about the incoming request.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub headers: HeaderMap,
    /// Path and query as the client sent them.
    pub url: String,
}

impl RequestMeta {
    pub fn new(method: Method, headers: HeaderMap, url: impl Into<String>) -> Self {
        Self {
            method,
            headers,
            url: url.into(),
        }
    }

    pub(crate) fn from_parts(parts: &Parts) -> Self {
        Self::new(
            parts.method.clone(),
            parts.headers.clone(),
            original_url(parts.extensions.get::<OriginalUri>(), &parts.uri),
        )
    }

    pub fn is_inertia(&self) -> bool {
        self.headers.contains_key(HEADER_INERTIA)
    }

    pub fn is_precognition(&self) -> bool {
        header_text(&self.headers, HEADER_PRECOGNITION).is_some_and(|value| !value.is_empty())
    }

    pub fn version(&self) -> &str {
        header_text(&self.headers, HEADER_VERSION).unwrap_or_default()
    }

    fn referer(&self) -> Option<&str> {
        header_text(&self.headers, header::REFERER.as_str()).filter(|value| !value.is_empty())
    }
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

pub(crate) fn original_url(original: Option<&OriginalUri>, uri: &axum::http::Uri) -> String {
    let uri = original.map(|original| &original.0).unwrap_or(uri);
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Handler-side entry point to the engine.
///
/// Extracted from any router state that can produce an [`Inertia`]; protocol
/// props flashed by the previous request are restored on extraction.
pub struct InertiaRequest {
    inertia: Inertia,
    meta: RequestMeta,
    cancellation: CancellationToken,
    context: RequestContext,
}

impl<S> FromRequestParts<S> for InertiaRequest
where
    Inertia: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let inertia = Inertia::from_ref(state);
        let meta = RequestMeta::from_parts(parts);
        let cancellation = parts
            .extensions
            .get::<CancellationToken>()
            .cloned()
            .unwrap_or_default();

        let mut context = RequestContext::new();
        inertia.restore_flashed(&meta.headers, &mut context).await;

        Ok(Self {
            inertia,
            meta,
            cancellation,
            context,
        })
    }
}

impl InertiaRequest {
    pub fn new(inertia: Inertia, meta: RequestMeta) -> Self {
        Self {
            inertia,
            meta,
            cancellation: CancellationToken::new(),
            context: RequestContext::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn is_inertia(&self) -> bool {
        self.meta.is_inertia()
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.context
    }

    fn resolve_context(&self) -> ResolveContext {
        ResolveContext::new(self.meta.headers.clone(), self.meta.url.clone())
            .with_cancellation(self.cancellation.clone())
    }

    /// Renders `component`: page JSON for protocol requests, the root HTML
    /// document otherwise.
    pub async fn render(
        &mut self,
        component: &str,
        props: Props,
    ) -> Result<Response, RenderError> {
        let directives = ReloadDirectives::from_headers(&self.meta.headers);
        let scope = self.resolve_context();
        let page = self
            .inertia
            .build_page(component, &props, &mut self.context, &directives, scope)
            .await;

        if self.meta.is_inertia() {
            return page_json_response(&page);
        }

        let ssr = self.inertia.render_ssr(&page, &self.cancellation).await?;
        let view_data = self.inertia.view_data(&self.context);
        let view = RootView {
            page: &page,
            page_json: serde_json::to_string(&page)?,
            ssr: ssr.as_ref(),
            view_data: &view_data,
            hot_server_url: self.inertia.hot_server_url().await,
        };
        let html = self.inertia.root_template().render(&view)?;
        Ok(Html(html).into_response())
    }

    /// Redirects to `target`, flashing accumulated protocol props. Protocol
    /// requests to another origin become an external redirect.
    pub async fn redirect(self, target: &str) -> Response {
        redirect(&self.inertia, &self.meta, &self.context, target).await
    }

    /// Forces a full page visit to `target`.
    pub async fn redirect_external(self, target: &str) -> Response {
        self.inertia
            .flash_to_session(&self.meta.headers, &self.context)
            .await;
        let target = resolve_redirect_target(self.inertia.base_url(), target);
        external_redirect_response(&target)
    }

    /// Redirects to the referring page, or the current URL without one.
    pub async fn redirect_back(self) -> Response {
        redirect_back(&self.inertia, &self.meta, &self.context).await
    }

    pub async fn redirect_back_with_errors<I, K, V>(mut self, errors: I) -> Response
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context.with_errors(errors);
        self.redirect_back().await
    }

    pub async fn redirect_back_with_validation_errors(
        mut self,
        errors: &ValidationErrors,
    ) -> Response {
        self.context.with_validation_errors(errors);
        self.redirect_back().await
    }

    /// Converts a handler error into the protocol's error response.
    pub async fn handle_error(self, error: impl Into<BoxError>) -> Response {
        error_response(&self.inertia, &self.meta, self.context, error.into()).await
    }
}

pub(crate) async fn redirect(
    inertia: &Inertia,
    meta: &RequestMeta,
    context: &RequestContext,
    target: &str,
) -> Response {
    inertia.flash_to_session(&meta.headers, context).await;
    let target = resolve_redirect_target(inertia.base_url(), target);
    if meta.is_inertia() && is_external_redirect(inertia.base_url(), &target) {
        return external_redirect_response(&target);
    }
    found_response(&target)
}

pub(crate) async fn redirect_back(
    inertia: &Inertia,
    meta: &RequestMeta,
    context: &RequestContext,
) -> Response {
    let target = meta.referer().unwrap_or(meta.url.as_str()).to_string();
    redirect(inertia, meta, context, &target).await
}

/// Classifies `error` and answers the way the request expects: JSON for
/// precognition, an error page for plain GETs, otherwise a redirect back with
/// errors and flash messages.
pub(crate) async fn error_response(
    inertia: &Inertia,
    meta: &RequestMeta,
    mut context: RequestContext,
    error: BoxError,
) -> Response {
    let policy = inertia.error_policy();
    let exposed = policy.can_expose_details(&meta.headers);
    let error = policy.classify(error, exposed);
    log_handler_error(meta, &error);

    if meta.is_precognition() {
        return precognition_response(&error);
    }

    let details = policy.details(&error, exposed);

    if !meta.is_inertia() && meta.method == Method::GET {
        return error_page_response(inertia, &error, details);
    }

    context
        .with_validation_errors(error.validation_errors())
        .with_flash_messages(error.flash_messages());
    if error.validation_errors().is_empty() && !details.is_empty() {
        context.with_flash_error(details);
    }
    redirect_back(inertia, meta, &context).await
}

fn log_handler_error(meta: &RequestMeta, error: &InertiaError) {
    let status = error.status().as_u16();
    if error.status().is_server_error() {
        error!(
            target = SOURCE,
            op = "error_response",
            method = %meta.method,
            url = %meta.url,
            status,
            error = %error,
            cause = ?error.cause().map(ToString::to_string),
            "Handler failed"
        );
    } else {
        warn!(
            target = SOURCE,
            op = "error_response",
            method = %meta.method,
            url = %meta.url,
            status,
            error = %error,
            validation = error.validation_errors().len(),
            "Handler rejected request"
        );
    }
}

fn precognition_response(error: &InertiaError) -> Response {
    let validation = error.validation_errors();
    let mut response = if validation.is_empty() {
        let mut response = StatusCode::NO_CONTENT.into_response();
        response.headers_mut().insert(
            HeaderName::from_static("precognition-success"),
            HeaderValue::from_static("true"),
        );
        response
    } else {
        let body: Value = json!({
            "message": error.message(),
            "errors": validation,
        });
        (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(body)).into_response()
    };
    response.headers_mut().insert(
        HeaderName::from_static(HEADER_PRECOGNITION),
        HeaderValue::from_static("true"),
    );
    response
}

fn error_page_response(inertia: &Inertia, error: &InertiaError, details: String) -> Response {
    let view = ErrorView {
        code: error.status().as_u16(),
        message: error.message().to_string(),
        details: (!details.is_empty()).then_some(details),
    };
    let mut response = render_html_response(
        inertia.error_template().render(&view),
        error.status(),
        SOURCE,
    );
    if response.extensions().get::<ErrorReport>().is_none() {
        ErrorReport::from_error(SOURCE, error.status(), error).attach(&mut response);
    }
    response
}
