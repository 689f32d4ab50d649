use std::time::Instant;

use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::context::RequestContext;
use crate::application::engine::{Inertia, is_mutating};
use crate::application::error::ErrorReport;
use crate::domain::protocol::{HEADER_LOCATION, VARY_INERTIA, VARY_PRECOGNITION};

use super::extract::{RequestMeta, error_response, original_url};
use super::response::{append_vary, inertia_location};

const SOURCE: &str = "infra::http::middleware";

#[derive(Clone)]
pub struct RequestTrace {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let trace = RequestTrace {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(trace.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(trace);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestTrace>()
        .map(|trace| trace.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "inertia::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else if status != StatusCode::CONFLICT {
            warn!(
                target = "inertia::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

/// Protocol middleware: CSRF check, asset version negotiation, `Vary`
/// headers and the 303 rewrite of redirects after state-changing requests.
///
/// The request also gets a [`CancellationToken`] that fires when the client
/// goes away, picked up by [`InertiaRequest`](super::InertiaRequest).
pub async fn inertia_middleware(
    State(inertia): State<Inertia>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let meta = RequestMeta::new(
        request.method().clone(),
        request.headers().clone(),
        original_url(request.extensions().get::<OriginalUri>(), request.uri()),
    );

    if let Err(err) = inertia.check_csrf(&meta.method, &meta.headers) {
        let response = error_response(&inertia, &meta, RequestContext::new(), Box::new(err)).await;
        return finalize(&inertia, &meta, response);
    }

    let cancellation = CancellationToken::new();
    request.extensions_mut().insert(cancellation.clone());
    let _cancel_on_drop = cancellation.drop_guard();

    if !meta.is_inertia() {
        return next.run(request).await;
    }

    if meta.method == Method::GET
        && meta.version() != inertia.asset_version()
        && !meta.is_precognition()
    {
        return version_conflict(&inertia, &meta);
    }

    let response = next.run(request).await;
    finalize(&inertia, &meta, response)
}

fn version_conflict(inertia: &Inertia, meta: &RequestMeta) -> Response {
    let location = inertia_location(inertia.base_url(), &meta.url);
    debug!(
        target = SOURCE,
        op = "version_conflict",
        client_version = meta.version(),
        server_version = inertia.asset_version(),
        location = %location,
        "Asset version mismatch"
    );

    let mut response = StatusCode::CONFLICT.into_response();
    if let Ok(value) = HeaderValue::from_str(&location) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(HEADER_LOCATION), value);
    }
    response
}

fn finalize(inertia: &Inertia, meta: &RequestMeta, mut response: Response) -> Response {
    if !meta.is_inertia() {
        return response;
    }

    let headers = response.headers_mut();
    append_vary(headers, VARY_INERTIA);
    if inertia.precognition_vary() {
        append_vary(headers, VARY_PRECOGNITION);
    }
    if meta.is_precognition() {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }

    let status = response.status();
    if is_mutating(&meta.method)
        && (status == StatusCode::FOUND || status == StatusCode::MOVED_PERMANENTLY)
    {
        let (mut parts, _body) = response.into_parts();
        parts.status = StatusCode::SEE_OTHER;
        parts.headers.remove(header::CONTENT_LENGTH);
        return Response::from_parts(parts, Body::empty());
    }
    response
}
