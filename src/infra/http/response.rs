use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::application::error::{HttpError, RenderError};
use crate::domain::page::Page;
use crate::domain::protocol::{HEADER_INERTIA, HEADER_LOCATION, VARY_INERTIA};

const SOURCE: &str = "infra::http::response";

/// Adds `value` to the `Vary` header unless an equal token (ignoring case)
/// is already listed.
pub fn append_vary(headers: &mut HeaderMap, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    let current: Vec<String> = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|item| item.to_str().ok())
        .flat_map(|item| item.split(','))
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    if current.iter().any(|item| item.eq_ignore_ascii_case(value)) {
        return;
    }

    let merged = if current.is_empty() {
        value.to_string()
    } else {
        format!("{}, {value}", current.join(", "))
    };
    if let Ok(merged) = HeaderValue::from_str(&merged) {
        headers.insert(header::VARY, merged);
    }
}

/// Protocol JSON response for a built page.
pub fn page_json_response(page: &Page) -> Result<Response, RenderError> {
    let body = serde_json::to_vec(page)?;
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        HeaderName::from_static(HEADER_INERTIA),
        HeaderValue::from_static("true"),
    );
    append_vary(headers, VARY_INERTIA);
    Ok(response)
}

/// Plain `302 Found` to `target`.
pub fn found_response(target: &str) -> Response {
    match HeaderValue::from_str(target) {
        Ok(location) => {
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(header::LOCATION, location);
            response
        }
        Err(err) => invalid_target(target, &err),
    }
}

/// `409 Conflict` carrying the target in both location headers, which makes
/// the client perform a full page visit.
pub fn external_redirect_response(target: &str) -> Response {
    match HeaderValue::from_str(target) {
        Ok(location) => {
            let mut response = StatusCode::CONFLICT.into_response();
            let headers = response.headers_mut();
            headers.insert(HeaderName::from_static(HEADER_LOCATION), location.clone());
            headers.insert(header::LOCATION, location);
            response
        }
        Err(err) => invalid_target(target, &err),
    }
}

fn invalid_target(target: &str, err: &dyn std::error::Error) -> Response {
    HttpError::new(
        SOURCE,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        format!("redirect target `{target}` is not a valid header value: {err}"),
    )
    .into_response()
}

/// Blank and root targets mean the application base URL.
pub fn resolve_redirect_target(base_url: &str, target: &str) -> String {
    if target.is_empty() || target == "/" {
        if base_url.is_empty() {
            return "/".to_string();
        }
        return base_url.to_string();
    }
    target.to_string()
}

/// An absolute target whose scheme or host differs from the base URL.
/// Relative targets are internal; an unusable base URL makes every absolute
/// target external.
pub fn is_external_redirect(base_url: &str, target: &str) -> bool {
    let Ok(target) = Url::parse(target) else {
        return false;
    };
    let Some(base) = parse_base_url(base_url) else {
        return true;
    };
    !base.scheme().eq_ignore_ascii_case(target.scheme())
        || !same_authority(&base, &target)
}

fn same_authority(base: &Url, target: &Url) -> bool {
    let host = |url: &Url| url.host_str().map(str::to_ascii_lowercase);
    host(base) == host(target) && base.port_or_known_default() == target.port_or_known_default()
}

fn parse_base_url(base_url: &str) -> Option<Url> {
    Url::parse(base_url)
        .ok()
        .filter(|url| url.has_host() && !url.scheme().is_empty())
}

/// Location sent with a version conflict: the original URL resolved against
/// the base URL, or the original URL as is when the base is unusable.
pub fn inertia_location(base_url: &str, original_url: &str) -> String {
    let Some(base) = parse_base_url(base_url) else {
        return original_url.to_string();
    };
    if original_url.is_empty() {
        return base.to_string();
    }
    match base.join(original_url) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => base.to_string(),
    }
}
