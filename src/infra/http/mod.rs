//! axum adapter: extractor, middleware and response helpers.

mod extract;
mod middleware;
mod response;

pub use extract::{InertiaRequest, RequestMeta};
pub use middleware::{RequestTrace, inertia_middleware, log_responses, set_request_context};
pub use response::{
    append_vary, external_redirect_response, found_response, inertia_location,
    is_external_redirect, page_json_response, resolve_redirect_target,
};

use axum::{Router, middleware as axum_middleware};

use crate::application::engine::Inertia;

/// Wraps `router` with the protocol middleware plus request tracing and
/// response logging.
pub fn with_inertia<S>(router: Router<S>, inertia: Inertia) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(axum_middleware::from_fn_with_state(
            inertia,
            inertia_middleware,
        ))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
