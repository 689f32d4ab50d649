//! Server side of the Inertia page protocol for axum applications.
//!
//! Handlers extract an [`InertiaRequest`], attach request-scoped props to its
//! [`RequestContext`] and render a component with per-call [`Props`]. The
//! engine merges shared, context and call props, applies partial reload
//! directives and prop wrappers, and answers with page JSON for protocol
//! visits or the root HTML document (optionally server-side rendered) for
//! first loads.
//!
//! ```no_run
//! use axum::{Router, response::Response, routing::get};
//! use inertia_server::{Inertia, InertiaRequest, Prop, RenderError, http, props};
//! use serde_json::json;
//!
//! async fn users(mut inertia: InertiaRequest) -> Result<Response, RenderError> {
//!     inertia
//!         .render(
//!             "Users/Index",
//!             props([
//!                 ("users", Prop::from(json!([{"id": 1}]))),
//!                 ("stats", Prop::defer(json!({"total": 1}))),
//!             ]),
//!         )
//!         .await
//! }
//!
//! # fn build() -> Result<(), Box<dyn std::error::Error>> {
//! let inertia = Inertia::builder("https://app.test").asset_version("v1").build()?;
//! let app: Router = http::with_inertia(
//!     Router::new().route("/users", get(users)).with_state(inertia.clone()),
//!     inertia,
//! );
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;

pub use application::context::RequestContext;
pub use application::engine::{CsrfTokenCheck, CsrfTokenProvider, Inertia, InertiaBuilder};
pub use application::error::{ErrorPolicy, InertiaError, RenderError, default_error_details};
pub use application::ssr::{SsrConfig, SsrError, SsrRenderer, SsrTransport};
pub use domain::error::PropError;
pub use domain::page::{Page, ScrollPropConfig, SsrFragment};
pub use domain::props::{LazyProp, MergeStrategy, OnceProp, Prop, Props, ResolveContext, props};
pub use domain::validation::{FlashLevel, FlashMessage, ValidationErrors};
pub use infra::http::{self, InertiaRequest};
pub use infra::session::{MemorySessionStore, SessionStore};
