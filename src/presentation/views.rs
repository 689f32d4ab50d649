use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::application::error::HttpError;
use crate::domain::page::{Page, SsrFragment};

const ASSET_PREFIX: &str = "/public/dist/";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

/// Everything the root document template gets to see.
pub struct RootView<'a> {
    pub page: &'a Page,
    /// Page serialised once; the client boots from it.
    pub page_json: String,
    pub ssr: Option<&'a SsrFragment>,
    pub view_data: &'a Map<String, Value>,
    pub hot_server_url: Option<String>,
}

impl RootView<'_> {
    pub fn ssr_head(&self) -> String {
        self.ssr.map(SsrFragment::head_html).unwrap_or_default()
    }

    pub fn ssr_body(&self) -> Option<&str> {
        self.ssr.map(|fragment| fragment.body.as_str())
    }

    /// Static build path of a frontend asset.
    pub fn asset(&self, path: &str) -> String {
        format!("{ASSET_PREFIX}{}", path.trim_start_matches('/'))
    }

    /// A view data entry rendered as text; strings are emitted unquoted.
    pub fn view_text(&self, key: &str) -> String {
        match self.view_data.get(key) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

pub struct ErrorView {
    pub code: u16,
    pub message: String,
    pub details: Option<String>,
}

/// Renders the HTML document that hosts the client application.
pub trait RootTemplate: Send + Sync {
    fn render(&self, view: &RootView<'_>) -> Result<String, AskamaError>;
}

/// Renders the standalone page shown for failed non-protocol GET requests.
pub trait ErrorTemplate: Send + Sync {
    fn render(&self, view: &ErrorView) -> Result<String, AskamaError>;
}

#[derive(Template)]
#[template(path = "app.html")]
struct AppPageTemplate<'a> {
    view: &'a RootView<'a>,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorPageTemplate<'a> {
    view: &'a ErrorView,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRootTemplate;

impl RootTemplate for DefaultRootTemplate {
    fn render(&self, view: &RootView<'_>) -> Result<String, AskamaError> {
        AppPageTemplate { view }.render()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorTemplate;

impl ErrorTemplate for DefaultErrorTemplate {
    fn render(&self, view: &ErrorView) -> Result<String, AskamaError> {
        ErrorPageTemplate { view }.render()
    }
}

pub fn render_html_response(
    rendered: Result<String, AskamaError>,
    status: StatusCode,
    source: &'static str,
) -> Response {
    match rendered {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => HttpError::from(TemplateRenderError::new(
            source,
            "Internal server error",
            err,
        ))
        .into_response(),
    }
}
