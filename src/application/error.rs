use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::domain::error::BoxError;
use crate::domain::validation::{FlashLevel, FlashMessage, ValidationErrors};

use super::ssr::SsrError;

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_error(source, status, error),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

/// Failure while producing a page response.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("server-side rendering failed")]
    Ssr(#[from] SsrError),
    #[error("template rendering failed")]
    Template(#[from] askama::Error),
    #[error("failed to serialize page")]
    Serialize(#[from] serde_json::Error),
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        HttpError::from_error(
            "application::error::RenderError",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &self,
        )
        .into_response()
    }
}

/// An error raised by a handler that the error listener turns into a
/// protocol-aware response: flash messages, validation errors and a status
/// code travel with it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InertiaError {
    status: StatusCode,
    message: String,
    #[source]
    cause: Option<BoxError>,
    flash: Vec<FlashMessage>,
    validation: ValidationErrors,
}

impl InertiaError {
    /// A blank message falls back to the status code's canonical reason.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            status.canonical_reason().unwrap_or("Unknown error").to_string()
        } else {
            message
        };
        Self {
            status,
            message,
            cause: None,
            flash: Vec::new(),
            validation: ValidationErrors::new(),
        }
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "")
    }

    /// Validation failure: carries the field errors and a warning flash with
    /// the same user-facing message.
    pub fn validation(
        status: StatusCode,
        message: impl Into<String>,
        errors: ValidationErrors,
    ) -> Self {
        let mut error = Self::new(status, message);
        let warning = error.message.clone();
        error.validation = errors;
        error.with_flash(FlashLevel::Warning, warning)
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_flash(mut self, level: FlashLevel, message: impl Into<String>) -> Self {
        self.flash.push(FlashMessage {
            level,
            message: message.into(),
        });
        self
    }

    pub fn with_validation_errors(mut self, errors: ValidationErrors) -> Self {
        self.validation = errors;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn flash_messages(&self) -> &[FlashMessage] {
        &self.flash
    }

    pub fn validation_errors(&self) -> &ValidationErrors {
        &self.validation
    }
}

pub type ExposeDetailsFn = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;
pub type ErrorDetailsFn = Arc<dyn Fn(&InertiaError, bool) -> String + Send + Sync>;
pub type ErrorClassifierFn =
    Arc<dyn Fn(&(dyn StdError + Send + Sync + 'static)) -> Option<InertiaError> + Send + Sync>;

/// How handler errors are classified and how much of them users get to see.
#[derive(Clone)]
pub struct ErrorPolicy {
    can_expose_details: ExposeDetailsFn,
    details: ErrorDetailsFn,
    classifier: Option<ErrorClassifierFn>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            can_expose_details: Arc::new(|_: &HeaderMap| false),
            details: Arc::new(default_error_details),
            classifier: None,
        }
    }
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPolicy")
            .field("classifier", &self.classifier.is_some())
            .finish_non_exhaustive()
    }
}

impl ErrorPolicy {
    pub fn with_can_expose_details<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.can_expose_details = Arc::new(predicate);
        self
    }

    pub fn with_details<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&InertiaError, bool) -> String + Send + Sync + 'static,
    {
        self.details = Arc::new(formatter);
        self
    }

    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&(dyn StdError + Send + Sync + 'static)) -> Option<InertiaError>
            + Send
            + Sync
            + 'static,
    {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn can_expose_details(&self, headers: &HeaderMap) -> bool {
        (self.can_expose_details)(headers)
    }

    pub fn details(&self, error: &InertiaError, exposed: bool) -> String {
        (self.details)(error, exposed)
    }

    /// Converts an arbitrary handler error into an [`InertiaError`].
    ///
    /// Order: an `InertiaError` passes through, then the custom classifier,
    /// then a 500 carrying the error text when details may be exposed, else a
    /// bare internal error.
    pub fn classify(&self, error: BoxError, exposed: bool) -> InertiaError {
        let error = match error.downcast::<InertiaError>() {
            Ok(inertia) => return *inertia,
            Err(other) => other,
        };

        if let Some(classified) = self
            .classifier
            .as_ref()
            .and_then(|classify| classify(&*error))
        {
            return classified;
        }

        if exposed {
            let message = error.to_string();
            InertiaError::new(StatusCode::INTERNAL_SERVER_ERROR, message).with_cause(error)
        } else {
            InertiaError::internal()
        }
    }
}

/// Default user-facing details: the message (and distinct cause) when
/// details may be exposed, otherwise a fixed text per status family.
pub fn default_error_details(error: &InertiaError, exposed: bool) -> String {
    if exposed {
        let mut details = error.message().to_string();
        if let Some(cause) = error.cause() {
            let cause = cause.to_string();
            if cause != details {
                details.push_str(": ");
                details.push_str(&cause);
            }
        }
        return details;
    }

    let text = match error.status().as_u16() {
        400 => "Bad request",
        401 => "Unauthorized",
        403 => "Permission denied",
        404 => "Page not found",
        419 => "The page expired, please try again",
        429 => "Too many requests",
        _ => "Something went wrong. Try again later",
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn blank_message_uses_canonical_reason() {
        let err = InertiaError::new(StatusCode::NOT_FOUND, "  ");
        assert_eq!(err.message(), "Not Found");
        assert_eq!(InertiaError::internal().message(), "Internal Server Error");
    }

    #[test]
    fn validation_error_flashes_warning() {
        let errors = ValidationErrors::from([("email".to_string(), vec!["taken".to_string()])]);
        let err = InertiaError::validation(StatusCode::UNPROCESSABLE_ENTITY, "Check the form", errors);

        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.validation_errors()["email"], vec!["taken"]);
        assert_eq!(err.flash_messages().len(), 1);
        assert_eq!(err.flash_messages()[0].level, FlashLevel::Warning);
        assert_eq!(err.flash_messages()[0].message, "Check the form");
    }

    #[test]
    fn classify_passes_inertia_errors_through() {
        let policy = ErrorPolicy::default();
        let source: BoxError = Box::new(InertiaError::new(StatusCode::FORBIDDEN, "nope"));

        let err = policy.classify(source, false);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.message(), "nope");
    }

    #[test]
    fn classify_uses_custom_classifier_before_fallback() {
        let policy = ErrorPolicy::default().with_classifier(|err| {
            err.downcast_ref::<io::Error>()
                .map(|_| InertiaError::new(StatusCode::SERVICE_UNAVAILABLE, "storage offline"))
        });

        let err = policy.classify(Box::new(io::Error::other("disk")), false);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn classify_hides_unknown_errors_unless_exposed() {
        let policy = ErrorPolicy::default();

        let hidden = policy.classify(Box::new(io::Error::other("db down")), false);
        assert_eq!(hidden.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hidden.message(), "Internal Server Error");

        let exposed = policy.classify(Box::new(io::Error::other("db down")), true);
        assert_eq!(exposed.message(), "db down");
        assert!(exposed.cause().is_some());
    }

    #[test]
    fn default_details_use_fixed_texts_when_hidden() {
        let cases = [
            (StatusCode::NOT_FOUND, "Page not found"),
            (StatusCode::from_u16(419).expect("status"), "The page expired, please try again"),
            (StatusCode::BAD_GATEWAY, "Something went wrong. Try again later"),
        ];
        for (status, expected) in cases {
            let err = InertiaError::new(status, "secret");
            assert_eq!(default_error_details(&err, false), expected);
        }
    }

    #[test]
    fn default_details_append_distinct_cause() {
        let err = InertiaError::new(StatusCode::BAD_REQUEST, "invalid payload")
            .with_cause(io::Error::other("eof"));
        assert_eq!(default_error_details(&err, true), "invalid payload: eof");

        let same = InertiaError::new(StatusCode::BAD_REQUEST, "eof").with_cause(io::Error::other("eof"));
        assert_eq!(default_error_details(&same, true), "eof");
    }

    #[test]
    fn render_error_response_carries_report() {
        let err = RenderError::Serialize(
            serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json"),
        );
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("error report");
        assert_eq!(report.source, "application::error::RenderError");
        assert_eq!(report.messages[0], "failed to serialize page");
    }
}
