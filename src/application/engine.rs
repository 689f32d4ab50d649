//! The engine facade: immutable configuration plus the operations the HTTP
//! adapter composes into responses.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_HOT_FILE, Settings};
use crate::domain::error::{BoxError, PropError};
use crate::domain::page::{Page, SsrFragment};
use crate::domain::props::{Prop, Props, ResolveContext};
use crate::domain::protocol::{PROP_CSRF_TOKEN, SESSION_FLASH_KEY};
use crate::infra::error::InfraError;
use crate::infra::session::SessionStore;
use crate::infra::ssr_transport::ReqwestTransport;
use crate::presentation::views::{
    DefaultErrorTemplate, DefaultRootTemplate, ErrorTemplate, RootTemplate,
};

use super::builder::{PageBuilder, PageRequest};
use super::context::RequestContext;
use super::error::{ErrorPolicy, InertiaError};
use super::partial::ReloadDirectives;
use super::ssr::{SsrConfig, SsrError, SsrRenderer, SsrTransport};

const SOURCE: &str = "application::engine";

pub type CsrfTokenProvider =
    Arc<dyn Fn(&ResolveContext) -> Result<String, PropError> + Send + Sync>;
pub type CsrfTokenCheck = Arc<dyn Fn(&HeaderMap) -> Result<(), BoxError> + Send + Sync>;

/// Status used when the CSRF check rejects a request.
pub const CSRF_MISMATCH_STATUS: u16 = 419;

/// Cheaply cloneable handle to a fully configured engine.
#[derive(Clone)]
pub struct Inertia {
    inner: Arc<InertiaConfig>,
}

/// Immutable engine configuration assembled by [`InertiaBuilder`].
pub struct InertiaConfig {
    base_url: String,
    asset_version: String,
    shared_props: Props,
    shared_view_data: Map<String, Value>,
    root_template: Arc<dyn RootTemplate>,
    error_template: Arc<dyn ErrorTemplate>,
    hot_file: PathBuf,
    dev_mode: bool,
    hot_url: OnceCell<Option<String>>,
    ssr: Option<SsrRenderer>,
    session_store: Option<Arc<dyn SessionStore>>,
    csrf_provider: Option<CsrfTokenProvider>,
    csrf_check: Option<CsrfTokenCheck>,
    csrf_prop_name: String,
    precognition_vary: bool,
    encrypt_history: bool,
    error_policy: ErrorPolicy,
}

impl fmt::Debug for Inertia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("Inertia")
            .field("base_url", &inner.base_url)
            .field("asset_version", &inner.asset_version)
            .field("shared_props", &inner.shared_props.len())
            .field("ssr", &inner.ssr)
            .field("session_store", &inner.session_store.is_some())
            .field("csrf", &inner.csrf_provider.is_some())
            .field("dev_mode", &inner.dev_mode)
            .finish_non_exhaustive()
    }
}

impl Inertia {
    pub fn builder(base_url: impl Into<String>) -> InertiaBuilder {
        InertiaBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn asset_version(&self) -> &str {
        &self.inner.asset_version
    }

    pub fn shared_props(&self) -> &Props {
        &self.inner.shared_props
    }

    pub fn is_ssr_enabled(&self) -> bool {
        self.inner.ssr.is_some()
    }

    pub fn ssr(&self) -> Option<&SsrRenderer> {
        self.inner.ssr.as_ref()
    }

    pub fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.inner.session_store.as_ref()
    }

    /// Prop name of the CSRF token, when a token provider is configured.
    pub fn csrf_prop_name(&self) -> Option<&str> {
        self.inner
            .csrf_provider
            .as_ref()
            .map(|_| self.inner.csrf_prop_name.as_str())
    }

    pub fn precognition_vary(&self) -> bool {
        self.inner.precognition_vary
    }

    pub fn error_policy(&self) -> &ErrorPolicy {
        &self.inner.error_policy
    }

    pub fn root_template(&self) -> &dyn RootTemplate {
        self.inner.root_template.as_ref()
    }

    pub fn error_template(&self) -> &dyn ErrorTemplate {
        self.inner.error_template.as_ref()
    }

    /// Assembles the page for `component` from the shared, context and
    /// per-call layers.
    pub async fn build_page(
        &self,
        component: &str,
        props: &Props,
        context: &mut RequestContext,
        directives: &ReloadDirectives,
        scope: ResolveContext,
    ) -> Page {
        PageBuilder::new(&self.inner.shared_props, &self.inner.asset_version)
            .csrf_prop(self.csrf_prop_name())
            .encrypt_history(self.inner.encrypt_history)
            .build(component, props, context, PageRequest { directives, scope })
            .await
    }

    /// Server-rendered markup for `page`; `None` when SSR is disabled.
    pub async fn render_ssr(
        &self,
        page: &Page,
        cancellation: &CancellationToken,
    ) -> Result<Option<SsrFragment>, SsrError> {
        match &self.inner.ssr {
            Some(renderer) => renderer.render(page, cancellation).await.map(Some),
            None => Ok(None),
        }
    }

    /// Shared view data overlaid with request view data.
    pub fn view_data(&self, context: &RequestContext) -> Map<String, Value> {
        let mut data = self.inner.shared_view_data.clone();
        for (key, value) in context.view_data() {
            data.insert(key.clone(), value.clone());
        }
        data
    }

    /// URL of the frontend dev server announced through the hot file. Read on
    /// every call in dev mode, once otherwise.
    pub async fn hot_server_url(&self) -> Option<String> {
        if self.inner.dev_mode {
            return read_hot_file(&self.inner.hot_file).await;
        }
        self.inner
            .hot_url
            .get_or_init(|| read_hot_file(&self.inner.hot_file))
            .await
            .clone()
    }

    /// Runs the configured CSRF check for state-changing methods. Skipped
    /// unless both a token provider and a checker are configured.
    pub fn check_csrf(&self, method: &Method, headers: &HeaderMap) -> Result<(), InertiaError> {
        let (Some(_), Some(check)) = (&self.inner.csrf_provider, &self.inner.csrf_check) else {
            return Ok(());
        };
        if !is_mutating(method) {
            return Ok(());
        }

        check(headers).map_err(|err| match err.downcast::<InertiaError>() {
            Ok(inertia) => *inertia,
            Err(other) => {
                let status = StatusCode::from_u16(CSRF_MISMATCH_STATUS)
                    .unwrap_or(StatusCode::FORBIDDEN);
                InertiaError::new(status, "CSRF token mismatch").with_cause(other)
            }
        })
    }

    /// Restores protocol props flashed by the previous request.
    pub async fn restore_flashed(&self, headers: &HeaderMap, context: &mut RequestContext) {
        let Some(store) = &self.inner.session_store else {
            return;
        };
        match store.get_flash(headers, SESSION_FLASH_KEY).await {
            Ok(Some(payload)) => context.restore_flashed(&payload),
            Ok(None) => {}
            Err(err) => debug!(
                target = SOURCE,
                op = "restore_flashed",
                error = %err,
                "No flashed props restored"
            ),
        }
    }

    /// Flashes the accumulated protocol props so the next request sees them.
    pub async fn flash_to_session(&self, headers: &HeaderMap, context: &RequestContext) {
        let Some(store) = &self.inner.session_store else {
            return;
        };
        let Some(payload) = context.flash_payload() else {
            return;
        };
        if let Err(err) = store.flash(headers, SESSION_FLASH_KEY, payload).await {
            warn!(
                target = SOURCE,
                op = "flash_to_session",
                error = %err,
                "Could not flash props to session"
            );
        }
    }
}

/// Whether `method` changes server state and is subject to CSRF and the
/// 303 redirect rewrite.
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

async fn read_hot_file(path: &Path) -> Option<String> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    let url = contents.trim();
    (!url.is_empty()).then(|| url.to_string())
}

enum SsrSetup {
    Disabled,
    Enabled(SsrConfig),
}

/// Collects engine options; [`build`](Self::build) freezes them.
pub struct InertiaBuilder {
    base_url: String,
    asset_version: String,
    shared_props: Props,
    shared_view_data: Map<String, Value>,
    root_template: Arc<dyn RootTemplate>,
    error_template: Arc<dyn ErrorTemplate>,
    hot_file: PathBuf,
    dev_mode: bool,
    ssr: SsrSetup,
    ssr_transport: Option<Arc<dyn SsrTransport>>,
    session_store: Option<Arc<dyn SessionStore>>,
    csrf_provider: Option<CsrfTokenProvider>,
    csrf_check: Option<CsrfTokenCheck>,
    csrf_prop_name: String,
    precognition_vary: bool,
    encrypt_history: bool,
    error_policy: ErrorPolicy,
}

impl InertiaBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            asset_version: String::new(),
            shared_props: Props::new(),
            shared_view_data: Map::new(),
            root_template: Arc::new(DefaultRootTemplate),
            error_template: Arc::new(DefaultErrorTemplate),
            hot_file: PathBuf::from(DEFAULT_HOT_FILE),
            dev_mode: false,
            ssr: SsrSetup::Disabled,
            ssr_transport: None,
            session_store: None,
            csrf_provider: None,
            csrf_check: None,
            csrf_prop_name: PROP_CSRF_TOKEN.to_string(),
            precognition_vary: true,
            encrypt_history: false,
            error_policy: ErrorPolicy::default(),
        }
    }

    /// Applies file/environment settings on top of the current options.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        let app = &settings.app;
        if !app.base_url.is_empty() {
            self.base_url = app.base_url.clone();
        }
        self.asset_version = app.asset_version.clone();
        self.dev_mode = app.dev_mode;
        self.hot_file = app.hot_file.clone();
        self.csrf_prop_name = app.csrf_prop_name.clone();
        self.precognition_vary = app.precognition_vary;
        self.encrypt_history = app.encrypt_history;
        self.ssr = match settings.ssr.to_config() {
            Some(config) => SsrSetup::Enabled(config),
            None => SsrSetup::Disabled,
        };
        self
    }

    pub fn asset_version(mut self, version: impl Into<String>) -> Self {
        self.asset_version = version.into();
        self
    }

    pub fn share(mut self, key: impl Into<String>, prop: impl Into<Prop>) -> Self {
        self.shared_props.insert(key.into(), prop.into());
        self
    }

    pub fn share_props(mut self, props: Props) -> Self {
        self.shared_props.extend(props);
        self
    }

    pub fn share_view_data<T: Serialize>(
        mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, PropError> {
        self.shared_view_data
            .insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn root_template(mut self, template: impl RootTemplate + 'static) -> Self {
        self.root_template = Arc::new(template);
        self
    }

    pub fn error_template(mut self, template: impl ErrorTemplate + 'static) -> Self {
        self.error_template = Arc::new(template);
        self
    }

    pub fn hot_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hot_file = path.into();
        self
    }

    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    pub fn enable_ssr(mut self, config: SsrConfig) -> Self {
        self.ssr = SsrSetup::Enabled(config);
        self
    }

    /// Enables SSR against the default local renderer.
    pub fn enable_ssr_with_default(self) -> Self {
        self.enable_ssr(SsrConfig::default())
    }

    pub fn disable_ssr(mut self) -> Self {
        self.ssr = SsrSetup::Disabled;
        self
    }

    /// Replaces the default `reqwest` transport used for SSR.
    pub fn ssr_transport(mut self, transport: Arc<dyn SsrTransport>) -> Self {
        self.ssr_transport = Some(transport);
        self
    }

    pub fn session_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.session_store = Some(Arc::new(store));
        self
    }

    pub fn csrf_token_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn(&ResolveContext) -> Result<String, PropError> + Send + Sync + 'static,
    {
        self.csrf_provider = Some(Arc::new(provider));
        self
    }

    pub fn csrf_token_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&HeaderMap) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.csrf_check = Some(Arc::new(check));
        self
    }

    /// Blank names fall back to `csrf_token`.
    pub fn csrf_prop_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.csrf_prop_name = if name.trim().is_empty() {
            PROP_CSRF_TOKEN.to_string()
        } else {
            name
        };
        self
    }

    pub fn precognition_vary(mut self, enabled: bool) -> Self {
        self.precognition_vary = enabled;
        self
    }

    pub fn encrypt_history(mut self, enabled: bool) -> Self {
        self.encrypt_history = enabled;
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn build(self) -> Result<Inertia, InfraError> {
        let InertiaBuilder {
            base_url,
            asset_version,
            mut shared_props,
            shared_view_data,
            root_template,
            error_template,
            hot_file,
            dev_mode,
            ssr,
            ssr_transport,
            session_store,
            csrf_provider,
            csrf_check,
            csrf_prop_name,
            precognition_vary,
            encrypt_history,
            error_policy,
        } = self;

        if hot_file.as_os_str().is_empty() {
            return Err(InfraError::configuration("hot file path must not be empty"));
        }

        match &csrf_provider {
            Some(provider) => {
                let provider = Arc::clone(provider);
                shared_props.insert(
                    csrf_prop_name.clone(),
                    Prop::lazy(move |ctx: ResolveContext| {
                        let token = provider(&ctx);
                        async move { token }
                    }),
                );
            }
            None => {
                shared_props.remove(&csrf_prop_name);
            }
        }

        let ssr = match ssr {
            SsrSetup::Disabled => None,
            SsrSetup::Enabled(config) => {
                let transport = match ssr_transport {
                    Some(transport) => transport,
                    None => Arc::new(ReqwestTransport::new()?) as Arc<dyn SsrTransport>,
                };
                SsrRenderer::new(config, transport)
            }
        };

        info!(
            target = SOURCE,
            op = "build",
            base_url = %base_url,
            asset_version = %asset_version,
            ssr = ssr.is_some(),
            session = session_store.is_some(),
            csrf = csrf_provider.is_some(),
            dev_mode,
            "Inertia engine configured"
        );

        Ok(Inertia {
            inner: Arc::new(InertiaConfig {
                base_url,
                asset_version,
                shared_props,
                shared_view_data,
                root_template,
                error_template,
                hot_file,
                dev_mode,
                hot_url: OnceCell::new(),
                ssr,
                session_store,
                csrf_provider,
                csrf_check,
                csrf_prop_name,
                precognition_vary,
                encrypt_history,
                error_policy,
            }),
        })
    }
}
