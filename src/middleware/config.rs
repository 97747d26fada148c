use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;

use super::error::AuthError;
use super::traits::{
    AutoBindingAccountService, AutoBindingAccountServiceDyn, AutoCreateAccountService,
    AutoCreateAccountServiceDyn, DynamicScopeProvider, DynamicScopeProviderDyn, LoginValidator,
    LoginValidatorDyn,
};
use crate::protector::RootProtector;

/// Where authentication cookies live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookieMode {
    /// No cookies: bearer-token only.
    None,
    /// Cookies on `/`: the whole site shares the authentication.
    RootPath,
    /// Cookies scoped to the entry path: only the auth endpoints see them.
    #[default]
    WebFrontPath,
}

/// `Secure` attribute policy for the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookieSecurePolicy {
    /// Never set `Secure`.
    None,
    /// Always set `Secure`.
    Always,
    /// Set `Secure` iff the request came in over HTTPS.
    #[default]
    SameAsRequest,
}

/// Settings re-read on every operation, so they can change without a
/// restart. Everything else in [`FrontAuthConfig`] is captured once at
/// construction.
#[derive(Debug, Clone)]
pub struct DynamicOptions {
    /// Normal authentication lifetime.
    pub expire_time_span: Duration,
    /// Sliding-expiration window; zero disables refreshability.
    pub sliding_expiration_time: Duration,
    /// Long-term cookie lifetime.
    pub unsafe_expire_time_span: Duration,
    /// Whether the long-term (device + unsafe user) cookie is used at all.
    pub use_long_term_cookie: bool,
    /// Per-scheme critical elevation window; absent or zero means the
    /// scheme never grants the critical level.
    pub schemes_critical_time_span: HashMap<String, Duration>,
}

impl Default for DynamicOptions {
    fn default() -> Self {
        Self {
            expire_time_span: Duration::hours(6),
            sliding_expiration_time: Duration::zero(),
            unsafe_expire_time_span: Duration::days(400),
            use_long_term_cookie: true,
            schemes_critical_time_span: HashMap::new(),
        }
    }
}

/// Source of the dynamic settings, read once per operation.
///
/// The blanket implementation on [`DynamicOptions`] gives a fixed snapshot;
/// plug a watcher here to support hot reload.
pub trait OptionsSource: Send + Sync + 'static {
    fn current(&self) -> DynamicOptions;
}

impl OptionsSource for DynamicOptions {
    fn current(&self) -> DynamicOptions {
        self.clone()
    }
}

/// Builds the remote-challenge URL for a scheme: `(scheme, state, scopes)`.
pub type ChallengeFn = Arc<dyn Fn(&str, &str, &[String]) -> String + Send + Sync>;

/// Web-front authentication configuration.
///
/// Use [`from_env()`](FrontAuthConfig::from_env) for convention-based setup,
/// or [`builder()`](FrontAuthConfig::builder) for full control.
#[derive(Clone)]
pub struct FrontAuthConfig {
    /// Root of the protector hierarchy (externally managed key).
    pub(super) root: RootProtector,
    /// Session cookie name; the long-term cookie appends `LT`.
    pub(super) auth_cookie_name: String,
    /// Header carrying `Bearer <envelope>`.
    pub(super) bearer_header_name: String,
    pub(super) cookie_mode: CookieMode,
    pub(super) cookie_secure_policy: CookieSecurePolicy,
    /// Base path of the auth endpoints.
    pub(super) entry_path: String,
    /// Ordinal prefixes a `returnUrl` must match.
    pub(super) allowed_return_urls: Vec<String>,
    pub(super) options: Arc<dyn OptionsSource>,
    pub(super) validator: Option<Arc<dyn LoginValidatorDyn>>,
    pub(super) auto_create: Option<Arc<dyn AutoCreateAccountServiceDyn>>,
    pub(super) auto_bind: Option<Arc<dyn AutoBindingAccountServiceDyn>>,
    pub(super) scope_provider: Option<Arc<dyn DynamicScopeProviderDyn>>,
    pub(super) challenge: Option<ChallengeFn>,
}

impl FrontAuthConfig {
    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `WFA_ROOT_KEY`: hex-encoded 32-byte protector root key
    ///
    /// # Optional env vars
    /// - `WFA_COOKIE_NAME`: session cookie name (default `__webfront`)
    /// - `WFA_BEARER_HEADER`: bearer header name (default `authorization`)
    /// - `WFA_ENTRY_PATH`: auth endpoints base path (default `/c`)
    /// - `WFA_COOKIE_MODE`: `none` | `root` | `webfront`
    /// - `WFA_ALLOWED_RETURN_URLS`: comma-separated URL prefixes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `WFA_ROOT_KEY` is missing or invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        let key_hex = std::env::var("WFA_ROOT_KEY")
            .map_err(|_| AuthError::Config("WFA_ROOT_KEY is required".into()))?;
        let root = RootProtector::from_hex(&key_hex)
            .map_err(|e| AuthError::Config(format!("WFA_ROOT_KEY: {e}")))?;

        let mut builder = Self::builder().root(root);

        if let Ok(name) = std::env::var("WFA_COOKIE_NAME") {
            builder = builder.auth_cookie_name(name);
        }
        if let Ok(name) = std::env::var("WFA_BEARER_HEADER") {
            builder = builder.bearer_header_name(name);
        }
        if let Ok(path) = std::env::var("WFA_ENTRY_PATH") {
            builder = builder.entry_path(path);
        }
        if let Ok(mode) = std::env::var("WFA_COOKIE_MODE") {
            builder = builder.cookie_mode(match mode.as_str() {
                "none" => CookieMode::None,
                "root" => CookieMode::RootPath,
                "webfront" => CookieMode::WebFrontPath,
                other => {
                    return Err(AuthError::Config(format!("unknown cookie mode: {other}")));
                }
            });
        }
        if let Ok(urls) = std::env::var("WFA_ALLOWED_RETURN_URLS") {
            builder = builder.allowed_return_urls(
                urls.split(',').map(|s| s.trim().to_string()).collect(),
            );
        }

        builder.build()
    }

    /// Create a builder for full control over configuration.
    #[must_use]
    pub fn builder() -> FrontAuthConfigBuilder {
        FrontAuthConfigBuilder::default()
    }
}

/// Builder for [`FrontAuthConfig`].
#[derive(Default)]
pub struct FrontAuthConfigBuilder {
    root: Option<RootProtector>,
    auth_cookie_name: Option<String>,
    bearer_header_name: Option<String>,
    cookie_mode: Option<CookieMode>,
    cookie_secure_policy: Option<CookieSecurePolicy>,
    entry_path: Option<String>,
    allowed_return_urls: Option<Vec<String>>,
    options: Option<Arc<dyn OptionsSource>>,
    validator: Option<Arc<dyn LoginValidatorDyn>>,
    auto_create: Option<Arc<dyn AutoCreateAccountServiceDyn>>,
    auto_bind: Option<Arc<dyn AutoBindingAccountServiceDyn>>,
    scope_provider: Option<Arc<dyn DynamicScopeProviderDyn>>,
    challenge: Option<ChallengeFn>,
}

impl FrontAuthConfigBuilder {
    /// Set the protector root key.
    #[must_use]
    pub fn root(mut self, root: RootProtector) -> Self {
        self.root = Some(root);
        self
    }

    /// Set the session cookie name (default: `"__webfront"`). The long-term
    /// cookie uses this name with an `LT` suffix.
    #[must_use]
    pub fn auth_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.auth_cookie_name = Some(name.into());
        self
    }

    /// Set the bearer header name (default: `"authorization"`).
    #[must_use]
    pub fn bearer_header_name(mut self, name: impl Into<String>) -> Self {
        self.bearer_header_name = Some(name.into());
        self
    }

    /// Set the cookie mode (default: [`CookieMode::WebFrontPath`]).
    #[must_use]
    pub fn cookie_mode(mut self, mode: CookieMode) -> Self {
        self.cookie_mode = Some(mode);
        self
    }

    /// Set the `Secure` policy (default: [`CookieSecurePolicy::SameAsRequest`]).
    #[must_use]
    pub fn cookie_secure_policy(mut self, policy: CookieSecurePolicy) -> Self {
        self.cookie_secure_policy = Some(policy);
        self
    }

    /// Set the auth endpoints base path (default: `"/c"`).
    #[must_use]
    pub fn entry_path(mut self, path: impl Into<String>) -> Self {
        self.entry_path = Some(path.into());
        self
    }

    /// Set the allowed `returnUrl` prefixes (default: none, so every
    /// `returnUrl` is rejected).
    #[must_use]
    pub fn allowed_return_urls(mut self, urls: Vec<String>) -> Self {
        self.allowed_return_urls = Some(urls);
        self
    }

    /// Set the dynamic-options source (default: a fixed
    /// [`DynamicOptions::default`] snapshot).
    #[must_use]
    pub fn options(mut self, source: impl OptionsSource) -> Self {
        self.options = Some(Arc::new(source));
        self
    }

    /// Install a login validator.
    #[must_use]
    pub fn validator(mut self, validator: impl LoginValidator) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Install an auto-registration service.
    #[must_use]
    pub fn auto_create(mut self, service: impl AutoCreateAccountService) -> Self {
        self.auto_create = Some(Arc::new(service));
        self
    }

    /// Install an account auto-binding service.
    #[must_use]
    pub fn auto_bind(mut self, service: impl AutoBindingAccountService) -> Self {
        self.auto_bind = Some(Arc::new(service));
        self
    }

    /// Install a dynamic challenge-scope provider.
    #[must_use]
    pub fn scope_provider(mut self, provider: impl DynamicScopeProvider) -> Self {
        self.scope_provider = Some(Arc::new(provider));
        self
    }

    /// Install the remote-challenge URL builder used by `startLogin`.
    #[must_use]
    pub fn challenge(
        mut self,
        challenge: impl Fn(&str, &str, &[String]) -> String + Send + Sync + 'static,
    ) -> Self {
        self.challenge = Some(Arc::new(challenge));
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the root key is not set.
    pub fn build(self) -> Result<FrontAuthConfig, AuthError> {
        Ok(FrontAuthConfig {
            root: self
                .root
                .ok_or_else(|| AuthError::Config("root key is required".into()))?,
            auth_cookie_name: self
                .auth_cookie_name
                .unwrap_or_else(|| "__webfront".into()),
            bearer_header_name: self
                .bearer_header_name
                .unwrap_or_else(|| "authorization".into()),
            cookie_mode: self.cookie_mode.unwrap_or_default(),
            cookie_secure_policy: self.cookie_secure_policy.unwrap_or_default(),
            entry_path: self.entry_path.unwrap_or_else(|| "/c".into()),
            allowed_return_urls: self.allowed_return_urls.unwrap_or_default(),
            options: self
                .options
                .unwrap_or_else(|| Arc::new(DynamicOptions::default())),
            validator: self.validator,
            auto_create: self.auto_create,
            auto_bind: self.auto_bind,
            scope_provider: self.scope_provider,
            challenge: self.challenge,
        })
    }
}
