use std::sync::Arc;

use super::config::{ChallengeFn, CookieMode, CookieSecurePolicy, FrontAuthConfig, OptionsSource};
use super::traits::{
    AutoBindingAccountServiceDyn, AutoCreateAccountServiceDyn, DynamicScopeProviderDyn,
    LoginService, LoginServiceDyn, LoginValidatorDyn,
};
use crate::protector::{COOKIE_PURPOSE, EXTRA_PURPOSE, Protector, TOKEN_PURPOSE};

/// Shared state for the resolver, the login orchestrator and the route
/// handlers.
///
/// Cheap to clone. Handlers outside [`auth_routes`](super::auth_routes) can
/// use the [`FrontAuth`](super::FrontAuth) extractor against their own
/// state by providing `impl FromRef<AppState> for FrontAuthState`.
#[derive(Clone)]
pub struct FrontAuthState {
    pub(super) cookie_protector: Protector,
    pub(super) token_protector: Protector,
    pub(super) extra_protector: Protector,
    pub(super) auth_cookie_name: Arc<str>,
    pub(super) long_term_cookie_name: Arc<str>,
    pub(super) bearer_header_name: Arc<str>,
    pub(super) cookie_mode: CookieMode,
    pub(super) cookie_secure_policy: CookieSecurePolicy,
    pub(super) entry_path: Arc<str>,
    pub(super) allowed_return_urls: Arc<[String]>,
    pub(super) options: Arc<dyn OptionsSource>,
    pub(super) login: Arc<dyn LoginServiceDyn>,
    pub(super) validator: Option<Arc<dyn LoginValidatorDyn>>,
    pub(super) auto_create: Option<Arc<dyn AutoCreateAccountServiceDyn>>,
    pub(super) auto_bind: Option<Arc<dyn AutoBindingAccountServiceDyn>>,
    pub(super) scope_provider: Option<Arc<dyn DynamicScopeProviderDyn>>,
    pub(super) challenge: Option<ChallengeFn>,
}

impl FrontAuthState {
    /// Derives the purpose-scoped protectors and captures the
    /// startup-fixed settings; dynamic settings stay behind the config's
    /// [`OptionsSource`].
    pub fn new<L: LoginService>(config: FrontAuthConfig, login: L) -> Self {
        let entry = normalize_entry_path(&config.entry_path);
        Self {
            cookie_protector: config.root.derive(COOKIE_PURPOSE),
            token_protector: config.root.derive(TOKEN_PURPOSE),
            extra_protector: config.root.derive(EXTRA_PURPOSE),
            long_term_cookie_name: format!("{}LT", config.auth_cookie_name).into(),
            auth_cookie_name: config.auth_cookie_name.into(),
            bearer_header_name: config.bearer_header_name.to_ascii_lowercase().into(),
            cookie_mode: config.cookie_mode,
            cookie_secure_policy: config.cookie_secure_policy,
            entry_path: entry.into(),
            allowed_return_urls: config.allowed_return_urls.into(),
            options: config.options,
            login: Arc::new(login),
            validator: config.validator,
            auto_create: config.auto_create,
            auto_bind: config.auto_bind,
            scope_provider: config.scope_provider,
            challenge: config.challenge,
        }
    }

    /// True when `path` is the entry path or below it.
    pub(super) fn is_under_entry_path(&self, path: &str) -> bool {
        let entry: &str = &self.entry_path;
        if entry == "/" {
            return true;
        }
        path == entry || (path.starts_with(entry) && path.as_bytes().get(entry.len()) == Some(&b'/'))
    }
}

fn normalize_entry_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".into();
    }
    if trimmed.starts_with('/') {
        trimmed.into()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_path_normalization() {
        assert_eq!(normalize_entry_path("/c/"), "/c");
        assert_eq!(normalize_entry_path("c"), "/c");
        assert_eq!(normalize_entry_path(""), "/");
        assert_eq!(normalize_entry_path("/"), "/");
    }
}
