//! Shared test doubles for the middleware tests.

use std::sync::{Arc, Mutex};

use super::config::{
    CookieMode, CookieSecurePolicy, DynamicOptions, FrontAuthConfig, FrontAuthConfigBuilder,
};
use super::state::FrontAuthState;
use super::traits::LoginService;
use super::types::UserLoginResult;
use crate::protector::RootProtector;

#[derive(Debug, thiserror::Error)]
#[error("mock login error: {0}")]
pub(super) struct MockError(pub String);

/// Scriptable login backend: returns the configured result for every
/// scheme and every login path.
#[derive(Default)]
pub(super) struct MockLoginService {
    pub response: Mutex<Option<UserLoginResult>>,
}

impl MockLoginService {
    pub(super) fn returning(result: UserLoginResult) -> Self {
        Self {
            response: Mutex::new(Some(result)),
        }
    }
}

impl LoginService for MockLoginService {
    type Error = MockError;

    async fn create_payload(
        &self,
        _scheme: &str,
        raw: serde_json::Value,
    ) -> Result<serde_json::Value, MockError> {
        Ok(raw)
    }

    async fn login(
        &self,
        _scheme: &str,
        _payload: serde_json::Value,
        _actual_login: bool,
    ) -> Result<UserLoginResult, MockError> {
        self.response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MockError("no result configured".into()))
    }

    async fn basic_login(
        &self,
        _user_name: &str,
        _password: &str,
        _actual_login: bool,
    ) -> Result<Option<UserLoginResult>, MockError> {
        Ok(self.response.lock().unwrap().clone())
    }
}

/// Root-path test configuration with a fixed key and one allowed return
/// URL prefix.
pub(super) fn config_builder() -> FrontAuthConfigBuilder {
    FrontAuthConfig::builder()
        .root(RootProtector::new([9u8; 32]))
        .cookie_mode(CookieMode::RootPath)
        .cookie_secure_policy(CookieSecurePolicy::SameAsRequest)
        .allowed_return_urls(vec!["https://good/".into()])
}

pub(super) fn config() -> FrontAuthConfig {
    config_builder().build().expect("test config")
}

pub(super) fn with_options(mut config: FrontAuthConfig, opts: DynamicOptions) -> FrontAuthConfig {
    config.options = Arc::new(opts);
    config
}

pub(super) fn with_cookie_mode(mut config: FrontAuthConfig, mode: CookieMode) -> FrontAuthConfig {
    config.cookie_mode = mode;
    config
}

pub(super) fn state(config: FrontAuthConfig) -> FrontAuthState {
    FrontAuthState::new(config, MockLoginService::default())
}

pub(super) fn state_with(config: FrontAuthConfig, login: MockLoginService) -> FrontAuthState {
    FrontAuthState::new(config, login)
}
