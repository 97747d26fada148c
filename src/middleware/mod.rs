//! Plug-and-play web-front authentication middleware for Axum.
//!
//! The resolver middleware materializes a
//! [`FrontAuthenticationInfo`](crate::info::FrontAuthenticationInfo) from
//! whatever envelope the request carries (bearer header, session cookie,
//! long-term cookie) and caches it per request; the mounted routes run the
//! login pipeline and keep the cookies in sync.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use webfront_auth::middleware::{FrontAuthConfig, FrontAuthState, FrontAuth, auth_routes};
//!
//! // 1. Implement the LoginService trait for your user store
//! // 2. Configure from environment (WFA_ROOT_KEY is required)
//! let state = FrontAuthState::new(FrontAuthConfig::from_env()?, my_login_service);
//!
//! // 3. Mount the auth routes
//! let app = axum::Router::new()
//!     .merge(auth_routes(state.clone()));
//!
//! // 4. Use the FrontAuth extractor in handlers
//! async fn handler(FrontAuth(auth): FrontAuth) -> String {
//!     format!("hello, {}", auth.info.user().user_name())
//! }
//! ```

mod config;
mod cookies;
mod error;
mod login;
mod resolver;
mod response;
mod routes;
mod state;
mod traits;
mod types;

#[cfg(test)]
mod testing;

pub use config::{
    ChallengeFn, CookieMode, CookieSecurePolicy, DynamicOptions, FrontAuthConfig,
    FrontAuthConfigBuilder, OptionsSource,
};
pub use error::AuthError;
pub use login::{LoginContext, LoginMode};
pub use resolver::{FrontAuth, resolve_request};
pub use routes::auth_routes;
pub use state::FrontAuthState;
pub use traits::{
    AutoBindingAccountService, AutoCreateAccountService, DynamicScopeProvider, LoginService,
    LoginValidator, ServiceError,
};
pub use types::UserLoginResult;
