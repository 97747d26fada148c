#![doc = include_str!("../README.md")]

pub mod device;
pub mod envelope;
pub mod error;
pub mod info;
pub mod protector;

#[cfg(feature = "axum")]
pub mod middleware;

// Re-exports for convenient access
pub use error::{Error, ProtectError};
pub use info::{AuthLevel, AuthenticationInfo, FrontAuthenticationInfo, UserInfo, UserSchemeInfo};
#[cfg(feature = "axum")]
pub use middleware::{
    FrontAuth, FrontAuthConfig, FrontAuthState, LoginService, UserLoginResult, auth_routes,
};
pub use protector::{Protector, RootProtector};
