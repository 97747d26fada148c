use std::future::Future;
use std::pin::Pin;

use super::login::LoginContext;
use super::types::UserLoginResult;

/// Consumer-provided login backend.
///
/// This is the only mandatory service. Every login-producing path funnels
/// into [`login`](Self::login) (or [`basic_login`](Self::basic_login) for
/// the user-name/password route).
///
/// # Example
///
/// ```rust,ignore
/// impl LoginService for MyUserStore {
///     type Error = MyError;
///
///     async fn create_payload(
///         &self,
///         scheme: &str,
///         raw: serde_json::Value,
///     ) -> Result<serde_json::Value, MyError> {
///         Ok(raw)
///     }
///
///     async fn login(
///         &self,
///         scheme: &str,
///         payload: serde_json::Value,
///         actual_login: bool,
///     ) -> Result<UserLoginResult, MyError> {
///         let identity = self.exchange(scheme, &payload).await?;
///         self.find(scheme, &identity, actual_login).await
///     }
/// }
/// ```
pub trait LoginService: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Builds the scheme payload from the raw request parameters (query
    /// pairs of a remote callback, or the posted `payload` of a direct
    /// login). Called once per login, before any backend call.
    fn create_payload(
        &self,
        scheme: &str,
        raw: serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, Self::Error>> + Send;

    /// Authenticates the payload against `scheme`.
    ///
    /// When `actual_login` is false this is a dry run: the backend must
    /// resolve the identity without recording a login (no `lastUsed` bump,
    /// no side effects). A validator-approved dry run is always followed by
    /// an `actual_login = true` call.
    fn login(
        &self,
        scheme: &str,
        payload: serde_json::Value,
        actual_login: bool,
    ) -> impl Future<Output = Result<UserLoginResult, Self::Error>> + Send;

    /// User-name/password login. Returning `Ok(None)` means basic login is
    /// not supported by this backend; the route reports an internal error.
    fn basic_login(
        &self,
        user_name: &str,
        password: &str,
        actual_login: bool,
    ) -> impl Future<Output = Result<Option<UserLoginResult>, Self::Error>> + Send {
        let _ = (user_name, password, actual_login);
        async { Ok(None) }
    }
}

/// Optional gate between a successful dry-run login and its commit.
///
/// When configured, the orchestrator first runs the backend with
/// `actual_login = false`, then consults the validator:
/// `Ok(None)` approves (the commit call follows), `Ok(Some(result))` with a
/// failed result vetoes the login, and a successful result replaces the
/// candidate.
pub trait LoginValidator: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn validate(
        &self,
        ctx: &LoginContext,
        candidate: &UserLoginResult,
    ) -> impl Future<Output = Result<Option<UserLoginResult>, Self::Error>> + Send;
}

/// Optional account auto-registration.
///
/// Consulted when a backend reports an unregistered identity and nobody is
/// currently logged in. `Ok(None)` means "not my responsibility": the
/// orchestrator falls back to `User.AutoRegistrationDisabled`.
pub trait AutoCreateAccountService: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn create_and_login(
        &self,
        ctx: &LoginContext,
        failed: &UserLoginResult,
    ) -> impl Future<Output = Result<Option<UserLoginResult>, Self::Error>> + Send;
}

/// Optional account binding.
///
/// Consulted when a backend reports an unregistered identity while a user
/// is already logged in. `Ok(None)` falls back to
/// `Account.AutoBindingDisabled`.
pub trait AutoBindingAccountService: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn bind_and_login(
        &self,
        ctx: &LoginContext,
        failed: &UserLoginResult,
    ) -> impl Future<Output = Result<Option<UserLoginResult>, Self::Error>> + Send;
}

/// Optional provider of additional challenge scopes for a scheme, read at
/// `startLogin` time.
pub trait DynamicScopeProvider: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn scopes(&self, scheme: &str) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send;
}

/// A service call failure, keeping the concrete error type name: it becomes
/// the `errorId` reported to the client.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{type_name}: {message}")]
pub struct ServiceError {
    pub type_name: &'static str,
    pub message: String,
}

impl ServiceError {
    fn of<E: std::error::Error>(error: &E) -> Self {
        Self {
            type_name: short_type_name::<E>(),
            message: error.to_string(),
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Object-safe wrappers (needed for Arc<dyn>).

pub(super) trait LoginServiceDyn: Send + Sync {
    fn create_payload_dyn<'a>(
        &'a self,
        scheme: &'a str,
        raw: serde_json::Value,
    ) -> BoxFuture<'a, Result<serde_json::Value, ServiceError>>;

    fn login_dyn<'a>(
        &'a self,
        scheme: &'a str,
        payload: serde_json::Value,
        actual_login: bool,
    ) -> BoxFuture<'a, Result<UserLoginResult, ServiceError>>;

    fn basic_login_dyn<'a>(
        &'a self,
        user_name: &'a str,
        password: &'a str,
        actual_login: bool,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>>;
}

impl<T: LoginService> LoginServiceDyn for T {
    fn create_payload_dyn<'a>(
        &'a self,
        scheme: &'a str,
        raw: serde_json::Value,
    ) -> BoxFuture<'a, Result<serde_json::Value, ServiceError>> {
        Box::pin(async move {
            self.create_payload(scheme, raw)
                .await
                .map_err(|e| ServiceError::of(&e))
        })
    }

    fn login_dyn<'a>(
        &'a self,
        scheme: &'a str,
        payload: serde_json::Value,
        actual_login: bool,
    ) -> BoxFuture<'a, Result<UserLoginResult, ServiceError>> {
        Box::pin(async move {
            self.login(scheme, payload, actual_login)
                .await
                .map_err(|e| ServiceError::of(&e))
        })
    }

    fn basic_login_dyn<'a>(
        &'a self,
        user_name: &'a str,
        password: &'a str,
        actual_login: bool,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>> {
        Box::pin(async move {
            self.basic_login(user_name, password, actual_login)
                .await
                .map_err(|e| ServiceError::of(&e))
        })
    }
}

pub(super) trait LoginValidatorDyn: Send + Sync {
    fn validate_dyn<'a>(
        &'a self,
        ctx: &'a LoginContext,
        candidate: &'a UserLoginResult,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>>;
}

impl<T: LoginValidator> LoginValidatorDyn for T {
    fn validate_dyn<'a>(
        &'a self,
        ctx: &'a LoginContext,
        candidate: &'a UserLoginResult,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>> {
        Box::pin(async move {
            self.validate(ctx, candidate)
                .await
                .map_err(|e| ServiceError::of(&e))
        })
    }
}

pub(super) trait AutoCreateAccountServiceDyn: Send + Sync {
    fn create_and_login_dyn<'a>(
        &'a self,
        ctx: &'a LoginContext,
        failed: &'a UserLoginResult,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>>;
}

impl<T: AutoCreateAccountService> AutoCreateAccountServiceDyn for T {
    fn create_and_login_dyn<'a>(
        &'a self,
        ctx: &'a LoginContext,
        failed: &'a UserLoginResult,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>> {
        Box::pin(async move {
            self.create_and_login(ctx, failed)
                .await
                .map_err(|e| ServiceError::of(&e))
        })
    }
}

pub(super) trait AutoBindingAccountServiceDyn: Send + Sync {
    fn bind_and_login_dyn<'a>(
        &'a self,
        ctx: &'a LoginContext,
        failed: &'a UserLoginResult,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>>;
}

impl<T: AutoBindingAccountService> AutoBindingAccountServiceDyn for T {
    fn bind_and_login_dyn<'a>(
        &'a self,
        ctx: &'a LoginContext,
        failed: &'a UserLoginResult,
    ) -> BoxFuture<'a, Result<Option<UserLoginResult>, ServiceError>> {
        Box::pin(async move {
            self.bind_and_login(ctx, failed)
                .await
                .map_err(|e| ServiceError::of(&e))
        })
    }
}

pub(super) trait DynamicScopeProviderDyn: Send + Sync {
    fn scopes_dyn<'a>(&'a self, scheme: &'a str)
    -> BoxFuture<'a, Result<Vec<String>, ServiceError>>;
}

impl<T: DynamicScopeProvider> DynamicScopeProviderDyn for T {
    fn scopes_dyn<'a>(
        &'a self,
        scheme: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ServiceError>> {
        Box::pin(async move { self.scopes(scheme).await.map_err(|e| ServiceError::of(&e)) })
    }
}
