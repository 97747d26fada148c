use std::future::Future;

use chrono::{DateTime, Utc};

use super::response::{self, AuthResponse, ErrorPayload};
use super::state::FrontAuthState;
use super::traits::ServiceError;
use super::types::UserLoginResult;
use crate::device;
use crate::envelope::ExtraData;
use crate::info::{AuthenticationInfo, FrontAuthenticationInfo, UserInfo};

/// Which entry point initiated the login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// `startLogin`: begins a redirect/popup remote flow.
    StartLogin,
    /// `unsafeDirectLogin`: scheme + raw payload posted directly.
    DirectLogin,
    /// `basicLogin`: user name + password.
    BasicLogin,
    /// Remote callback completing a started flow.
    RemoteLogin,
}

/// Everything a login attempt knows before calling the backend. Handed to
/// the optional validator / auto-create / auto-bind services.
#[derive(Debug, Clone)]
pub struct LoginContext {
    pub(super) mode: LoginMode,
    pub(super) initial: FrontAuthenticationInfo,
    pub(super) initial_scheme: Option<String>,
    pub(super) calling_scheme: String,
    pub(super) return_url: Option<String>,
    pub(super) caller_origin: Option<String>,
    pub(super) remember_me: bool,
    pub(super) impersonate_actual_user: bool,
    pub(super) user_data: ExtraData,
}

impl LoginContext {
    pub(super) fn new(
        mode: LoginMode,
        initial: FrontAuthenticationInfo,
        calling_scheme: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            initial,
            initial_scheme: None,
            calling_scheme: calling_scheme.into(),
            return_url: None,
            caller_origin: None,
            remember_me: false,
            impersonate_actual_user: false,
            user_data: Vec::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> LoginMode {
        self.mode
    }

    /// Authentication state at the start of the attempt.
    #[must_use]
    pub fn initial(&self) -> &FrontAuthenticationInfo {
        &self.initial
    }

    /// Scheme that started a remote flow, when different from the calling
    /// one.
    #[must_use]
    pub fn initial_scheme(&self) -> Option<&str> {
        self.initial_scheme.as_deref()
    }

    /// Scheme performing this login.
    #[must_use]
    pub fn calling_scheme(&self) -> &str {
        &self.calling_scheme
    }

    #[must_use]
    pub fn return_url(&self) -> Option<&str> {
        self.return_url.as_deref()
    }

    #[must_use]
    pub fn caller_origin(&self) -> Option<&str> {
        self.caller_origin.as_deref()
    }

    #[must_use]
    pub fn remember_me(&self) -> bool {
        self.remember_me
    }

    /// When set, the login keeps the current actual user and impersonates
    /// the logged-in identity instead of replacing the session.
    #[must_use]
    pub fn impersonate_actual_user(&self) -> bool {
        self.impersonate_actual_user
    }

    /// Opaque caller data carried through the flow and echoed on failure.
    #[must_use]
    pub fn user_data(&self) -> &ExtraData {
        &self.user_data
    }
}

/// Outcome of a unified login: the committed authentication (unchanged when
/// `committed` is false) and the structured response.
pub(super) struct LoginOutcome {
    pub fauth: FrontAuthenticationInfo,
    pub response: AuthResponse,
    /// False for parameter-validation failures: cookies are left alone.
    pub committed: bool,
}

/// Runs the login state machine.
///
/// `login_fn(actual_login)` wraps the backend call. With a validator
/// configured the first call is a dry run (`actual_login = false`) and the
/// commit call follows validator approval. `login_fn` resolving to
/// `Ok(None)` is a broken backend contract and is reported as
/// `InternalError`.
pub(super) async fn unified_login<F, Fut>(
    state: &FrontAuthState,
    ctx: &LoginContext,
    now: DateTime<Utc>,
    mut login_fn: F,
) -> LoginOutcome
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = Result<Option<UserLoginResult>, ServiceError>>,
{
    if let Some(error) = validate_core_parameters(state, ctx) {
        return reject(ctx, error);
    }

    let has_validator = state.validator.is_some();
    let mut result = match safe_call_login(ctx, &mut login_fn, !has_validator).await {
        Ok(result) => result,
        Err(error) => return commit_failure(state, ctx, now, error),
    };

    if result.is_success() {
        if let Some(validator) = &state.validator {
            match validator.validate_dyn(ctx, &result).await {
                Ok(None) => {
                    // Approved: run the backend for real.
                    result = match safe_call_login(ctx, &mut login_fn, true).await {
                        Ok(result) => result,
                        Err(error) => return commit_failure(state, ctx, now, error),
                    };
                }
                Ok(Some(replacement)) => {
                    // A successful replacement is committed as-is; a failed
                    // one vetoes the login.
                    result = replacement;
                }
                Err(e) => {
                    tracing::error!(error = %e, scheme = %ctx.calling_scheme, "Login validator failed");
                    return commit_failure(state, ctx, now, service_error(&e));
                }
            }
        }
    }

    if !result.is_success() {
        match handle_failure(state, ctx, result).await {
            FailureOutcome::Recovered(recovered) => result = recovered,
            FailureOutcome::Error(error) => return commit_failure(state, ctx, now, error),
        }
    }

    commit_success(state, ctx, now, result)
}

/// Parameter validation, ahead of any backend call.
pub(super) fn validate_core_parameters(
    state: &FrontAuthState,
    ctx: &LoginContext,
) -> Option<ErrorPayload> {
    if ctx.mode == LoginMode::StartLogin
        && ctx.return_url.is_some() == ctx.caller_origin.is_some()
    {
        // The error text equals the id on purpose: clients get the stable
        // identifier alone, in the body and in redirect parameters.
        return Some(ErrorPayload::id("ReturnXOrCaller", "ReturnXOrCaller"));
    }
    if ctx.initial.info.is_impersonated() && !ctx.impersonate_actual_user {
        return Some(ErrorPayload::id(
            "LoginWhileImpersonation",
            "LoginWhileImpersonation",
        ));
    }
    if let Some(url) = &ctx.return_url {
        let allowed = state
            .allowed_return_urls
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()));
        if !allowed {
            return Some(ErrorPayload::id(
                "DisallowedReturnUrl",
                "DisallowedReturnUrl",
            ));
        }
    }
    None
}

/// Calls the backend, converting contract violations (`Ok(None)`) and
/// service errors into reportable payloads.
async fn safe_call_login<F, Fut>(
    ctx: &LoginContext,
    login_fn: &mut F,
    actual_login: bool,
) -> Result<UserLoginResult, ErrorPayload>
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = Result<Option<UserLoginResult>, ServiceError>>,
{
    match login_fn(actual_login).await {
        Ok(Some(result)) => Ok(result),
        Ok(None) => {
            tracing::error!(
                scheme = %ctx.calling_scheme,
                "Login function returned no result: broken backend contract"
            );
            Err(ErrorPayload::id("InternalError", "InternalError"))
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                scheme = %ctx.calling_scheme,
                actual_login,
                "Login backend call failed"
            );
            Err(service_error(&e))
        }
    }
}

fn service_error(e: &ServiceError) -> ErrorPayload {
    ErrorPayload::id(e.type_name, e.message.clone())
}

enum FailureOutcome {
    /// An auto service turned the failure into a successful login.
    Recovered(UserLoginResult),
    Error(ErrorPayload),
}

/// Failure branches: impersonation propagates the failure as-is;
/// unregistered identities go to auto-binding (someone logged in) or
/// auto-registration (nobody logged in); anything else is a plain scheme
/// failure.
async fn handle_failure(
    state: &FrontAuthState,
    ctx: &LoginContext,
    failed: UserLoginResult,
) -> FailureOutcome {
    if ctx.impersonate_actual_user {
        return FailureOutcome::Error(ErrorPayload::scheme_failure(&failed));
    }
    if !failed.is_unregistered_user {
        return FailureOutcome::Error(ErrorPayload::scheme_failure(&failed));
    }

    let currently_logged_in = !ctx.initial.info.user().is_anonymous();
    if currently_logged_in {
        match &state.auto_bind {
            Some(auto_bind) => match auto_bind.bind_and_login_dyn(ctx, &failed).await {
                Ok(Some(result)) if result.is_success() => FailureOutcome::Recovered(result),
                Ok(Some(result)) => {
                    FailureOutcome::Error(ErrorPayload::scheme_failure(&result))
                }
                Ok(None) => FailureOutcome::Error(auto_binding_disabled()),
                Err(e) => {
                    tracing::error!(error = %e, scheme = %ctx.calling_scheme, "Auto-binding service failed");
                    FailureOutcome::Error(service_error(&e))
                }
            },
            None => FailureOutcome::Error(auto_binding_disabled()),
        }
    } else {
        match &state.auto_create {
            Some(auto_create) => match auto_create.create_and_login_dyn(ctx, &failed).await {
                Ok(Some(result)) if result.is_success() => FailureOutcome::Recovered(result),
                Ok(Some(result)) => {
                    FailureOutcome::Error(ErrorPayload::scheme_failure(&result))
                }
                Ok(None) => FailureOutcome::Error(auto_registration_disabled()),
                Err(e) => {
                    tracing::error!(error = %e, scheme = %ctx.calling_scheme, "Auto-create service failed");
                    FailureOutcome::Error(service_error(&e))
                }
            },
            None => FailureOutcome::Error(auto_registration_disabled()),
        }
    }
}

fn auto_binding_disabled() -> ErrorPayload {
    ErrorPayload::id(
        "Account.AutoBindingDisabled",
        "Automatic account binding is disabled.",
    )
}

fn auto_registration_disabled() -> ErrorPayload {
    ErrorPayload::id(
        "User.AutoRegistrationDisabled",
        "Automatic user registration is disabled.",
    )
}

/// Builds the committed info for a successful result: device id preserved
/// or minted, expiration from the dynamic options, per-scheme critical
/// elevation, and the impersonation shortcut.
fn commit_success(
    state: &FrontAuthState,
    ctx: &LoginContext,
    now: DateTime<Utc>,
    result: UserLoginResult,
) -> LoginOutcome {
    let Some(user) = result.user_info else {
        // Unreachable: only called with successful results.
        return commit_failure(
            state,
            ctx,
            now,
            ErrorPayload::id("InternalError", "InternalError"),
        );
    };

    let opts = state.options.current();
    let mut expires = now + opts.expire_time_span;
    let critical_expires = opts
        .schemes_critical_time_span
        .get(&ctx.calling_scheme)
        .copied()
        .filter(|span| *span > chrono::Duration::zero())
        .map(|span| now + span);
    if let Some(cexp) = critical_expires {
        if expires < cexp {
            expires = cexp;
        }
    }

    let initial = &ctx.initial.info;
    let device_id = if initial.device_id().is_empty() {
        device::new_device_id()
    } else {
        initial.device_id().to_string()
    };

    let keeps_identity = ctx.impersonate_actual_user
        && !initial.actual_user().is_anonymous()
        && !user.is_anonymous();
    let info = if keeps_identity {
        // The session identity survives; only the effective user, the
        // expiration and the (possibly freshly minted) device id move.
        // TODO: apply the scheme critical time span here too; today an
        // impersonating login never elevates criticalExpires.
        let base = if user.user_id() == initial.actual_user().user_id() {
            initial.clone()
        } else {
            initial.impersonate(user)
        };
        base.set_expires(Some(expires)).with_device_id(device_id)
    } else {
        AuthenticationInfo::new(user, Some(expires), critical_expires, device_id)
    };

    let fauth = FrontAuthenticationInfo::new(info, ctx.remember_me);
    let body = response::success_body(state, &fauth, now);
    LoginOutcome {
        fauth,
        response: AuthResponse {
            body,
            error: None,
            return_url: ctx.return_url.clone(),
            caller_origin: ctx.caller_origin.clone(),
            initial_scheme: ctx.initial_scheme.clone(),
            calling_scheme: Some(ctx.calling_scheme.clone()),
        },
        committed: true,
    }
}

/// A failed login discards any prior authentication: the committed info is
/// a fresh anonymous one that only keeps the device id.
fn commit_failure(
    state: &FrontAuthState,
    ctx: &LoginContext,
    now: DateTime<Utc>,
    error: ErrorPayload,
) -> LoginOutcome {
    let info = AuthenticationInfo::new(
        UserInfo::anonymous(),
        None,
        None,
        ctx.initial.info.device_id(),
    );
    let fauth = FrontAuthenticationInfo::new(info, false);
    let mut body = response::success_body(state, &fauth, now);
    response::apply_error(
        &mut body,
        &error,
        ctx.initial_scheme.as_deref(),
        Some(&ctx.calling_scheme),
        &ctx.user_data,
    );
    LoginOutcome {
        fauth,
        response: AuthResponse {
            body,
            error: Some(error),
            return_url: ctx.return_url.clone(),
            caller_origin: ctx.caller_origin.clone(),
            initial_scheme: ctx.initial_scheme.clone(),
            calling_scheme: Some(ctx.calling_scheme.clone()),
        },
        committed: true,
    }
}

/// Parameter-validation short-circuit: the current authentication is left
/// untouched and no cookie is written.
pub(super) fn reject(ctx: &LoginContext, error: ErrorPayload) -> LoginOutcome {
    let mut body = serde_json::json!({});
    response::apply_error(
        &mut body,
        &error,
        ctx.initial_scheme.as_deref(),
        Some(&ctx.calling_scheme),
        &ctx.user_data,
    );
    LoginOutcome {
        fauth: ctx.initial.clone(),
        response: AuthResponse {
            body,
            error: Some(error),
            return_url: ctx.return_url.clone(),
            caller_origin: ctx.caller_origin.clone(),
            initial_scheme: ctx.initial_scheme.clone(),
            calling_scheme: Some(ctx.calling_scheme.clone()),
        },
        committed: false,
    }
}
