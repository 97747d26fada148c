use axum::extract::{FromRef, FromRequestParts, Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};

use super::config::CookieMode;
use super::cookies;
use super::state::FrontAuthState;
use crate::device;
use crate::envelope::{self, LongTermPayload};
use crate::info::{AuthLevel, AuthenticationInfo, FrontAuthenticationInfo, UserInfo};

/// Which tier produced the authentication info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CredentialSource {
    Bearer,
    SessionCookie,
    LongTermCookie,
    Synthesized,
    None,
}

/// Per-request resolution outcome, cached in the request extensions. The
/// first writer wins; re-entrant resolutions return the cached value.
#[derive(Debug, Clone)]
pub(super) struct ResolvedAuth {
    pub fauth: FrontAuthenticationInfo,
    pub source: CredentialSource,
    /// A cookie write was scheduled (fresh device id or sliding renewal).
    pub write_cookies: bool,
}

/// Three-tier credential resolution: bearer header, then session cookie,
/// then long-term cookie; synthesizes a device-only identity when
/// appropriate. Decode failures are logged and treated as an absent
/// envelope, never as an authentication failure.
pub(super) fn resolve(
    state: &FrontAuthState,
    headers: &HeaderMap,
    path: &str,
    now: DateTime<Utc>,
) -> ResolvedAuth {
    let opts = state.options.current();

    // 1. Bearer header wins over everything.
    if let Some(value) = headers.get(&*state.bearer_header_name) {
        if let Ok(value) = value.to_str() {
            if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
                match envelope::unprotect_front_auth(&state.token_protector, value[7..].trim()) {
                    Ok(fauth) => {
                        return ResolvedAuth {
                            fauth: checked(fauth, now),
                            source: CredentialSource::Bearer,
                            write_cookies: false,
                        };
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring invalid bearer envelope");
                    }
                }
            }
        }
    }

    let jar = CookieJar::from_headers(headers);

    // 2. Session cookie.
    if state.cookie_mode != CookieMode::None {
        if let Some(cookie) = jar.get(&state.auth_cookie_name) {
            match envelope::unprotect_front_auth(&state.cookie_protector, cookie.value()) {
                Ok(fauth) => {
                    let fauth = checked(fauth, now);
                    // Sliding expiration only ever applies to root-path
                    // session cookies.
                    let (fauth, renewed) = apply_sliding(state, &opts, fauth, now);
                    return ResolvedAuth {
                        fauth,
                        source: CredentialSource::SessionCookie,
                        write_cookies: renewed,
                    };
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring invalid session cookie");
                }
            }
        }
    }

    // 3. Long-term cookie: device id and unsafe user, no expirations.
    if opts.use_long_term_cookie {
        if let Some(cookie) = jar.get(&state.long_term_cookie_name) {
            match parse_long_term(cookie.value()) {
                Ok(payload) => {
                    let device_id = payload.device_id.clone().unwrap_or_default();
                    let user = payload.unsafe_user();
                    let remember_me = user.is_some();
                    let info = AuthenticationInfo::new(
                        user.unwrap_or_else(UserInfo::anonymous),
                        None,
                        None,
                        device_id,
                    );
                    return ResolvedAuth {
                        fauth: FrontAuthenticationInfo::new(info, remember_me),
                        source: CredentialSource::LongTermCookie,
                        write_cookies: false,
                    };
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring invalid long-term cookie");
                }
            }
        }
    }

    // 4. Nothing found: mint a device identity where cookies can carry it.
    let synthesize = state.cookie_mode == CookieMode::RootPath
        || (state.cookie_mode == CookieMode::WebFrontPath && state.is_under_entry_path(path));
    if synthesize {
        let info = AuthenticationInfo::new(
            UserInfo::anonymous(),
            None,
            None,
            device::new_device_id(),
        );
        return ResolvedAuth {
            fauth: FrontAuthenticationInfo::new(info, false),
            source: CredentialSource::Synthesized,
            write_cookies: true,
        };
    }

    // 5. The distinguished empty value; no cookies are written.
    ResolvedAuth {
        fauth: FrontAuthenticationInfo::none(),
        source: CredentialSource::None,
        write_cookies: false,
    }
}

fn checked(fauth: FrontAuthenticationInfo, now: DateTime<Utc>) -> FrontAuthenticationInfo {
    FrontAuthenticationInfo::new(fauth.info.check_expiration(now), fauth.remember_me)
}

fn apply_sliding(
    state: &FrontAuthState,
    opts: &super::config::DynamicOptions,
    fauth: FrontAuthenticationInfo,
    now: DateTime<Utc>,
) -> (FrontAuthenticationInfo, bool) {
    if state.cookie_mode != CookieMode::RootPath
        || opts.sliding_expiration_time <= chrono::Duration::zero()
        || fauth.info.level(now) < AuthLevel::Normal
    {
        return (fauth, false);
    }
    let half_sliding = opts.sliding_expiration_time / 2;
    match fauth.info.expires() {
        Some(expires) if expires <= now + half_sliding => {
            let renewed = fauth.info.set_expires(Some(now + opts.sliding_expiration_time));
            (FrontAuthenticationInfo::new(renewed, fauth.remember_me), true)
        }
        _ => (fauth, false),
    }
}

fn parse_long_term(raw: &str) -> Result<LongTermPayload, serde_json::Error> {
    let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |s| s.into_owned());
    serde_json::from_str(&decoded)
}

/// Resolver middleware: resolves once per request, caches the result in the
/// request extensions (the single-writer slot every later reader sees) and
/// emits any scheduled cookie write on the response, unless a handler
/// already set the authentication cookies itself.
///
/// Install with `axum::middleware::from_fn_with_state(state, resolve_request)`.
/// [`auth_routes`](super::auth_routes) installs it on its own routes.
pub async fn resolve_request(
    State(state): State<FrontAuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let now = Utc::now();
    let secure_request = request_is_https(&req);
    let resolved = match req.extensions().get::<ResolvedAuth>() {
        Some(cached) => cached.clone(),
        None => {
            let resolved = resolve(&state, req.headers(), req.uri().path(), now);
            tracing::debug!(
                source = ?resolved.source,
                user_id = resolved.fauth.info.user().user_id(),
                "Resolved front authentication"
            );
            req.extensions_mut().insert(resolved.clone());
            resolved
        }
    };

    let mut response = next.run(req).await;

    if resolved.write_cookies && !sets_auth_cookies(&response, &state) {
        for cookie in cookies::set_cookies(&state, &resolved.fauth, now, secure_request) {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
    }
    response
}

fn request_is_https(req: &Request) -> bool {
    req.uri().scheme_str() == Some("https") || headers_indicate_https(req.headers())
}

/// HTTPS detection from headers alone (`X-Forwarded-Proto`), for handlers
/// that no longer see the request URI.
pub(super) fn headers_indicate_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("https"))
}

fn sets_auth_cookies(response: &Response, state: &FrontAuthState) -> bool {
    let session_prefix = format!("{}=", state.auth_cookie_name);
    let long_term_prefix = format!("{}=", state.long_term_cookie_name);
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&session_prefix) || v.starts_with(&long_term_prefix))
}

/// Extractor for the resolved [`FrontAuthenticationInfo`].
///
/// Reads the request slot populated by [`resolve_request`], resolving on
/// the spot when the middleware is not installed (cookie writes scheduled
/// by such a late resolution are dropped).
///
/// # Example
///
/// ```rust,ignore
/// async fn me(FrontAuth(auth): FrontAuth) -> impl IntoResponse {
///     Json(auth.info)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FrontAuth(pub FrontAuthenticationInfo);

impl<S> FromRequestParts<S> for FrontAuth
where
    S: Send + Sync,
    FrontAuthState: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(cached) = parts.extensions.get::<ResolvedAuth>() {
            return Ok(Self(cached.fauth.clone()));
        }
        let state = FrontAuthState::from_ref(state);
        let resolved = resolve(&state, &parts.headers, parts.uri.path(), Utc::now());
        let fauth = resolved.fauth.clone();
        parts.extensions.insert(resolved);
        Ok(Self(fauth))
    }
}
