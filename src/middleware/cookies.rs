use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use time::{Duration as CookieDuration, OffsetDateTime};

use super::config::{CookieMode, CookieSecurePolicy};
use super::state::FrontAuthState;
use crate::envelope::{self, LongTermPayload};
use crate::info::{AuthLevel, FrontAuthenticationInfo};

/// Cookies carrying `fauth`, ready to be added to a jar or a response.
///
/// Whenever a cookie's preconditions do not hold, a removal cookie is
/// produced instead so the browser discards any stale copy.
pub(super) fn set_cookies(
    state: &FrontAuthState,
    fauth: &FrontAuthenticationInfo,
    now: DateTime<Utc>,
    secure_request: bool,
) -> Vec<Cookie<'static>> {
    let opts = state.options.current();
    let path = cookie_path(state);
    let mut cookies = Vec::with_capacity(2);

    // Session cookie: only a live Normal (or better) authentication is
    // worth protecting and re-sending.
    let session_live = state.cookie_mode != CookieMode::None
        && fauth.info.level(now) >= AuthLevel::Normal;
    if session_live {
        match envelope::protect_front_auth(&state.cookie_protector, fauth) {
            Ok(value) => {
                let secure = match state.cookie_secure_policy {
                    CookieSecurePolicy::None => false,
                    CookieSecurePolicy::Always => true,
                    CookieSecurePolicy::SameAsRequest => secure_request,
                };
                let mut builder = Cookie::build((state.auth_cookie_name.to_string(), value))
                    .http_only(true)
                    .secure(secure)
                    .same_site(SameSite::Lax)
                    .path(path.to_string());
                if fauth.remember_me {
                    if let Some(expires) = fauth.info.expires() {
                        if let Ok(at) = OffsetDateTime::from_unix_timestamp(expires.timestamp()) {
                            builder = builder.expires(at);
                        }
                    }
                }
                cookies.push(builder.build());
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to protect the session envelope");
                cookies.push(removal_cookie(&state.auth_cookie_name, path));
            }
        }
    } else {
        cookies.push(removal_cookie(&state.auth_cookie_name, path));
    }

    // Long-term cookie: carries the device id always, and the unsafe user
    // when remembering.
    let remembering = fauth.remember_me && !fauth.info.actual_user().is_anonymous();
    let device_id = fauth.info.device_id();
    if opts.use_long_term_cookie && (remembering || !device_id.is_empty()) {
        let payload = LongTermPayload::remembering(
            remembering.then(|| fauth.info.actual_user()),
            device_id,
        );
        match serde_json::to_string(&payload) {
            Ok(json) => {
                let value = urlencoding::encode(&json).into_owned();
                let mut builder = Cookie::build((state.long_term_cookie_name.to_string(), value))
                    .http_only(true)
                    .secure(false)
                    .same_site(SameSite::Lax)
                    .path(path.to_string());
                let expires = now + opts.unsafe_expire_time_span;
                if let Ok(at) = OffsetDateTime::from_unix_timestamp(expires.timestamp()) {
                    builder = builder.expires(at);
                }
                cookies.push(builder.build());
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize the long-term payload");
                cookies.push(removal_cookie(&state.long_term_cookie_name, path));
            }
        }
    } else {
        cookies.push(removal_cookie(&state.long_term_cookie_name, path));
    }

    cookies
}

/// Removal cookies for both authentication cookies (logout). The request
/// slot is left untouched.
pub(super) fn clear_cookies(state: &FrontAuthState) -> Vec<Cookie<'static>> {
    let path = cookie_path(state);
    vec![
        removal_cookie(&state.auth_cookie_name, path),
        removal_cookie(&state.long_term_cookie_name, path),
    ]
}

pub(super) fn cookie_path(state: &FrontAuthState) -> &str {
    match state.cookie_mode {
        CookieMode::WebFrontPath => &state.entry_path,
        CookieMode::RootPath | CookieMode::None => "/",
    }
}

fn removal_cookie(name: &str, path: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path(path.to_string())
        .max_age(CookieDuration::ZERO)
        .build()
}
