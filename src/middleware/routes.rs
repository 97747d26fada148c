use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use serde_json::json;

use super::cookies;
use super::error::AuthError;
use super::login::{self, LoginContext, LoginMode, LoginOutcome};
use super::resolver::{FrontAuth, headers_indicate_https, resolve_request};
use super::response::{self, ErrorPayload};
use super::state::FrontAuthState;
use super::types::{
    BasicLoginBody, DirectLoginBody, RemoteAuthProps, StartLoginParams, user_data_from_json,
};
use crate::envelope;
use crate::info::FrontAuthenticationInfo;

/// Create the web-front authentication router.
///
/// Mounts the following routes under the configured entry path (default
/// `/c`), with the resolver middleware installed:
/// - `POST /basicLogin` — user name + password
/// - `POST /unsafeDirectLogin` — scheme + raw payload
/// - `GET|POST /startLogin` — begin a redirect/popup remote flow
/// - `GET|POST /remoteLogin/{scheme}` — remote callback completing it
/// - `GET|POST /refresh` — re-issue the envelope
/// - `GET /token` — bearer envelope for the current session
/// - `GET|POST /logout` — clear authentication cookies
///
/// # Example
///
/// ```rust,ignore
/// let state = FrontAuthState::new(FrontAuthConfig::from_env()?, login_service);
/// let app = Router::new()
///     .merge(auth_routes(state.clone()));
/// ```
pub fn auth_routes(state: FrontAuthState) -> Router {
    let entry = if &*state.entry_path == "/" {
        String::new()
    } else {
        state.entry_path.to_string()
    };

    Router::new()
        .route(&format!("{entry}/basicLogin"), post(basic_login))
        .route(
            &format!("{entry}/unsafeDirectLogin"),
            post(unsafe_direct_login),
        )
        .route(
            &format!("{entry}/startLogin"),
            get(start_login).post(start_login),
        )
        .route(
            &format!("{entry}/remoteLogin/{{scheme}}"),
            get(remote_login).post(remote_login),
        )
        .route(&format!("{entry}/refresh"), get(refresh).post(refresh))
        .route(&format!("{entry}/token"), get(token))
        .route(&format!("{entry}/logout"), get(logout).post(logout))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            resolve_request,
        ))
        .with_state(state)
}

// ── Basic login ────────────────────────────────────────────────────

async fn basic_login(
    State(state): State<FrontAuthState>,
    FrontAuth(initial): FrontAuth,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<BasicLoginBody>,
) -> Response {
    let now = Utc::now();
    let mut ctx = LoginContext::new(LoginMode::BasicLogin, initial, "Basic");
    ctx.remember_me = body.remember_me;
    ctx.impersonate_actual_user = body.impersonate_actual_user;
    ctx.user_data = user_data_from_json(body.user_data);

    let login = state.login.clone();
    let user_name = body.user_name;
    let password = body.password;
    let outcome = login::unified_login(&state, &ctx, now, move |actual_login| {
        let login = login.clone();
        let user_name = user_name.clone();
        let password = password.clone();
        async move {
            login
                .basic_login_dyn(&user_name, &password, actual_login)
                .await
        }
    })
    .await;

    respond(&state, jar, &headers, outcome)
}

// ── Unsafe direct login ────────────────────────────────────────────

async fn unsafe_direct_login(
    State(state): State<FrontAuthState>,
    FrontAuth(initial): FrontAuth,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<DirectLoginBody>,
) -> Response {
    let mut ctx = LoginContext::new(LoginMode::DirectLogin, initial, body.provider.clone());
    ctx.remember_me = body.remember_me;
    ctx.impersonate_actual_user = body.impersonate_actual_user;
    ctx.user_data = user_data_from_json(body.user_data);

    let outcome = login_with_payload(&state, &ctx, body.provider, body.payload).await;
    respond(&state, jar, &headers, outcome)
}

// ── Start login (remote challenge) ─────────────────────────────────

async fn start_login(
    State(state): State<FrontAuthState>,
    FrontAuth(initial): FrontAuth,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = StartLoginParams::from_pairs(pairs);
    let Some(scheme) = params.scheme else {
        return AuthError::BadRequest("scheme is required".into()).into_response();
    };

    let mut ctx = LoginContext::new(LoginMode::StartLogin, initial, scheme.clone());
    ctx.initial_scheme = Some(scheme.clone());
    ctx.return_url = params.return_url;
    ctx.caller_origin = params.caller_origin;
    ctx.remember_me = params.remember_me;
    ctx.impersonate_actual_user = params.impersonate_actual_user;
    ctx.user_data = params.user_data;

    if let Some(error) = login::validate_core_parameters(&state, &ctx) {
        return response::into_http(login::reject(&ctx, error).response);
    }
    let Some(challenge) = &state.challenge else {
        tracing::error!(scheme = %scheme, "startLogin without a configured remote challenge");
        let error = ErrorPayload::id("InternalError", "No remote challenge is configured.");
        return response::into_http(login::reject(&ctx, error).response);
    };

    // The envelope carried across the redirect captures the requested
    // rememberMe so the callback can honor it.
    let carried = FrontAuthenticationInfo::new(ctx.initial.info.clone(), ctx.remember_me);
    let current = match envelope::protect_front_auth(&state.token_protector, &carried) {
        Ok(sealed) => Some(sealed),
        Err(e) => {
            tracing::error!(error = %e, "Failed to protect the carried envelope");
            None
        }
    };
    let props = RemoteAuthProps {
        current,
        initial_scheme: ctx.initial_scheme.clone(),
        caller_origin: ctx.caller_origin.clone(),
        return_url: ctx.return_url.clone(),
        user_data: ctx.user_data.clone(),
        impersonate_actual_user: ctx.impersonate_actual_user,
    };
    let sealed = match props.protect(&state.extra_protector) {
        Ok(sealed) => sealed,
        Err(e) => {
            tracing::error!(error = %e, "Failed to protect the login state");
            let error = ErrorPayload::id("InternalError", "InternalError");
            return response::into_http(login::reject(&ctx, error).response);
        }
    };

    let scopes = match &state.scope_provider {
        Some(provider) => match provider.scopes_dyn(&scheme).await {
            Ok(scopes) => scopes,
            Err(e) => {
                tracing::warn!(error = %e, scheme = %scheme, "Scope provider failed; continuing without scopes");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let url = challenge(&scheme, &sealed, &scopes);
    response::into_http(response::AuthResponse {
        body: json!({}),
        error: None,
        return_url: Some(url),
        caller_origin: None,
        initial_scheme: None,
        calling_scheme: None,
    })
}

// ── Remote callback ────────────────────────────────────────────────

async fn remote_login(
    State(state): State<FrontAuthState>,
    Path(scheme): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let Some((_, sealed)) = pairs.iter().find(|(k, _)| k == "state") else {
        return AuthError::BadRequest("state is required".into()).into_response();
    };
    let props = match RemoteAuthProps::unprotect(&state.extra_protector, sealed) {
        Ok(props) => props,
        Err(e) => {
            tracing::warn!(error = %e, scheme = %scheme, "Rejecting invalid remote login state");
            return AuthError::BadRequest("invalid state".into()).into_response();
        }
    };

    // The carried envelope restores both the initial info and rememberMe.
    let initial = props
        .current
        .as_deref()
        .and_then(|sealed| {
            envelope::unprotect_front_auth(&state.token_protector, sealed)
                .map_err(|e| tracing::warn!(error = %e, "Ignoring invalid carried envelope"))
                .ok()
        })
        .unwrap_or_else(FrontAuthenticationInfo::none);

    let mut ctx = LoginContext::new(LoginMode::RemoteLogin, initial, scheme.clone());
    ctx.initial_scheme = props.initial_scheme;
    ctx.return_url = props.return_url;
    ctx.caller_origin = props.caller_origin;
    ctx.remember_me = ctx.initial.remember_me;
    ctx.impersonate_actual_user = props.impersonate_actual_user;
    ctx.user_data = props.user_data;

    let mut raw = serde_json::Map::new();
    for (key, value) in pairs {
        if key != "state" {
            raw.insert(key, serde_json::Value::String(value));
        }
    }

    let outcome =
        login_with_payload(&state, &ctx, scheme, serde_json::Value::Object(raw)).await;
    respond(&state, jar, &headers, outcome)
}

// ── Refresh / token ────────────────────────────────────────────────

async fn refresh(
    State(state): State<FrontAuthState>,
    FrontAuth(fauth): FrontAuth,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let now = Utc::now();
    let body = response::success_body(&state, &fauth, now);
    let jar = add_cookies(
        jar,
        cookies::set_cookies(&state, &fauth, now, headers_indicate_https(&headers)),
    );
    (jar, Json(body)).into_response()
}

async fn token(State(state): State<FrontAuthState>, FrontAuth(fauth): FrontAuth) -> Response {
    let body = response::success_body(&state, &fauth, Utc::now());
    Json(body).into_response()
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(State(state): State<FrontAuthState>, jar: CookieJar) -> Response {
    let jar = add_cookies(jar, cookies::clear_cookies(&state));
    (jar, Json(json!({}))).into_response()
}

// ── Helpers ────────────────────────────────────────────────────────

/// Runs the unified login for a payload-based scheme, turning a
/// `create_payload` failure into the equivalent backend error.
async fn login_with_payload(
    state: &FrontAuthState,
    ctx: &LoginContext,
    scheme: String,
    raw: serde_json::Value,
) -> LoginOutcome {
    let now = Utc::now();
    match state.login.create_payload_dyn(&scheme, raw).await {
        Ok(payload) => {
            let login = state.login.clone();
            login::unified_login(state, ctx, now, move |actual_login| {
                let login = login.clone();
                let scheme = scheme.clone();
                let payload = payload.clone();
                async move {
                    login
                        .login_dyn(&scheme, payload, actual_login)
                        .await
                        .map(Some)
                }
            })
            .await
        }
        Err(e) => {
            tracing::error!(error = %e, scheme = %scheme, "Payload creation failed");
            login::unified_login(state, ctx, now, move |_actual_login| {
                let e = e.clone();
                async move { Err(e) }
            })
            .await
        }
    }
}

fn respond(
    state: &FrontAuthState,
    jar: CookieJar,
    headers: &HeaderMap,
    outcome: LoginOutcome,
) -> Response {
    let jar = if outcome.committed {
        add_cookies(
            jar,
            cookies::set_cookies(
                state,
                &outcome.fauth,
                Utc::now(),
                headers_indicate_https(headers),
            ),
        )
    } else {
        jar
    };
    (jar, response::into_http(outcome.response)).into_response()
}

fn add_cookies(
    mut jar: CookieJar,
    cookies: Vec<axum_extra::extract::cookie::Cookie<'static>>,
) -> CookieJar {
    for cookie in cookies {
        jar = jar.add(cookie);
    }
    jar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{AuthLevel, AuthenticationInfo, UserInfo};
    use crate::middleware::testing::{self, MockLoginService};
    use crate::middleware::types::UserLoginResult;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn alice() -> UserInfo {
        UserInfo::new(1, "Alice", Vec::new()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookie_values(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn basic_login_success_sets_cookies_and_returns_info() {
        let state = testing::state_with(
            testing::config(),
            MockLoginService::returning(UserLoginResult::success(alice())),
        );
        let app = auth_routes(state);

        let request = Request::builder()
            .method("POST")
            .uri("/c/basicLogin")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"userName":"Alice","password":"pass","rememberMe":true}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookie_values(&response);
        assert!(cookies.iter().any(|c| c.starts_with("__webfront=")));
        assert!(cookies.iter().any(|c| c.starts_with("__webfrontLT=")));

        let body = body_json(response).await;
        assert_eq!(body["info"]["user"]["userName"], "Alice");
        assert!(body["token"].is_string());
        assert_eq!(body["rememberMe"], true);
    }

    #[tokio::test]
    async fn basic_login_failure_reports_code_and_clears_session_cookie() {
        let state = testing::state_with(
            testing::config(),
            MockLoginService::returning(UserLoginResult::failure(1, "bad password")),
        );
        let app = auth_routes(state);

        let request = Request::builder()
            .method("POST")
            .uri("/c/basicLogin")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"userName":"Alice","password":"nope"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookie_values(&response);
        assert!(cookies.iter().any(|c| c.starts_with("__webfront=;")));

        let body = body_json(response).await;
        assert_eq!(body["loginFailureCode"], 1);
        assert_eq!(body["loginFailureReason"], "bad password");
        assert!(body.get("errorId").is_none());
        assert!(body["info"].is_null());
    }

    #[tokio::test]
    async fn disallowed_return_url_redirects_with_error_id() {
        let state = testing::state(testing::config());
        let app = auth_routes(state);

        let request = Request::builder()
            .uri("/c/startLogin?scheme=Provider&returnUrl=https%3A%2F%2Fevil%2Fcb")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(location, "https://evil/cb?errorId=DisallowedReturnUrl");
    }

    #[tokio::test]
    async fn start_login_redirects_to_challenge() {
        let config = testing::config_builder()
            .challenge(|scheme: &str, state: &str, _scopes: &[String]| {
                format!("https://provider.example.com/authorize?s={scheme}&state={state}")
            })
            .build()
            .unwrap();
        let app = auth_routes(testing::state(config));

        let request = Request::builder()
            .uri("/c/startLogin?scheme=Provider&returnUrl=https%3A%2F%2Fgood%2Fcb")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://provider.example.com/authorize?s=Provider&state="));
    }

    #[tokio::test]
    async fn remote_login_completes_started_flow() {
        let config = testing::config_builder()
            .challenge(|_scheme: &str, state: &str, _scopes: &[String]| {
                format!("https://provider.example.com/authorize?state={state}")
            })
            .build()
            .unwrap();
        let state = testing::state_with(
            config,
            MockLoginService::returning(UserLoginResult::success(alice())),
        );
        let app = auth_routes(state);

        let start = Request::builder()
            .uri("/c/startLogin?scheme=Provider&returnUrl=https%3A%2F%2Fgood%2Fcb&rememberMe=true")
            .body(Body::empty())
            .unwrap();
        let started = app.clone().oneshot(start).await.unwrap();
        assert_eq!(started.status(), StatusCode::FOUND);
        let location = started.headers()[header::LOCATION].to_str().unwrap();
        let sealed = location.split("state=").nth(1).unwrap();

        let callback = Request::builder()
            .uri(format!(
                "/c/remoteLogin/Provider?state={sealed}&code=authcode"
            ))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(callback).await.unwrap();

        // Success: 302 back to the allowed return URL, no error params.
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(location, "https://good/cb");
        let cookies = set_cookie_values(&response);
        assert!(cookies.iter().any(|c| c.starts_with("__webfront=")));
    }

    #[tokio::test]
    async fn remote_login_rejects_tampered_state() {
        let app = auth_routes(testing::state(testing::config()));
        let request = Request::builder()
            .uri("/c/remoteLogin/Provider?state=tampered")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_returns_current_info_from_cookie() {
        let state = testing::state(testing::config());
        let now = Utc::now();
        let fauth = FrontAuthenticationInfo::new(
            AuthenticationInfo::new(alice(), Some(now + chrono::Duration::hours(6)), None, "D1"),
            true,
        );
        let sealed = envelope::protect_front_auth(&state.cookie_protector, &fauth).unwrap();
        let app = auth_routes(state);

        let request = Request::builder()
            .uri("/c/refresh")
            .header(header::COOKIE, format!("__webfront={sealed}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookie_values(&response);
        assert!(cookies.iter().any(|c| c.starts_with("__webfront=")));
        let body = body_json(response).await;
        assert_eq!(body["info"]["user"]["userName"], "Alice");
    }

    #[tokio::test]
    async fn refresh_without_credentials_synthesizes_device() {
        let app = auth_routes(testing::state(testing::config()));
        let request = Request::builder()
            .uri("/c/refresh")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let body = body_json(response).await;
        assert!(body["info"].is_null());
        assert_eq!(body["refreshable"], false);
    }

    #[tokio::test]
    async fn logout_clears_both_cookies() {
        let app = auth_routes(testing::state(testing::config()));
        let request = Request::builder()
            .method("POST")
            .uri("/c/logout")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookie_values(&response);
        assert!(cookies.iter().any(|c| c.starts_with("__webfront=;")));
        assert!(cookies.iter().any(|c| c.starts_with("__webfrontLT=;")));
    }

    #[tokio::test]
    async fn bearer_beats_stale_cookie_on_token_endpoint() {
        let state = testing::state(testing::config());
        let now = Utc::now();

        let alice_auth = FrontAuthenticationInfo::new(
            AuthenticationInfo::new(alice(), Some(now + chrono::Duration::hours(6)), None, "DA"),
            false,
        );
        let token = envelope::protect_front_auth(&state.token_protector, &alice_auth).unwrap();

        let bob = UserInfo::new(2, "Bob", Vec::new()).unwrap();
        let bob_auth = FrontAuthenticationInfo::new(
            AuthenticationInfo::new(bob, Some(now - chrono::Duration::hours(1)), None, "DB"),
            false,
        );
        let stale = envelope::protect_front_auth(&state.cookie_protector, &bob_auth).unwrap();

        let app = auth_routes(state);
        let request = Request::builder()
            .uri("/c/token")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::COOKIE, format!("__webfront={stale}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let body = body_json(response).await;
        assert_eq!(body["info"]["user"]["userName"], "Alice");
    }

    #[tokio::test]
    async fn sliding_renewal_re_emits_session_cookie() {
        let mut opts = crate::middleware::DynamicOptions::default();
        opts.sliding_expiration_time = chrono::Duration::seconds(60);
        let config = testing::with_options(testing::config(), opts);
        let state = testing::state(config);
        let now = Utc::now();

        let fauth = FrontAuthenticationInfo::new(
            AuthenticationInfo::new(alice(), Some(now + chrono::Duration::seconds(30)), None, "D1"),
            true,
        );
        let sealed = envelope::protect_front_auth(&state.cookie_protector, &fauth).unwrap();
        let app = auth_routes(state.clone());

        // A plain GET outside the handlers that set cookies themselves:
        // the resolver middleware must re-emit the renewed session cookie.
        let request = Request::builder()
            .uri("/c/token")
            .header(header::COOKIE, format!("__webfront={sealed}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let cookies = set_cookie_values(&response);
        let session = cookies
            .iter()
            .find(|c| c.starts_with("__webfront="))
            .expect("renewed session cookie");
        let value = session
            .strip_prefix("__webfront=")
            .unwrap()
            .split(';')
            .next()
            .unwrap();
        let renewed = envelope::unprotect_front_auth(&state.cookie_protector, value).unwrap();
        let expires = renewed.info.expires().unwrap();
        assert!(expires > now + chrono::Duration::seconds(55));

        let level = renewed.info.level(now);
        assert_eq!(level, AuthLevel::Normal);
    }
}
