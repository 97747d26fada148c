use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::state::FrontAuthState;
use super::types::{UserLoginResult, user_data_to_json};
use crate::envelope::{self, ExtraData};
use crate::info::{AuthLevel, FrontAuthenticationInfo};

/// Error part of a login response. `error_id` absent means a plain
/// scheme-specific failure (`login_failure_code` / `login_failure_reason`
/// only).
#[derive(Debug, Clone, Default)]
pub(super) struct ErrorPayload {
    pub error_id: Option<String>,
    pub error_text: Option<String>,
    pub login_failure_code: Option<i32>,
    pub login_failure_reason: Option<String>,
}

impl ErrorPayload {
    pub(super) fn id(error_id: impl Into<String>, error_text: impl Into<String>) -> Self {
        Self {
            error_id: Some(error_id.into()),
            error_text: Some(error_text.into()),
            ..Self::default()
        }
    }

    /// Scheme-specific failure: reported without an `errorId`.
    pub(super) fn scheme_failure(result: &UserLoginResult) -> Self {
        Self {
            login_failure_code: Some(result.login_failure_code),
            login_failure_reason: result.login_failure_reason.clone(),
            ..Self::default()
        }
    }
}

/// A structured login/refresh response plus its return mode: JSON body,
/// 302 to `return_url`, or a postMessage page to `caller_origin`.
#[derive(Debug, Clone)]
pub(super) struct AuthResponse {
    pub body: Value,
    pub error: Option<ErrorPayload>,
    pub return_url: Option<String>,
    pub caller_origin: Option<String>,
    pub initial_scheme: Option<String>,
    pub calling_scheme: Option<String>,
}

impl AuthResponse {
    pub(super) fn json(body: Value) -> Self {
        Self {
            body,
            error: None,
            return_url: None,
            caller_origin: None,
            initial_scheme: None,
            calling_scheme: None,
        }
    }
}

/// The success body: `info`, `token`, `refreshable`, `rememberMe`.
///
/// `info` is `null` for the `None` level; `refreshable` means a refresh can
/// extend the expiration (sliding expiration is configured).
pub(super) fn success_body(
    state: &FrontAuthState,
    fauth: &FrontAuthenticationInfo,
    now: DateTime<Utc>,
) -> Value {
    let opts = state.options.current();
    let level = fauth.info.level(now);
    let info = if level == AuthLevel::None {
        Value::Null
    } else {
        serde_json::to_value(fauth.info.check_expiration(now)).unwrap_or(Value::Null)
    };
    let token = match envelope::protect_front_auth(&state.token_protector, fauth) {
        Ok(token) => Value::String(token),
        Err(e) => {
            tracing::error!(error = %e, "Failed to protect the bearer envelope");
            Value::Null
        }
    };
    json!({
        "info": info,
        "token": token,
        "refreshable": level >= AuthLevel::Normal
            && opts.sliding_expiration_time > chrono::Duration::zero(),
        "rememberMe": fauth.remember_me,
    })
}

/// Adds the error fields onto a response body. `errorText` equal to
/// `errorId` is omitted.
pub(super) fn apply_error(
    body: &mut Value,
    error: &ErrorPayload,
    initial_scheme: Option<&str>,
    calling_scheme: Option<&str>,
    user_data: &ExtraData,
) {
    let Some(map) = body.as_object_mut() else {
        return;
    };
    if let Some(id) = &error.error_id {
        map.insert("errorId".into(), json!(id));
        if let Some(text) = &error.error_text {
            if text != id {
                map.insert("errorText".into(), json!(text));
            }
        }
    }
    if let Some(code) = error.login_failure_code {
        map.insert("loginFailureCode".into(), json!(code));
    }
    if let Some(reason) = &error.login_failure_reason {
        map.insert("loginFailureReason".into(), json!(reason));
    }
    if let Some(scheme) = initial_scheme {
        map.insert("initialScheme".into(), json!(scheme));
    }
    if let Some(scheme) = calling_scheme {
        map.insert("callingScheme".into(), json!(scheme));
    }
    if !user_data.is_empty() {
        map.insert("userData".into(), user_data_to_json(user_data));
    }
}

/// Renders the response in its return mode.
pub(super) fn into_http(response: AuthResponse) -> Response {
    if let Some(url) = &response.return_url {
        let target = match &response.error {
            Some(error) => append_error_params(
                url,
                error,
                response.initial_scheme.as_deref(),
                response.calling_scheme.as_deref(),
            ),
            None => url.clone(),
        };
        return found(&target);
    }
    if let Some(origin) = &response.caller_origin {
        return post_message_page(&response.body, origin).into_response();
    }
    Json(response.body).into_response()
}

/// Plain `302 Found` (the redirect status the client SDK expects).
fn found(url: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

fn append_error_params(
    url: &str,
    error: &ErrorPayload,
    initial_scheme: Option<&str>,
    calling_scheme: Option<&str>,
) -> String {
    let mut params: Vec<(&str, String)> = Vec::new();
    if let Some(id) = &error.error_id {
        params.push(("errorId", id.clone()));
        if let Some(text) = &error.error_text {
            if text != id {
                params.push(("errorText", text.clone()));
            }
        }
    }
    if let Some(code) = error.login_failure_code {
        params.push(("loginFailureCode", code.to_string()));
    }
    if let Some(scheme) = initial_scheme {
        params.push(("initialScheme", scheme.to_string()));
    }
    if let Some(scheme) = calling_scheme {
        params.push(("callingScheme", scheme.to_string()));
    }

    let mut target = url.to_string();
    let mut separator = if url.contains('?') { '&' } else { '?' };
    for (key, value) in params {
        target.push(separator);
        target.push_str(key);
        target.push('=');
        target.push_str(&urlencoding::encode(&value));
        separator = '&';
    }
    target
}

/// The popup return mode: a page that posts the JSON to the opener and
/// closes itself.
fn post_message_page(body: &Value, origin: &str) -> Html<String> {
    // "</" would close the script element early inside a JSON string.
    let data = body.to_string().replace("</", "<\\/");
    let target = Value::String(origin.to_string()).to_string();
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n<body>\n<script>\n(function() {{\n  if (window.opener) {{\n    window.opener.postMessage({data}, {target});\n  }}\n  window.close();\n}})();\n</script>\n</body>\n</html>\n"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{AuthenticationInfo, UserInfo};
    use crate::middleware::testing;
    use chrono::Duration;

    #[test]
    fn success_body_shape() {
        let state = testing::state(testing::config());
        let now = Utc::now();
        let info = AuthenticationInfo::new(
            UserInfo::new(1, "Alice", Vec::new()).unwrap(),
            Some(now + Duration::hours(6)),
            None,
            "D1",
        );
        let body = success_body(&state, &FrontAuthenticationInfo::new(info, true), now);
        assert_eq!(body["info"]["user"]["userName"], "Alice");
        assert!(body["token"].is_string());
        assert_eq!(body["rememberMe"], true);
        // Default options disable sliding expiration.
        assert_eq!(body["refreshable"], false);
    }

    #[test]
    fn success_body_none_level_has_null_info() {
        let state = testing::state(testing::config());
        let body = success_body(&state, &FrontAuthenticationInfo::none(), Utc::now());
        assert!(body["info"].is_null());
    }

    #[test]
    fn refreshable_tracks_sliding_option() {
        let mut opts = crate::middleware::DynamicOptions::default();
        opts.sliding_expiration_time = Duration::minutes(10);
        let state = testing::state(testing::with_options(testing::config(), opts));
        let now = Utc::now();
        let info = AuthenticationInfo::new(
            UserInfo::new(1, "Alice", Vec::new()).unwrap(),
            Some(now + Duration::hours(6)),
            None,
            "D1",
        );
        let body = success_body(&state, &FrontAuthenticationInfo::new(info, false), now);
        assert_eq!(body["refreshable"], true);
    }

    #[test]
    fn error_text_equal_to_id_is_omitted() {
        let mut body = json!({});
        apply_error(
            &mut body,
            &ErrorPayload::id("DisallowedReturnUrl", "DisallowedReturnUrl"),
            None,
            None,
            &Vec::new(),
        );
        assert_eq!(body["errorId"], "DisallowedReturnUrl");
        assert!(body.get("errorText").is_none());
    }

    #[test]
    fn append_error_params_handles_existing_query() {
        let error = ErrorPayload::id("DisallowedReturnUrl", "DisallowedReturnUrl");
        assert_eq!(
            append_error_params("https://evil/cb", &error, None, None),
            "https://evil/cb?errorId=DisallowedReturnUrl"
        );
        assert_eq!(
            append_error_params("https://evil/cb?a=1", &error, Some("Provider"), None),
            "https://evil/cb?a=1&errorId=DisallowedReturnUrl&initialScheme=Provider"
        );
    }

    #[test]
    fn post_message_page_escapes_script_close() {
        let page = post_message_page(&json!({ "x": "</script>" }), "https://app.example.com");
        assert!(!page.0.contains("</script>\"}"));
        assert!(page.0.contains("https://app.example.com"));
    }
}
