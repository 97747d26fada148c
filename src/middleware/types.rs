use serde::Deserialize;

use crate::envelope::{self, ExtraData};
use crate::error::ProtectError;
use crate::info::UserInfo;
use crate::protector::Protector;

/// Outcome of a login backend call.
///
/// `user_info` present means success; otherwise `login_failure_code` /
/// `login_failure_reason` describe the scheme-specific failure and
/// `is_unregistered_user` flags an identity the backend recognized but has
/// no account for (the auto-binding / auto-registration trigger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLoginResult {
    pub user_info: Option<UserInfo>,
    pub login_failure_code: i32,
    pub login_failure_reason: Option<String>,
    pub is_unregistered_user: bool,
}

impl UserLoginResult {
    #[must_use]
    pub fn success(user_info: UserInfo) -> Self {
        Self {
            user_info: Some(user_info),
            login_failure_code: 0,
            login_failure_reason: None,
            is_unregistered_user: false,
        }
    }

    #[must_use]
    pub fn failure(code: i32, reason: impl Into<String>) -> Self {
        Self {
            user_info: None,
            login_failure_code: code,
            login_failure_reason: Some(reason.into()),
            is_unregistered_user: false,
        }
    }

    /// A failure for an identity the backend knows but has no account for.
    #[must_use]
    pub fn unregistered(code: i32, reason: impl Into<String>) -> Self {
        Self {
            user_info: None,
            login_failure_code: code,
            login_failure_reason: Some(reason.into()),
            is_unregistered_user: true,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.user_info.is_some()
    }
}

// Authentication-properties keys carried through redirect-based flows.
// These are part of the wire contract with remote scheme handlers.
pub(super) const PROP_CURRENT: &str = "WFA2C";
pub(super) const PROP_INITIAL_SCHEME: &str = "WFA2S";
pub(super) const PROP_CALLER_ORIGIN: &str = "WFA2O";
pub(super) const PROP_RETURN_URL: &str = "WFA2R";
pub(super) const PROP_USER_DATA: &str = "WFA2D";
pub(super) const PROP_IMPERSONATE: &str = "WFA2I";

/// State carried from `startLogin` to the remote callback, protected as a
/// single opaque string with the `Extra` purpose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct RemoteAuthProps {
    /// Protected envelope of the authentication current at start time.
    pub current: Option<String>,
    pub initial_scheme: Option<String>,
    pub caller_origin: Option<String>,
    pub return_url: Option<String>,
    pub user_data: ExtraData,
    pub impersonate_actual_user: bool,
}

impl RemoteAuthProps {
    pub(super) fn protect(&self, extra: &Protector) -> Result<String, ProtectError> {
        let mut bag: ExtraData = Vec::new();
        if let Some(current) = &self.current {
            bag.push((PROP_CURRENT.into(), Some(current.clone())));
        }
        if let Some(scheme) = &self.initial_scheme {
            bag.push((PROP_INITIAL_SCHEME.into(), Some(scheme.clone())));
        }
        if let Some(origin) = &self.caller_origin {
            bag.push((PROP_CALLER_ORIGIN.into(), Some(origin.clone())));
        }
        if let Some(url) = &self.return_url {
            bag.push((PROP_RETURN_URL.into(), Some(url.clone())));
        }
        if !self.user_data.is_empty() {
            // The user data is protected on its own so the remote handler
            // can forward it without being able to read it.
            bag.push((
                PROP_USER_DATA.into(),
                Some(envelope::protect_extra_data(extra, &self.user_data)?),
            ));
        }
        if self.impersonate_actual_user {
            bag.push((PROP_IMPERSONATE.into(), Some(String::new())));
        }
        envelope::protect_extra_data(extra, &bag)
    }

    pub(super) fn unprotect(extra: &Protector, sealed: &str) -> Result<Self, ProtectError> {
        let bag = envelope::unprotect_extra_data(extra, sealed)?;
        let mut props = Self::default();
        for (key, value) in bag {
            match key.as_str() {
                PROP_CURRENT => props.current = value,
                PROP_INITIAL_SCHEME => props.initial_scheme = value,
                PROP_CALLER_ORIGIN => props.caller_origin = value,
                PROP_RETURN_URL => props.return_url = value,
                PROP_USER_DATA => {
                    if let Some(sealed) = value {
                        props.user_data = envelope::unprotect_extra_data(extra, &sealed)?;
                    }
                }
                PROP_IMPERSONATE => props.impersonate_actual_user = true,
                other => {
                    return Err(ProtectError::Payload(format!(
                        "unknown property key: {other}"
                    )));
                }
            }
        }
        Ok(props)
    }
}

/// `POST {entry}/basicLogin` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BasicLoginBody {
    pub user_name: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub impersonate_actual_user: bool,
    #[serde(default)]
    pub user_data: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `POST {entry}/unsafeDirectLogin` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DirectLoginBody {
    pub provider: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub impersonate_actual_user: bool,
    #[serde(default)]
    pub user_data: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `startLogin` parameters, parsed from ordered query pairs: the known keys
/// are extracted, everything else becomes user data (order preserved).
#[derive(Debug, Default)]
pub(super) struct StartLoginParams {
    pub scheme: Option<String>,
    pub return_url: Option<String>,
    pub caller_origin: Option<String>,
    pub remember_me: bool,
    pub impersonate_actual_user: bool,
    pub user_data: ExtraData,
}

impl StartLoginParams {
    pub(super) fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "scheme" => params.scheme = Some(value),
                "returnUrl" => params.return_url = Some(value),
                "callerOrigin" => params.caller_origin = Some(value),
                "rememberMe" => params.remember_me = value == "true" || value == "1",
                "impersonateActualUser" => {
                    params.impersonate_actual_user = value == "true" || value == "1";
                }
                _ => params.user_data.push((key, Some(value))),
            }
        }
        params
    }
}

/// Maps a JSON `userData` object onto the ordered extra-data bag.
pub(super) fn user_data_from_json(
    map: Option<serde_json::Map<String, serde_json::Value>>,
) -> ExtraData {
    map.map(|m| {
        m.into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                };
                (k, value)
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Renders the extra-data bag back to a JSON object for responses.
pub(super) fn user_data_to_json(data: &ExtraData) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in data {
        map.insert(
            key.clone(),
            value
                .clone()
                .map_or(serde_json::Value::Null, serde_json::Value::String),
        );
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protector::{EXTRA_PURPOSE, RootProtector};

    #[test]
    fn props_roundtrip() {
        let extra = RootProtector::new([3u8; 32]).derive(EXTRA_PURPOSE);
        let props = RemoteAuthProps {
            current: Some("envelope".into()),
            initial_scheme: Some("Provider".into()),
            caller_origin: None,
            return_url: Some("https://good/cb".into()),
            user_data: vec![("k".into(), Some("v".into())), ("n".into(), None)],
            impersonate_actual_user: true,
        };
        let sealed = props.protect(&extra).unwrap();
        assert_eq!(RemoteAuthProps::unprotect(&extra, &sealed).unwrap(), props);
    }

    #[test]
    fn props_reject_unknown_keys() {
        let extra = RootProtector::new([3u8; 32]).derive(EXTRA_PURPOSE);
        let bag = vec![("WFA2X".to_string(), Some("boom".to_string()))];
        let sealed = crate::envelope::protect_extra_data(&extra, &bag).unwrap();
        assert!(RemoteAuthProps::unprotect(&extra, &sealed).is_err());
    }

    #[test]
    fn start_login_params_collect_extra_pairs_as_user_data() {
        let params = StartLoginParams::from_pairs(vec![
            ("scheme".into(), "Provider".into()),
            ("returnUrl".into(), "https://good/".into()),
            ("rememberMe".into(), "true".into()),
            ("theme".into(), "dark".into()),
        ]);
        assert_eq!(params.scheme.as_deref(), Some("Provider"));
        assert!(params.remember_me);
        assert_eq!(params.user_data, vec![("theme".into(), Some("dark".into()))]);
    }

    #[test]
    fn user_data_json_mapping() {
        let mut map = serde_json::Map::new();
        map.insert("a".into(), serde_json::Value::String("1".into()));
        map.insert("b".into(), serde_json::Value::Null);
        let data = user_data_from_json(Some(map));
        assert_eq!(
            data,
            vec![("a".into(), Some("1".into())), ("b".into(), None)]
        );
        assert_eq!(
            user_data_to_json(&data),
            serde_json::json!({ "a": "1", "b": null })
        );
    }
}
