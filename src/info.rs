use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A login scheme a user has authenticated with, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSchemeInfo {
    pub name: String,
    #[serde(rename = "lastUsed")]
    pub last_used: DateTime<Utc>,
}

impl UserSchemeInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, last_used: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            last_used,
        }
    }
}

/// Immutable user identity.
///
/// `user_id == 0` is the anonymous user: its name is empty and it has no
/// schemes. Guaranteed by construction: [`UserInfo::new`] rejects any
/// combination that violates this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    user_id: u64,
    user_name: String,
    #[serde(default)]
    schemes: Vec<UserSchemeInfo>,
}

impl UserInfo {
    /// The anonymous user (`user_id` 0, empty name, no schemes).
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            user_id: 0,
            user_name: String::new(),
            schemes: Vec::new(),
        }
    }

    /// Create a user identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUserInfo`] when `user_id` is 0 but a name or
    /// schemes are provided, or when `user_id` is non-zero with an empty name.
    pub fn new(
        user_id: u64,
        user_name: impl Into<String>,
        schemes: Vec<UserSchemeInfo>,
    ) -> Result<Self, Error> {
        let user_name = user_name.into();
        if user_id == 0 && (!user_name.is_empty() || !schemes.is_empty()) {
            return Err(Error::InvalidUserInfo(
                "anonymous user must have an empty name and no schemes".into(),
            ));
        }
        if user_id != 0 && user_name.is_empty() {
            return Err(Error::InvalidUserInfo(
                "non-anonymous user requires a user name".into(),
            ));
        }
        Ok(Self {
            user_id,
            user_name,
            schemes,
        })
    }

    #[must_use]
    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    #[must_use]
    pub fn schemes(&self) -> &[UserSchemeInfo] {
        &self.schemes
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_id == 0
    }
}

/// Authentication level, derived from the info's expirations at a given
/// instant. Ordered: `None < Unsafe < Normal < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthLevel {
    /// No identity at all.
    None,
    /// A known identity without a live expiration: usable for display,
    /// never for authorization.
    Unsafe,
    /// Authenticated, expiration in the future.
    Normal,
    /// Elevated state with its own (shorter) expiration, for high-value
    /// operations.
    Critical,
}

/// Immutable authentication state: the real operator, the effective
/// (possibly impersonated) identity, expirations and the device id.
///
/// All mutations are copy-on-write and return a new instance, so a shared
/// reference is trivially thread-safe. Invariant: `critical_expires`, when
/// present, never exceeds `expires`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AuthInfoJson", into = "AuthInfoJson")]
pub struct AuthenticationInfo {
    actual_user: UserInfo,
    user: UserInfo,
    expires: Option<DateTime<Utc>>,
    critical_expires: Option<DateTime<Utc>>,
    device_id: String,
}

impl AuthenticationInfo {
    /// The distinguished empty value: anonymous, no expirations, empty
    /// device id. This is the only value allowed to carry an empty device id.
    #[must_use]
    pub fn none() -> Self {
        Self {
            actual_user: UserInfo::anonymous(),
            user: UserInfo::anonymous(),
            expires: None,
            critical_expires: None,
            device_id: String::new(),
        }
    }

    /// Create an authentication for `user` (who is also the actual user).
    ///
    /// `critical_expires` greater than `expires` raises `expires` to match.
    #[must_use]
    pub fn new(
        user: UserInfo,
        expires: Option<DateTime<Utc>>,
        critical_expires: Option<DateTime<Utc>>,
        device_id: impl Into<String>,
    ) -> Self {
        let (expires, critical_expires) = normalize(expires, critical_expires);
        Self {
            actual_user: user.clone(),
            user,
            expires,
            critical_expires,
            device_id: device_id.into(),
        }
    }

    #[must_use]
    pub fn actual_user(&self) -> &UserInfo {
        &self.actual_user
    }

    /// The effective identity: equals [`actual_user`](Self::actual_user)
    /// unless impersonated.
    #[must_use]
    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    #[must_use]
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    #[must_use]
    pub fn critical_expires(&self) -> Option<DateTime<Utc>> {
        self.critical_expires
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn is_impersonated(&self) -> bool {
        self.user != self.actual_user
    }

    /// Level at instant `now`. For a fixed info and an advancing clock the
    /// level only ever decreases.
    #[must_use]
    pub fn level(&self, now: DateTime<Utc>) -> AuthLevel {
        if let Some(cexp) = self.critical_expires {
            if cexp > now {
                return AuthLevel::Critical;
            }
        }
        if let Some(exp) = self.expires {
            if exp > now {
                return AuthLevel::Normal;
            }
        }
        if self.actual_user.is_anonymous() {
            AuthLevel::None
        } else {
            AuthLevel::Unsafe
        }
    }

    /// Copy with a new `expires`, keeping `critical_expires` clamped below it.
    #[must_use]
    pub fn set_expires(&self, expires: Option<DateTime<Utc>>) -> Self {
        let critical = match (expires, self.critical_expires) {
            (Some(exp), Some(cexp)) if cexp > exp => Some(exp),
            (None, _) => None,
            (_, c) => c,
        };
        Self {
            expires,
            critical_expires: critical,
            ..self.clone()
        }
    }

    /// Copy with a new `critical_expires`; `expires` is raised when needed
    /// to keep `critical_expires <= expires`.
    #[must_use]
    pub fn set_critical_expires(&self, critical_expires: Option<DateTime<Utc>>) -> Self {
        let (expires, critical_expires) = normalize(self.expires, critical_expires);
        Self {
            expires,
            critical_expires,
            ..self.clone()
        }
    }

    /// Copy where the effective identity becomes `other`; the actual user is
    /// unchanged.
    #[must_use]
    pub fn impersonate(&self, other: UserInfo) -> Self {
        Self {
            user: other,
            ..self.clone()
        }
    }

    /// Copy where the effective identity is the actual user again.
    #[must_use]
    pub fn clear_impersonation(&self) -> Self {
        Self {
            user: self.actual_user.clone(),
            ..self.clone()
        }
    }

    /// Self, or a copy with stale expirations cleared (possibly demoting the
    /// level).
    #[must_use]
    pub fn check_expiration(&self, now: DateTime<Utc>) -> Self {
        let exp_stale = self.expires.is_some_and(|e| e <= now);
        let cexp_stale = self.critical_expires.is_some_and(|e| e <= now);
        if !exp_stale && !cexp_stale {
            return self.clone();
        }
        Self {
            expires: if exp_stale { None } else { self.expires },
            critical_expires: if cexp_stale { None } else { self.critical_expires },
            ..self.clone()
        }
    }
}

fn normalize(
    expires: Option<DateTime<Utc>>,
    critical_expires: Option<DateTime<Utc>>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match (expires, critical_expires) {
        (Some(exp), Some(cexp)) if cexp > exp => (Some(cexp), Some(cexp)),
        (None, Some(cexp)) => (Some(cexp), Some(cexp)),
        pair => pair,
    }
}

/// Wire form of [`AuthenticationInfo`].
///
/// `actualUser` is omitted when it equals `user`; an empty `deviceId` is
/// omitted. Key names are part of the client contract; do not rename.
#[derive(Serialize, Deserialize)]
struct AuthInfoJson {
    user: UserInfo,
    #[serde(
        rename = "actualUser",
        skip_serializing_if = "Option::is_none",
        default
    )]
    actual_user: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    exp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    cexp: Option<DateTime<Utc>>,
    #[serde(
        rename = "deviceId",
        skip_serializing_if = "String::is_empty",
        default
    )]
    device_id: String,
}

impl From<AuthenticationInfo> for AuthInfoJson {
    fn from(info: AuthenticationInfo) -> Self {
        let actual_user = if info.actual_user == info.user {
            None
        } else {
            Some(info.actual_user)
        };
        Self {
            user: info.user,
            actual_user,
            exp: info.expires,
            cexp: info.critical_expires,
            device_id: info.device_id,
        }
    }
}

impl TryFrom<AuthInfoJson> for AuthenticationInfo {
    type Error = Error;

    fn try_from(json: AuthInfoJson) -> Result<Self, Error> {
        let actual_user = json.actual_user.unwrap_or_else(|| json.user.clone());
        let (expires, critical_expires) = normalize(json.exp, json.cexp);
        Ok(Self {
            actual_user,
            user: json.user,
            expires,
            critical_expires,
            device_id: json.device_id,
        })
    }
}

impl AuthenticationInfo {
    /// Copy carrying `device_id` (used by the login orchestrator, which
    /// mints a device id when the initial info has none).
    #[must_use]
    pub(crate) fn with_device_id(&self, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..self.clone()
        }
    }

    /// Rebuild from parts that may be impersonated (used by the envelope
    /// codec, which stores both identities).
    #[must_use]
    pub(crate) fn from_parts(
        actual_user: UserInfo,
        user: UserInfo,
        expires: Option<DateTime<Utc>>,
        critical_expires: Option<DateTime<Utc>>,
        device_id: String,
    ) -> Self {
        let (expires, critical_expires) = normalize(expires, critical_expires);
        Self {
            actual_user,
            user,
            expires,
            critical_expires,
            device_id,
        }
    }
}

/// An [`AuthenticationInfo`] plus the `remember_me` flag that rode in with
/// it. `remember_me` decides whether the session cookie is persistent and
/// whether the long-term cookie keeps the user identity in addition to the
/// device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontAuthenticationInfo {
    pub info: AuthenticationInfo,
    pub remember_me: bool,
}

impl FrontAuthenticationInfo {
    #[must_use]
    pub fn new(info: AuthenticationInfo, remember_me: bool) -> Self {
        Self { info, remember_me }
    }

    /// The distinguished empty value: [`AuthenticationInfo::none`], not
    /// remembered.
    #[must_use]
    pub fn none() -> Self {
        Self {
            info: AuthenticationInfo::none(),
            remember_me: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn alice() -> UserInfo {
        UserInfo::new(
            3712,
            "Alice",
            vec![UserSchemeInfo::new("Basic", Utc::now())],
        )
        .unwrap()
    }

    fn bob() -> UserInfo {
        UserInfo::new(54, "Bob", Vec::new()).unwrap()
    }

    #[test]
    fn anonymous_invariant_enforced() {
        assert!(UserInfo::new(0, "ghost", Vec::new()).is_err());
        assert!(UserInfo::new(0, "", vec![UserSchemeInfo::new("Basic", Utc::now())]).is_err());
        assert!(UserInfo::new(7, "", Vec::new()).is_err());
        assert!(UserInfo::anonymous().is_anonymous());
    }

    #[test]
    fn none_value_has_no_level() {
        let now = Utc::now();
        let info = AuthenticationInfo::none();
        assert_eq!(info.level(now), AuthLevel::None);
        assert!(info.device_id().is_empty());
    }

    #[test]
    fn level_transitions() {
        let now = Utc::now();
        let exp = now + Duration::hours(6);
        let cexp = now + Duration::hours(3);

        let info = AuthenticationInfo::new(alice(), Some(exp), Some(cexp), "D1");
        assert_eq!(info.level(now), AuthLevel::Critical);
        assert_eq!(info.level(now + Duration::hours(4)), AuthLevel::Normal);
        assert_eq!(info.level(now + Duration::hours(7)), AuthLevel::Unsafe);
    }

    #[test]
    fn level_only_decreases_over_time() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(
            alice(),
            Some(now + Duration::hours(6)),
            Some(now + Duration::hours(3)),
            "D1",
        );
        let mut last = info.level(now);
        for minutes in (0..=500).step_by(20) {
            let level = info.level(now + Duration::minutes(minutes));
            assert!(level <= last, "level increased at +{minutes}m");
            last = level;
        }
    }

    #[test]
    fn critical_clamped_to_expires() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(alice(), Some(now + Duration::hours(1)), None, "D1")
            .set_critical_expires(Some(now + Duration::hours(2)));
        assert_eq!(info.expires(), info.critical_expires());
        assert_eq!(info.expires(), Some(now + Duration::hours(2)));
    }

    #[test]
    fn shrinking_expires_clamps_critical() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(
            alice(),
            Some(now + Duration::hours(6)),
            Some(now + Duration::hours(3)),
            "D1",
        )
        .set_expires(Some(now + Duration::hours(1)));
        assert_eq!(info.critical_expires(), Some(now + Duration::hours(1)));
    }

    #[test]
    fn impersonation_keeps_actual_user() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(alice(), Some(now + Duration::hours(6)), None, "D1");
        let imp = info.impersonate(bob());
        assert!(imp.is_impersonated());
        assert_eq!(imp.actual_user(), info.actual_user());
        assert_eq!(imp.user().user_name(), "Bob");

        let back = imp.clear_impersonation();
        assert!(!back.is_impersonated());
        assert_eq!(back.user().user_name(), "Alice");
    }

    #[test]
    fn check_expiration_clears_stale_timestamps() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(
            alice(),
            Some(now + Duration::hours(6)),
            Some(now + Duration::hours(3)),
            "D1",
        );

        let untouched = info.check_expiration(now);
        assert_eq!(untouched, info);

        let demoted = info.check_expiration(now + Duration::hours(4));
        assert_eq!(demoted.critical_expires(), None);
        assert_eq!(demoted.expires(), info.expires());

        let unsafe_ = info.check_expiration(now + Duration::hours(7));
        assert_eq!(unsafe_.expires(), None);
        assert_eq!(unsafe_.level(now + Duration::hours(7)), AuthLevel::Unsafe);
    }

    #[test]
    fn json_omits_actual_user_when_identical() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(alice(), Some(now + Duration::hours(6)), None, "D1");
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("actualUser").is_none());
        assert_eq!(json["user"]["userId"], 3712);
        assert_eq!(json["user"]["userName"], "Alice");
        assert_eq!(json["deviceId"], "D1");
        assert!(json.get("exp").is_some());
        assert!(json.get("cexp").is_none());
    }

    #[test]
    fn json_keeps_actual_user_when_impersonated() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(alice(), Some(now + Duration::hours(6)), None, "D1")
            .impersonate(bob());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["actualUser"]["userName"], "Alice");
        assert_eq!(json["user"]["userName"], "Bob");

        let parsed: AuthenticationInfo = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn json_roundtrip() {
        let now = Utc::now();
        let info = AuthenticationInfo::new(
            alice(),
            Some(now + Duration::hours(6)),
            Some(now + Duration::hours(3)),
            "D1",
        );
        let text = serde_json::to_string(&info).unwrap();
        let parsed: AuthenticationInfo = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, info);
    }
}
