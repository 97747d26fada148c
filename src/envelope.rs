//! Binary envelope codec and the long-term cookie payload.
//!
//! The protected envelope is the canonical binary encoding of a
//! [`FrontAuthenticationInfo`] wrapped by a purpose-scoped
//! [`Protector`](crate::protector::Protector). The long-term cookie payload
//! is plaintext JSON inspected by the browser client and is never encrypted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtectError;
use crate::info::{AuthenticationInfo, FrontAuthenticationInfo, UserInfo, UserSchemeInfo};
use crate::protector::Protector;

/// Ordered string → nullable-string mapping carried across redirect-based
/// login flows, protected with the `Extra` purpose.
pub type ExtraData = Vec<(String, Option<String>)>;

/// Protects a [`FrontAuthenticationInfo`] into an opaque URL-safe string.
///
/// # Errors
///
/// Propagates [`ProtectError`] from the protector.
pub fn protect_front_auth(
    protector: &Protector,
    fauth: &FrontAuthenticationInfo,
) -> Result<String, ProtectError> {
    protector.protect(&encode_front_auth(fauth))
}

/// Opens a string produced by [`protect_front_auth`].
///
/// # Errors
///
/// Returns a [`ProtectError`] on integrity failure or a malformed payload.
/// Callers treat every error as "no envelope present".
pub fn unprotect_front_auth(
    protector: &Protector,
    sealed: &str,
) -> Result<FrontAuthenticationInfo, ProtectError> {
    decode_front_auth(&protector.unprotect(sealed)?)
}

/// Canonical binary form: `actualUser`, `user`, both expirations, the
/// device id, then the one-byte `rememberMe` flag. Little-endian throughout;
/// any layout change bumps the protector purpose version.
#[must_use]
pub fn encode_front_auth(fauth: &FrontAuthenticationInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    put_user(&mut buf, fauth.info.actual_user());
    put_user(&mut buf, fauth.info.user());
    put_instant(&mut buf, fauth.info.expires());
    put_instant(&mut buf, fauth.info.critical_expires());
    put_str(&mut buf, fauth.info.device_id());
    buf.push(u8::from(fauth.remember_me));
    buf
}

/// Decodes the canonical binary form.
///
/// # Errors
///
/// Returns [`ProtectError::Truncated`] on unexpected end of input (a missing
/// `rememberMe` byte included) and [`ProtectError::Payload`] on semantic
/// violations.
pub fn decode_front_auth(bytes: &[u8]) -> Result<FrontAuthenticationInfo, ProtectError> {
    let mut r = Reader::new(bytes);
    let actual_user = read_user(&mut r)?;
    let user = read_user(&mut r)?;
    let expires = read_instant(&mut r)?;
    let critical_expires = read_instant(&mut r)?;
    let device_id = r.read_str()?;
    let remember_me = match r.read_u8()? {
        0 => false,
        1 => true,
        other => {
            return Err(ProtectError::Payload(format!(
                "invalid rememberMe flag: {other}"
            )));
        }
    };
    if !r.at_end() {
        return Err(ProtectError::Payload("trailing bytes".into()));
    }
    Ok(FrontAuthenticationInfo::new(
        AuthenticationInfo::from_parts(actual_user, user, expires, critical_expires, device_id),
        remember_me,
    ))
}

fn put_user(buf: &mut Vec<u8>, user: &UserInfo) {
    buf.extend_from_slice(&user.user_id().to_le_bytes());
    put_str(buf, user.user_name());
    buf.extend_from_slice(&(user.schemes().len() as u32).to_le_bytes());
    for scheme in user.schemes() {
        put_str(buf, &scheme.name);
        buf.extend_from_slice(&scheme.last_used.timestamp_millis().to_le_bytes());
    }
}

fn read_user(r: &mut Reader<'_>) -> Result<UserInfo, ProtectError> {
    let user_id = r.read_u64()?;
    let user_name = r.read_str()?;
    let count = r.read_u32()? as usize;
    // A scheme entry is at least 12 bytes; rejects absurd counts early.
    if count > r.remaining() / 12 {
        return Err(ProtectError::Payload(format!(
            "scheme count out of range: {count}"
        )));
    }
    let mut schemes = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_str()?;
        let last_used = read_millis(r)?;
        schemes.push(UserSchemeInfo::new(name, last_used));
    }
    if user_id == 0 && user_name.is_empty() && schemes.is_empty() {
        return Ok(UserInfo::anonymous());
    }
    UserInfo::new(user_id, user_name, schemes).map_err(|e| ProtectError::Payload(e.to_string()))
}

fn put_instant(buf: &mut Vec<u8>, instant: Option<DateTime<Utc>>) {
    match instant {
        Some(t) => {
            buf.push(1);
            buf.extend_from_slice(&t.timestamp_millis().to_le_bytes());
        }
        None => buf.push(0),
    }
}

fn read_instant(r: &mut Reader<'_>) -> Result<Option<DateTime<Utc>>, ProtectError> {
    match r.read_u8()? {
        0 => Ok(None),
        1 => Ok(Some(read_millis(r)?)),
        other => Err(ProtectError::Payload(format!(
            "invalid presence flag: {other}"
        ))),
    }
}

fn read_millis(r: &mut Reader<'_>) -> Result<DateTime<Utc>, ProtectError> {
    let millis = r.read_i64()?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| ProtectError::Payload(format!("timestamp out of range: {millis}")))
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtectError> {
        let end = self.pos.checked_add(n).ok_or(ProtectError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(ProtectError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ProtectError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, ProtectError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| ProtectError::Truncated)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&mut self) -> Result<u64, ProtectError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| ProtectError::Truncated)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_i64(&mut self) -> Result<i64, ProtectError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| ProtectError::Truncated)?;
        Ok(i64::from_le_bytes(bytes))
    }

    fn read_str(&mut self) -> Result<String, ProtectError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtectError::Payload("invalid UTF-8".into()))
    }
}

// ── Extra data ─────────────────────────────────────────────────────

/// Protects an [`ExtraData`] bag for cross-redirect carry.
///
/// # Errors
///
/// Propagates [`ProtectError`] from the protector.
pub fn protect_extra_data(protector: &Protector, data: &ExtraData) -> Result<String, ProtectError> {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    for (key, value) in data {
        put_str(&mut buf, key);
        match value {
            Some(v) => {
                buf.push(1);
                put_str(&mut buf, v);
            }
            None => buf.push(0),
        }
    }
    protector.protect(&buf)
}

/// Opens a bag produced by [`protect_extra_data`], preserving entry order.
///
/// # Errors
///
/// Returns a [`ProtectError`] on integrity failure or a malformed payload.
pub fn unprotect_extra_data(
    protector: &Protector,
    sealed: &str,
) -> Result<ExtraData, ProtectError> {
    let bytes = protector.unprotect(sealed)?;
    let mut r = Reader::new(&bytes);
    let count = r.read_u32()? as usize;
    if count > r.remaining() / 5 {
        return Err(ProtectError::Payload(format!(
            "entry count out of range: {count}"
        )));
    }
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        let key = r.read_str()?;
        let value = match r.read_u8()? {
            0 => None,
            1 => Some(r.read_str()?),
            other => {
                return Err(ProtectError::Payload(format!(
                    "invalid presence flag: {other}"
                )));
            }
        };
        data.push((key, value));
    }
    if !r.at_end() {
        return Err(ProtectError::Payload("trailing bytes".into()));
    }
    Ok(data)
}

// ── Long-term cookie payload ───────────────────────────────────────

/// Plaintext JSON body of the long-term cookie.
///
/// Carries the *unsafe* actual user (when remembering) and the device id.
/// A payload with only `deviceId` (or entirely empty) is legal. The key
/// names are read by the browser client; do not rename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongTermPayload {
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<u64>,
    #[serde(rename = "userName", skip_serializing_if = "Option::is_none", default)]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub schemes: Option<Vec<UserSchemeInfo>>,
    #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none", default)]
    pub device_id: Option<String>,
}

impl LongTermPayload {
    /// Payload remembering `user` (pass `None` for an empty object) on the
    /// device identified by `device_id` (empty = no key emitted).
    #[must_use]
    pub fn remembering(user: Option<&UserInfo>, device_id: &str) -> Self {
        Self {
            user_id: user.map(UserInfo::user_id),
            user_name: user.map(|u| u.user_name().to_string()),
            schemes: user.map(|u| u.schemes().to_vec()),
            device_id: if device_id.is_empty() {
                None
            } else {
                Some(device_id.to_string())
            },
        }
    }

    /// The unsafe user carried by the payload, if any. Invalid combinations
    /// (violating the anonymous invariant) yield `None` rather than an error:
    /// this cookie is client-writable and is never trusted.
    #[must_use]
    pub fn unsafe_user(&self) -> Option<UserInfo> {
        let user_id = self.user_id?;
        if user_id == 0 {
            return None;
        }
        UserInfo::new(
            user_id,
            self.user_name.clone().unwrap_or_default(),
            self.schemes.clone().unwrap_or_default(),
        )
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protector::{COOKIE_PURPOSE, EXTRA_PURPOSE, RootProtector};
    use chrono::Duration;

    fn millis(t: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap()
    }

    fn alice() -> UserInfo {
        UserInfo::new(
            3712,
            "Alice",
            vec![
                UserSchemeInfo::new("Basic", millis(Utc::now())),
                UserSchemeInfo::new("Provider", millis(Utc::now() - Duration::days(2))),
            ],
        )
        .unwrap()
    }

    fn protector() -> Protector {
        RootProtector::new([7u8; 32]).derive(COOKIE_PURPOSE)
    }

    #[test]
    fn binary_roundtrip_full() {
        let now = millis(Utc::now());
        let info = AuthenticationInfo::new(
            alice(),
            Some(now + Duration::hours(6)),
            Some(now + Duration::hours(3)),
            "Zm9vYmFyYmF6cXV4MTIzNA",
        );
        let fauth = FrontAuthenticationInfo::new(info, true);
        let decoded = decode_front_auth(&encode_front_auth(&fauth)).unwrap();
        assert_eq!(decoded, fauth);
    }

    #[test]
    fn binary_roundtrip_impersonated() {
        let now = millis(Utc::now());
        let bob = UserInfo::new(54, "Bob", Vec::new()).unwrap();
        let info = AuthenticationInfo::new(alice(), Some(now + Duration::hours(6)), None, "D1")
            .impersonate(bob);
        let fauth = FrontAuthenticationInfo::new(info, false);
        let decoded = decode_front_auth(&encode_front_auth(&fauth)).unwrap();
        assert_eq!(decoded, fauth);
        assert!(decoded.info.is_impersonated());
    }

    #[test]
    fn binary_roundtrip_none() {
        let fauth = FrontAuthenticationInfo::none();
        let decoded = decode_front_auth(&encode_front_auth(&fauth)).unwrap();
        assert_eq!(decoded, fauth);
    }

    #[test]
    fn missing_remember_me_byte_is_an_error() {
        let fauth = FrontAuthenticationInfo::none();
        let mut bytes = encode_front_auth(&fauth);
        bytes.pop();
        assert!(matches!(
            decode_front_auth(&bytes),
            Err(ProtectError::Truncated)
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode_front_auth(&FrontAuthenticationInfo::none());
        bytes.push(0);
        assert!(matches!(
            decode_front_auth(&bytes),
            Err(ProtectError::Payload(_))
        ));
    }

    #[test]
    fn protected_roundtrip() {
        let now = millis(Utc::now());
        let info = AuthenticationInfo::new(alice(), Some(now + Duration::hours(6)), None, "D1");
        let fauth = FrontAuthenticationInfo::new(info, true);
        let p = protector();
        let sealed = protect_front_auth(&p, &fauth).unwrap();
        assert_eq!(unprotect_front_auth(&p, &sealed).unwrap(), fauth);
    }

    #[test]
    fn extra_data_roundtrip_preserves_order() {
        let p = RootProtector::new([7u8; 32]).derive(EXTRA_PURPOSE);
        let data: ExtraData = vec![
            ("zeta".into(), Some("1".into())),
            ("alpha".into(), None),
            ("mid".into(), Some(String::new())),
        ];
        let sealed = protect_extra_data(&p, &data).unwrap();
        assert_eq!(unprotect_extra_data(&p, &sealed).unwrap(), data);
    }

    #[test]
    fn long_term_payload_device_only() {
        let payload = LongTermPayload::remembering(None, "D1");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "deviceId": "D1" }));
        assert!(payload.unsafe_user().is_none());
    }

    #[test]
    fn long_term_payload_with_user() {
        let user = alice();
        let payload = LongTermPayload::remembering(Some(&user), "D1");
        let text = serde_json::to_string(&payload).unwrap();
        let parsed: LongTermPayload = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.unsafe_user().unwrap(), user);
        assert_eq!(parsed.device_id.as_deref(), Some("D1"));
    }

    #[test]
    fn long_term_payload_rejects_bad_user() {
        let parsed: LongTermPayload =
            serde_json::from_str(r#"{"userId":0,"userName":"ghost"}"#).unwrap();
        assert!(parsed.unsafe_user().is_none());
    }

    #[test]
    fn empty_long_term_payload_is_legal() {
        let parsed: LongTermPayload = serde_json::from_str("{}").unwrap();
        assert!(parsed.unsafe_user().is_none());
        assert!(parsed.device_id.is_none());
    }
}
