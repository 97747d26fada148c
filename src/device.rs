use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use uuid::Uuid;

/// Mints a fresh device identifier.
///
/// 16 random bytes (a UUID v4) encoded as unpadded base64url: a stable,
/// URL- and cookie-safe 22-character string minted on first contact and
/// persisted in the long-term cookie.
#[must_use]
pub fn new_device_id() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_length() {
        assert_eq!(new_device_id().len(), 22);
    }

    #[test]
    fn device_id_url_safe() {
        let id = new_device_id();
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "device id should be URL-safe: {}",
            id
        );
    }

    #[test]
    fn device_id_uniqueness() {
        assert_ne!(new_device_id(), new_device_id());
    }
}
