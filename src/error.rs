/// Envelope protection failures.
///
/// Every variant means the envelope cannot be trusted. Resolvers treat all
/// of them as "no envelope present", never as an authentication failure.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtectError {
    #[error("invalid envelope encoding")]
    Encoding,
    #[error("envelope too short")]
    Truncated,
    #[error("integrity check failed")]
    Integrity,
    #[error("malformed envelope payload: {0}")]
    Payload(String),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid root key: {0}")]
    InvalidRootKey(String),
    #[error("protection error: {0}")]
    Protect(#[from] ProtectError),
    #[error("invalid user info: {0}")]
    InvalidUserInfo(String),
}
