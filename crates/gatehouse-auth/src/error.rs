//! Authentication error types.

use gatehouse_core::error::GatehouseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token has expired")]
    TokenExpired,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("MFA is not configured: {0}")]
    MfaUnavailable(String),

    #[error("cryptography error: {0}")]
    Crypto(String),
}

impl From<AuthError> for GatehouseError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenExpired => GatehouseError::TokenExpired,
            AuthError::TokenInvalid(msg) => GatehouseError::InvalidSignature(msg),
            AuthError::MfaUnavailable(msg) => GatehouseError::validation(msg),
            AuthError::Crypto(msg) => GatehouseError::Crypto(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_are_rejections() {
        let expired: GatehouseError = AuthError::TokenExpired.into();
        let forged: GatehouseError = AuthError::TokenInvalid("bad signature".into()).into();
        assert!(expired.is_token_rejection());
        assert!(forged.is_token_rejection());

        let crypto: GatehouseError = AuthError::Crypto("nonce".into()).into();
        assert!(!crypto.is_token_rejection());
    }
}
