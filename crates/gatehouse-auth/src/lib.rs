//! Gatehouse Auth — login orchestration, MFA challenges, claims
//! assembly and the token lifecycle.

pub mod admin;
pub mod claims;
pub mod config;
pub mod error;
pub mod login;
pub mod service;
pub mod signer;
pub mod tokens;
pub mod totp;

pub use admin::AccountAdmin;
pub use claims::{ClaimSet, ClaimsBuilder};
pub use config::AuthConfig;
pub use error::AuthError;
pub use login::{LoginOrchestrator, LoginOutcome, LoginRequest, MfaChallenge, TotpSetup};
pub use service::AuthServices;
pub use signer::{JwtSigner, TokenKind, TokenSigner};
pub use tokens::{IssuedTokens, TokenManager, ValidatedAccess};
