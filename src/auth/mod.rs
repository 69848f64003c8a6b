//! Authentication of stream and ingest requests
//!
//! - `token`: locating and verifying CRM-issued JWTs
//! - `middleware`: the `require_auth` layer in front of the API
//! - `extractor`: `AuthUser` for handlers

pub mod extractor;
pub mod middleware;
pub mod token;

pub use extractor::AuthUser;
pub use middleware::require_auth;
pub use token::{Claims, TokenError, TokenSource, TokenVerifier};
