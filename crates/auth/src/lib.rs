//! `cohort-auth`: pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it evaluates
//! roles that callers have already looked up.

pub mod authorize;
pub mod claims;
pub mod principal;
pub mod roles;
pub mod user;

pub use authorize::{authorize, AuthzError};
pub use claims::{
    validate_claims, Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError,
};
pub use principal::Principal;
pub use roles::{Role, UnknownRole};
pub use user::{normalize_email, ProfileUpdate, Registration, User};
