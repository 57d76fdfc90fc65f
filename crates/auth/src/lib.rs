//! `orchard-auth`: pure authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage. It owns the
//! closed role set, the permission table and the decision procedure, and the
//! JWT role-claim model shared with the identity provider.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{Decision, OwnerPair, check_permission, check_permission_named, require};
pub use claims::{Hs256Jwt, JwtValidator, RoleClaims, TokenValidationError, validate_claims};
pub use permissions::{Permission, UnknownPermission};
pub use principal::ExternalId;
pub use roles::AppRole;
