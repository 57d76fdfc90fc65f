//! `orchard-core`: primitives shared by every domain crate.
//!
//! Typed ids, money, the clock seam and the domain error. No storage, no HTTP.

pub mod clock;
pub mod error;
pub mod id;
pub mod soft_delete;
pub mod value_object;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::DomainError;
pub use id::{MembershipId, ProductId, ProfileId, PurchaseId};
pub use soft_delete::SoftDelete;
pub use value_object::Money;
