//! Profiles and the membership lifecycle.
//!
//! The lifecycle is a pure state machine: transitions take the current rows
//! and return the rows to write plus the resulting role. Persisting them (and
//! doing so atomically with purchases) is the caller's job.

pub mod lifecycle;
pub mod membership;
pub mod profile;

pub use lifecycle::{Transition, cancel, expire, grant};
pub use membership::{Membership, MembershipState};
pub use profile::Profile;
