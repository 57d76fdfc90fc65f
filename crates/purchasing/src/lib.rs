//! Purchasing module.
//!
//! Purchases snapshot the product price at purchase time and are cancelled by
//! soft delete only, so history and revenue stay queryable.

pub mod purchase;

pub use purchase::{MAX_QUANTITY, Purchase};
