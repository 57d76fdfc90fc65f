//! Catalog module.
//!
//! Business rules for products (types, archiving, purchasability), implemented
//! as deterministic domain logic (no IO, no HTTP, no storage).

pub mod product;

pub use product::{NewProduct, Product, ProductType};
