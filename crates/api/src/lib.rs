//! HTTP API: configuration, auth middleware, routing, and response mapping.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
