//! HTTP surface for chart queries.
//!
//! Exposes the query pipeline as the `charts:query` action.

mod server;

pub use server::*;
