//! Tienda storefront library.
//!
//! The cart reconciliation engine, its stores, checkout, and the JSON API
//! that serves them. The binary in `main.rs` wires these together; the CLI
//! and integration tests use the library directly.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
