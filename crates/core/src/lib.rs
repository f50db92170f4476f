//! Tienda Core - Shared types library.
//!
//! This crate provides the types used across all Tienda components:
//! - `storefront` - Cart engine, persistence adapters and the JSON API
//! - `cli` - Command-line tools for migrations and cart maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no database
//! access, no async. Cart mutation rules live here so they can be exercised
//! without any store behind them.
//!
//! # Modules
//!
//! - [`types`] - IDs, prices, emails, product snapshots, carts and orders

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
