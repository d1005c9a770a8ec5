//! Bazaar Core - Shared types library.
//!
//! This crate provides common types used across all Bazaar components:
//! - `cart` - Client-side cart store (persistence, cross-context sync)
//! - `cli` - Command-line front end over a file-backed cart
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no storage access,
//! no async runtime. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, prices, and fulfillment modes

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
