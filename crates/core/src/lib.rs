//! Fairway Core - Shared types library.
//!
//! This crate provides common types used across all Fairway components:
//! - `client` - Fetch cache, durable storage and authentication facade
//! - `cli` - Command-line front end for the client
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, emails, handicaps, identities and
//!   authentication status

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
