//! Core types for Fairway.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod handicap;
pub mod id;
pub mod identity;
pub mod status;

pub use email::{Email, EmailError};
pub use handicap::{Handicap, HandicapError};
pub use id::*;
pub use identity::{Identity, IdentitySource};
pub use status::*;
