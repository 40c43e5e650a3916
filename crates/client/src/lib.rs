//! Fairway client library.
//!
//! The data and session layer behind the Fairway golf front ends:
//!
//! - [`storage`] - durable string key-value stores with finite capacity
//! - [`cache`] - TTL cache over a key-value store with quota recovery and
//!   periodic maintenance
//! - [`fetch`] - resilient fetcher (de-duplication, retries, timeouts,
//!   read-through caching) over a pluggable [`fetch::Transport`]
//! - [`auth`] - authentication facade over a remote provider with demo
//!   account fallback when the provider is unreachable
//! - [`data`] - collection reads and writes with cache invalidation
//! - [`state`] - [`FairwayClient`], everything wired from [`ClientConfig`]

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod state;
pub mod storage;

pub use config::ClientConfig;
pub use error::ClientError;
pub use state::{BackgroundTasks, FairwayClient};
