//! HTTP subsystem: fetch engine and its policies.
//!
//! - [`client`]: the concurrent fetcher shared by all workers.
//! - [`robots`]: robots.txt fetching, caching, and matching.
//! - [`throttle`]: adaptive per-host delays.
//! - [`retry`]: retry policy with exponential backoff and jitter.
//! - [`cache`]: optional response cache backends.

pub mod cache;
pub mod client;
pub mod retry;
pub mod robots;
pub mod throttle;

pub use client::{host_key, FetchOutcome, Fetcher};
pub use retry::RetryPolicy;
pub use robots::{RobotsGate, RobotsRules};
pub use throttle::AutoThrottler;
