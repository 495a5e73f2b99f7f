//! wxpath: declarative web crawling with XPath expressions.
//!
//! A single expression combines ordinary XPath with a `url()` traversal
//! operator; the engine executes the crawl breadth-first with bounded
//! concurrency and streams extracted values as they are produced:
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//! use wxpath::{run, RunOptions};
//!
//! # async fn example() -> Result<(), wxpath::Error> {
//! let mut results = run(
//!     "url('https://example.com')///url(//a/@href)/map{'t': (//h1)[1]}",
//!     2,
//!     RunOptions::default(),
//! )?;
//! while let Some(value) = results.next().await {
//!     println!("{}", serde_json::to_string(&value).unwrap());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! - `url('...')` seeds the crawl; `/url(x)` and `//url(x)` fetch each
//!   URL the XPath extracts; `///url(x)` re-enqueues matching links
//!   recursively up to the depth limit.
//! - Results keep their provenance: `base-uri(.)`, `wx:backlink(.)`,
//!   and `wx:depth(.)` work inside any embedded XPath.
//! - Fetching is polite by default: robots.txt gating, adaptive
//!   per-host throttling, and bounded global/per-host concurrency.

pub mod dom;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod http;
pub mod program;
pub mod settings;
pub mod stats;
pub mod util;
pub mod value;
pub mod xpath;

pub use engine::{
    run, run_blocking, run_blocking_iter, BlockingRun, Engine, ResultStream, RunOptions,
};
pub use error::{ConfigError, Error, FetchError, HookError, ParseError, ProgramError};
pub use program::Program;
pub use settings::Settings;
pub use stats::{ProgressObserver, StatsSnapshot};
pub use value::{ElementValue, ErrorValue, ProvenancedString, Value};
