//! Process-scoped hook registry.
//!
//! Hooks observe three points of the pipeline: `post_fetch` (raw body
//! before parsing), `post_parse` (the DOM before segments run), and
//! `post_extract` (each extracted value before emission). Hooks run in
//! registration order; returning [`HookOutcome::Drop`] suppresses the
//! value and stops the chain, and a failure drops the value with a
//! logged warning while the run continues.
//!
//! Blocking hooks implement [`Hook`]; suspending hooks implement
//! [`AsyncHook`] (which has no DOM stage, since parsing and evaluation
//! are CPU-bound and never leave their thread). A run observes the
//! registrations present when it starts, and rejects a registry that
//! mixes both modes.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::dom::PageDocument;
use crate::error::ConfigError;
use crate::value::Value;

/// Crawl context handed to body and DOM hooks.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub url: String,
    pub backlink: Option<String>,
    pub depth: usize,
}

/// What a hook decided about a value.
#[derive(Debug)]
pub enum HookOutcome<T> {
    /// Pass the (possibly replaced) value along.
    Keep(T),
    /// Suppress the value; later hooks do not see it.
    Drop,
    /// The hook failed; the value is dropped and a warning logged.
    Fail(String),
}

/// A blocking hook. Every method is optional.
pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str {
        "hook"
    }

    fn post_fetch(&self, _ctx: &FetchContext, body: Vec<u8>) -> HookOutcome<Vec<u8>> {
        HookOutcome::Keep(body)
    }

    fn post_parse(&self, _ctx: &FetchContext, doc: PageDocument) -> HookOutcome<PageDocument> {
        HookOutcome::Keep(doc)
    }

    fn post_extract(&self, value: Value) -> HookOutcome<Value> {
        HookOutcome::Keep(value)
    }
}

/// A suspending hook for the body and value stages.
#[async_trait]
pub trait AsyncHook: Send + Sync {
    fn name(&self) -> &'static str {
        "hook"
    }

    async fn post_fetch(&self, _ctx: &FetchContext, body: Vec<u8>) -> HookOutcome<Vec<u8>> {
        HookOutcome::Keep(body)
    }

    async fn post_extract(&self, value: Value) -> HookOutcome<Value> {
        HookOutcome::Keep(value)
    }
}

#[derive(Default)]
struct Registry {
    blocking: Vec<Arc<dyn Hook>>,
    suspending: Vec<Arc<dyn AsyncHook>>,
}

static REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(|| RwLock::new(Registry::default()));

/// Register a blocking hook.
pub fn register(hook: impl Hook + 'static) {
    REGISTRY.write().blocking.push(Arc::new(hook));
}

/// Register a suspending hook.
pub fn register_async(hook: impl AsyncHook + 'static) {
    REGISTRY.write().suspending.push(Arc::new(hook));
}

/// Remove every registered hook. Mainly for tests.
pub fn clear() {
    let mut registry = REGISTRY.write();
    registry.blocking.clear();
    registry.suspending.clear();
}

/// The hooks a run observes, captured at engine start.
#[derive(Clone, Default)]
pub struct HookSet {
    blocking: Vec<Arc<dyn Hook>>,
    suspending: Vec<Arc<dyn AsyncHook>>,
}

/// Capture the current registrations.
pub fn snapshot() -> HookSet {
    let registry = REGISTRY.read();
    HookSet {
        blocking: registry.blocking.clone(),
        suspending: registry.suspending.clone(),
    }
}

impl HookSet {
    /// All hooks in one run must share a synchrony mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.blocking.is_empty() && !self.suspending.is_empty() {
            return Err(ConfigError::MixedHookModes);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.blocking.is_empty() && self.suspending.is_empty()
    }

    /// Run the body chain. `None` means the value was dropped.
    pub async fn post_fetch(&self, ctx: &FetchContext, mut body: Vec<u8>) -> Option<Vec<u8>> {
        for hook in &self.blocking {
            match hook.post_fetch(ctx, body) {
                HookOutcome::Keep(b) => body = b,
                HookOutcome::Drop => {
                    tracing::debug!(hook = hook.name(), url = %ctx.url, "hook dropped body");
                    return None;
                }
                HookOutcome::Fail(message) => {
                    tracing::warn!(hook = hook.name(), url = %ctx.url, message, "hook failed");
                    return None;
                }
            }
        }
        for hook in &self.suspending {
            match hook.post_fetch(ctx, body).await {
                HookOutcome::Keep(b) => body = b,
                HookOutcome::Drop => {
                    tracing::debug!(hook = hook.name(), url = %ctx.url, "hook dropped body");
                    return None;
                }
                HookOutcome::Fail(message) => {
                    tracing::warn!(hook = hook.name(), url = %ctx.url, message, "hook failed");
                    return None;
                }
            }
        }
        Some(body)
    }

    /// Run the DOM chain (blocking hooks only). Called from inside the
    /// worker's CPU-bound section.
    pub fn post_parse(&self, ctx: &FetchContext, mut doc: PageDocument) -> Option<PageDocument> {
        for hook in &self.blocking {
            match hook.post_parse(ctx, doc) {
                HookOutcome::Keep(d) => doc = d,
                HookOutcome::Drop => {
                    tracing::debug!(hook = hook.name(), url = %ctx.url, "hook dropped document");
                    return None;
                }
                HookOutcome::Fail(message) => {
                    tracing::warn!(hook = hook.name(), url = %ctx.url, message, "hook failed");
                    return None;
                }
            }
        }
        Some(doc)
    }

    /// Run the value chain. `None` means the value was dropped.
    pub async fn post_extract(&self, mut value: Value) -> Option<Value> {
        for hook in &self.blocking {
            match hook.post_extract(value) {
                HookOutcome::Keep(v) => value = v,
                HookOutcome::Drop => {
                    tracing::debug!(hook = hook.name(), "hook dropped value");
                    return None;
                }
                HookOutcome::Fail(message) => {
                    tracing::warn!(hook = hook.name(), message, "hook failed");
                    return None;
                }
            }
        }
        for hook in &self.suspending {
            match hook.post_extract(value).await {
                HookOutcome::Keep(v) => value = v,
                HookOutcome::Drop => {
                    tracing::debug!(hook = hook.name(), "hook dropped value");
                    return None;
                }
                HookOutcome::Fail(message) => {
                    tracing::warn!(hook = hook.name(), message, "hook failed");
                    return None;
                }
            }
        }
        Some(value)
    }
}

// ---------------------------------------------------------------------
// Built-in: JSONL writer
// ---------------------------------------------------------------------

const JSONL_QUEUE_CAPACITY: usize = 10_000;

/// Mirrors every extracted value to a newline-delimited JSON file.
///
/// `post_extract` serialises and enqueues without blocking; a
/// background thread appends to the file. When the queue is full the
/// line is dropped and counted, never the value itself (the hook always
/// passes values through).
pub struct JsonlWriter {
    tx: SyncSender<String>,
    dropped: AtomicU64,
}

impl JsonlWriter {
    pub fn create(path: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let (tx, rx) = sync_channel::<String>(JSONL_QUEUE_CAPACITY);
        std::thread::Builder::new()
            .name("wxpath-jsonl-writer".to_string())
            .spawn(move || {
                let mut writer = std::io::LineWriter::new(file);
                while let Ok(line) = rx.recv() {
                    if writeln!(writer, "{line}").is_err() {
                        break;
                    }
                }
                let _ = writer.flush();
            })?;
        Ok(Self {
            tx,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Hook for JsonlWriter {
    fn name(&self) -> &'static str {
        "jsonl-writer"
    }

    fn post_extract(&self, value: Value) -> HookOutcome<Value> {
        match serde_json::to_string(&value) {
            Ok(line) => {
                if let Err(TrySendError::Full(_)) = self.tx.try_send(line) {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 10_000 == 0 {
                        tracing::warn!(dropped, "jsonl queue full; dropping lines");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialise value for jsonl"),
        }
        HookOutcome::Keep(value)
    }
}
