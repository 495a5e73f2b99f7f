//! Engine façade: parse, crawl, stream.
//!
//! [`Engine::run`] parses the expression, seeds the frontier, and
//! returns a [`ResultStream`] that yields values as workers produce
//! them. Workers fetch concurrently under the global and per-host
//! limits; DOM parsing and segment dispatch run inside
//! `spawn_blocking`. Emission order between documents is unspecified;
//! within one document the XPath evaluator's document order is kept.

pub mod dispatch;
pub mod frontier;
pub mod task;

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use url::Url;

use crate::dom::PageDocument;
use crate::error::{ConfigError, Error, ParseError};
use crate::hooks::{self, FetchContext, HookSet};
use crate::http::Fetcher;
use crate::program;
use crate::settings::Settings;
use crate::stats::{CrawlStats, ProgressObserver, StatsSnapshot};
use crate::value::{ErrorValue, Value};

use frontier::Frontier;
use task::CrawlTask;

const RESULT_CHANNEL_CAPACITY: usize = 64;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Subscribe a progress observer that receives counter snapshots.
    pub progress: bool,
    /// Emit `{__type__: "error", ...}` maps for failed fetches instead
    /// of silently dropping them.
    pub yield_errors: bool,
}

/// The wxpath crawl engine.
pub struct Engine {
    settings: Settings,
    fetcher: Arc<Fetcher>,
    stats: Arc<CrawlStats>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Self, Error> {
        settings.validate()?;
        let stats = Arc::new(CrawlStats::default());
        let fetcher = Arc::new(Fetcher::new(&settings, Arc::clone(&stats))?);
        Ok(Self {
            settings,
            fetcher,
            stats,
            observer: None,
        })
    }

    /// Attach a progress observer, used when `RunOptions::progress` is
    /// set.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Parse `expression` and start the crawl. Must be called within a
    /// Tokio runtime; results stream until completion or cancellation.
    pub fn run(
        &self,
        expression: &str,
        max_depth: usize,
        options: RunOptions,
    ) -> Result<ResultStream, Error> {
        let program = Arc::new(program::parse(expression)?);
        let seed_url = Url::parse(&program.seed().url).map_err(|e| {
            ParseError::new(0, format!("invalid seed URL '{}': {e}", program.seed().url))
        })?;

        let hooks = hooks::snapshot();
        hooks.validate()?;

        let observer = if options.progress {
            self.observer
                .clone()
                .or_else(|| Some(Arc::new(LogProgress) as Arc<dyn ProgressObserver>))
        } else {
            None
        };

        let (tx, rx) = mpsc::channel::<Value>(RESULT_CHANNEL_CAPACITY);
        let cancel = Arc::new(AtomicBool::new(false));
        let frontier = Arc::new(Frontier::new(Arc::clone(&self.stats)));

        let ctx = Arc::new(RunCtx {
            fetcher: Arc::clone(&self.fetcher),
            frontier: Arc::clone(&frontier),
            hooks,
            stats: Arc::clone(&self.stats),
            cancel: Arc::clone(&cancel),
            yield_errors: options.yield_errors,
            observer,
        });

        tracing::info!(expression, max_depth, "starting crawl");
        ctx.frontier
            .enqueue(CrawlTask::seed(seed_url, Arc::clone(&program), max_depth));

        let worker_slots = Arc::new(Semaphore::new(self.settings.http.concurrency.max(1)));
        let driver_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            while let Some(task) = driver_ctx.frontier.next().await {
                if driver_ctx.cancel.load(Ordering::Relaxed) {
                    driver_ctx.frontier.task_done();
                    continue;
                }
                let permit = match Arc::clone(&worker_slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker_ctx = Arc::clone(&driver_ctx);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    process_task(worker_ctx, task, tx).await;
                });
            }
            tracing::info!("crawl complete");
        });

        Ok(ResultStream {
            rx: ReceiverStream::new(rx),
            cancel,
            frontier,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Run and buffer every result. Must not be called from within an
    /// async runtime.
    pub fn run_blocking(
        &self,
        expression: &str,
        max_depth: usize,
        options: RunOptions,
    ) -> Result<Vec<Value>, Error> {
        Ok(self
            .run_blocking_iter(expression, max_depth, options)?
            .collect())
    }

    /// Run and return an eager blocking iterator over the stream. Must
    /// not be called from within an async runtime.
    pub fn run_blocking_iter(
        &self,
        expression: &str,
        max_depth: usize,
        options: RunOptions,
    ) -> Result<BlockingRun, Error> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ConfigError::NestedRuntime.into());
        }
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                ConfigError::InvalidSettings(vec![format!("failed to build runtime: {e}")])
            })?;
        let stream = {
            let _guard = rt.enter();
            self.run(expression, max_depth, options)?
        };
        Ok(BlockingRun { rt, stream })
    }
}

/// Run an expression with default settings. Must be called within a
/// Tokio runtime.
pub fn run(expression: &str, max_depth: usize, options: RunOptions) -> Result<ResultStream, Error> {
    Engine::new(Settings::default())?.run(expression, max_depth, options)
}

/// Run an expression with default settings and buffer the results.
/// Refuses to run inside an active async runtime.
pub fn run_blocking(
    expression: &str,
    max_depth: usize,
    options: RunOptions,
) -> Result<Vec<Value>, Error> {
    Ok(run_blocking_iter(expression, max_depth, options)?.collect())
}

/// Run an expression with default settings, yielding results eagerly.
/// Refuses to run inside an active async runtime.
pub fn run_blocking_iter(
    expression: &str,
    max_depth: usize,
    options: RunOptions,
) -> Result<BlockingRun, Error> {
    Engine::new(Settings::default())?.run_blocking_iter(expression, max_depth, options)
}

/// Stream of crawl results.
pub struct ResultStream {
    rx: ReceiverStream<Value>,
    cancel: Arc<AtomicBool>,
    frontier: Arc<Frontier>,
    stats: Arc<CrawlStats>,
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream").finish_non_exhaustive()
    }
}

impl ResultStream {
    /// Cooperatively cancel the run: queued tasks are discarded, no new
    /// fetches start, and already-extracted results are still
    /// delivered.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        let drained = self.frontier.drain();
        tracing::info!(drained, "crawl cancelled");
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Stream for ResultStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

/// Blocking iterator adapter around a [`ResultStream`] with its own
/// runtime.
pub struct BlockingRun {
    rt: tokio::runtime::Runtime,
    stream: ResultStream,
}

impl BlockingRun {
    pub fn cancel(&self) {
        self.stream.cancel();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stream.stats()
    }
}

impl Iterator for BlockingRun {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.rt.block_on(self.stream.rx.next())
    }
}

struct RunCtx {
    fetcher: Arc<Fetcher>,
    frontier: Arc<Frontier>,
    hooks: HookSet,
    stats: Arc<CrawlStats>,
    cancel: Arc<AtomicBool>,
    yield_errors: bool,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl RunCtx {
    fn notify_progress(&self) {
        if let Some(observer) = &self.observer {
            observer.on_progress(&self.stats.snapshot());
        }
    }
}

/// Default observer when `progress` is requested without a custom one.
struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, snapshot: &StatsSnapshot) {
        tracing::info!(%snapshot, "progress");
    }
}

/// Completes one task: fetch, hook, parse, dispatch, enqueue, emit.
/// The outstanding-work counter is decremented on every exit path.
async fn process_task(ctx: Arc<RunCtx>, task: CrawlTask, tx: mpsc::Sender<Value>) {
    struct DoneGuard(Arc<Frontier>);
    impl Drop for DoneGuard {
        fn drop(&mut self) {
            self.0.task_done();
        }
    }
    let _done = DoneGuard(Arc::clone(&ctx.frontier));

    if ctx.cancel.load(Ordering::Relaxed) {
        return;
    }

    let outcome = match ctx.fetcher.fetch(&task.url).await {
        Ok(outcome) => outcome,
        Err(err) => {
            CrawlStats::incr(&ctx.stats.failed);
            tracing::debug!(url = task.url.as_str(), error = %err, "fetch failed");
            if ctx.yield_errors {
                let value = Value::Error(ErrorValue {
                    url: task.url.to_string(),
                    reason: err.to_string(),
                    status: err.status(),
                    depth: task.depth,
                });
                if tx.send(value).await.is_ok() {
                    CrawlStats::incr(&ctx.stats.yielded);
                }
            }
            ctx.notify_progress();
            return;
        }
    };

    let fetch_ctx = FetchContext {
        url: task.url.to_string(),
        backlink: task.backlink.clone(),
        depth: task.depth,
    };

    let Some(body) = ctx.hooks.post_fetch(&fetch_ctx, outcome.body).await else {
        CrawlStats::incr(&ctx.stats.dropped_by_hook);
        ctx.notify_progress();
        return;
    };

    if ctx.cancel.load(Ordering::Relaxed) {
        return;
    }

    let text = String::from_utf8_lossy(&body).into_owned();
    let mut base_url = outcome.final_url.clone();
    base_url.set_fragment(None);

    let hooks = ctx.hooks.clone();
    let blocking_task = task.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let page = PageDocument::parse(
            &text,
            base_url,
            blocking_task.backlink.clone(),
            blocking_task.depth,
        );
        let Some(page) = hooks.post_parse(&fetch_ctx, page) else {
            return Ok(None);
        };
        dispatch::dispatch(&page, &blocking_task).map(Some)
    })
    .await;

    let result = match joined {
        Ok(Ok(Some(result))) => result,
        Ok(Ok(None)) => {
            CrawlStats::incr(&ctx.stats.dropped_by_hook);
            ctx.notify_progress();
            return;
        }
        Ok(Err(err)) => {
            CrawlStats::incr(&ctx.stats.failed);
            tracing::warn!(url = task.url.as_str(), error = %err, "dispatch failed");
            if ctx.yield_errors {
                let value = Value::Error(ErrorValue {
                    url: task.url.to_string(),
                    reason: err.to_string(),
                    status: None,
                    depth: task.depth,
                });
                if tx.send(value).await.is_ok() {
                    CrawlStats::incr(&ctx.stats.yielded);
                }
            }
            ctx.notify_progress();
            return;
        }
        Err(join_err) => {
            CrawlStats::incr(&ctx.stats.failed);
            tracing::warn!(url = task.url.as_str(), error = %join_err, "worker panicked");
            ctx.notify_progress();
            return;
        }
    };

    for child in result.children {
        let child_task = CrawlTask {
            url: child.url,
            depth: task.depth + 1,
            backlink: Some(task.url.to_string()),
            program: Arc::clone(&task.program),
            cursor: child.cursor,
            deep: child.deep,
            depth_limit: task.depth_limit,
        };
        ctx.frontier.enqueue(child_task);
    }

    for value in result.outputs {
        if ctx.cancel.load(Ordering::Relaxed) {
            break;
        }
        match ctx.hooks.post_extract(value).await {
            Some(value) => {
                if tx.send(value).await.is_err() {
                    // receiver dropped; stop producing
                    break;
                }
                CrawlStats::incr(&ctx.stats.yielded);
            }
            None => CrawlStats::incr(&ctx.stats.dropped_by_hook),
        }
    }

    ctx.notify_progress();
}
