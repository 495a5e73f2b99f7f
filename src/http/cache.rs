//! Optional response cache.
//!
//! Cache keys are the canonical URL with the configured ignore patterns
//! stripped from the query string (`utm_*` style prefixes and exact
//! names), so tracking parameters do not fragment the cache. The sqlite
//! backend stores responses with a TTL; entries past `expire_after` are
//! treated as misses and overwritten on the next store.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use url::Url;

use crate::error::ConfigError;
use crate::settings::CacheSettings;

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub final_url: String,
    pub body: Vec<u8>,
}

/// Backend interface consumed by the fetcher.
pub trait ResponseCache: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> Option<CachedResponse>;
    fn put(&self, key: &str, response: &CachedResponse);
}

/// Build the configured backend, if caching is enabled.
pub fn build(settings: &CacheSettings) -> Result<Option<Box<dyn ResponseCache>>, ConfigError> {
    if !settings.enabled {
        return Ok(None);
    }
    match settings.backend.as_str() {
        "sqlite" => {
            let cache = SqliteCache::open(
                Path::new(&settings.path),
                Duration::from_secs(settings.expire_after_secs),
            )?;
            Ok(Some(Box::new(cache)))
        }
        other => Err(ConfigError::CacheBackendUnavailable(other.to_string())),
    }
}

/// Cache key for a request: canonical URL minus ignored query params.
pub fn cache_key(url: &Url, ignored_params: &[String]) -> String {
    let mut keyed = url.clone();
    keyed.set_fragment(None);
    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !is_ignored(name, ignored_params))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            keyed.set_query(None);
        } else {
            keyed
                .query_pairs_mut()
                .clear()
                .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }
    keyed.into()
}

fn is_ignored(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == pattern,
        }
    })
}

/// sqlite-backed response cache.
#[derive(Debug)]
pub struct SqliteCache {
    conn: Mutex<Connection>,
    expire_after: Duration,
}

impl SqliteCache {
    pub fn open(path: &Path, expire_after: Duration) -> Result<Self, ConfigError> {
        let conn = Connection::open(path).map_err(|e| {
            ConfigError::InvalidSettings(vec![format!(
                "failed to open cache database '{}': {}",
                path.display(),
                e
            )])
        })?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS responses (
                 key       TEXT PRIMARY KEY,
                 status    INTEGER NOT NULL,
                 final_url TEXT NOT NULL,
                 body      BLOB NOT NULL,
                 stored_at INTEGER NOT NULL
             )",
            [],
        )
        .map_err(|e| {
            ConfigError::InvalidSettings(vec![format!("failed to initialise cache schema: {e}")])
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            expire_after,
        })
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl ResponseCache for SqliteCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let conn = self.conn.lock().ok()?;
        let row = conn
            .query_row(
                "SELECT status, final_url, body, stored_at FROM responses WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()
            .ok()??;
        let (status, final_url, body, stored_at) = row;
        if now_secs() - stored_at > self.expire_after.as_secs() as i64 {
            return None;
        }
        Some(CachedResponse {
            status,
            final_url,
            body,
        })
    }

    fn put(&self, key: &str, response: &CachedResponse) {
        if let Ok(conn) = self.conn.lock() {
            let result = conn.execute(
                "INSERT OR REPLACE INTO responses (key, status, final_url, body, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key,
                    response.status,
                    response.final_url,
                    response.body,
                    now_secs()
                ],
            );
            if let Err(e) = result {
                tracing::warn!(key, error = %e, "failed to store response in cache");
            }
        }
    }
}
