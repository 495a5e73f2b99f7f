//! robots.txt gating.
//!
//! Fetches and caches each origin's robots.txt on first contact, then
//! answers allow/deny for every URL on that origin. Fetch failures fail
//! open (allow-all). Matching follows the common convention: allow and
//! disallow patterns support `*` wildcards and a `$` end anchor, and
//! the longest matching pattern wins, allow beating disallow on ties.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use url::Url;

const ROBOTS_CACHE_SIZE: usize = 1024;
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed rules for one origin.
#[derive(Debug, Default)]
pub struct RobotsRules {
    disallow: Vec<String>,
    allow: Vec<String>,
}

impl RobotsRules {
    /// Parse robots.txt content, honouring the group that best matches
    /// `user_agent` (a specific group overrides the `*` wildcard).
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let ua_lower = user_agent.to_lowercase();
        let mut disallow = Vec::new();
        let mut allow = Vec::new();
        let mut applies = false;
        let mut found_specific = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match directive.trim().to_lowercase().as_str() {
                "user-agent" => {
                    let agent = value.to_lowercase();
                    if agent == "*" {
                        applies = !found_specific;
                    } else if ua_lower.contains(&agent) || agent.contains(&ua_lower) {
                        applies = true;
                        found_specific = true;
                        disallow.clear();
                        allow.clear();
                    } else {
                        applies = false;
                    }
                }
                "disallow" if applies && !value.is_empty() => disallow.push(value.to_string()),
                "allow" if applies && !value.is_empty() => allow.push(value.to_string()),
                _ => {}
            }
        }
        Self { disallow, allow }
    }

    /// Allow-all rules for when robots.txt could not be fetched.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether a request path is allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest_allow = self
            .allow
            .iter()
            .filter(|p| path_matches(path, p))
            .map(|p| p.len())
            .max()
            .unwrap_or(0);
        let longest_disallow = self
            .disallow
            .iter()
            .filter(|p| path_matches(path, p))
            .map(|p| p.len())
            .max()
            .unwrap_or(0);
        longest_allow >= longest_disallow
    }
}

/// Match a path against a robots pattern with `*` and `$` support.
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        let mut pos = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            match path[pos..].find(part) {
                Some(found) => {
                    if i == 0 && found != 0 {
                        return false;
                    }
                    pos += found + part.len();
                }
                None => return false,
            }
        }
        return !anchored || pos == path.len();
    }

    if anchored {
        path == pattern
    } else {
        path.starts_with(pattern)
    }
}

/// Caching robots.txt gate shared by all workers.
pub struct RobotsGate {
    client: reqwest::Client,
    user_agent: String,
    cache: Mutex<LruCache<String, Arc<RobotsRules>>>,
}

impl RobotsGate {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        let capacity = NonZeroUsize::new(ROBOTS_CACHE_SIZE).expect("nonzero cache size");
        Self {
            client,
            user_agent: user_agent.to_string(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Whether fetching `url` is allowed. The origin's robots.txt is
    /// fetched on first contact; the cache lock also serialises
    /// concurrent first contacts to one fetch per origin.
    pub async fn can_fetch(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let rules = {
            let mut cache = self.cache.lock().await;
            match cache.get(&origin) {
                Some(rules) => Arc::clone(rules),
                None => {
                    let rules = Arc::new(self.fetch_rules(&origin).await);
                    cache.put(origin.clone(), Arc::clone(&rules));
                    rules
                }
            }
        };
        rules.is_allowed(url.path())
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(content) => RobotsRules::parse(&content, &self.user_agent),
                Err(_) => RobotsRules::allow_all(),
            },
            _ => {
                tracing::debug!(origin, "robots.txt unavailable, allowing all");
                RobotsRules::allow_all()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_wildcard_group() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /private/\nAllow: /private/public/\n",
            "TestBot",
        );
        assert!(rules.is_allowed("/open/page"));
        assert!(!rules.is_allowed("/private/secret"));
        assert!(rules.is_allowed("/private/public/ok"));
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        let content = "User-agent: *\nDisallow: /everything/\n\nUser-agent: TestBot\nDisallow: /only-this/\n";
        let rules = RobotsRules::parse(content, "TestBot");
        assert!(rules.is_allowed("/everything/page"));
        assert!(!rules.is_allowed("/only-this/page"));
    }

    #[test]
    fn wildcard_and_anchor_patterns() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /*.pdf$\nDisallow: /tmp*\n",
            "TestBot",
        );
        assert!(!rules.is_allowed("/docs/manual.pdf"));
        assert!(rules.is_allowed("/docs/manual.pdf?x=1"));
        assert!(!rules.is_allowed("/tmp/file"));
        assert!(rules.is_allowed("/docs/manual.html"));
    }

    #[test]
    fn path_matching_rules() {
        assert!(path_matches("/admin/settings", "/admin/"));
        assert!(!path_matches("/public", "/admin/"));
        assert!(path_matches("/images/cat.jpg", "/images/*.jpg"));
        assert!(path_matches("/page.html", "/page.html$"));
        assert!(!path_matches("/page.html?q=1", "/page.html$"));
        assert!(!path_matches("/anything", ""));
    }

    #[test]
    fn empty_rules_allow_everything() {
        let rules = RobotsRules::allow_all();
        assert!(rules.is_allowed("/anything"));
        assert!(rules.is_allowed("/"));
    }
}
