//! Shared utility functions

use url::Url;

/// Canonical URL form used for deduplication and cache keys.
///
/// Lowercases scheme and host, strips default ports and fragments, and
/// leaves path, query, and percent-encoding untouched. `Url` parsing
/// already lowercases scheme/host and drops default ports, so this
/// mostly pins the fragment rule and documents the contract.
pub fn canonical_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical.into()
}

/// Resolve a possibly-relative reference against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok()
}

/// Truncate a string for display, collapsing newlines to spaces.
/// Handles multi-byte characters by finding a valid char boundary.
pub fn truncate_for_display(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
