//! Parsed HTML documents with crawl provenance.
//!
//! A [`PageDocument`] owns the DOM of one fetched page together with the
//! provenance triple (base URL, backlink, depth) that the custom XPath
//! functions `base-uri`, `wx:backlink`, and `wx:depth` report. The DOM
//! is not `Send`; parsing and evaluation stay on one thread and values
//! leaving a document are detached first (see [`crate::value`]).

use ego_tree::{NodeRef, Tree};
use scraper::{Html, Node};
use url::Url;

/// One fetched, parsed page and its crawl provenance.
pub struct PageDocument {
    html: Html,
    base_url: Url,
    backlink: Option<String>,
    depth: usize,
}

impl PageDocument {
    /// Parse an HTML body into a document rooted at `base_url`.
    pub fn parse(body: &str, base_url: Url, backlink: Option<String>, depth: usize) -> Self {
        Self {
            html: Html::parse_document(body),
            base_url,
            backlink,
            depth,
        }
    }

    /// The document root node (above `<html>`).
    pub fn root(&self) -> NodeRef<'_, Node> {
        self.html.tree.root()
    }

    pub fn tree(&self) -> &Tree<Node> {
        &self.html.tree
    }

    /// Canonical URL the document was fetched from.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the page that linked here; `None` on the seed.
    pub fn backlink(&self) -> Option<&str> {
        self.backlink.as_deref()
    }

    /// Crawl depth of this document (seed = 0).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The root `<html>` element, when the page has one.
    pub fn root_element(&self) -> Option<scraper::ElementRef<'_>> {
        self.root()
            .children()
            .find_map(scraper::ElementRef::wrap)
    }
}

impl std::fmt::Debug for PageDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageDocument")
            .field("base_url", &self.base_url.as_str())
            .field("backlink", &self.backlink)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> PageDocument {
        PageDocument::parse(
            body,
            Url::parse("http://example.com/page").unwrap(),
            Some("http://example.com/".to_string()),
            1,
        )
    }

    #[test]
    fn parse_exposes_provenance() {
        let d = doc("<html><body><p>hi</p></body></html>");
        assert_eq!(d.base_url().as_str(), "http://example.com/page");
        assert_eq!(d.backlink(), Some("http://example.com/"));
        assert_eq!(d.depth(), 1);
    }

    #[test]
    fn root_element_is_html() {
        let d = doc("<html><body></body></html>");
        let root = d.root_element().unwrap();
        assert_eq!(root.value().name(), "html");
    }

    #[test]
    fn fragment_input_still_gets_document_root() {
        let d = doc("<p>loose</p>");
        // html5ever wraps fragments in a full document
        assert!(d.root_element().is_some());
    }
}
