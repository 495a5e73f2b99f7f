//! Segment dispatcher.
//!
//! Consumes the remaining program on one fetched document and produces
//! the values to emit plus the child fetches to enqueue. Runs entirely
//! inside the worker's CPU-bound section; nothing here suspends.
//!
//! `url(<xpath>)` segments are evaluated once per document against the
//! document root, never once per context node a prior segment produced.
//! The exception is a one-hop `url(.)` on string items, where each
//! string is itself the URL to fetch.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use url::Url;

use crate::dom::PageDocument;
use crate::error::ProgramError;
use crate::program::{Program, Segment, SegmentOp};
use crate::util;
use crate::value::Value;
use crate::xpath::{CompiledXPath, Item, NodeHandle, Variables};

use super::task::{CrawlTask, DeepState};

/// A child fetch requested by the dispatcher.
#[derive(Debug, Clone)]
pub struct ChildRequest {
    pub url: Url,
    pub cursor: usize,
    pub deep: Option<Arc<DeepState>>,
}

/// Everything one document produced.
#[derive(Debug, Default)]
pub struct DispatchResult {
    pub outputs: Vec<Value>,
    pub children: Vec<ChildRequest>,
}

/// Run the task's remaining segments on its fetched document.
pub fn dispatch(page: &PageDocument, task: &CrawlTask) -> Result<DispatchResult, ProgramError> {
    let mut out = DispatchResult::default();
    let program = &task.program;

    if let Some(deep) = &task.deep {
        // A deep-crawl visit: the document receives the trailing
        // extraction (or is itself the datum), then its links are
        // re-enqueued with the same deep state.
        if deep.tail_cursor >= program.len() {
            out.outputs.push(document_value(page));
        } else {
            walk(page, program, deep.tail_cursor, &mut out)?;
        }
        for url in extract_urls(page, &deep.xpath)? {
            out.children.push(ChildRequest {
                url,
                cursor: deep.tail_cursor,
                deep: Some(Arc::clone(deep)),
            });
        }
    } else if task.cursor >= program.len() {
        // no segments left: the document itself is the datum
        out.outputs.push(document_value(page));
    } else {
        walk(page, program, task.cursor, &mut out)?;
    }

    Ok(out)
}

/// Walk the segment list from `start` with the document root as the
/// initial context.
fn walk(
    page: &PageDocument,
    program: &Arc<Program>,
    start: usize,
    out: &mut DispatchResult,
) -> Result<(), ProgramError> {
    let vars = Variables::new();
    let root = Item::Node(NodeHandle::Root(page.root()));
    let mut queue: VecDeque<(Item<'_>, usize)> = VecDeque::new();
    queue.push_back((root, start));

    // one evaluation per url-op segment per document
    let mut url_ops_done: HashSet<usize> = HashSet::new();

    while let Some((context, index)) = queue.pop_front() {
        let Some(segment) = program.get(index) else {
            out.outputs.push(context.detach(page));
            continue;
        };
        let last = index + 1 == program.len();

        match segment {
            Segment::Xpath(xpath) => {
                let items = xpath
                    .evaluate(page, context, &vars)
                    .map_err(|e| ProgramError(e.to_string()))?;
                for item in items {
                    if last {
                        out.outputs.push(item.detach(page));
                    } else {
                        queue.push_back((item, index + 1));
                    }
                }
            }
            Segment::MapLit(entries) => {
                let mut map = Vec::with_capacity(entries.len());
                for (key, xpath) in entries {
                    let mut items = xpath
                        .evaluate(page, context.clone(), &vars)
                        .map_err(|e| ProgramError(e.to_string()))?;
                    let value = match items.len() {
                        0 => Item::String(String::new()),
                        1 => items.remove(0),
                        _ => Item::Array(items),
                    };
                    map.push((key.clone(), value));
                }
                let item = Item::Map(map);
                if last {
                    out.outputs.push(item.detach(page));
                } else {
                    queue.push_back((item, index + 1));
                }
            }
            Segment::Binary { op, expr } => {
                if *op != SegmentOp::Map {
                    return Err(ProgramError(
                        "'||' segment survived normalisation".to_string(),
                    ));
                }
                let items = expr
                    .evaluate(page, context, &vars)
                    .map_err(|e| ProgramError(e.to_string()))?;
                for item in items {
                    queue.push_back((item, index + 1));
                }
            }
            Segment::UrlEval { xpath, .. } => {
                // a prior segment may have narrowed the context to
                // string-valued items (strings, attributes, text
                // nodes); each of those is itself the URL to fetch
                let string_context = match &context {
                    Item::String(s) => Some(s.clone()),
                    Item::Node(NodeHandle::Attribute { value, .. }) => Some((*value).to_string()),
                    Item::Node(NodeHandle::Text(_)) => context.string_value(),
                    _ => None,
                };
                if let Some(value) = string_context {
                    let source = xpath.source();
                    if source != "." && source != "self::node()" {
                        return Err(ProgramError(format!(
                            "only '.' or 'self::node()' is supported in url() when the \
                             prior segment produced strings, got: {source}"
                        )));
                    }
                    if let Some(url) = util::resolve_url(page.base_url(), &value) {
                        out.children.push(ChildRequest {
                            url,
                            cursor: index + 1,
                            deep: None,
                        });
                    }
                } else if url_ops_done.insert(index) {
                    for url in extract_urls(page, xpath)? {
                        out.children.push(ChildRequest {
                            url,
                            cursor: index + 1,
                            deep: None,
                        });
                    }
                }
            }
            Segment::UrlDeep { xpath } => {
                if url_ops_done.insert(index) {
                    let tail = index + 1;
                    if tail >= program.len() {
                        // a deep crawl with no trailing extraction
                        // yields the visited documents themselves,
                        // including this root
                        out.outputs.push(document_value(page));
                    }
                    let state = Arc::new(DeepState {
                        xpath: xpath.clone(),
                        tail_cursor: tail,
                    });
                    for url in extract_urls(page, xpath)? {
                        out.children.push(ChildRequest {
                            url,
                            cursor: tail,
                            deep: Some(Arc::clone(&state)),
                        });
                    }
                }
            }
            Segment::UrlLit(_) => {
                return Err(ProgramError(
                    "url('...') literal segment encountered mid-program".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Evaluate a url-op XPath once against the document root and resolve
/// the results into absolute, per-document-deduplicated URLs.
fn extract_urls(page: &PageDocument, xpath: &CompiledXPath) -> Result<Vec<Url>, ProgramError> {
    let items = xpath
        .evaluate_from_root(page, &Variables::new())
        .map_err(|e| ProgramError(e.to_string()))?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut urls = Vec::new();
    for item in items {
        let Some(href) = item.string_value() else {
            continue;
        };
        let Some(url) = util::resolve_url(page.base_url(), &href) else {
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        if seen.insert(url.as_str().to_string()) {
            urls.push(url);
        }
    }
    Ok(urls)
}

fn document_value(page: &PageDocument) -> Value {
    Item::Node(NodeHandle::Root(page.root())).detach(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program;

    fn page(url: &str, body: &str) -> PageDocument {
        PageDocument::parse(body, Url::parse(url).unwrap(), None, 0)
    }

    fn seed_task(expr: &str, max_depth: usize) -> CrawlTask {
        let program = Arc::new(program::parse(expr).unwrap());
        let url = program.seed().url.clone();
        CrawlTask::seed(Url::parse(&url).unwrap(), program, max_depth)
    }

    const LINKS: &str = r#"<html><body>
        <a href="x">X</a>
        <a href="y">Y</a>
        <a href="x">X again</a>
    </body></html>"#;

    #[test]
    fn seed_extraction_resolves_relative_hrefs() {
        let task = seed_task("url('http://h/a')//a/@href", 0);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        let values: Vec<_> = result
            .outputs
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        // href attributes resolve against the document base
        assert_eq!(values, vec!["http://h/x", "http://h/y", "http://h/x"]);
        assert!(result.children.is_empty());
    }

    #[test]
    fn url_eval_enqueues_each_extracted_url_once() {
        let task = seed_task("url('http://h/a')//url(//a/@href)//title/text()", 1);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        assert!(result.outputs.is_empty());
        let urls: Vec<_> = result.children.iter().map(|c| c.url.as_str()).collect();
        // resolved against the base, deduplicated per document
        assert_eq!(urls, vec!["http://h/x", "http://h/y"]);
        assert_eq!(result.children[0].cursor, 2);
        assert!(result.children[0].deep.is_none());
    }

    #[test]
    fn deep_root_with_empty_tail_emits_itself() {
        let task = seed_task("url('http://h/a')///url(//a/@href)", 5);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        assert_eq!(result.outputs.len(), 1, "deep root should emit its document");
        assert_eq!(result.children.len(), 2);
        assert!(result.children[0].deep.is_some());
    }

    #[test]
    fn deep_root_with_tail_is_not_extracted() {
        let task = seed_task("url('http://h/a')///url(//a/@href)//a/@href", 5);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        assert!(result.outputs.is_empty(), "tail must not run on the deep root");
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.children[0].cursor, 2);
    }

    #[test]
    fn deep_visit_extracts_tail_and_expands() {
        let seed = seed_task("url('http://h/a')///url(//a/@href)//a/@href", 5);
        let root_page = page("http://h/a", LINKS);
        let root_result = dispatch(&root_page, &seed).unwrap();

        let child = CrawlTask {
            url: root_result.children[0].url.clone(),
            depth: 1,
            backlink: Some("http://h/a".to_string()),
            program: Arc::clone(&seed.program),
            cursor: root_result.children[0].cursor,
            deep: root_result.children[0].deep.clone(),
            depth_limit: seed.depth_limit,
        };
        let child_page = page("http://h/x", r#"<html><body><a href="z">Z</a></body></html>"#);
        let result = dispatch(&child_page, &child).unwrap();

        let values: Vec<_> = result.outputs.iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(values, vec!["http://h/z"]);
        let urls: Vec<_> = result.children.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["http://h/z"]);
        assert!(result.children[0].deep.is_some());
    }

    #[test]
    fn follow_seed_receives_tail_extraction() {
        let task = seed_task("url('http://h/a', follow=.//a/@href)//a/@href", 5);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        // unlike the bare /// form, the seed is extracted too
        assert_eq!(result.outputs.len(), 3);
        assert_eq!(result.children.len(), 2);
    }

    #[test]
    fn map_literal_emits_ordered_maps() {
        let task = seed_task("url('http://h/a')/map{'u': (//a/@href)[1], 'n': count(//a)}", 0);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        assert_eq!(result.outputs.len(), 1);
        let entries = result.outputs[0].as_map().unwrap();
        assert_eq!(entries[0].0, "u");
        assert_eq!(entries[0].1.as_str(), Some("http://h/x"));
        assert_eq!(entries[1].0, "n");
        assert_eq!(entries[1].1, Value::Number(3.0));
    }

    #[test]
    fn empty_url_eval_produces_no_children() {
        let task = seed_task("url('http://h/a')//url(//img/@src)", 1);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        assert!(result.children.is_empty());
        assert!(result.outputs.is_empty());
    }

    #[test]
    fn no_remaining_segments_yields_document() {
        let task = seed_task("url('http://h/a')", 0);
        let page = page("http://h/a", "<html><body>doc</body></html>");
        let result = dispatch(&page, &task).unwrap();
        assert_eq!(result.outputs.len(), 1);
        assert!(matches!(result.outputs[0], Value::Element(_)));
    }

    #[test]
    fn non_http_schemes_are_skipped() {
        let task = seed_task("url('http://h/a')//url(//a/@href)", 1);
        let page = page(
            "http://h/a",
            r#"<html><body>
                <a href="mailto:x@y.z">mail</a>
                <a href="javascript:void(0)">js</a>
                <a href="/ok">ok</a>
            </body></html>"#,
        );
        let result = dispatch(&page, &task).unwrap();
        let urls: Vec<_> = result.children.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["http://h/ok"]);
    }

    #[test]
    fn bang_into_url_dot_fetches_each_string() {
        let task = seed_task("url('http://h/a')//a/@href!/url(.)", 1);
        let page = page("http://h/a", LINKS);
        let result = dispatch(&page, &task).unwrap();
        let urls: Vec<_> = result.children.iter().map(|c| c.url.as_str()).collect();
        // per-string fetches; the duplicate href enqueues twice here and
        // is deduplicated globally by the frontier
        assert_eq!(urls, vec!["http://h/x", "http://h/y", "http://h/x"]);
    }
}
