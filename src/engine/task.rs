//! Units of work in the frontier.

use std::sync::Arc;

use url::Url;

use crate::program::Program;
use crate::xpath::CompiledXPath;

/// Deep-crawl bookkeeping shared by every task spawned from one
/// `///url(...)` segment or `follow=` argument.
#[derive(Debug)]
pub struct DeepState {
    /// XPath that extracts the URLs to keep following.
    pub xpath: CompiledXPath,
    /// First segment to run on every deep-visited document; the
    /// program's tail after the deep segment.
    pub tail_cursor: usize,
}

/// One URL to fetch, with everything needed to continue the program on
/// the fetched document. Created on enqueue, consumed exactly once.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub url: Url,
    /// Crawl depth (seed = 0; +1 per url() hop).
    pub depth: usize,
    /// URL of the page that enqueued this task.
    pub backlink: Option<String>,
    pub program: Arc<Program>,
    /// Index of the first remaining segment.
    pub cursor: usize,
    /// Present when this document is a deep-crawl visit: run the tail,
    /// then re-enqueue matching links.
    pub deep: Option<Arc<DeepState>>,
    /// Effective inclusive depth bound for this task's subtree
    /// (`max_depth`, possibly lowered by a `depth=` cap on the seed).
    pub depth_limit: usize,
}

impl CrawlTask {
    /// The seed task for a parsed program.
    pub fn seed(url: Url, program: Arc<Program>, max_depth: usize) -> Self {
        let lit = program.seed();
        let depth_limit = match lit.depth_cap {
            Some(cap) => max_depth.min(cap),
            None => max_depth,
        };
        let deep = lit.follow.as_ref().map(|follow| {
            Arc::new(DeepState {
                xpath: follow.clone(),
                tail_cursor: 1,
            })
        });
        Self {
            url,
            depth: 0,
            backlink: None,
            program,
            cursor: 1,
            deep,
            depth_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program;

    #[test]
    fn seed_without_follow() {
        let program = Arc::new(program::parse("url('http://h/')//a/@href").unwrap());
        let task = CrawlTask::seed(Url::parse("http://h/").unwrap(), program, 3);
        assert_eq!(task.depth, 0);
        assert_eq!(task.cursor, 1);
        assert!(task.deep.is_none());
        assert_eq!(task.depth_limit, 3);
    }

    #[test]
    fn seed_with_follow_arms_deep_state() {
        let program =
            Arc::new(program::parse("url('http://h/', follow=.//a/@href)//h1").unwrap());
        let task = CrawlTask::seed(Url::parse("http://h/").unwrap(), program, 3);
        let deep = task.deep.expect("follow= should arm a deep state");
        assert_eq!(deep.tail_cursor, 1);
        assert_eq!(deep.xpath.source(), ".//a/@href");
    }

    #[test]
    fn seed_depth_cap_lowers_limit() {
        let program =
            Arc::new(program::parse("url('http://h/', follow=.//a/@href, depth=2)").unwrap());
        let task = CrawlTask::seed(Url::parse("http://h/").unwrap(), program, 5);
        assert_eq!(task.depth_limit, 2);
    }
}
