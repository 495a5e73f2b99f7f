//! Sequence items produced by XPath evaluation.
//!
//! Items borrow the document they were produced from; [`Item::detach`]
//! converts them into owned [`Value`]s carrying provenance, which is how
//! results leave a worker.

use ego_tree::NodeRef;
use scraper::{ElementRef, Node};

use crate::dom::PageDocument;
use crate::value::{ElementValue, ProvenancedString, Value};

/// A node within a parsed document.
///
/// Attributes are not tree nodes in `ego-tree`, so they are represented
/// as a synthetic handle pointing at the owning element.
#[derive(Debug, Clone, Copy)]
pub enum NodeHandle<'a> {
    /// The document root (above `<html>`).
    Root(NodeRef<'a, Node>),
    Element(ElementRef<'a>),
    Text(NodeRef<'a, Node>),
    Comment(NodeRef<'a, Node>),
    Attribute {
        owner: ElementRef<'a>,
        name: &'a str,
        value: &'a str,
    },
}

impl<'a> NodeHandle<'a> {
    /// The underlying tree node; for attributes, the owning element.
    pub fn node_ref(&self) -> NodeRef<'a, Node> {
        match self {
            NodeHandle::Root(n) | NodeHandle::Text(n) | NodeHandle::Comment(n) => *n,
            NodeHandle::Element(el) => **el,
            NodeHandle::Attribute { owner, .. } => **owner,
        }
    }

    /// XPath string value of the node.
    pub fn string_value(&self) -> String {
        match self {
            NodeHandle::Attribute { value, .. } => (*value).to_string(),
            NodeHandle::Text(n) => match n.value() {
                Node::Text(text) => text.to_string(),
                _ => String::new(),
            },
            NodeHandle::Comment(n) => match n.value() {
                Node::Comment(comment) => comment.to_string(),
                _ => String::new(),
            },
            NodeHandle::Element(el) => collect_text(**el),
            NodeHandle::Root(n) => collect_text(*n),
        }
    }

    /// Name of an element or attribute; empty for other kinds.
    pub fn name(&self) -> &str {
        match self {
            NodeHandle::Element(el) => el.value().name(),
            NodeHandle::Attribute { name, .. } => name,
            _ => "",
        }
    }
}

/// Concatenated text of all text descendants, in document order.
fn collect_text(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    let mut stack: Vec<NodeRef<'_, Node>> = node.children().collect();
    stack.reverse();
    while let Some(n) = stack.pop() {
        if let Node::Text(text) = n.value() {
            out.push_str(text);
        }
        let mut children: Vec<_> = n.children().collect();
        children.reverse();
        stack.extend(children);
    }
    out
}

/// One item in an XPath result sequence.
#[derive(Debug, Clone)]
pub enum Item<'a> {
    Node(NodeHandle<'a>),
    String(String),
    Number(f64),
    Boolean(bool),
    /// Insertion-ordered map with atomized keys.
    Map(Vec<(String, Item<'a>)>),
    Array(Vec<Item<'a>>),
}

impl<'a> Item<'a> {
    pub fn is_node(&self) -> bool {
        matches!(self, Item::Node(_))
    }

    /// Atomized string form. Maps and arrays have no string value.
    pub fn string_value(&self) -> Option<String> {
        match self {
            Item::Node(n) => Some(n.string_value()),
            Item::String(s) => Some(s.clone()),
            Item::Number(n) => Some(format_number(*n)),
            Item::Boolean(b) => Some(b.to_string()),
            Item::Map(_) | Item::Array(_) => None,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Item::Number(n) => *n,
            Item::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Item::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            Item::Node(n) => n.string_value().trim().parse().unwrap_or(f64::NAN),
            Item::Map(_) | Item::Array(_) => f64::NAN,
        }
    }

    /// Detach into an owned [`Value`], stamping document provenance.
    pub fn detach(&self, page: &PageDocument) -> Value {
        let base_url = page.base_url().as_str().to_string();
        match self {
            Item::Node(NodeHandle::Element(el)) => Value::Element(ElementValue {
                markup: el.html(),
                tag: el.value().name().to_string(),
                base_url,
                backlink: page.backlink().map(str::to_string),
                depth: page.depth(),
            }),
            Item::Node(NodeHandle::Root(_)) => {
                // detaching the document root yields its <html> element
                match page.root_element() {
                    Some(el) => Value::Element(ElementValue {
                        markup: el.html(),
                        tag: el.value().name().to_string(),
                        base_url,
                        backlink: page.backlink().map(str::to_string),
                        depth: page.depth(),
                    }),
                    None => Value::string(String::new(), Some(base_url)),
                }
            }
            // link-carrying attributes resolve against the document
            // base, so downstream url(.) hops and consumers see
            // absolute URLs
            Item::Node(NodeHandle::Attribute { name, value, .. })
                if matches!(*name, "href" | "src") =>
            {
                let resolved = crate::util::resolve_url(page.base_url(), value)
                    .map(String::from)
                    .unwrap_or_else(|| (*value).to_string());
                Value::Str(ProvenancedString::new(resolved, Some(base_url)))
            }
            Item::Node(n) => Value::Str(ProvenancedString::new(n.string_value(), Some(base_url))),
            Item::String(s) => Value::Str(ProvenancedString::new(s.clone(), Some(base_url))),
            Item::Number(n) => Value::Number(*n),
            Item::Boolean(b) => Value::Bool(*b),
            Item::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.detach(page)))
                    .collect(),
            ),
            Item::Array(items) => Value::Array(items.iter().map(|i| i.detach(page)).collect()),
        }
    }
}

/// XPath-style number formatting: integers print without a fraction.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn page(body: &str) -> PageDocument {
        PageDocument::parse(body, Url::parse("http://h/p").unwrap(), None, 0)
    }

    #[test]
    fn element_string_value_concatenates_text() {
        let p = page("<html><body><p>Hello <b>world</b>!</p></body></html>");
        let root = NodeHandle::Root(p.root());
        assert_eq!(root.string_value(), "Hello world!");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(3.5), "3.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn item_to_number() {
        assert_eq!(Item::String(" 42 ".to_string()).to_number(), 42.0);
        assert!(Item::String("abc".to_string()).to_number().is_nan());
        assert_eq!(Item::Boolean(true).to_number(), 1.0);
    }

    #[test]
    fn detach_string_carries_base_url() {
        let p = page("<html></html>");
        let v = Item::String("x".to_string()).detach(&p);
        match v {
            Value::Str(s) => assert_eq!(s.base_url.as_deref(), Some("http://h/p")),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn detach_resolves_link_attributes() {
        let p = page(r#"<html><body><a href="other.html">x</a><p id="k"></p></body></html>"#);
        let doc_root = NodeHandle::Root(p.root());
        let anchors = collect_attr(&doc_root, "href");
        let v = Item::Node(anchors).detach(&p);
        assert_eq!(v.as_str(), Some("http://h/other.html"));

        // non-link attributes stay verbatim
        let id_attr = collect_attr(&doc_root, "id");
        let v = Item::Node(id_attr).detach(&p);
        assert_eq!(v.as_str(), Some("k"));
    }

    fn collect_attr<'a>(root: &NodeHandle<'a>, wanted: &str) -> NodeHandle<'a> {
        let mut stack: Vec<_> = root.node_ref().children().collect();
        while let Some(n) = stack.pop() {
            if let Some(el) = scraper::ElementRef::wrap(n) {
                for (name, value) in el.value().attrs() {
                    if name == wanted {
                        return NodeHandle::Attribute {
                            owner: el,
                            name,
                            value,
                        };
                    }
                }
            }
            stack.extend(n.children());
        }
        panic!("attribute {wanted} not found");
    }

    #[test]
    fn detach_root_yields_html_element() {
        let p = page("<html><body>x</body></html>");
        let v = Item::Node(NodeHandle::Root(p.root())).detach(&p);
        match v {
            Value::Element(el) => assert_eq!(el.tag, "html"),
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
