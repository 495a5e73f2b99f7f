//! XPath expression evaluator.
//!
//! Evaluates a compiled expression against one document and context
//! item, producing a sequence of [`Item`]s. Node-set results are kept in
//! document order (a lazily-built pre-order index is used to sort and
//! deduplicate after each step). Evaluation is CPU-bound and never
//! suspends; workers run it inside `spawn_blocking`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Node};
use thiserror::Error;

use crate::dom::PageDocument;
use crate::error::ParseError;
use crate::util;

use super::ast::{Axis, BinaryOp, Expr, NodeTest, PathComponent, Step};
use super::item::{Item, NodeHandle};
use super::parser;

/// Evaluation failure (type errors, unknown functions or variables).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("xpath evaluation error: {0}")]
pub struct EvalError(pub String);

/// An atomic value bound to a variable name.
#[derive(Debug, Clone)]
pub enum Atomic {
    String(String),
    Number(f64),
    Boolean(bool),
}

/// Variable bindings visible during evaluation.
pub type Variables = HashMap<String, Atomic>;

/// A parsed, reusable XPath expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledXPath {
    source: String,
    expr: Expr,
}

impl CompiledXPath {
    /// Compile an expression string.
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `context` within `page`.
    pub fn evaluate<'a>(
        &self,
        page: &'a PageDocument,
        context: Item<'a>,
        vars: &Variables,
    ) -> Result<Vec<Item<'a>>, EvalError> {
        let env = Env {
            page,
            vars,
            order: RefCell::new(None),
        };
        let focus = Focus {
            item: context,
            position: 1,
            size: 1,
        };
        eval_expr(&env, &focus, &self.expr)
    }

    /// Evaluate with the document root as context.
    pub fn evaluate_from_root<'a>(
        &self,
        page: &'a PageDocument,
        vars: &Variables,
    ) -> Result<Vec<Item<'a>>, EvalError> {
        self.evaluate(page, Item::Node(NodeHandle::Root(page.root())), vars)
    }
}

struct Env<'a, 'v> {
    page: &'a PageDocument,
    vars: &'v Variables,
    order: RefCell<Option<Rc<HashMap<NodeId, usize>>>>,
}

impl<'a, 'v> Env<'a, 'v> {
    /// Pre-order index of every tree node, built on first use.
    fn order_map(&self) -> Rc<HashMap<NodeId, usize>> {
        if let Some(map) = self.order.borrow().as_ref() {
            return Rc::clone(map);
        }
        let mut map = HashMap::new();
        let mut idx = 0usize;
        let mut stack = vec![self.page.root()];
        while let Some(node) = stack.pop() {
            map.insert(node.id(), idx);
            idx += 1;
            let mut children: Vec<_> = node.children().collect();
            children.reverse();
            stack.extend(children);
        }
        let map = Rc::new(map);
        *self.order.borrow_mut() = Some(Rc::clone(&map));
        map
    }

    fn order_key(&self, handle: &NodeHandle<'a>) -> (usize, usize) {
        let map = self.order_map();
        match handle {
            NodeHandle::Attribute { owner, name, .. } => {
                let owner_idx = map.get(&owner.id()).copied().unwrap_or(usize::MAX);
                let ordinal = owner
                    .value()
                    .attrs()
                    .position(|(n, _)| n == *name)
                    .unwrap_or(0);
                (owner_idx, ordinal + 1)
            }
            other => {
                let idx = map.get(&other.node_ref().id()).copied().unwrap_or(usize::MAX);
                (idx, 0)
            }
        }
    }
}

#[derive(Clone)]
struct Focus<'a> {
    item: Item<'a>,
    position: usize,
    size: usize,
}

fn eval_expr<'a>(env: &Env<'a, '_>, focus: &Focus<'a>, expr: &Expr) -> Result<Vec<Item<'a>>, EvalError> {
    match expr {
        Expr::Number(n) => Ok(vec![Item::Number(*n)]),
        Expr::Literal(s) => Ok(vec![Item::String(s.clone())]),
        Expr::Variable(name) => match env.vars.get(name) {
            Some(Atomic::String(s)) => Ok(vec![Item::String(s.clone())]),
            Some(Atomic::Number(n)) => Ok(vec![Item::Number(*n)]),
            Some(Atomic::Boolean(b)) => Ok(vec![Item::Boolean(*b)]),
            None => Err(EvalError(format!("unbound variable ${name}"))),
        },
        Expr::Path {
            absolute,
            components,
        } => {
            let start = if *absolute {
                vec![Item::Node(NodeHandle::Root(env.page.root()))]
            } else {
                vec![focus.item.clone()]
            };
            eval_components(env, start, components)
        }
        Expr::Filter {
            primary,
            predicates,
            trailing,
        } => {
            let mut seq = eval_expr(env, focus, primary)?;
            for pred in predicates {
                seq = filter_sequence(env, seq, pred)?;
            }
            eval_components(env, seq, trailing)
        }
        Expr::FunctionCall { name, args } => call_function(env, focus, name, args),
        Expr::Binary { op, left, right } => eval_binary(env, focus, *op, left, right),
        Expr::Neg(inner) => {
            let seq = eval_expr(env, focus, inner)?;
            if seq.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![Item::Number(-seq[0].to_number())])
        }
        Expr::Union(left, right) => {
            let mut items = eval_expr(env, focus, left)?;
            items.extend(eval_expr(env, focus, right)?);
            if !items.iter().all(Item::is_node) {
                return Err(EvalError("union operands must be node sequences".to_string()));
            }
            Ok(sort_document_order(env, items))
        }
        Expr::StringConcat(operands) => {
            let mut out = String::new();
            for operand in operands {
                let seq = eval_expr(env, focus, operand)?;
                if let Some(first) = seq.first() {
                    out.push_str(&first.string_value().ok_or_else(|| {
                        EvalError("cannot atomize a map or array".to_string())
                    })?);
                }
            }
            Ok(vec![Item::String(out)])
        }
        Expr::SimpleMap { source, body } => {
            let seq = eval_expr(env, focus, source)?;
            let size = seq.len();
            let mut out = Vec::new();
            for (i, item) in seq.into_iter().enumerate() {
                let inner = Focus {
                    item,
                    position: i + 1,
                    size,
                };
                out.extend(eval_expr(env, &inner, body)?);
            }
            Ok(out)
        }
        Expr::MapConstructor(entries) => {
            let mut map = Vec::with_capacity(entries.len());
            for (key_expr, value_expr) in entries {
                let key_seq = eval_expr(env, focus, key_expr)?;
                let key = key_seq
                    .first()
                    .and_then(Item::string_value)
                    .ok_or_else(|| EvalError("map key must atomize to a string".to_string()))?;
                let mut value_seq = eval_expr(env, focus, value_expr)?;
                let value = match value_seq.len() {
                    0 => Item::String(String::new()),
                    1 => value_seq.remove(0),
                    _ => Item::Array(value_seq),
                };
                map.push((key, value));
            }
            Ok(vec![Item::Map(map)])
        }
    }
}

fn eval_components<'a>(
    env: &Env<'a, '_>,
    mut seq: Vec<Item<'a>>,
    components: &[PathComponent],
) -> Result<Vec<Item<'a>>, EvalError> {
    for component in components {
        match component {
            PathComponent::Step(step) => {
                let mut out = Vec::new();
                for item in &seq {
                    match item {
                        Item::Node(node) => {
                            let candidates = axis_candidates(node, step.axis, &step.node_test);
                            let kept = apply_predicates(env, candidates, &step.predicates)?;
                            out.extend(kept.into_iter().map(Item::Node));
                        }
                        // `.` keeps an atomic context item as-is
                        other if is_bare_self_step(step) => out.push(other.clone()),
                        _ => {
                            return Err(EvalError(
                                "path step applied to a non-node item".to_string(),
                            ))
                        }
                    }
                }
                seq = if out.iter().all(Item::is_node) {
                    sort_document_order(env, out)
                } else {
                    out
                };
            }
            PathComponent::Expr(expr) => {
                let size = seq.len();
                let mut out = Vec::new();
                for (i, item) in seq.iter().enumerate() {
                    let focus = Focus {
                        item: item.clone(),
                        position: i + 1,
                        size,
                    };
                    out.extend(eval_expr(env, &focus, expr)?);
                }
                seq = out;
            }
        }
    }
    Ok(seq)
}

fn is_bare_self_step(step: &Step) -> bool {
    step.axis == Axis::SelfAxis
        && step.node_test == NodeTest::AnyNode
        && step.predicates.is_empty()
}

/// Filter a sequence by one predicate with position semantics.
fn filter_sequence<'a>(
    env: &Env<'a, '_>,
    seq: Vec<Item<'a>>,
    predicate: &Expr,
) -> Result<Vec<Item<'a>>, EvalError> {
    let size = seq.len();
    let mut kept = Vec::new();
    for (i, item) in seq.into_iter().enumerate() {
        let focus = Focus {
            item: item.clone(),
            position: i + 1,
            size,
        };
        let result = eval_expr(env, &focus, predicate)?;
        if predicate_holds(&result, i + 1) {
            kept.push(item);
        }
    }
    Ok(kept)
}

fn apply_predicates<'a>(
    env: &Env<'a, '_>,
    candidates: Vec<NodeHandle<'a>>,
    predicates: &[Expr],
) -> Result<Vec<NodeHandle<'a>>, EvalError> {
    let mut current = candidates;
    for predicate in predicates {
        let size = current.len();
        let mut kept = Vec::new();
        for (i, node) in current.iter().enumerate() {
            let focus = Focus {
                item: Item::Node(*node),
                position: i + 1,
                size,
            };
            let result = eval_expr(env, &focus, predicate)?;
            if predicate_holds(&result, i + 1) {
                kept.push(*node);
            }
        }
        current = kept;
    }
    Ok(current)
}

/// A numeric predicate is a position test; anything else is a boolean.
fn predicate_holds(result: &[Item], position: usize) -> bool {
    match result {
        [Item::Number(n)] => *n == position as f64,
        other => effective_boolean(other),
    }
}

// ---------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------

fn axis_candidates<'a>(
    node: &NodeHandle<'a>,
    axis: Axis,
    test: &NodeTest,
) -> Vec<NodeHandle<'a>> {
    let mut out = Vec::new();
    match axis {
        Axis::SelfAxis => {
            if test_matches(test, node) {
                out.push(*node);
            }
        }
        Axis::Child => {
            if !matches!(node, NodeHandle::Attribute { .. }) {
                collect_children(node.node_ref(), test, &mut out);
            }
        }
        Axis::Descendant => {
            if !matches!(node, NodeHandle::Attribute { .. }) {
                collect_descendants(node.node_ref(), test, &mut out);
            }
        }
        Axis::DescendantOrSelf => {
            if test_matches(test, node) {
                out.push(*node);
            }
            if !matches!(node, NodeHandle::Attribute { .. }) {
                collect_descendants(node.node_ref(), test, &mut out);
            }
        }
        Axis::Parent => {
            let parent = match node {
                NodeHandle::Attribute { owner, .. } => Some(**owner),
                other => other.node_ref().parent(),
            };
            if let Some(p) = parent {
                if let Some(handle) = wrap_node(p) {
                    if test_matches(test, &handle) {
                        out.push(handle);
                    }
                }
            }
        }
        Axis::Ancestor => {
            let mut current = match node {
                NodeHandle::Attribute { owner, .. } => Some(**owner),
                other => other.node_ref().parent(),
            };
            while let Some(n) = current {
                if let Some(handle) = wrap_node(n) {
                    if test_matches(test, &handle) {
                        out.push(handle);
                    }
                }
                current = n.parent();
            }
            // generated root-last; document order is root-first
            out.reverse();
        }
        Axis::FollowingSibling => {
            let mut current = node.node_ref().next_sibling();
            while let Some(n) = current {
                if let Some(handle) = wrap_node(n) {
                    if test_matches(test, &handle) {
                        out.push(handle);
                    }
                }
                current = n.next_sibling();
            }
        }
        Axis::PrecedingSibling => {
            let mut current = node.node_ref().prev_sibling();
            while let Some(n) = current {
                if let Some(handle) = wrap_node(n) {
                    if test_matches(test, &handle) {
                        out.push(handle);
                    }
                }
                current = n.prev_sibling();
            }
            out.reverse();
        }
        Axis::Attribute => {
            if let NodeHandle::Element(el) = node {
                let element = el.value();
                for (name, value) in element.attrs() {
                    let matches = match test {
                        NodeTest::Name(n) => name == n,
                        NodeTest::Wildcard | NodeTest::AnyNode => true,
                        _ => false,
                    };
                    if matches {
                        out.push(NodeHandle::Attribute {
                            owner: *el,
                            name,
                            value,
                        });
                    }
                }
            }
        }
    }
    out
}

fn collect_children<'a>(node: NodeRef<'a, Node>, test: &NodeTest, out: &mut Vec<NodeHandle<'a>>) {
    for child in node.children() {
        if let Some(handle) = wrap_node(child) {
            if test_matches(test, &handle) {
                out.push(handle);
            }
        }
    }
}

fn collect_descendants<'a>(
    node: NodeRef<'a, Node>,
    test: &NodeTest,
    out: &mut Vec<NodeHandle<'a>>,
) {
    let mut stack: Vec<NodeRef<'a, Node>> = node.children().collect();
    stack.reverse();
    while let Some(n) = stack.pop() {
        if let Some(handle) = wrap_node(n) {
            if test_matches(test, &handle) {
                out.push(handle);
            }
        }
        let mut children: Vec<_> = n.children().collect();
        children.reverse();
        stack.extend(children);
    }
}

fn wrap_node(node: NodeRef<'_, Node>) -> Option<NodeHandle<'_>> {
    match node.value() {
        Node::Element(_) => ElementRef::wrap(node).map(NodeHandle::Element),
        Node::Text(_) => Some(NodeHandle::Text(node)),
        Node::Comment(_) => Some(NodeHandle::Comment(node)),
        Node::Document | Node::Fragment => Some(NodeHandle::Root(node)),
        _ => None,
    }
}

fn test_matches(test: &NodeTest, handle: &NodeHandle<'_>) -> bool {
    match (test, handle) {
        (NodeTest::Name(name), NodeHandle::Element(el)) => el.value().name() == name,
        (NodeTest::Name(name), NodeHandle::Attribute { name: attr, .. }) => attr == name,
        (NodeTest::Name(_), _) => false,
        (NodeTest::Wildcard, NodeHandle::Element(_) | NodeHandle::Attribute { .. }) => true,
        (NodeTest::Wildcard, _) => false,
        (NodeTest::AnyNode, _) => true,
        (NodeTest::Text, NodeHandle::Text(_)) => true,
        (NodeTest::Text, _) => false,
        (NodeTest::Comment, NodeHandle::Comment(_)) => true,
        (NodeTest::Comment, _) => false,
    }
}

fn sort_document_order<'a>(env: &Env<'a, '_>, items: Vec<Item<'a>>) -> Vec<Item<'a>> {
    let mut keyed: Vec<((usize, usize), Item<'a>)> = items
        .into_iter()
        .map(|item| {
            let key = match &item {
                Item::Node(handle) => env.order_key(handle),
                _ => (usize::MAX, usize::MAX),
            };
            (key, item)
        })
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.dedup_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, item)| item).collect()
}

// ---------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------

fn eval_binary<'a>(
    env: &Env<'a, '_>,
    focus: &Focus<'a>,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
) -> Result<Vec<Item<'a>>, EvalError> {
    use BinaryOp::*;
    match op {
        And => {
            let l = eval_expr(env, focus, left)?;
            if !effective_boolean(&l) {
                return Ok(vec![Item::Boolean(false)]);
            }
            let r = eval_expr(env, focus, right)?;
            Ok(vec![Item::Boolean(effective_boolean(&r))])
        }
        Or => {
            let l = eval_expr(env, focus, left)?;
            if effective_boolean(&l) {
                return Ok(vec![Item::Boolean(true)]);
            }
            let r = eval_expr(env, focus, right)?;
            Ok(vec![Item::Boolean(effective_boolean(&r))])
        }
        Add | Sub | Mul | Div | Mod => {
            let l = eval_expr(env, focus, left)?;
            let r = eval_expr(env, focus, right)?;
            if l.is_empty() || r.is_empty() {
                return Ok(Vec::new());
            }
            let a = l[0].to_number();
            let b = r[0].to_number();
            let result = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                Mod => a % b,
                _ => unreachable!(),
            };
            Ok(vec![Item::Number(result)])
        }
        Eq | Neq | Lt | Lte | Gt | Gte => {
            let l = eval_expr(env, focus, left)?;
            let r = eval_expr(env, focus, right)?;
            Ok(vec![Item::Boolean(compare_general(op, &l, &r))])
        }
    }
}

/// General comparison: true when any pair of atomized items satisfies
/// the operator.
fn compare_general(op: BinaryOp, left: &[Item], right: &[Item]) -> bool {
    left.iter()
        .any(|l| right.iter().any(|r| compare_atomic(op, l, r)))
}

fn compare_atomic(op: BinaryOp, left: &Item, right: &Item) -> bool {
    use BinaryOp::*;
    match op {
        Lt | Lte | Gt | Gte => {
            let a = left.to_number();
            let b = right.to_number();
            match op {
                Lt => a < b,
                Lte => a <= b,
                Gt => a > b,
                Gte => a >= b,
                _ => unreachable!(),
            }
        }
        Eq | Neq => {
            let numeric = matches!(left, Item::Number(_)) || matches!(right, Item::Number(_));
            let eq = if numeric {
                left.to_number() == right.to_number()
            } else {
                match (left.string_value(), right.string_value()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            };
            if op == Eq {
                eq
            } else {
                !eq
            }
        }
        _ => false,
    }
}

fn effective_boolean(seq: &[Item]) -> bool {
    match seq {
        [] => false,
        [Item::Boolean(b)] => *b,
        [Item::Number(n)] => *n != 0.0 && !n.is_nan(),
        [Item::String(s)] => !s.is_empty(),
        _ => true,
    }
}

// ---------------------------------------------------------------------
// Function library
// ---------------------------------------------------------------------

fn call_function<'a>(
    env: &Env<'a, '_>,
    focus: &Focus<'a>,
    name: &str,
    args: &[Expr],
) -> Result<Vec<Item<'a>>, EvalError> {
    let string_arg = |i: usize| -> Result<String, EvalError> {
        let seq = eval_expr(env, focus, &args[i])?;
        Ok(seq.first().and_then(Item::string_value).unwrap_or_default())
    };
    let context_or_arg_string = || -> Result<String, EvalError> {
        if args.is_empty() {
            focus
                .item
                .string_value()
                .ok_or_else(|| EvalError("cannot atomize a map or array".to_string()))
        } else {
            string_arg(0)
        }
    };

    match name {
        "string" => Ok(vec![Item::String(context_or_arg_string()?)]),
        "concat" => {
            if args.len() < 2 {
                return Err(EvalError("concat() requires at least two arguments".to_string()));
            }
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&string_arg(i)?);
            }
            Ok(vec![Item::String(out)])
        }
        "contains" => {
            expect_args(name, args, 2)?;
            Ok(vec![Item::Boolean(string_arg(0)?.contains(&string_arg(1)?))])
        }
        "starts-with" => {
            expect_args(name, args, 2)?;
            Ok(vec![Item::Boolean(
                string_arg(0)?.starts_with(&string_arg(1)?),
            )])
        }
        "ends-with" => {
            expect_args(name, args, 2)?;
            Ok(vec![Item::Boolean(string_arg(0)?.ends_with(&string_arg(1)?))])
        }
        "normalize-space" => {
            let s = context_or_arg_string()?;
            Ok(vec![Item::String(
                s.split_whitespace().collect::<Vec<_>>().join(" "),
            )])
        }
        "string-length" => {
            let s = context_or_arg_string()?;
            Ok(vec![Item::Number(s.chars().count() as f64)])
        }
        "substring" => {
            if args.len() != 2 && args.len() != 3 {
                return Err(EvalError("substring() requires two or three arguments".to_string()));
            }
            let s = string_arg(0)?;
            let start = eval_number(env, focus, &args[1])?;
            let len = if args.len() == 3 {
                Some(eval_number(env, focus, &args[2])?)
            } else {
                None
            };
            Ok(vec![Item::String(xpath_substring(&s, start, len))])
        }
        "string-join" => {
            if args.is_empty() || args.len() > 2 {
                return Err(EvalError("string-join() requires one or two arguments".to_string()));
            }
            let seq = eval_expr(env, focus, &args[0])?;
            let sep = if args.len() == 2 { string_arg(1)? } else { String::new() };
            let parts: Vec<String> = seq
                .iter()
                .map(|i| i.string_value().unwrap_or_default())
                .collect();
            Ok(vec![Item::String(parts.join(&sep))])
        }
        "lower-case" => {
            expect_args(name, args, 1)?;
            Ok(vec![Item::String(string_arg(0)?.to_lowercase())])
        }
        "upper-case" => {
            expect_args(name, args, 1)?;
            Ok(vec![Item::String(string_arg(0)?.to_uppercase())])
        }
        "count" => {
            expect_args(name, args, 1)?;
            let seq = eval_expr(env, focus, &args[0])?;
            Ok(vec![Item::Number(seq.len() as f64)])
        }
        "position" => Ok(vec![Item::Number(focus.position as f64)]),
        "last" => Ok(vec![Item::Number(focus.size as f64)]),
        "number" => {
            if args.is_empty() {
                Ok(vec![Item::Number(focus.item.to_number())])
            } else {
                let seq = eval_expr(env, focus, &args[0])?;
                let n = seq.first().map_or(f64::NAN, Item::to_number);
                Ok(vec![Item::Number(n)])
            }
        }
        "boolean" => {
            expect_args(name, args, 1)?;
            let seq = eval_expr(env, focus, &args[0])?;
            Ok(vec![Item::Boolean(effective_boolean(&seq))])
        }
        "not" => {
            expect_args(name, args, 1)?;
            let seq = eval_expr(env, focus, &args[0])?;
            Ok(vec![Item::Boolean(!effective_boolean(&seq))])
        }
        "true" => Ok(vec![Item::Boolean(true)]),
        "false" => Ok(vec![Item::Boolean(false)]),
        "name" => {
            let item = if args.is_empty() {
                focus.item.clone()
            } else {
                let seq = eval_expr(env, focus, &args[0])?;
                match seq.into_iter().next() {
                    Some(item) => item,
                    None => return Ok(vec![Item::String(String::new())]),
                }
            };
            let name = match item {
                Item::Node(handle) => handle.name().to_string(),
                _ => String::new(),
            };
            Ok(vec![Item::String(name)])
        }
        "base-uri" => Ok(vec![Item::String(util::canonical_url(env.page.base_url()))]),
        "wx:backlink" => match env.page.backlink() {
            Some(backlink) => Ok(vec![Item::String(backlink.to_string())]),
            None => Ok(Vec::new()),
        },
        "wx:depth" => Ok(vec![Item::Number(env.page.depth() as f64)]),
        other => Err(EvalError(format!("unknown function '{other}()'"))),
    }
}

fn expect_args(name: &str, args: &[Expr], count: usize) -> Result<(), EvalError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(EvalError(format!(
            "{name}() requires {count} argument(s), got {}",
            args.len()
        )))
    }
}

fn eval_number<'a>(env: &Env<'a, '_>, focus: &Focus<'a>, expr: &Expr) -> Result<f64, EvalError> {
    let seq = eval_expr(env, focus, expr)?;
    Ok(seq.first().map_or(f64::NAN, Item::to_number))
}

/// XPath `substring`: 1-based character positions, rounded bounds.
fn xpath_substring(s: &str, start: f64, len: Option<f64>) -> String {
    let start = start.round();
    let end = len.map(|l| start + l.round());
    s.chars()
        .enumerate()
        .filter(|(i, _)| {
            let pos = (*i + 1) as f64;
            pos >= start && end.map_or(true, |e| pos < e)
        })
        .map(|(_, c)| c)
        .collect()
}
