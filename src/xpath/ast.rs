//! Abstract syntax tree for parsed XPath expressions.

/// An XPath expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Literal(String),
    Variable(String),
    /// A location path. `absolute` paths start at the document root.
    Path {
        absolute: bool,
        components: Vec<PathComponent>,
    },
    /// A primary expression with predicates and an optional trailing
    /// relative path, e.g. `(//h1)[1]/text()`.
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        trailing: Vec<PathComponent>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    /// `||` — string concatenation of two or more operands.
    StringConcat(Vec<Expr>),
    /// `!` — evaluate `body` once per item of `source`.
    SimpleMap {
        source: Box<Expr>,
        body: Box<Expr>,
    },
    /// `map{key: value, …}` with insertion order preserved.
    MapConstructor(Vec<(Expr, Expr)>),
}

/// One component of a location path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathComponent {
    Step(Step),
    /// An expression step (map constructor or function call used as the
    /// final path component), evaluated once per context node.
    Expr(Expr),
}

/// An axis step: axis, node test, predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expr>,
}

/// Supported XPath axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
    SelfAxis,
}

impl Axis {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "child" => Some(Self::Child),
            "descendant" => Some(Self::Descendant),
            "descendant-or-self" => Some(Self::DescendantOrSelf),
            "parent" => Some(Self::Parent),
            "ancestor" => Some(Self::Ancestor),
            "following-sibling" => Some(Self::FollowingSibling),
            "preceding-sibling" => Some(Self::PrecedingSibling),
            "attribute" => Some(Self::Attribute),
            "self" => Some(Self::SelfAxis),
            _ => None,
        }
    }
}

/// A node test within a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// Match elements (or attributes) with this name.
    Name(String),
    /// `*`
    Wildcard,
    /// `node()`
    AnyNode,
    /// `text()`
    Text,
    /// `comment()`
    Comment,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl Expr {
    /// A step selecting the context node itself (`.`).
    pub fn context_item() -> Self {
        Expr::Path {
            absolute: false,
            components: vec![PathComponent::Step(Step {
                axis: Axis::SelfAxis,
                node_test: NodeTest::AnyNode,
                predicates: Vec::new(),
            })],
        }
    }

    /// Whether this expression is the bare context item.
    pub fn is_context_item(&self) -> bool {
        matches!(
            self,
            Expr::Path { absolute: false, components }
                if components.len() == 1
                    && matches!(
                        &components[0],
                        PathComponent::Step(Step {
                            axis: Axis::SelfAxis,
                            node_test: NodeTest::AnyNode,
                            predicates,
                        }) if predicates.is_empty()
                    )
        )
    }
}
