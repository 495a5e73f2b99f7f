//! Recursive descent parser for XPath expressions.
//!
//! Consumes the token stream from [`super::lexer`] and produces an
//! [`Expr`] AST. Operator precedence, lowest to highest: `or`, `and`,
//! comparisons, `||`, additive, multiplicative, unary `-`, union `|`,
//! simple map `!`, path expressions.

use crate::error::ParseError;

use super::ast::{Axis, BinaryOp, Expr, NodeTest, PathComponent, Step};
use super::lexer::{tokenize, Token};

/// Parses an XPath expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::new(0, "empty XPath expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error(format!(
            "unexpected token '{}' after expression",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", token, self.describe())))
        }
    }

    fn describe(&self) -> String {
        self.peek()
            .map_or_else(|| "end of expression".to_string(), |t| format!("'{t}'"))
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.pos, message)
    }

    // -------------------------------------------------------------------
    // Precedence chain
    // -------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison_expr()?;
        while self.eat(&Token::And) {
            let right = self.parse_comparison_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_concat_expr()?;
        let op = match self.peek() {
            Some(Token::Equal) => Some(BinaryOp::Eq),
            Some(Token::NotEqual) => Some(BinaryOp::Neq),
            Some(Token::LessThan) => Some(BinaryOp::Lt),
            Some(Token::LessThanEqual) => Some(BinaryOp::Lte),
            Some(Token::GreaterThan) => Some(BinaryOp::Gt),
            Some(Token::GreaterThanEqual) => Some(BinaryOp::Gte),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.parse_concat_expr()?;
            Ok(binary(op, left, right))
        } else {
            Ok(left)
        }
    }

    fn parse_concat_expr(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_additive_expr()?;
        if !self.check(&Token::PipePipe) {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.eat(&Token::PipePipe) {
            operands.push(self.parse_additive_expr()?);
        }
        Ok(Expr::StringConcat(operands))
    }

    fn parse_additive_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative_expr()?;
        loop {
            if self.eat(&Token::Plus) {
                let right = self.parse_multiplicative_expr()?;
                left = binary(BinaryOp::Add, left, right);
            } else if self.eat(&Token::Minus) {
                let right = self.parse_multiplicative_expr()?;
                left = binary(BinaryOp::Sub, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Some(BinaryOp::Mul),
                Some(Token::Div) => Some(BinaryOp::Div),
                Some(Token::Mod) => Some(BinaryOp::Mod),
                _ => None,
            };
            if let Some(op) = op {
                self.pos += 1;
                let right = self.parse_unary_expr()?;
                left = binary(op, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary_expr()?;
            Ok(Expr::Neg(Box::new(inner)))
        } else {
            self.parse_union_expr()
        }
    }

    fn parse_union_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_simple_map_expr()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_simple_map_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_simple_map_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_path_expr()?;
        while self.eat(&Token::Bang) {
            let right = self.parse_path_expr()?;
            left = Expr::SimpleMap {
                source: Box::new(left),
                body: Box::new(right),
            };
        }
        Ok(left)
    }

    // -------------------------------------------------------------------
    // Paths
    // -------------------------------------------------------------------

    fn parse_path_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if self.starts_relative_path() {
                    let components = self.parse_relative_path()?;
                    Ok(Expr::Path {
                        absolute: true,
                        components,
                    })
                } else {
                    // bare `/` selects the document root
                    Ok(Expr::Path {
                        absolute: true,
                        components: Vec::new(),
                    })
                }
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                if !self.starts_relative_path() {
                    return Err(self.error("expected a step after '//'"));
                }
                let mut components = vec![descendant_or_self_step()];
                components.extend(self.parse_relative_path()?);
                Ok(Expr::Path {
                    absolute: true,
                    components,
                })
            }
            Some(
                Token::Dot
                | Token::DotDot
                | Token::At
                | Token::AxisName(_)
                | Token::NodeType(_)
                | Token::Name(_)
                | Token::Star,
            ) => {
                let components = self.parse_relative_path()?;
                Ok(Expr::Path {
                    absolute: false,
                    components,
                })
            }
            Some(
                Token::VariableReference(_)
                | Token::Literal(_)
                | Token::Number(_)
                | Token::LeftParen
                | Token::FunctionName(_)
                | Token::MapKeyword,
            ) => self.parse_filter_expr(),
            _ => Err(self.error(format!("unexpected {}", self.describe()))),
        }
    }

    fn starts_relative_path(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Dot
                    | Token::DotDot
                    | Token::At
                    | Token::AxisName(_)
                    | Token::NodeType(_)
                    | Token::Name(_)
                    | Token::Star
                    | Token::FunctionName(_)
                    | Token::MapKeyword
            )
        )
    }

    fn parse_relative_path(&mut self) -> Result<Vec<PathComponent>, ParseError> {
        let mut components = vec![self.parse_path_component()?];
        loop {
            if self.eat(&Token::Slash) {
                components.push(self.parse_path_component()?);
            } else if self.eat(&Token::DoubleSlash) {
                components.push(descendant_or_self_step());
                components.push(self.parse_path_component()?);
            } else {
                break;
            }
        }
        Ok(components)
    }

    fn parse_path_component(&mut self) -> Result<PathComponent, ParseError> {
        match self.peek() {
            // expression steps, evaluated once per context node
            Some(Token::MapKeyword) => Ok(PathComponent::Expr(self.parse_map_constructor()?)),
            Some(Token::FunctionName(_)) => Ok(PathComponent::Expr(self.parse_function_call()?)),
            _ => Ok(PathComponent::Step(self.parse_step()?)),
        }
    }

    fn parse_step(&mut self) -> Result<Step, ParseError> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                node_test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                node_test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }

        let axis = if let Some(Token::AxisName(name)) = self.peek() {
            let name = name.clone();
            let axis = Axis::parse(&name)
                .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
            self.pos += 2; // axis name and '::'
            axis
        } else if self.eat(&Token::At) {
            Axis::Attribute
        } else {
            Axis::Child
        };

        let node_test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            node_test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, ParseError> {
        match self.peek().cloned() {
            Some(Token::Star) => {
                self.pos += 1;
                Ok(NodeTest::Wildcard)
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                Ok(NodeTest::Name(name))
            }
            Some(Token::NodeType(kind)) => {
                self.pos += 1;
                self.expect(&Token::LeftParen)?;
                self.expect(&Token::RightParen)?;
                match kind.as_str() {
                    "node" => Ok(NodeTest::AnyNode),
                    "text" => Ok(NodeTest::Text),
                    "comment" => Ok(NodeTest::Comment),
                    other => Err(self.error(format!("unsupported node type test '{other}()'"))),
                }
            }
            _ => Err(self.error(format!("expected a node test, found {}", self.describe()))),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LeftBracket) {
            predicates.push(self.parse_expr()?);
            self.expect(&Token::RightBracket)?;
        }
        Ok(predicates)
    }

    // -------------------------------------------------------------------
    // Filter expressions (primaries)
    // -------------------------------------------------------------------

    fn parse_filter_expr(&mut self) -> Result<Expr, ParseError> {
        let primary = self.parse_primary_expr()?;
        let predicates = self.parse_predicates()?;

        let mut trailing = Vec::new();
        loop {
            if self.eat(&Token::Slash) {
                trailing.push(self.parse_path_component()?);
            } else if self.eat(&Token::DoubleSlash) {
                trailing.push(descendant_or_self_step());
                trailing.push(self.parse_path_component()?);
            } else {
                break;
            }
        }

        if predicates.is_empty() && trailing.is_empty() {
            Ok(primary)
        } else {
            Ok(Expr::Filter {
                primary: Box::new(primary),
                predicates,
                trailing,
            })
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::VariableReference(name)) => {
                self.pos += 1;
                Ok(Expr::Variable(name))
            }
            Some(Token::LeftParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RightParen)?;
                Ok(inner)
            }
            Some(Token::FunctionName(_)) => self.parse_function_call(),
            Some(Token::MapKeyword) => self.parse_map_constructor(),
            _ => Err(self.error(format!("unexpected {}", self.describe()))),
        }
    }

    fn parse_function_call(&mut self) -> Result<Expr, ParseError> {
        let name = match self.peek().cloned() {
            Some(Token::FunctionName(name)) => {
                self.pos += 1;
                name
            }
            _ => return Err(self.error("expected a function name")),
        };
        self.expect(&Token::LeftParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RightParen) {
            args.push(self.parse_expr()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_expr()?);
            }
        }
        self.expect(&Token::RightParen)?;
        Ok(Expr::FunctionCall { name, args })
    }

    fn parse_map_constructor(&mut self) -> Result<Expr, ParseError> {
        self.expect(&Token::MapKeyword)?;
        self.expect(&Token::LeftBrace)?;
        let mut entries = Vec::new();
        if !self.check(&Token::RightBrace) {
            loop {
                let key = self.parse_expr()?;
                self.expect(&Token::Colon)?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RightBrace)?;
        Ok(Expr::MapConstructor(entries))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn descendant_or_self_step() -> PathComponent {
    PathComponent::Step(Step {
        axis: Axis::DescendantOrSelf,
        node_test: NodeTest::AnyNode,
        predicates: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_absolute_path() {
        let expr = parse("/html/body").unwrap();
        match expr {
            Expr::Path {
                absolute: true,
                components,
            } => assert_eq!(components.len(), 2),
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_double_slash_inserts_descendant_or_self() {
        let expr = parse("//a").unwrap();
        match expr {
            Expr::Path {
                absolute: true,
                components,
            } => {
                assert_eq!(components.len(), 2);
                assert!(matches!(
                    &components[0],
                    PathComponent::Step(Step {
                        axis: Axis::DescendantOrSelf,
                        node_test: NodeTest::AnyNode,
                        ..
                    })
                ));
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_attribute_step() {
        let expr = parse(".//a/@href").unwrap();
        match expr {
            Expr::Path { components, .. } => {
                let last = components.last().unwrap();
                assert!(matches!(
                    last,
                    PathComponent::Step(Step {
                        axis: Axis::Attribute,
                        node_test: NodeTest::Name(name),
                        ..
                    }) if name == "href"
                ));
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_predicate_with_function() {
        let expr = parse("@href[starts-with(., '/wiki/')]").unwrap();
        match expr {
            Expr::Path { components, .. } => {
                let PathComponent::Step(step) = &components[0] else {
                    panic!("expected a step");
                };
                assert_eq!(step.predicates.len(), 1);
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_positional_filter_with_trailing_path() {
        let expr = parse("(//h1)[1]/text()").unwrap();
        match expr {
            Expr::Filter {
                predicates,
                trailing,
                ..
            } => {
                assert_eq!(predicates.len(), 1);
                assert_eq!(trailing.len(), 1);
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_map_constructor_preserves_order() {
        let expr = parse("map{'t': (//h1)[1], 'u': .//a/@href}").unwrap();
        match expr {
            Expr::MapConstructor(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].0, Expr::Literal("t".to_string()));
                assert_eq!(entries[1].0, Expr::Literal("u".to_string()));
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_map_as_trailing_path_step() {
        let expr = parse("//item/map{'t': .}").unwrap();
        match expr {
            Expr::Path { components, .. } => {
                assert!(matches!(
                    components.last().unwrap(),
                    PathComponent::Expr(Expr::MapConstructor(_))
                ));
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_simple_map_operator() {
        let expr = parse("//h1/text() ! upper-case(.)").unwrap();
        assert!(matches!(expr, Expr::SimpleMap { .. }));
    }

    #[test]
    fn parse_string_concat() {
        let expr = parse("'a' || 'b' || 'c'").unwrap();
        match expr {
            Expr::StringConcat(operands) => assert_eq!(operands.len(), 3),
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_union() {
        let expr = parse("//a | //b").unwrap();
        assert!(matches!(expr, Expr::Union(_, _)));
    }

    #[test]
    fn parse_arithmetic_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn parse_wx_function() {
        let expr = parse("wx:backlink(.)").unwrap();
        match expr {
            Expr::FunctionCall { name, args } => {
                assert_eq!(name, "wx:backlink");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn reject_trailing_garbage() {
        assert!(parse("//a )").is_err());
    }

    #[test]
    fn reject_empty() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn reject_missing_bracket() {
        assert!(parse("//a[1").is_err());
    }
}
