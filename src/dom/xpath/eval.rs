//! Expression evaluation against a [`Document`]

use super::parser::{Axis, BinaryOp, Expr, Function, LocationPath, NodeTest, Step};
use super::Hit;
use crate::dom::document::{Document, NodeId};
use scraper::Node;
use std::collections::HashMap;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Nodes(Vec<Hit>),
    Text(String),
    Number(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy)]
struct Context {
    hit: Hit,
    position: usize,
    size: usize,
}

pub(crate) struct Evaluator<'d> {
    doc: &'d Document,
    /// Document-order rank of every attached node.
    order: HashMap<NodeId, usize>,
}

impl<'d> Evaluator<'d> {
    pub(crate) fn new(doc: &'d Document) -> Self {
        let order = std::iter::once(doc.root())
            .chain(doc.descendants(doc.root()))
            .enumerate()
            .map(|(rank, id)| (id, rank))
            .collect();
        Self { doc, order }
    }

    /// Evaluate `expr` with the document root as context node.
    pub(crate) fn evaluate(&self, expr: &Expr) -> Result<Value, String> {
        let context = Context {
            hit: Hit::Node(self.doc.root()),
            position: 1,
            size: 1,
        };
        self.eval(expr, context)
    }

    pub(crate) fn to_boolean(&self, value: &Value) -> bool {
        match value {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Text(text) => !text.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
        }
    }

    fn eval(&self, expr: &Expr, ctx: Context) -> Result<Value, String> {
        match expr {
            Expr::Literal(text) => Ok(Value::Text(text.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Negate(inner) => {
                let value = self.eval(inner, ctx)?;
                Ok(Value::Number(-self.to_number(&value)))
            }
            Expr::Binary(op, left, right) => self.binary(*op, left, right, ctx),
            Expr::Union(left, right) => {
                let mut nodes = self.node_set(left, ctx)?;
                nodes.extend(self.node_set(right, ctx)?);
                Ok(Value::Nodes(self.in_document_order(nodes)))
            }
            Expr::Path(path) => self.location_path(path, ctx).map(Value::Nodes),
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut nodes = self.node_set(primary, ctx)?;
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate)?;
                }
                for step in steps {
                    nodes = self.step(&nodes, step)?;
                }
                Ok(Value::Nodes(nodes))
            }
            Expr::Call(function, args) => self.call(*function, args, ctx),
        }
    }

    fn node_set(&self, expr: &Expr, ctx: Context) -> Result<Vec<Hit>, String> {
        match self.eval(expr, ctx)? {
            Value::Nodes(nodes) => Ok(nodes),
            other => Err(format!("expected a node-set, got {other:?}")),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr, ctx: Context) -> Result<Value, String> {
        match op {
            BinaryOp::Or => {
                let left = self.eval(left, ctx)?;
                if self.to_boolean(&left) {
                    return Ok(Value::Boolean(true));
                }
                let right = self.eval(right, ctx)?;
                Ok(Value::Boolean(self.to_boolean(&right)))
            }
            BinaryOp::And => {
                let left = self.eval(left, ctx)?;
                if !self.to_boolean(&left) {
                    return Ok(Value::Boolean(false));
                }
                let right = self.eval(right, ctx)?;
                Ok(Value::Boolean(self.to_boolean(&right)))
            }
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                Ok(Value::Boolean(self.compare(op, &left, &right)))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                let (a, b) = (self.to_number(&left), self.to_number(&right));
                Ok(Value::Number(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                }))
            }
        }
    }

    fn compare(&self, op: BinaryOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|x| {
                let x = Atom::Text(x.string_value(self.doc));
                b.iter()
                    .any(|y| compare_atoms(op, &x, &Atom::Text(y.string_value(self.doc))))
            }),
            (Value::Nodes(nodes), other) => self.compare_set(op, nodes, other, false),
            (other, Value::Nodes(nodes)) => self.compare_set(op, nodes, other, true),
            (a, b) => compare_atoms(op, &self.atom(a), &self.atom(b)),
        }
    }

    /// Existential comparison between a node-set and a scalar.
    fn compare_set(&self, op: BinaryOp, nodes: &[Hit], other: &Value, swapped: bool) -> bool {
        let ordered = |a: &Atom, b: &Atom| {
            if swapped {
                compare_atoms(op, b, a)
            } else {
                compare_atoms(op, a, b)
            }
        };

        match other {
            Value::Boolean(b) => ordered(&Atom::Boolean(!nodes.is_empty()), &Atom::Boolean(*b)),
            Value::Number(n) => nodes.iter().any(|hit| {
                ordered(
                    &Atom::Number(parse_number(&hit.string_value(self.doc))),
                    &Atom::Number(*n),
                )
            }),
            Value::Text(text) => nodes.iter().any(|hit| {
                ordered(
                    &Atom::Text(hit.string_value(self.doc)),
                    &Atom::Text(text.clone()),
                )
            }),
            Value::Nodes(_) => false,
        }
    }

    fn atom(&self, value: &Value) -> Atom {
        match value {
            Value::Boolean(b) => Atom::Boolean(*b),
            Value::Number(n) => Atom::Number(*n),
            Value::Text(text) => Atom::Text(text.clone()),
            Value::Nodes(_) => Atom::Text(self.to_text(value)),
        }
    }

    pub(crate) fn to_text(&self, value: &Value) -> String {
        match value {
            Value::Nodes(nodes) => nodes
                .first()
                .map(|hit| hit.string_value(self.doc))
                .unwrap_or_default(),
            Value::Text(text) => text.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
        }
    }

    fn to_number(&self, value: &Value) -> f64 {
        match value {
            Value::Number(n) => *n,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => parse_number(&self.to_text(other)),
        }
    }

    fn location_path(&self, path: &LocationPath, ctx: Context) -> Result<Vec<Hit>, String> {
        let mut nodes = if path.absolute {
            vec![Hit::Node(self.doc.root())]
        } else {
            vec![ctx.hit]
        };
        for step in &path.steps {
            nodes = self.step(&nodes, step)?;
        }
        Ok(nodes)
    }

    fn step(&self, input: &[Hit], step: &Step) -> Result<Vec<Hit>, String> {
        let mut output = Vec::new();
        for &hit in input {
            let mut candidates: Vec<Hit> = self
                .axis(hit, step.axis)
                .into_iter()
                .filter(|candidate| self.matches_test(*candidate, &step.test, step.axis))
                .collect();
            for predicate in &step.predicates {
                candidates = self.filter(candidates, predicate)?;
            }
            output.extend(candidates);
        }
        Ok(self.in_document_order(output))
    }

    /// Keep the hits for which `predicate` holds, numbering them in the given order.
    fn filter(&self, hits: Vec<Hit>, predicate: &Expr) -> Result<Vec<Hit>, String> {
        let size = hits.len();
        let mut kept = Vec::with_capacity(size);
        for (index, hit) in hits.into_iter().enumerate() {
            let ctx = Context {
                hit,
                position: index + 1,
                size,
            };
            let keep = match self.eval(predicate, ctx)? {
                Value::Number(n) => n == ctx.position as f64,
                other => self.to_boolean(&other),
            };
            if keep {
                kept.push(hit);
            }
        }
        Ok(kept)
    }

    /// Nodes along `axis`, nearest first for reverse axes.
    fn axis(&self, hit: Hit, axis: Axis) -> Vec<Hit> {
        let doc = self.doc;
        let node = match hit {
            Hit::Node(node) => node,
            Hit::Attribute(owner, _) => {
                return match axis {
                    Axis::SelfAxis | Axis::DescendantOrSelf => vec![hit],
                    Axis::Parent => vec![Hit::Node(owner)],
                    Axis::Ancestor => self.with_ancestors(owner),
                    Axis::AncestorOrSelf => {
                        let mut out = vec![hit];
                        out.extend(self.with_ancestors(owner));
                        out
                    }
                    Axis::Following => {
                        let mut out: Vec<Hit> = doc.descendants(owner).map(Hit::Node).collect();
                        out.extend(self.following(owner));
                        out
                    }
                    Axis::Preceding => self.preceding(owner),
                    _ => Vec::new(),
                };
            }
        };

        match axis {
            Axis::Child => doc.children(node).map(Hit::Node).collect(),
            Axis::Descendant => doc.descendants(node).map(Hit::Node).collect(),
            Axis::DescendantOrSelf => std::iter::once(node)
                .chain(doc.descendants(node))
                .map(Hit::Node)
                .collect(),
            Axis::Parent => doc.parent(node).map(Hit::Node).into_iter().collect(),
            Axis::Ancestor => doc.ancestors(node).map(Hit::Node).collect(),
            Axis::AncestorOrSelf => self.with_ancestors(node),
            Axis::FollowingSibling => {
                std::iter::successors(doc.next_sibling(node), |n| doc.next_sibling(*n))
                    .map(Hit::Node)
                    .collect()
            }
            Axis::PrecedingSibling => {
                std::iter::successors(doc.prev_sibling(node), |n| doc.prev_sibling(*n))
                    .map(Hit::Node)
                    .collect()
            }
            Axis::Following => self.following(node),
            Axis::Preceding => self.preceding(node),
            Axis::Attribute => (0..doc.attribute_count(node))
                .map(|index| Hit::Attribute(node, index))
                .collect(),
            Axis::SelfAxis => vec![hit],
        }
    }

    fn with_ancestors(&self, node: NodeId) -> Vec<Hit> {
        std::iter::once(node)
            .chain(self.doc.ancestors(node))
            .map(Hit::Node)
            .collect()
    }

    fn following(&self, node: NodeId) -> Vec<Hit> {
        let doc = self.doc;
        let mut out = Vec::new();
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            let mut sibling = doc.next_sibling(current);
            while let Some(s) = sibling {
                out.push(Hit::Node(s));
                out.extend(doc.descendants(s).map(Hit::Node));
                sibling = doc.next_sibling(s);
            }
            cursor = doc.parent(current);
        }
        out
    }

    fn preceding(&self, node: NodeId) -> Vec<Hit> {
        let doc = self.doc;
        let mut out: Vec<Hit> = doc
            .descendants(doc.root())
            .take_while(|n| *n != node)
            .filter(|n| !doc.is_ancestor_of(*n, node))
            .map(Hit::Node)
            .collect();
        out.reverse();
        out
    }

    fn matches_test(&self, hit: Hit, test: &NodeTest, axis: Axis) -> bool {
        let doc = self.doc;
        match hit {
            Hit::Attribute(owner, index) => {
                let Some((name, _)) = doc.attribute(owner, index) else {
                    return false;
                };
                match test {
                    NodeTest::Node => true,
                    NodeTest::Wildcard => axis == Axis::Attribute || axis == Axis::SelfAxis,
                    NodeTest::Name(expected) => {
                        (axis == Axis::Attribute || axis == Axis::SelfAxis)
                            && name.eq_ignore_ascii_case(expected)
                    }
                    _ => false,
                }
            }
            Hit::Node(node) => match (test, doc.node(node)) {
                (_, None) => false,
                (NodeTest::Node, _) => true,
                (NodeTest::Text, Some(Node::Text(_))) => true,
                (NodeTest::Comment, Some(Node::Comment(_))) => true,
                (NodeTest::ProcessingInstruction(None), Some(Node::ProcessingInstruction(_))) => true,
                (NodeTest::ProcessingInstruction(Some(expected)), Some(Node::ProcessingInstruction(pi))) => {
                    &*pi.target == expected.as_str()
                }
                (NodeTest::Wildcard, Some(Node::Element(_))) => axis != Axis::Attribute,
                (NodeTest::Name(expected), Some(Node::Element(element))) => {
                    axis != Axis::Attribute && element.name().eq_ignore_ascii_case(expected)
                }
                _ => false,
            },
        }
    }

    fn in_document_order(&self, mut hits: Vec<Hit>) -> Vec<Hit> {
        hits.sort_by_key(|hit| self.rank(*hit));
        hits.dedup();
        hits
    }

    fn rank(&self, hit: Hit) -> (usize, usize) {
        match hit {
            Hit::Node(node) => (self.position_of(node), 0),
            Hit::Attribute(owner, index) => (self.position_of(owner), index + 1),
        }
    }

    fn position_of(&self, node: NodeId) -> usize {
        self.order.get(&node).copied().unwrap_or(usize::MAX)
    }

    fn call(&self, function: Function, args: &[Expr], ctx: Context) -> Result<Value, String> {
        let text_arg = |index: usize| -> Result<String, String> {
            match args.get(index) {
                Some(arg) => Ok(self.to_text(&self.eval(arg, ctx)?)),
                None => Ok(ctx.hit.string_value(self.doc)),
            }
        };
        let number_arg = |index: usize| -> Result<f64, String> {
            let value = self.eval(&args[index], ctx)?;
            Ok(self.to_number(&value))
        };

        let value = match function {
            Function::Last => Value::Number(ctx.size as f64),
            Function::Position => Value::Number(ctx.position as f64),
            Function::Count => Value::Number(self.node_set(&args[0], ctx)?.len() as f64),
            Function::Not => {
                let value = self.eval(&args[0], ctx)?;
                Value::Boolean(!self.to_boolean(&value))
            }
            Function::True => Value::Boolean(true),
            Function::False => Value::Boolean(false),
            Function::Boolean => {
                let value = self.eval(&args[0], ctx)?;
                Value::Boolean(self.to_boolean(&value))
            }
            Function::String => Value::Text(text_arg(0)?),
            Function::Number => match args.first() {
                Some(_) => Value::Number(number_arg(0)?),
                None => Value::Number(parse_number(&ctx.hit.string_value(self.doc))),
            },
            Function::Concat => {
                let mut out = String::new();
                for index in 0..args.len() {
                    out.push_str(&text_arg(index)?);
                }
                Value::Text(out)
            }
            Function::Contains => Value::Boolean(text_arg(0)?.contains(&text_arg(1)?)),
            Function::StartsWith => Value::Boolean(text_arg(0)?.starts_with(&text_arg(1)?)),
            Function::EndsWith => Value::Boolean(text_arg(0)?.ends_with(&text_arg(1)?)),
            Function::NormalizeSpace => Value::Text(
                text_arg(0)?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Function::StringLength => Value::Number(text_arg(0)?.chars().count() as f64),
            Function::Substring => {
                let text = text_arg(0)?;
                let start = round(number_arg(1)?);
                let end = if args.len() > 2 {
                    start + round(number_arg(2)?)
                } else {
                    f64::INFINITY
                };
                Value::Text(
                    text.chars()
                        .enumerate()
                        .filter(|(i, _)| {
                            let position = (*i + 1) as f64;
                            position >= start && position < end
                        })
                        .map(|(_, c)| c)
                        .collect(),
                )
            }
            Function::SubstringBefore => {
                let (text, needle) = (text_arg(0)?, text_arg(1)?);
                Value::Text(
                    text.find(&needle)
                        .map(|at| text[..at].to_string())
                        .unwrap_or_default(),
                )
            }
            Function::SubstringAfter => {
                let (text, needle) = (text_arg(0)?, text_arg(1)?);
                Value::Text(
                    text.find(&needle)
                        .map(|at| text[at + needle.len()..].to_string())
                        .unwrap_or_default(),
                )
            }
            Function::Translate => {
                let (text, from, to) = (text_arg(0)?, text_arg(1)?, text_arg(2)?);
                let from: Vec<char> = from.chars().collect();
                let to: Vec<char> = to.chars().collect();
                Value::Text(
                    text.chars()
                        .filter_map(|c| match from.iter().position(|f| *f == c) {
                            Some(index) => to.get(index).copied(),
                            None => Some(c),
                        })
                        .collect(),
                )
            }
            Function::Name | Function::LocalName => {
                let target = match args.first() {
                    Some(arg) => self.node_set(arg, ctx)?.first().copied(),
                    None => Some(ctx.hit),
                };
                let name = target.map(|hit| self.name_of(hit)).unwrap_or_default();
                if function == Function::LocalName {
                    Value::Text(name.rsplit(':').next().unwrap_or_default().to_string())
                } else {
                    Value::Text(name)
                }
            }
            Function::LowerCase => Value::Text(text_arg(0)?.to_lowercase()),
        };
        Ok(value)
    }

    fn name_of(&self, hit: Hit) -> String {
        match hit {
            Hit::Node(node) => match self.doc.node(node) {
                Some(Node::Element(element)) => element.name().to_string(),
                Some(Node::ProcessingInstruction(pi)) => pi.target.to_string(),
                _ => String::new(),
            },
            Hit::Attribute(owner, index) => self
                .doc
                .attribute(owner, index)
                .map(|(name, _)| name)
                .unwrap_or_default(),
        }
    }
}

enum Atom {
    Text(String),
    Number(f64),
    Boolean(bool),
}

fn compare_atoms(op: BinaryOp, left: &Atom, right: &Atom) -> bool {
    let as_number = |atom: &Atom| match atom {
        Atom::Number(n) => *n,
        Atom::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Atom::Text(text) => parse_number(text),
    };
    let as_boolean = |atom: &Atom| match atom {
        Atom::Boolean(b) => *b,
        Atom::Number(n) => *n != 0.0 && !n.is_nan(),
        Atom::Text(text) => !text.is_empty(),
    };

    match op {
        BinaryOp::Eq | BinaryOp::NotEq => {
            let equal = match (left, right) {
                (Atom::Boolean(_), _) | (_, Atom::Boolean(_)) => as_boolean(left) == as_boolean(right),
                (Atom::Number(_), _) | (_, Atom::Number(_)) => as_number(left) == as_number(right),
                (Atom::Text(a), Atom::Text(b)) => a == b,
            };
            if op == BinaryOp::Eq {
                equal
            } else {
                !equal
            }
        }
        BinaryOp::Lt => as_number(left) < as_number(right),
        BinaryOp::Le => as_number(left) <= as_number(right),
        BinaryOp::Gt => as_number(left) > as_number(right),
        BinaryOp::Ge => as_number(left) >= as_number(right),
        _ => false,
    }
}

/// XPath number conversion: optional minus, digits and one dot, nothing else.
fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let valid = !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1;
    if valid {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn round(n: f64) -> f64 {
    (n + 0.5).floor()
}

#[cfg(test)]
mod tests {
    use super::{format_number, parse_number};

    #[test]
    fn number_conversion_follows_xpath_rules() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-1.5"), -1.5);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("").is_nan());
    }

    #[test]
    fn integral_numbers_format_without_fraction() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(f64::NAN), "NaN");
    }
}
