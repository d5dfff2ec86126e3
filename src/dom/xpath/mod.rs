//! XPath selectors over [`Document`] trees
//!
//! A compact XPath 1.0 engine: location paths on all axes, predicates with
//! positional semantics, the usual operators and the string/number/boolean
//! core functions. Expressions are compiled once and can be evaluated any
//! number of times against any document.

mod eval;
mod lexer;
mod parser;

use crate::dom::document::{Document, NodeId};
use crate::error::{RelayError, Result};
use eval::{Evaluator, Value};
use parser::Expr;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// A node selected by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hit {
    Node(NodeId),
    /// The attribute at `index` on the given element.
    Attribute(NodeId, usize),
}

impl Hit {
    /// The tree node carrying this hit (the owning element for attributes).
    pub fn node(self) -> NodeId {
        match self {
            Hit::Node(node) | Hit::Attribute(node, _) => node,
        }
    }

    /// XPath string-value: text content for nodes, the value for attributes.
    pub fn string_value(self, doc: &Document) -> String {
        match self {
            Hit::Node(node) => doc.text_content(node),
            Hit::Attribute(owner, index) => doc
                .attribute(owner, index)
                .map(|(_, value)| value.to_string())
                .unwrap_or_default(),
        }
    }
}

/// A compiled XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn compile(source: &str) -> Result<Self> {
        let expr = parser::parse(source).map_err(|reason| RelayError::XPathError {
            expression: source.to_string(),
            reason,
        })?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// All selected nodes in document order.
    ///
    /// Expressions that evaluate to a string, number or boolean select nothing.
    pub fn select(&self, doc: &Document) -> Vec<Hit> {
        match self.evaluate(doc) {
            Some(Value::Nodes(nodes)) => nodes,
            Some(other) => {
                debug!("XPath `{}` produced {:?}, not a node-set", self.source, other);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn select_first(&self, doc: &Document) -> Option<Hit> {
        self.select(doc).into_iter().next()
    }

    /// Whether the expression holds for the document: a non-empty node-set,
    /// or a true boolean value for scalar expressions such as `count(//a) > 2`.
    pub fn matches(&self, doc: &Document) -> bool {
        let evaluator = Evaluator::new(doc);
        match evaluator.evaluate(&self.expr) {
            Ok(value) => evaluator.to_boolean(&value),
            Err(reason) => {
                debug!("XPath `{}` failed to evaluate: {}", self.source, reason);
                false
            }
        }
    }

    /// String value of the expression: the first hit's value for node-sets.
    pub fn string(&self, doc: &Document) -> Option<String> {
        let evaluator = Evaluator::new(doc);
        match evaluator.evaluate(&self.expr) {
            Ok(Value::Nodes(nodes)) if nodes.is_empty() => None,
            Ok(value) => Some(evaluator.to_text(&value)),
            Err(reason) => {
                debug!("XPath `{}` failed to evaluate: {}", self.source, reason);
                None
            }
        }
    }

    fn evaluate(&self, doc: &Document) -> Option<Value> {
        match Evaluator::new(doc).evaluate(&self.expr) {
            Ok(value) => Some(value),
            Err(reason) => {
                debug!("XPath `{}` failed to evaluate: {}", self.source, reason);
                None
            }
        }
    }
}

impl PartialEq for XPath {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl FromStr for XPath {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
