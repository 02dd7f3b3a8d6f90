//! XPath values: string, number, boolean, node-set, with the XPath 1.0
//! conversion rules.
//!
//! https://www.w3.org/TR/1999/REC-xpath-19991116/#basics

use crate::document::DocumentInner;
use crate::node::NodeTarget;
use crate::result::XPathError;
use crate::tree;

/// The internal node representation during evaluation: a tree slot or a
/// synthesized namespace node.
pub(crate) type XNode = NodeTarget;

/// The string-value of a node (§5 of the XPath data model).
pub(crate) fn node_string_value(inner: &DocumentInner, node: &XNode) -> String {
    match node {
        NodeTarget::Tree(id) => tree::string_value(inner, *id),
        NodeTarget::Namespace(ns) => ns.uri.clone(),
    }
}

/// A duplicate-free collection of nodes kept in document order.
#[derive(Debug, Clone, Default)]
pub struct Nodeset {
    nodes: Vec<XNode>,
}

impl Nodeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, node: XNode) {
        self.nodes.push(node);
    }

    pub(crate) fn extend(&mut self, other: Nodeset) {
        self.nodes.extend(other.nodes);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn first(&self) -> Option<&XNode> {
        self.nodes.first()
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, XNode> {
        self.nodes.iter()
    }

    pub(crate) fn into_nodes(self) -> Vec<XNode> {
        self.nodes
    }

    pub(crate) fn retain(&mut self, f: impl FnMut(&XNode) -> bool) {
        self.nodes.retain(f);
    }

    /// Restores the node-set guarantees: document order, no duplicates by
    /// identity.
    pub(crate) fn sort_document_order(&mut self, inner: &DocumentInner) {
        let nodes = std::mem::take(&mut self.nodes);
        let mut keyed: Vec<(Vec<u64>, XNode)> = nodes
            .into_iter()
            .map(|node| (tree::order_key(inner, &node), node))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, node) in keyed {
            if !self.nodes.last().is_some_and(|prev| prev.same(&node)) {
                self.nodes.push(node);
            }
        }
    }
}

impl Nodeset {
    pub(crate) fn from_nodes(nodes: Vec<XNode>) -> Self {
        Self { nodes }
    }
}

/// An XPath value is exactly one of the four types.
#[derive(Debug, Clone)]
pub enum Value {
    Nodeset(Nodeset),
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// boolean() conversion: non-empty node-set, non-empty string, non-zero
    /// non-NaN number.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Nodeset(set) => !set.is_empty(),
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    /// number() conversion; a node-set goes through its string-value.
    pub(crate) fn to_number(&self, inner: &DocumentInner) -> f64 {
        match self {
            Value::Nodeset(_) => string_to_number(&self.to_string_value(inner)),
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
        }
    }

    /// string() conversion; a node-set yields the string-value of its first
    /// node in document order.
    pub(crate) fn to_string_value(&self, inner: &DocumentInner) -> String {
        match self {
            Value::Nodeset(set) => set
                .first()
                .map(|node| node_string_value(inner, node))
                .unwrap_or_default(),
            Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
        }
    }

    pub fn is_nodeset(&self) -> bool {
        matches!(self, Value::Nodeset(_))
    }

    pub(crate) fn into_nodeset(self) -> Result<Nodeset, XPathError> {
        match self {
            Value::Nodeset(set) => Ok(set),
            other => Err(XPathError::Type(format!(
                "expected a node-set, got a {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nodeset(_) => "node-set",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Nodeset> for Value {
    fn from(v: Nodeset) -> Self {
        Value::Nodeset(v)
    }
}

/// XPath's Number grammar: optional minus, digits with an optional
/// fractional part, surrounding whitespace allowed. Anything else is NaN
/// (no exponents, no infinity spellings).
pub(crate) fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches([' ', '\t', '\r', '\n']);
    let body = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if body.is_empty() {
        return f64::NAN;
    }

    let mut seen_point = false;
    let mut seen_digit = false;
    for c in body.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_point => seen_point = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }

    trimmed.parse().unwrap_or(f64::NAN)
}

/// XPath number-to-string: integers without a decimal point, no trailing
/// zeros, `NaN`/`Infinity` spellings.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e18 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// `=` / `!=` with the node-set pairing rules.
pub(crate) fn compare_equal(
    inner: &DocumentInner,
    left: &Value,
    right: &Value,
    negate: bool,
) -> bool {
    match (left, right) {
        (Value::Nodeset(a), Value::Nodeset(b)) => {
            // Some pair of string-values compares equal (unequal for !=).
            let values_b: Vec<String> =
                b.iter().map(|n| node_string_value(inner, n)).collect();
            a.iter().any(|node| {
                let value_a = node_string_value(inner, node);
                values_b.iter().any(|value_b| (value_a == *value_b) != negate)
            })
        }

        (Value::Nodeset(set), other) | (other, Value::Nodeset(set)) => match other {
            Value::Boolean(b) => (!set.is_empty() == *b) != negate,
            Value::Number(n) => set
                .iter()
                .any(|node| (string_to_number(&node_string_value(inner, node)) == *n) != negate),
            _ => {
                let scalar = other.to_string_value(inner);
                set.iter()
                    .any(|node| (node_string_value(inner, node) == scalar) != negate)
            }
        },

        (Value::Boolean(_), _) | (_, Value::Boolean(_)) => {
            (left.to_boolean() == right.to_boolean()) != negate
        }
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            (left.to_number(inner) == right.to_number(inner)) != negate
        }
        _ => (left.to_string_value(inner) == right.to_string_value(inner)) != negate,
    }
}
