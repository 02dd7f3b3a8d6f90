//! Node tests.
//!
//! https://www.w3.org/TR/1999/REC-xpath-19991116/#node-tests
//!
//! A bare name matches against the axis's principal node type by qualified
//! name; when the evaluation carries a namespace resolver, prefixes resolve
//! to URIs and matching switches to (namespace, local) pairs.

use std::fmt;

use crate::name::Name;
use crate::node::{NodeKind, NodeTarget};
use crate::xpath::context::Evaluation;
use crate::xpath::tokens::NameTest;
use crate::xpath::value::XNode;

pub trait NodeTest: fmt::Debug + Send + Sync {
    fn matches(&self, eval: &Evaluation<'_>, node: &XNode) -> bool;
}

impl NameTest {
    fn matches_name(&self, eval: &Evaluation<'_>, name: &Name) -> bool {
        if self.local == "*" {
            return match &self.prefix {
                None => true,
                Some(prefix) => match eval.resolved_prefix(prefix) {
                    Some(uri) => name.namespace_uri() == uri,
                    None => name.prefix() == prefix,
                },
            };
        }

        if self.local != name.local_name() {
            return false;
        }

        match &self.prefix {
            // With a resolver an unprefixed test selects the null namespace;
            // without one, matching is on the literal qualified name.
            None => {
                if eval.has_resolver() {
                    name.namespace_uri().is_empty()
                } else {
                    name.prefix().is_empty()
                }
            }
            Some(prefix) => match eval.resolved_prefix(prefix) {
                Some(uri) => name.namespace_uri() == uri,
                None => name.prefix() == prefix,
            },
        }
    }
}

/// Name test against the element principal type.
#[derive(Debug)]
pub struct ElementTest {
    name_test: NameTest,
}

impl ElementTest {
    pub fn new(name_test: NameTest) -> Self {
        Self { name_test }
    }
}

impl NodeTest for ElementTest {
    fn matches(&self, eval: &Evaluation<'_>, node: &XNode) -> bool {
        match node {
            NodeTarget::Tree(id) => {
                let data = eval.inner.node(*id);
                data.kind == NodeKind::Element && self.name_test.matches_name(eval, &data.name)
            }
            NodeTarget::Namespace(_) => false,
        }
    }
}

/// Name test against attribute nodes.
#[derive(Debug)]
pub struct AttributeTest {
    name_test: NameTest,
}

impl AttributeTest {
    pub fn new(name_test: NameTest) -> Self {
        Self { name_test }
    }
}

impl NodeTest for AttributeTest {
    fn matches(&self, eval: &Evaluation<'_>, node: &XNode) -> bool {
        match node {
            NodeTarget::Tree(id) => {
                let data = eval.inner.node(*id);
                data.kind == NodeKind::Attribute && self.name_test.matches_name(eval, &data.name)
            }
            NodeTarget::Namespace(_) => false,
        }
    }
}

/// Name test against synthesized namespace nodes; the name of a namespace
/// node is the prefix it declares.
#[derive(Debug)]
pub struct NamespaceTest {
    name_test: NameTest,
}

impl NamespaceTest {
    pub fn new(name_test: NameTest) -> Self {
        Self { name_test }
    }
}

impl NodeTest for NamespaceTest {
    fn matches(&self, _eval: &Evaluation<'_>, node: &XNode) -> bool {
        match node {
            NodeTarget::Namespace(ns) => {
                self.name_test.local == "*" || self.name_test.local == ns.prefix
            }
            NodeTarget::Tree(_) => false,
        }
    }
}

/// text()
#[derive(Debug)]
pub struct TextTest;

impl NodeTest for TextTest {
    fn matches(&self, eval: &Evaluation<'_>, node: &XNode) -> bool {
        match node {
            NodeTarget::Tree(id) => matches!(
                eval.inner.node(*id).kind,
                NodeKind::Text | NodeKind::CdataSection
            ),
            NodeTarget::Namespace(_) => false,
        }
    }
}

/// comment()
#[derive(Debug)]
pub struct CommentTest;

impl NodeTest for CommentTest {
    fn matches(&self, eval: &Evaluation<'_>, node: &XNode) -> bool {
        match node {
            NodeTarget::Tree(id) => eval.inner.node(*id).kind == NodeKind::Comment,
            NodeTarget::Namespace(_) => false,
        }
    }
}

/// processing-instruction(target?)
#[derive(Debug)]
pub struct ProcessingInstructionTest {
    target: Option<String>,
}

impl ProcessingInstructionTest {
    pub fn new(target: Option<String>) -> Self {
        Self { target }
    }
}

impl NodeTest for ProcessingInstructionTest {
    fn matches(&self, eval: &Evaluation<'_>, node: &XNode) -> bool {
        match node {
            NodeTarget::Tree(id) => {
                let data = eval.inner.node(*id);
                data.kind == NodeKind::ProcessingInstruction
                    && self
                        .target
                        .as_ref()
                        .map(|t| *t == data.node_name())
                        .unwrap_or(true)
            }
            NodeTarget::Namespace(_) => false,
        }
    }
}

/// node()
#[derive(Debug)]
pub struct AnyNodeTest;

impl NodeTest for AnyNodeTest {
    fn matches(&self, _eval: &Evaluation<'_>, _node: &XNode) -> bool {
        true
    }
}
