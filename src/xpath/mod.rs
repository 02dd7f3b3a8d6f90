//! The XPath 1.0 engine: lexer, parser, evaluator, function library,
//! result shaping, and the process-global expression cache.
//!
//! Entry points are [`crate::Document::evaluate`] and
//! [`crate::Document::create_expression`]; both go through the cache.

pub mod tokens;
pub mod value;

pub(crate) mod cache;
pub(crate) mod context;
pub(crate) mod expressions;
pub(crate) mod functions;
pub(crate) mod lexer;
pub(crate) mod nodetest;
pub(crate) mod parser;

use std::sync::Arc;

use ahash::AHashMap;

use crate::document::Document;
use crate::node::{NodeRef, NodeTarget};
use crate::result::XPathError;
use crate::xpath::context::{EvalScratch, Evaluation};
use crate::xpath::expressions::ExpressionArg;
use crate::xpath::tokens::ExprToken;
use crate::xpath::value::{Nodeset, Value};

// Result-type codes (part of the external contract).
pub const ANY_TYPE: u16 = 0;
pub const NUMBER_TYPE: u16 = 1;
pub const STRING_TYPE: u16 = 2;
pub const BOOLEAN_TYPE: u16 = 3;
pub const UNORDERED_NODE_ITERATOR_TYPE: u16 = 4;
pub const ORDERED_NODE_ITERATOR_TYPE: u16 = 5;
pub const UNORDERED_NODE_SNAPSHOT_TYPE: u16 = 6;
pub const ORDERED_NODE_SNAPSHOT_TYPE: u16 = 7;
pub const ANY_UNORDERED_NODE_TYPE: u16 = 8;
pub const FIRST_ORDERED_NODE_TYPE: u16 = 9;

/// Resolves namespace prefixes appearing in an expression.
///
/// Resolution happens once per evaluation, before the document lock is
/// taken, so a resolver may itself consult the document.
pub trait NamespaceResolver {
    /// The URI bound to `prefix` (empty `prefix` asks for the default
    /// namespace), or None when unbound.
    fn resolve_prefix(&self, prefix: &str) -> Option<String>;
}

/// Any node can act as a resolver by walking its in-scope declarations.
impl NamespaceResolver for NodeRef {
    fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        if prefix.is_empty() {
            self.lookup_namespace_uri(None)
        } else {
            self.lookup_namespace_uri(Some(prefix))
        }
    }
}

/// A value bound to an XPath variable.
#[derive(Debug, Clone)]
pub enum VariableValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Nodeset(Vec<NodeRef>),
}

/// Evaluation options beyond the context node.
#[derive(Default)]
pub struct EvalOptions<'a> {
    pub result_type: u16,
    pub resolver: Option<&'a dyn NamespaceResolver>,
    pub variables: AHashMap<String, VariableValue>,
}

pub(crate) struct CompiledExpression {
    source: String,
    /// Name-test prefixes, pre-extracted so resolvers run outside the lock.
    prefixes: Vec<String>,
    root: ExpressionArg,
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .finish()
    }
}

/// A compiled, shareable XPath expression.
#[derive(Debug, Clone)]
pub struct XPathExpression {
    compiled: Arc<CompiledExpression>,
}

/// Compiles `source`, consulting the process-global cache first.
pub fn create_expression(source: &str) -> Result<XPathExpression, XPathError> {
    if let Some(hit) = cache::lookup(source) {
        return Ok(XPathExpression { compiled: hit });
    }

    let root = parser::parse(source)?;
    let prefixes = name_test_prefixes(source)?;
    let compiled = Arc::new(CompiledExpression {
        source: source.to_string(),
        prefixes,
        root,
    });
    cache::store(source, compiled.clone());
    Ok(XPathExpression { compiled })
}

fn name_test_prefixes(source: &str) -> Result<Vec<String>, XPathError> {
    let mut prefixes = Vec::new();
    for (_, token) in lexer::Lexer::tokenize(source)? {
        if let ExprToken::NameTest(test) = token {
            if let Some(prefix) = test.prefix {
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix);
                }
            }
        }
    }
    Ok(prefixes)
}

impl XPathExpression {
    pub fn source(&self) -> &str {
        &self.compiled.source
    }

    /// Evaluates against `context` with no resolver and no variables.
    pub fn evaluate(
        &self,
        context: &NodeRef,
        result_type: u16,
        reused: Option<XPathResult>,
    ) -> Result<XPathResult, XPathError> {
        self.evaluate_full(context, None, result_type, reused)
    }

    pub(crate) fn evaluate_full(
        &self,
        context: &NodeRef,
        resolver: Option<&dyn NamespaceResolver>,
        result_type: u16,
        reused: Option<XPathResult>,
    ) -> Result<XPathResult, XPathError> {
        let options = EvalOptions {
            result_type,
            resolver,
            variables: AHashMap::new(),
        };
        self.evaluate_with(context, &options, reused)
    }

    /// Full-control evaluation: resolver, variables, result shaping.
    pub fn evaluate_with(
        &self,
        context: &NodeRef,
        options: &EvalOptions<'_>,
        reused: Option<XPathResult>,
    ) -> Result<XPathResult, XPathError> {
        let doc = context.doc.clone();

        // Resolve every prefix the expression mentions before locking; an
        // unresolvable prefix is a namespace error, not a non-match.
        let resolved = match options.resolver {
            Some(resolver) => {
                let mut map: AHashMap<String, String> = AHashMap::new();
                for prefix in &self.compiled.prefixes {
                    match resolver.resolve_prefix(prefix) {
                        Some(uri) => {
                            map.insert(prefix.clone(), uri);
                        }
                        None => {
                            return Err(XPathError::Namespace(format!(
                                "prefix '{prefix}' cannot be resolved"
                            )));
                        }
                    }
                }
                Some(map)
            }
            None => None,
        };

        // Variables convert to internal values up front; node-set bindings
        // must come from the context document.
        let mut variables: AHashMap<String, Value> = AHashMap::new();
        for (name, value) in &options.variables {
            let converted = match value {
                VariableValue::Boolean(b) => Value::Boolean(*b),
                VariableValue::Number(n) => Value::Number(*n),
                VariableValue::String(s) => Value::String(s.clone()),
                VariableValue::Nodeset(nodes) => {
                    let mut set = Nodeset::new();
                    for node in nodes {
                        if !doc.same_document(&node.doc) {
                            return Err(XPathError::WrongDocument(format!(
                                "variable ${name} holds nodes from another document"
                            )));
                        }
                        set.push(node.target.clone());
                    }
                    Value::Nodeset(set)
                }
            };
            variables.insert(name.clone(), converted);
        }

        let inner = doc.read();
        let version = inner.version();

        let scratch = EvalScratch::new(&variables, resolved);
        let eval = Evaluation::new(&inner, &scratch, context.target.clone());
        let value = self.compiled.root.eval(&eval)?;

        // Shape the result. Node-sets are re-sorted at the boundary so even
        // variable passthroughs honor the document-order guarantee.
        let mut nodes: Vec<NodeRef> = reused
            .map(|mut r| {
                r.nodes.clear();
                r.nodes
            })
            .unwrap_or_default();

        let shaped_type = match options.result_type {
            ANY_TYPE => match &value {
                Value::Nodeset(_) => UNORDERED_NODE_ITERATOR_TYPE,
                Value::Number(_) => NUMBER_TYPE,
                Value::String(_) => STRING_TYPE,
                Value::Boolean(_) => BOOLEAN_TYPE,
            },
            code @ 1..=9 => code,
            other => {
                return Err(XPathError::NotSupported(format!(
                    "unknown result type code {other}"
                )));
            }
        };

        let mut result = XPathResult {
            result_type: shaped_type,
            doc: None,
            version,
            boolean: false,
            number: 0.0,
            string: String::new(),
            nodes,
            cursor: 0,
        };

        match shaped_type {
            NUMBER_TYPE => result.number = value.to_number(&inner),
            STRING_TYPE => result.string = value.to_string_value(&inner),
            BOOLEAN_TYPE => result.boolean = value.to_boolean(),
            _ => {
                let mut set = value.into_nodeset().map_err(|_| {
                    XPathError::Type(
                        "expression result is not a node-set".to_string(),
                    )
                })?;
                set.sort_document_order(&inner);
                nodes = std::mem::take(&mut result.nodes);
                for target in set.into_nodes() {
                    nodes.push(match target {
                        NodeTarget::Tree(id) => NodeRef::tree(doc.clone(), id),
                        NodeTarget::Namespace(ns) => NodeRef::namespace(doc.clone(), ns),
                    });
                }
                result.nodes = nodes;
            }
        }

        drop(inner);
        result.doc = Some(doc);
        Ok(result)
    }
}

/// The shaped outcome of an evaluation. Accessors are gated by the result
/// type; iterators additionally invalidate when the document mutates.
#[derive(Debug)]
pub struct XPathResult {
    result_type: u16,
    doc: Option<Document>,
    version: u64,
    boolean: bool,
    number: f64,
    string: String,
    nodes: Vec<NodeRef>,
    cursor: usize,
}

impl XPathResult {
    /// The effective result-type code (ANY requests come back refined).
    pub fn result_type(&self) -> u16 {
        self.result_type
    }

    pub fn number_value(&self) -> Result<f64, XPathError> {
        if self.result_type == NUMBER_TYPE {
            Ok(self.number)
        } else {
            Err(XPathError::Type("result is not a number".into()))
        }
    }

    pub fn string_value(&self) -> Result<&str, XPathError> {
        if self.result_type == STRING_TYPE {
            Ok(&self.string)
        } else {
            Err(XPathError::Type("result is not a string".into()))
        }
    }

    pub fn boolean_value(&self) -> Result<bool, XPathError> {
        if self.result_type == BOOLEAN_TYPE {
            Ok(self.boolean)
        } else {
            Err(XPathError::Type("result is not a boolean".into()))
        }
    }

    fn is_iterator(&self) -> bool {
        matches!(
            self.result_type,
            UNORDERED_NODE_ITERATOR_TYPE | ORDERED_NODE_ITERATOR_TYPE
        )
    }

    fn is_snapshot(&self) -> bool {
        matches!(
            self.result_type,
            UNORDERED_NODE_SNAPSHOT_TYPE | ORDERED_NODE_SNAPSHOT_TYPE
        )
    }

    /// True when the iterator can no longer be consumed because its
    /// document has mutated since evaluation.
    pub fn invalid_iterator_state(&self) -> bool {
        self.is_iterator()
            && self
                .doc
                .as_ref()
                .is_some_and(|doc| doc.read().version() != self.version)
    }

    /// The next node of an iterator result, None once exhausted.
    pub fn iterate_next(&mut self) -> Result<Option<NodeRef>, XPathError> {
        if !self.is_iterator() {
            return Err(XPathError::Type("result is not an iterator".into()));
        }
        if self.invalid_iterator_state() {
            return Err(XPathError::InvalidState(
                "the document has mutated since this result was produced".into(),
            ));
        }

        let next = self.nodes.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }

    pub fn snapshot_length(&self) -> Result<usize, XPathError> {
        if self.is_snapshot() {
            Ok(self.nodes.len())
        } else {
            Err(XPathError::Type("result is not a snapshot".into()))
        }
    }

    pub fn snapshot_item(&self, index: usize) -> Result<Option<NodeRef>, XPathError> {
        if self.is_snapshot() {
            Ok(self.nodes.get(index).cloned())
        } else {
            Err(XPathError::Type("result is not a snapshot".into()))
        }
    }

    /// The single node of an ANY_UNORDERED_NODE / FIRST_ORDERED_NODE result.
    pub fn single_node_value(&self) -> Result<Option<NodeRef>, XPathError> {
        if matches!(
            self.result_type,
            ANY_UNORDERED_NODE_TYPE | FIRST_ORDERED_NODE_TYPE
        ) {
            Ok(self.nodes.first().cloned())
        } else {
            Err(XPathError::Type("result is not a single node".into()))
        }
    }
}
