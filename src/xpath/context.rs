//! The evaluation context and the thirteen axes.
//!
//! The context carries the tuple XPath 1.0 defines — node, position, size,
//! variables, function library (built in), namespace resolver — plus the
//! borrowed document state every axis reads. Axes are eager collectors
//! returning nodes in axis order: forward axes in document order, reverse
//! axes nearest-first.

use std::cell::RefCell;
use std::sync::Arc;

use ahash::AHashMap;

use crate::document::DocumentInner;
use crate::name::{XML_NAMESPACE, XMLNS_NAMESPACE};
use crate::node::{NamespaceNode, NodeId, NodeKind, NodeTarget};
use crate::tree;
use crate::xpath::tokens::AxisName;
use crate::xpath::value::{Value, XNode};

/// Per-query scratch shared by every context: variable bindings, the
/// pre-resolved name-test prefixes, and the namespace-node cache that keeps
/// synthesized nodes identical across repeated axis visits within one
/// evaluation.
pub(crate) struct EvalScratch<'a> {
    pub variables: &'a AHashMap<String, Value>,
    /// prefix → URI for every prefix the expression mentions; None when no
    /// resolver was supplied (name tests then match literally).
    pub resolved_prefixes: Option<AHashMap<String, String>>,
    pub ns_cache: RefCell<AHashMap<NodeId, Vec<Arc<NamespaceNode>>>>,
}

impl<'a> EvalScratch<'a> {
    pub fn new(
        variables: &'a AHashMap<String, Value>,
        resolved_prefixes: Option<AHashMap<String, String>>,
    ) -> Self {
        Self {
            variables,
            resolved_prefixes,
            ns_cache: RefCell::new(AHashMap::new()),
        }
    }
}

/// One expression-evaluation context.
pub struct Evaluation<'a> {
    pub(crate) inner: &'a DocumentInner,
    pub(crate) scratch: &'a EvalScratch<'a>,
    pub(crate) node: XNode,
    /// 1-based context position.
    pub position: usize,
    /// Context size; `position <= size`.
    pub size: usize,
}

impl<'a> Evaluation<'a> {
    pub(crate) fn new(
        inner: &'a DocumentInner,
        scratch: &'a EvalScratch<'a>,
        node: XNode,
    ) -> Self {
        Self {
            inner,
            scratch,
            node,
            position: 1,
            size: 1,
        }
    }

    /// True when a namespace resolver was supplied for this evaluation.
    pub(crate) fn has_resolver(&self) -> bool {
        self.scratch.resolved_prefixes.is_some()
    }

    /// The URI a name-test prefix resolved to, when a resolver is present.
    pub(crate) fn resolved_prefix(&self, prefix: &str) -> Option<&str> {
        self.scratch
            .resolved_prefixes
            .as_ref()
            .and_then(|map| map.get(prefix))
            .map(String::as_str)
    }

    /// The root the absolute path `/` selects.
    pub(crate) fn root(&self) -> XNode {
        NodeTarget::Tree(NodeId::DOCUMENT)
    }

    pub(crate) fn with_node(&self, node: XNode, position: usize, size: usize) -> Evaluation<'a> {
        Evaluation {
            inner: self.inner,
            scratch: self.scratch,
            node,
            position,
            size,
        }
    }

    pub(crate) fn variable(&self, name: &str) -> Option<Value> {
        self.scratch.variables.get(name).cloned()
    }
}

/// All nodes the axis yields from `node`, in axis order, before any node
/// test is applied.
pub(crate) fn axis_nodes(eval: &Evaluation<'_>, axis: AxisName, node: &XNode) -> Vec<XNode> {
    let inner = eval.inner;
    match axis {
        AxisName::SelfAxis => vec![node.clone()],

        AxisName::Child => match node {
            NodeTarget::Tree(id) => inner
                .node(*id)
                .children
                .iter()
                .map(|c| NodeTarget::Tree(*c))
                .collect(),
            NodeTarget::Namespace(_) => Vec::new(),
        },

        AxisName::Parent => parent_of(inner, node).into_iter().collect(),

        AxisName::Ancestor => {
            let mut out = Vec::new();
            let mut current = parent_of(inner, node);
            while let Some(parent) = current {
                current = parent_of(inner, &parent);
                out.push(parent);
            }
            out
        }

        AxisName::AncestorOrSelf => {
            let mut out = vec![node.clone()];
            out.extend(axis_nodes(eval, AxisName::Ancestor, node));
            out
        }

        AxisName::Descendant => match node {
            NodeTarget::Tree(id) => tree::descendants(inner, *id)
                .into_iter()
                .map(NodeTarget::Tree)
                .collect(),
            NodeTarget::Namespace(_) => Vec::new(),
        },

        AxisName::DescendantOrSelf => {
            let mut out = vec![node.clone()];
            out.extend(axis_nodes(eval, AxisName::Descendant, node));
            out
        }

        AxisName::FollowingSibling => siblings_from(inner, node, 1),

        AxisName::PrecedingSibling => {
            let mut out = siblings_from(inner, node, -1);
            out.reverse();
            out
        }

        AxisName::Following => {
            // Subtrees of later siblings at every ancestor level, nearest
            // level first; attribute/namespace context starts below its
            // element's children.
            let mut out = Vec::new();
            let mut current = match node {
                NodeTarget::Tree(id) => {
                    if let Some(owner) = inner.node(*id).owner_element {
                        subtree_into(inner, owner, &mut out, false);
                        Some(NodeTarget::Tree(owner))
                    } else {
                        Some(node.clone())
                    }
                }
                NodeTarget::Namespace(ns) => {
                    subtree_into(inner, ns.owner, &mut out, false);
                    Some(NodeTarget::Tree(ns.owner))
                }
            };

            while let Some(at) = current {
                for sibling in siblings_from(inner, &at, 1) {
                    if let NodeTarget::Tree(id) = sibling {
                        subtree_into(inner, id, &mut out, true);
                    }
                }
                current = parent_of(inner, &at);
            }
            out
        }

        AxisName::Preceding => {
            // Reverse document order, nearest first: earlier siblings'
            // subtrees (deepest last node first), level by level upward.
            let mut out = Vec::new();
            let mut current = match node {
                NodeTarget::Tree(id) => inner
                    .node(*id)
                    .owner_element
                    .map(NodeTarget::Tree)
                    .or_else(|| Some(node.clone())),
                NodeTarget::Namespace(ns) => Some(NodeTarget::Tree(ns.owner)),
            };

            while let Some(at) = current {
                let mut earlier = siblings_from(inner, &at, -1);
                earlier.reverse();
                for sibling in earlier {
                    if let NodeTarget::Tree(id) = sibling {
                        let mut subtree = Vec::new();
                        subtree_into(inner, id, &mut subtree, true);
                        subtree.reverse();
                        out.extend(subtree);
                    }
                }
                current = parent_of(inner, &at);
            }
            out
        }

        AxisName::Attribute => match node {
            NodeTarget::Tree(id) if inner.node(*id).kind == NodeKind::Element => inner
                .node(*id)
                .attrs
                .iter()
                .map(|a| NodeTarget::Tree(*a))
                .collect(),
            _ => Vec::new(),
        },

        AxisName::Namespace => match node {
            NodeTarget::Tree(id) if inner.node(*id).kind == NodeKind::Element => {
                namespace_nodes(eval, *id)
                    .into_iter()
                    .map(NodeTarget::Namespace)
                    .collect()
            }
            _ => Vec::new(),
        },
    }
}

fn parent_of(inner: &DocumentInner, node: &XNode) -> Option<XNode> {
    match node {
        NodeTarget::Tree(id) => tree::effective_parent(inner, *id).map(NodeTarget::Tree),
        NodeTarget::Namespace(ns) => Some(NodeTarget::Tree(ns.owner)),
    }
}

fn siblings_from(inner: &DocumentInner, node: &XNode, direction: i64) -> Vec<XNode> {
    let NodeTarget::Tree(id) = node else {
        return Vec::new();
    };
    let Some(parent) = inner.node(*id).parent else {
        return Vec::new();
    };
    let children = &inner.node(parent).children;
    let Some(index) = children.iter().position(|c| c == id) else {
        return Vec::new();
    };

    if direction > 0 {
        children[index + 1..]
            .iter()
            .map(|c| NodeTarget::Tree(*c))
            .collect()
    } else {
        children[..index]
            .iter()
            .map(|c| NodeTarget::Tree(*c))
            .collect()
    }
}

/// Appends `root` (when `include_root`) and its descendants in document
/// order.
fn subtree_into(inner: &DocumentInner, root: NodeId, out: &mut Vec<XNode>, include_root: bool) {
    if include_root {
        out.push(NodeTarget::Tree(root));
    }
    out.extend(tree::descendants(inner, root).into_iter().map(NodeTarget::Tree));
}

/// Synthesizes (or recalls) the namespace nodes in scope for `element`: one
/// per distinct prefix, the `xml` binding always present, the default
/// namespace only when bound non-empty. Ordered by prefix for determinism.
pub(crate) fn namespace_nodes(eval: &Evaluation<'_>, element: NodeId) -> Vec<Arc<NamespaceNode>> {
    if let Some(cached) = eval.scratch.ns_cache.borrow().get(&element) {
        return cached.clone();
    }

    let inner = eval.inner;
    let mut bindings: Vec<(String, String)> = Vec::new();
    fn seen(bindings: &[(String, String)], prefix: &str) -> bool {
        bindings.iter().any(|(p, _)| p == prefix)
    }

    let mut current = Some(element);
    while let Some(id) = current {
        let node = inner.node(id);
        if node.kind == NodeKind::Element {
            for attr in &node.attrs {
                let attr = inner.node(*attr);
                if attr.name.namespace_uri() != XMLNS_NAMESPACE {
                    continue;
                }
                let prefix = attr.name.declared_prefix().to_string();
                if !seen(&bindings, &prefix) {
                    bindings.push((prefix, attr.value.clone().unwrap_or_default()));
                }
            }
        }
        current = tree::effective_parent(inner, id);
    }

    if !seen(&bindings, "xml") {
        bindings.push(("xml".to_string(), XML_NAMESPACE.to_string()));
    }

    // An empty URI is an undeclaration, not a namespace node.
    bindings.retain(|(_, uri)| !uri.is_empty());
    bindings.sort_by(|a, b| a.0.cmp(&b.0));

    let nodes: Vec<Arc<NamespaceNode>> = bindings
        .into_iter()
        .enumerate()
        .map(|(order, (prefix, uri))| {
            Arc::new(NamespaceNode {
                owner: element,
                prefix,
                uri,
                order: order as u32,
            })
        })
        .collect();

    eval.scratch
        .ns_cache
        .borrow_mut()
        .insert(element, nodes.clone());
    nodes
}
