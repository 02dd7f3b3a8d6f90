//! The node taxonomy and the public node handle.
//!
//! Nodes live in their document's arena; a [`NodeRef`] is a cheap handle
//! (document + slot) that locks the document around every operation. XPath's
//! synthetic namespace nodes ride in the same handle type but never enter
//! the arena.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::collections::NodeList;
use crate::document::{Document, DocumentInner};
use crate::name::Name;
use crate::result::{DomError, Result, XPathError};
use crate::tree;
use crate::xpath::{self, XPathResult};

/// The twelve DOM node kinds plus XPath's synthetic namespace kind. The
/// discriminants are the stable external codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NodeKind {
    Element = 1,
    Attribute = 2,
    Text = 3,
    CdataSection = 4,
    EntityReference = 5,
    Entity = 6,
    ProcessingInstruction = 7,
    Comment = 8,
    Document = 9,
    DocumentType = 10,
    DocumentFragment = 11,
    Notation = 12,
    /// Synthesized during XPath namespace-axis evaluation only.
    Namespace = 13,
}

impl NodeKind {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Kinds whose node value is character data the caller may rewrite.
    pub(crate) fn has_mutable_value(self) -> bool {
        matches!(
            self,
            Self::Attribute
                | Self::Text
                | Self::CdataSection
                | Self::Comment
                | Self::ProcessingInstruction
        )
    }

    pub(crate) fn is_character_data(self) -> bool {
        matches!(self, Self::Text | Self::CdataSection | Self::Comment)
    }
}

/// `compare_document_position` bit flags.
pub const DOCUMENT_POSITION_DISCONNECTED: u16 = 0x01;
pub const DOCUMENT_POSITION_PRECEDING: u16 = 0x02;
pub const DOCUMENT_POSITION_FOLLOWING: u16 = 0x04;
pub const DOCUMENT_POSITION_CONTAINS: u16 = 0x08;
pub const DOCUMENT_POSITION_CONTAINED_BY: u16 = 0x10;

/// Range boundary-point comparators. The Range object itself is not
/// implemented; the comparator codes remain part of the public contract.
pub const RANGE_START_TO_START: u16 = 0;
pub const RANGE_START_TO_END: u16 = 1;
pub const RANGE_END_TO_END: u16 = 2;
pub const RANGE_END_TO_START: u16 = 3;

/// Arena slot handle. Slot numbering starts at 1 so the niche keeps
/// `Option<NodeId>` at four bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(NonZeroU32);

impl NodeId {
    /// Every document's own node occupies the first slot of its arena.
    pub(crate) const DOCUMENT: NodeId = NodeId(match NonZeroU32::new(1) {
        Some(v) => v,
        None => unreachable!(),
    });

    pub(crate) fn from_index(index: usize) -> Self {
        NodeId(NonZeroU32::new(index as u32 + 1).expect("arena index overflow"))
    }

    pub(crate) fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0.get())
    }
}

/// Where in the source bytes a decoded node began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    /// 1-based line number.
    pub line: u32,
    /// 1-based byte column within the line.
    pub column: u32,
    /// Absolute byte offset of the node's first byte (`<` for elements).
    pub offset: usize,
}

/// DocumentType payload. The doctype name itself lives in the node name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DoctypeIds {
    pub public_id: String,
    pub system_id: String,
}

/// Arena payload for one node.
#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub kind: NodeKind,
    pub name: Name,
    /// Text/CDATA/Comment data, attribute value, PI data.
    pub value: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Element attribute nodes, insertion-ordered.
    pub attrs: Vec<NodeId>,
    /// For attribute nodes: the element currently carrying them.
    pub owner_element: Option<NodeId>,
    pub doctype: Option<DoctypeIds>,
    pub position: Option<SourcePosition>,
}

impl NodeData {
    fn new(kind: NodeKind, name: Name, value: Option<String>) -> Self {
        Self {
            kind,
            name,
            value,
            parent: None,
            children: Vec::new(),
            attrs: Vec::new(),
            owner_element: None,
            doctype: None,
            position: None,
        }
    }

    pub fn document() -> Self {
        Self::new(NodeKind::Document, Name::raw("", "", "#document"), None)
    }

    pub fn element(name: Name) -> Self {
        Self::new(NodeKind::Element, name, None)
    }

    pub fn attribute(name: Name, value: String) -> Self {
        Self::new(NodeKind::Attribute, name, Some(value))
    }

    pub fn text(data: String) -> Self {
        Self::new(NodeKind::Text, Name::raw("", "", "#text"), Some(data))
    }

    pub fn cdata(data: String) -> Self {
        Self::new(
            NodeKind::CdataSection,
            Name::raw("", "", "#cdata-section"),
            Some(data),
        )
    }

    pub fn comment(data: String) -> Self {
        Self::new(NodeKind::Comment, Name::raw("", "", "#comment"), Some(data))
    }

    pub fn processing_instruction(target: String, data: String) -> Self {
        Self::new(
            NodeKind::ProcessingInstruction,
            Name::raw("", "", &target),
            Some(data),
        )
    }

    pub fn document_type(name: String, public_id: String, system_id: String) -> Self {
        let mut data = Self::new(NodeKind::DocumentType, Name::raw("", "", &name), None);
        data.doctype = Some(DoctypeIds {
            public_id,
            system_id,
        });
        data
    }

    pub fn fragment() -> Self {
        Self::new(
            NodeKind::DocumentFragment,
            Name::raw("", "", "#document-fragment"),
            None,
        )
    }

    pub fn entity_reference(name: String) -> Self {
        Self::new(NodeKind::EntityReference, Name::raw("", "", &name), None)
    }

    /// Placeholder left behind when a subtree is adopted into another
    /// document. Never reachable from the tree.
    pub fn tombstone() -> Self {
        Self::new(NodeKind::Text, Name::raw("", "", "#text"), Some(String::new()))
    }

    pub fn node_name(&self) -> String {
        self.name.qualified()
    }
}

/// A namespace node synthesized by the XPath namespace axis. Identity is the
/// allocation; two evaluations of the same axis inside one query share it.
#[derive(Debug)]
pub(crate) struct NamespaceNode {
    pub owner: NodeId,
    pub prefix: String,
    pub uri: String,
    /// Position among the owner's namespace nodes, for document order.
    pub order: u32,
}

/// What a [`NodeRef`] points at.
#[derive(Debug, Clone)]
pub(crate) enum NodeTarget {
    Tree(NodeId),
    Namespace(Arc<NamespaceNode>),
}

impl NodeTarget {
    pub fn same(&self, other: &NodeTarget) -> bool {
        match (self, other) {
            (Self::Tree(a), Self::Tree(b)) => a == b,
            (Self::Namespace(a), Self::Namespace(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A handle on one node of one document.
///
/// Clones are cheap and refer to the same node. Equality is node identity
/// (`is_same_node`), not structural equality.
#[derive(Clone)]
pub struct NodeRef {
    pub(crate) doc: Document,
    pub(crate) target: NodeTarget,
}

impl NodeRef {
    pub(crate) fn tree(doc: Document, id: NodeId) -> Self {
        Self {
            doc,
            target: NodeTarget::Tree(id),
        }
    }

    pub(crate) fn namespace(doc: Document, node: Arc<NamespaceNode>) -> Self {
        Self {
            doc,
            target: NodeTarget::Namespace(node),
        }
    }

    /// The arena slot, when this is a tree node.
    pub(crate) fn tree_id(&self) -> Option<NodeId> {
        match &self.target {
            NodeTarget::Tree(id) => Some(*id),
            NodeTarget::Namespace(_) => None,
        }
    }

    pub(crate) fn expect_tree_id(&self) -> Result<NodeId> {
        self.tree_id().ok_or_else(|| {
            DomError::NotSupported("operation not defined for namespace nodes".into())
        })
    }

    fn with_inner<T>(&self, f: impl FnOnce(&DocumentInner) -> T) -> T {
        let inner = self.doc.read();
        f(&inner)
    }

    fn with_inner_mut<T>(&self, f: impl FnOnce(&mut DocumentInner) -> T) -> T {
        let mut inner = self.doc.write();
        f(&mut inner)
    }

    // ---- identity and classification ------------------------------------

    pub fn node_kind(&self) -> NodeKind {
        match &self.target {
            NodeTarget::Tree(id) => self.with_inner(|inner| inner.node(*id).kind),
            NodeTarget::Namespace(_) => NodeKind::Namespace,
        }
    }

    /// The numeric node type code (1–13).
    pub fn node_type(&self) -> u16 {
        self.node_kind().code()
    }

    pub fn is_same_node(&self, other: &NodeRef) -> bool {
        self.doc.same_document(&other.doc) && self.target.same(&other.target)
    }

    pub fn owner_document(&self) -> Option<Document> {
        match &self.target {
            NodeTarget::Tree(id) if *id == NodeId::DOCUMENT => None,
            _ => Some(self.doc.clone()),
        }
    }

    // ---- names and values ------------------------------------------------

    pub fn node_name(&self) -> String {
        match &self.target {
            NodeTarget::Tree(id) => self.with_inner(|inner| inner.node(*id).node_name()),
            NodeTarget::Namespace(ns) => ns.prefix.clone(),
        }
    }

    pub fn local_name(&self) -> String {
        match &self.target {
            NodeTarget::Tree(id) => {
                self.with_inner(|inner| inner.node(*id).name.local_name().to_string())
            }
            NodeTarget::Namespace(ns) => ns.prefix.clone(),
        }
    }

    pub fn prefix(&self) -> String {
        match &self.target {
            NodeTarget::Tree(id) => {
                self.with_inner(|inner| inner.node(*id).name.prefix().to_string())
            }
            NodeTarget::Namespace(_) => String::new(),
        }
    }

    pub fn namespace_uri(&self) -> String {
        match &self.target {
            NodeTarget::Tree(id) => {
                self.with_inner(|inner| inner.node(*id).name.namespace_uri().to_string())
            }
            NodeTarget::Namespace(_) => String::new(),
        }
    }

    /// The node value for kinds that carry one (attribute value, character
    /// data, PI data, namespace URI); None otherwise.
    pub fn node_value(&self) -> Option<String> {
        match &self.target {
            NodeTarget::Tree(id) => self.with_inner(|inner| inner.node(*id).value.clone()),
            NodeTarget::Namespace(ns) => Some(ns.uri.clone()),
        }
    }

    /// Rewrites the node value. Permitted for attributes, character data and
    /// processing instructions only.
    pub fn set_node_value(&self, value: &str) -> Result<()> {
        let id = self.value_mutation_target()?;
        self.with_inner_mut(|inner| tree::set_node_value(inner, id, value))
    }

    fn value_mutation_target(&self) -> Result<NodeId> {
        match &self.target {
            NodeTarget::Tree(id) => Ok(*id),
            NodeTarget::Namespace(_) => Err(DomError::NoModificationAllowed(
                "namespace nodes are read-only".into(),
            )),
        }
    }

    /// Where in the decoded input this node started, if it came from the
    /// decoder.
    pub fn source_position(&self) -> Option<SourcePosition> {
        let id = self.tree_id()?;
        self.with_inner(|inner| inner.node(id).position)
    }

    // ---- navigation ------------------------------------------------------

    pub fn parent_node(&self) -> Option<NodeRef> {
        match &self.target {
            NodeTarget::Tree(id) => {
                let parent = self.with_inner(|inner| inner.node(*id).parent)?;
                Some(NodeRef::tree(self.doc.clone(), parent))
            }
            NodeTarget::Namespace(ns) => Some(NodeRef::tree(self.doc.clone(), ns.owner)),
        }
    }

    pub fn first_child(&self) -> Option<NodeRef> {
        let id = self.tree_id()?;
        let child = self.with_inner(|inner| inner.node(id).children.first().copied())?;
        Some(NodeRef::tree(self.doc.clone(), child))
    }

    pub fn last_child(&self) -> Option<NodeRef> {
        let id = self.tree_id()?;
        let child = self.with_inner(|inner| inner.node(id).children.last().copied())?;
        Some(NodeRef::tree(self.doc.clone(), child))
    }

    pub fn previous_sibling(&self) -> Option<NodeRef> {
        let id = self.tree_id()?;
        let sibling = self.with_inner(|inner| tree::sibling(inner, id, -1))?;
        Some(NodeRef::tree(self.doc.clone(), sibling))
    }

    pub fn next_sibling(&self) -> Option<NodeRef> {
        let id = self.tree_id()?;
        let sibling = self.with_inner(|inner| tree::sibling(inner, id, 1))?;
        Some(NodeRef::tree(self.doc.clone(), sibling))
    }

    /// A live list of this node's children.
    pub fn child_nodes(&self) -> NodeList {
        match self.tree_id() {
            Some(id) => NodeList::children(self.doc.clone(), id),
            None => NodeList::empty(self.doc.clone()),
        }
    }

    pub fn has_child_nodes(&self) -> bool {
        match self.tree_id() {
            Some(id) => self.with_inner(|inner| !inner.node(id).children.is_empty()),
            None => false,
        }
    }

    // ---- mutation --------------------------------------------------------

    /// Inserts `new_child` before `ref_child` (append when None). Returns the
    /// inserted node; a fragment is emptied into place and returned itself.
    pub fn insert_before(&self, new_child: &NodeRef, ref_child: Option<&NodeRef>) -> Result<NodeRef> {
        let parent = self.expect_tree_id()?;
        if !self.doc.same_document(&new_child.doc) {
            return Err(DomError::WrongDocument(
                "new child belongs to a different document".into(),
            ));
        }
        let child = new_child.expect_tree_id()?;
        let reference = match ref_child {
            Some(r) => {
                if !self.doc.same_document(&r.doc) {
                    return Err(DomError::NotFound(
                        "reference child belongs to a different document".into(),
                    ));
                }
                Some(r.expect_tree_id()?)
            }
            None => None,
        };

        self.with_inner_mut(|inner| tree::insert_before(inner, parent, child, reference))?;
        Ok(new_child.clone())
    }

    pub fn append_child(&self, new_child: &NodeRef) -> Result<NodeRef> {
        self.insert_before(new_child, None)
    }

    /// Replaces `old_child` with `new_child`; returns the removed node.
    pub fn replace_child(&self, new_child: &NodeRef, old_child: &NodeRef) -> Result<NodeRef> {
        let parent = self.expect_tree_id()?;
        if !self.doc.same_document(&new_child.doc) {
            return Err(DomError::WrongDocument(
                "new child belongs to a different document".into(),
            ));
        }
        if !self.doc.same_document(&old_child.doc) {
            return Err(DomError::NotFound(
                "old child belongs to a different document".into(),
            ));
        }
        let new_id = new_child.expect_tree_id()?;
        let old_id = old_child.expect_tree_id()?;

        self.with_inner_mut(|inner| tree::replace_child(inner, parent, new_id, old_id))?;
        Ok(old_child.clone())
    }

    /// Detaches `old_child`; returns it.
    pub fn remove_child(&self, old_child: &NodeRef) -> Result<NodeRef> {
        let parent = self.expect_tree_id()?;
        if !self.doc.same_document(&old_child.doc) {
            return Err(DomError::NotFound(
                "old child belongs to a different document".into(),
            ));
        }
        let old_id = old_child.expect_tree_id()?;

        self.with_inner_mut(|inner| tree::remove_child(inner, parent, old_id))?;
        Ok(old_child.clone())
    }

    /// A detached copy owned by the same document. Attributes are always
    /// copied; children only when `deep`.
    pub fn clone_node(&self, deep: bool) -> NodeRef {
        match &self.target {
            NodeTarget::Tree(id) => {
                let copy = self.with_inner_mut(|inner| tree::clone_node(inner, *id, deep));
                NodeRef::tree(self.doc.clone(), copy)
            }
            // Synthetic nodes have no tree state to copy; the handle is the
            // value.
            NodeTarget::Namespace(_) => self.clone(),
        }
    }

    /// Coalesces runs of adjacent Text children throughout the subtree.
    pub fn normalize(&self) {
        if let Some(id) = self.tree_id() {
            self.with_inner_mut(|inner| tree::normalize(inner, id));
        }
    }

    // ---- aggregate text --------------------------------------------------

    /// Concatenated descendant text for containers, the value itself for
    /// character data and attributes, empty for documents and doctypes.
    pub fn text_content(&self) -> String {
        match &self.target {
            NodeTarget::Tree(id) => self.with_inner(|inner| tree::text_content(inner, *id)),
            NodeTarget::Namespace(ns) => ns.uri.clone(),
        }
    }

    /// Replaces all children with one Text node holding `text` (empty `text`
    /// just removes the children). No-op on documents and doctypes.
    pub fn set_text_content(&self, text: &str) -> Result<()> {
        let id = self.expect_tree_id()?;
        self.with_inner_mut(|inner| tree::set_text_content(inner, id, text))
    }

    // ---- relationships ---------------------------------------------------

    /// True when `other` is this node or a descendant of it (attributes and
    /// namespace nodes count as inside their element).
    pub fn contains(&self, other: &NodeRef) -> bool {
        if !self.doc.same_document(&other.doc) {
            return false;
        }
        self.with_inner(|inner| tree::contains_target(inner, &self.target, &other.target))
    }

    /// The `DOCUMENT_POSITION_*` bit mask describing `other` relative to
    /// this node.
    pub fn compare_document_position(&self, other: &NodeRef) -> u16 {
        if !self.doc.same_document(&other.doc) {
            return DOCUMENT_POSITION_DISCONNECTED;
        }
        self.with_inner(|inner| tree::compare_position(inner, &self.target, &other.target))
    }

    /// Deep structural equality: kind, names, values, attributes (unordered)
    /// and children (ordered).
    pub fn is_equal_node(&self, other: &NodeRef) -> bool {
        match (&self.target, &other.target) {
            (NodeTarget::Tree(a), NodeTarget::Tree(b)) => {
                if self.doc.same_document(&other.doc) {
                    self.with_inner(|inner| tree::is_equal(inner, inner, *a, *b))
                } else {
                    let (first, second) = self.doc.ordered_pair(&other.doc);
                    let g1 = first.read();
                    let g2 = second.read();
                    let (ia, ib) = if self.doc.is_first(&first) {
                        (&g1, &g2)
                    } else {
                        (&g2, &g1)
                    };
                    tree::is_equal(ia, ib, *a, *b)
                }
            }
            (NodeTarget::Namespace(a), NodeTarget::Namespace(b)) => {
                a.prefix == b.prefix && a.uri == b.uri
            }
            _ => false,
        }
    }

    // ---- namespace resolution -------------------------------------------

    /// Resolves `prefix` (None for the default namespace) against the
    /// declarations in scope at this node.
    pub fn lookup_namespace_uri(&self, prefix: Option<&str>) -> Option<String> {
        let id = self.nearest_tree_id();
        self.with_inner(|inner| tree::lookup_namespace_uri(inner, id, prefix))
    }

    /// Finds a prefix bound to `uri` at this node.
    pub fn lookup_prefix(&self, uri: &str) -> Option<String> {
        if uri.is_empty() {
            return None;
        }
        let id = self.nearest_tree_id();
        self.with_inner(|inner| tree::lookup_prefix(inner, id, uri))
    }

    /// True iff this node has no prefix and the default namespace in scope
    /// here equals `uri`.
    pub fn is_default_namespace(&self, uri: &str) -> bool {
        if !self.prefix().is_empty() {
            return false;
        }
        let default = self.lookup_namespace_uri(None);
        match default {
            Some(bound) => bound == uri,
            None => uri.is_empty(),
        }
    }

    fn nearest_tree_id(&self) -> NodeId {
        match &self.target {
            NodeTarget::Tree(id) => *id,
            NodeTarget::Namespace(ns) => ns.owner,
        }
    }

    // ---- element attribute operations -----------------------------------

    fn expect_element(&self) -> Result<NodeId> {
        let id = self.expect_tree_id()?;
        let kind = self.with_inner(|inner| inner.node(id).kind);
        if kind == NodeKind::Element {
            Ok(id)
        } else {
            Err(DomError::NotSupported(format!(
                "attribute operations require an element, got {kind:?}"
            )))
        }
    }

    /// The element's qualified tag name; empty for non-elements.
    pub fn tag_name(&self) -> String {
        match self.node_kind() {
            NodeKind::Element => self.node_name(),
            _ => String::new(),
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        let id = self.tree_id()?;
        self.with_inner(|inner| {
            let attr = tree::find_attribute(inner, id, name)?;
            inner.node(attr).value.clone()
        })
    }

    pub fn get_attribute_ns(&self, namespace_uri: &str, local_name: &str) -> Option<String> {
        let id = self.tree_id()?;
        self.with_inner(|inner| {
            let attr = tree::find_attribute_ns(inner, id, namespace_uri, local_name)?;
            inner.node(attr).value.clone()
        })
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        match self.tree_id() {
            Some(id) => self.with_inner(|inner| tree::find_attribute(inner, id, name).is_some()),
            None => false,
        }
    }

    pub fn has_attribute_ns(&self, namespace_uri: &str, local_name: &str) -> bool {
        match self.tree_id() {
            Some(id) => self.with_inner(|inner| {
                tree::find_attribute_ns(inner, id, namespace_uri, local_name).is_some()
            }),
            None => false,
        }
    }

    pub fn set_attribute(&self, name: &str, value: &str) -> Result<()> {
        let id = self.expect_element()?;
        let parsed = Name::parse(name)?;
        self.with_inner_mut(|inner| tree::set_attribute(inner, id, parsed, value))
    }

    pub fn set_attribute_ns(&self, namespace_uri: &str, qualified: &str, value: &str) -> Result<()> {
        let id = self.expect_element()?;
        let parsed = Name::parse_ns(namespace_uri, qualified)?;
        self.with_inner_mut(|inner| tree::set_attribute(inner, id, parsed, value))
    }

    pub fn remove_attribute(&self, name: &str) -> Result<()> {
        let id = self.expect_element()?;
        self.with_inner_mut(|inner| {
            if let Some(attr) = tree::find_attribute(inner, id, name) {
                tree::remove_attribute_node(inner, id, attr)?;
            }
            Ok(())
        })
    }

    pub fn remove_attribute_ns(&self, namespace_uri: &str, local_name: &str) -> Result<()> {
        let id = self.expect_element()?;
        self.with_inner_mut(|inner| {
            if let Some(attr) = tree::find_attribute_ns(inner, id, namespace_uri, local_name) {
                tree::remove_attribute_node(inner, id, attr)?;
            }
            Ok(())
        })
    }

    /// Flips or forces the presence of a boolean attribute; returns the new
    /// presence.
    pub fn toggle_attribute(&self, name: &str, force: Option<bool>) -> Result<bool> {
        let id = self.expect_element()?;
        let parsed = Name::parse(name)?;
        self.with_inner_mut(|inner| {
            let existing = tree::find_attribute(inner, id, name);
            match (existing, force) {
                (Some(_), Some(true)) => Ok(true),
                (Some(attr), _) => {
                    tree::remove_attribute_node(inner, id, attr)?;
                    Ok(false)
                }
                (None, Some(false)) => Ok(false),
                (None, _) => {
                    tree::set_attribute(inner, id, parsed, "")?;
                    Ok(true)
                }
            }
        })
    }

    pub fn get_attribute_node(&self, name: &str) -> Option<NodeRef> {
        let id = self.tree_id()?;
        let attr = self.with_inner(|inner| tree::find_attribute(inner, id, name))?;
        Some(NodeRef::tree(self.doc.clone(), attr))
    }

    pub fn get_attribute_node_ns(&self, namespace_uri: &str, local_name: &str) -> Option<NodeRef> {
        let id = self.tree_id()?;
        let attr =
            self.with_inner(|inner| tree::find_attribute_ns(inner, id, namespace_uri, local_name))?;
        Some(NodeRef::tree(self.doc.clone(), attr))
    }

    /// Attaches an attribute node; returns the attribute it displaced, if
    /// any. Fails when `attr` already belongs to another element.
    pub fn set_attribute_node(&self, attr: &NodeRef) -> Result<Option<NodeRef>> {
        let id = self.expect_element()?;
        if !self.doc.same_document(&attr.doc) {
            return Err(DomError::WrongDocument(
                "attribute belongs to a different document".into(),
            ));
        }
        let attr_id = attr.expect_tree_id()?;
        let replaced =
            self.with_inner_mut(|inner| tree::set_attribute_node(inner, id, attr_id))?;
        Ok(replaced.map(|r| NodeRef::tree(self.doc.clone(), r)))
    }

    /// Alias used by namespace-aware callers; uniqueness is always enforced
    /// on both the qualified name and the (namespace, local) pair.
    pub fn set_attribute_node_ns(&self, attr: &NodeRef) -> Result<Option<NodeRef>> {
        self.set_attribute_node(attr)
    }

    /// Detaches `attr` from this element and returns it.
    pub fn remove_attribute_node(&self, attr: &NodeRef) -> Result<NodeRef> {
        let id = self.expect_element()?;
        if !self.doc.same_document(&attr.doc) {
            return Err(DomError::NotFound(
                "attribute belongs to a different document".into(),
            ));
        }
        let attr_id = attr.expect_tree_id()?;
        self.with_inner_mut(|inner| {
            if tree::attribute_index(inner, id, attr_id).is_none() {
                return Err(DomError::NotFound(
                    "attribute is not owned by this element".into(),
                ));
            }
            tree::remove_attribute_node(inner, id, attr_id)
        })?;
        Ok(attr.clone())
    }

    /// Snapshot of the element's attribute nodes in insertion order.
    pub fn attributes(&self) -> Vec<NodeRef> {
        match self.tree_id() {
            Some(id) => self
                .with_inner(|inner| inner.node(id).attrs.clone())
                .into_iter()
                .map(|attr| NodeRef::tree(self.doc.clone(), attr))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn has_attributes(&self) -> bool {
        match self.tree_id() {
            Some(id) => self.with_inner(|inner| !inner.node(id).attrs.is_empty()),
            None => false,
        }
    }

    /// Live collection of descendant elements matching `name` (`*` matches
    /// all), in document order, excluding this node.
    pub fn get_elements_by_tag_name(&self, name: &str) -> NodeList {
        match self.tree_id() {
            Some(id) => NodeList::tag_name(self.doc.clone(), id, name),
            None => NodeList::empty(self.doc.clone()),
        }
    }

    pub fn get_elements_by_tag_name_ns(&self, namespace_uri: &str, local_name: &str) -> NodeList {
        match self.tree_id() {
            Some(id) => NodeList::tag_name_ns(self.doc.clone(), id, namespace_uri, local_name),
            None => NodeList::empty(self.doc.clone()),
        }
    }

    // ---- attribute node accessors ---------------------------------------

    /// For attribute nodes: the element currently carrying this attribute.
    pub fn owner_element(&self) -> Option<NodeRef> {
        let id = self.tree_id()?;
        let owner = self.with_inner(|inner| inner.node(id).owner_element)?;
        Some(NodeRef::tree(self.doc.clone(), owner))
    }

    /// DTD attribute defaulting is not modeled, so every attribute is
    /// explicitly specified.
    pub fn specified(&self) -> bool {
        true
    }

    // ---- character data --------------------------------------------------

    fn expect_character_data(&self) -> Result<NodeId> {
        let id = self.expect_tree_id()?;
        let kind = self.with_inner(|inner| inner.node(id).kind);
        if kind.is_character_data() {
            Ok(id)
        } else {
            Err(DomError::NotSupported(format!(
                "character-data operation on {kind:?}"
            )))
        }
    }

    /// Character data or attribute/PI payload, empty when absent.
    pub fn data(&self) -> String {
        self.node_value().unwrap_or_default()
    }

    pub fn set_data(&self, data: &str) -> Result<()> {
        self.set_node_value(data)
    }

    /// Data length in code points.
    pub fn length(&self) -> usize {
        self.data().chars().count()
    }

    pub fn substring_data(&self, offset: usize, count: usize) -> Result<String> {
        let id = self.expect_character_data()?;
        self.with_inner(|inner| tree::substring_data(inner, id, offset, count))
    }

    pub fn append_data(&self, data: &str) -> Result<()> {
        let id = self.expect_character_data()?;
        self.with_inner_mut(|inner| {
            let len = tree::data_len(inner, id);
            tree::replace_data(inner, id, len, 0, data)
        })
    }

    pub fn insert_data(&self, offset: usize, data: &str) -> Result<()> {
        let id = self.expect_character_data()?;
        self.with_inner_mut(|inner| tree::replace_data(inner, id, offset, 0, data))
    }

    pub fn delete_data(&self, offset: usize, count: usize) -> Result<()> {
        let id = self.expect_character_data()?;
        self.with_inner_mut(|inner| tree::replace_data(inner, id, offset, count, ""))
    }

    pub fn replace_data(&self, offset: usize, count: usize, data: &str) -> Result<()> {
        let id = self.expect_character_data()?;
        self.with_inner_mut(|inner| tree::replace_data(inner, id, offset, count, data))
    }

    /// Splits a Text node at `offset`; the tail becomes a new Text node
    /// inserted right after this one (when attached) and is returned.
    pub fn split_text(&self, offset: usize) -> Result<NodeRef> {
        let id = self.expect_tree_id()?;
        let new_id = self.with_inner_mut(|inner| tree::split_text(inner, id, offset))?;
        Ok(NodeRef::tree(self.doc.clone(), new_id))
    }

    // ---- processing instructions and doctypes ---------------------------

    /// PI target (same as `node_name` for PI nodes).
    pub fn target(&self) -> String {
        match self.node_kind() {
            NodeKind::ProcessingInstruction => self.node_name(),
            _ => String::new(),
        }
    }

    pub fn public_id(&self) -> String {
        match self.tree_id() {
            Some(id) => self.with_inner(|inner| {
                inner
                    .node(id)
                    .doctype
                    .as_ref()
                    .map(|d| d.public_id.clone())
                    .unwrap_or_default()
            }),
            None => String::new(),
        }
    }

    pub fn system_id(&self) -> String {
        match self.tree_id() {
            Some(id) => self.with_inner(|inner| {
                inner
                    .node(id)
                    .doctype
                    .as_ref()
                    .map(|d| d.system_id.clone())
                    .unwrap_or_default()
            }),
            None => String::new(),
        }
    }

    // ---- queries ---------------------------------------------------------

    /// Evaluates `expr` with this node as the context node, returning an
    /// ANY-typed result.
    pub fn evaluate(&self, expr: &str) -> Result<XPathResult, XPathError> {
        self.doc
            .evaluate(expr, self, None, xpath::ANY_TYPE, None)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_node(other)
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.doc.identity().hash(state);
        match &self.target {
            NodeTarget::Tree(id) => {
                0u8.hash(state);
                id.index().hash(state);
            }
            NodeTarget::Namespace(ns) => {
                1u8.hash(state);
                (Arc::as_ptr(ns) as usize).hash(state);
            }
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            NodeTarget::Tree(id) => {
                let inner = self.doc.read();
                let node = inner.node(*id);
                f.debug_struct("NodeRef")
                    .field("kind", &node.kind)
                    .field("name", &node.node_name())
                    .field("value", &node.value)
                    .finish()
            }
            NodeTarget::Namespace(ns) => f
                .debug_struct("NodeRef")
                .field("kind", &NodeKind::Namespace)
                .field("prefix", &ns.prefix)
                .field("uri", &ns.uri)
                .finish(),
        }
    }
}
