//! Tree algorithms over a document's arena: the mutation core with its
//! hierarchy/ownership/cycle checks, id-index maintenance, document-order
//! comparison, structural equality, and namespace lookups.
//!
//! Everything here takes `&DocumentInner`/`&mut DocumentInner`; the public
//! handles in `node.rs`/`document.rs` hold the document lock around these
//! calls.

use tracing::trace;

use crate::document::DocumentInner;
use crate::name::{Name, XMLNS_NAMESPACE, XML_NAMESPACE};
use crate::node::{
    NodeData, NodeId, NodeKind, NodeTarget, DOCUMENT_POSITION_CONTAINED_BY,
    DOCUMENT_POSITION_CONTAINS, DOCUMENT_POSITION_DISCONNECTED, DOCUMENT_POSITION_FOLLOWING,
    DOCUMENT_POSITION_PRECEDING,
};
use crate::result::{DomError, Result};

// ---- navigation helpers ---------------------------------------------------

/// The parent used for traversal: the tree parent, or the owning element for
/// attribute nodes.
pub(crate) fn effective_parent(inner: &DocumentInner, id: NodeId) -> Option<NodeId> {
    let node = inner.node(id);
    node.parent.or(node.owner_element)
}

pub(crate) fn connected(inner: &DocumentInner, id: NodeId) -> bool {
    let mut current = Some(id);
    while let Some(id) = current {
        if id == NodeId::DOCUMENT {
            return true;
        }
        current = effective_parent(inner, id);
    }
    false
}

/// The sibling `delta` steps away (`-1` previous, `1` next).
pub(crate) fn sibling(inner: &DocumentInner, id: NodeId, delta: i64) -> Option<NodeId> {
    let parent = inner.node(id).parent?;
    let children = &inner.node(parent).children;
    let index = children.iter().position(|c| *c == id)? as i64;
    let target = index + delta;
    if target < 0 {
        None
    } else {
        children.get(target as usize).copied()
    }
}

/// Pre-order descendants of `id`, excluding `id` itself.
pub(crate) fn descendants(inner: &DocumentInner, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = inner.node(id).children.iter().rev().copied().collect();
    while let Some(next) = stack.pop() {
        out.push(next);
        stack.extend(inner.node(next).children.iter().rev());
    }
    out
}

// ---- id index -------------------------------------------------------------

/// The value of an element's literal `id` attribute, when present and
/// non-empty.
fn id_attribute_value(inner: &DocumentInner, element: NodeId) -> Option<String> {
    let attr = find_attribute(inner, element, "id")?;
    let value = inner.node(attr).value.clone().unwrap_or_default();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn register_element_id(inner: &mut DocumentInner, element: NodeId) {
    if let Some(value) = id_attribute_value(inner, element) {
        inner.id_map.entry(value).or_insert(element);
    }
}

fn unregister_element_id(inner: &mut DocumentInner, element: NodeId, value: &str) {
    if inner.id_map.get(value) == Some(&element) {
        inner.id_map.remove(value);
    }
}

fn register_subtree_ids(inner: &mut DocumentInner, root: NodeId) {
    let mut todo = vec![root];
    todo.extend(descendants(inner, root));
    for id in todo {
        if inner.node(id).kind == NodeKind::Element {
            register_element_id(inner, id);
        }
    }
}

fn unregister_subtree_ids(inner: &mut DocumentInner, root: NodeId) {
    let mut todo = vec![root];
    todo.extend(descendants(inner, root));
    for id in todo {
        if inner.node(id).kind == NodeKind::Element {
            if let Some(value) = id_attribute_value(inner, id) {
                unregister_element_id(inner, id, &value);
            }
        }
    }
}

// ---- detach ---------------------------------------------------------------

/// Unlinks `id` from its parent (or owning element, for attributes), fixing
/// the document-element/doctype references and the id index.
pub(crate) fn detach(inner: &mut DocumentInner, id: NodeId) {
    if let Some(owner) = inner.node(id).owner_element {
        let was_connected = connected(inner, owner);
        if was_connected {
            if let Some(value) = id_attribute_value(inner, owner) {
                if find_attribute(inner, owner, "id") == Some(id) {
                    unregister_element_id(inner, owner, &value);
                }
            }
        }
        let owner_attrs = &mut inner.node_mut(owner).attrs;
        owner_attrs.retain(|a| *a != id);
        inner.node_mut(id).owner_element = None;
        return;
    }

    let Some(parent) = inner.node(id).parent else {
        return;
    };

    if connected(inner, id) {
        unregister_subtree_ids(inner, id);
    }

    let children = &mut inner.node_mut(parent).children;
    children.retain(|c| *c != id);
    inner.node_mut(id).parent = None;

    if parent == NodeId::DOCUMENT {
        if inner.document_element == Some(id) {
            inner.document_element = None;
        }
        if inner.doctype == Some(id) {
            inner.doctype = None;
        }
    }
}

// ---- insertion ------------------------------------------------------------

fn parent_accepts_children(kind: NodeKind) -> Result<()> {
    match kind {
        NodeKind::Element | NodeKind::Document | NodeKind::DocumentFragment => Ok(()),
        NodeKind::EntityReference => Err(DomError::NoModificationAllowed(
            "entity references are read-only".into(),
        )),
        other => Err(DomError::HierarchyRequest(format!(
            "{other:?} nodes cannot have children"
        ))),
    }
}

/// Kind-specific placement rules. `replacing` names a child of a Document
/// parent about to be displaced, so replacement does not trip the
/// one-element/one-doctype limit its predecessor occupies.
fn check_placement(
    inner: &DocumentInner,
    parent: NodeId,
    child: NodeId,
    replacing: Option<NodeId>,
) -> Result<()> {
    let parent_kind = inner.node(parent).kind;
    let child_kind = inner.node(child).kind;

    match child_kind {
        NodeKind::Attribute
        | NodeKind::Document
        | NodeKind::Entity
        | NodeKind::Notation
        | NodeKind::Namespace => {
            return Err(DomError::HierarchyRequest(format!(
                "{child_kind:?} nodes cannot be inserted as children"
            )));
        }
        NodeKind::DocumentType => {
            if parent_kind != NodeKind::Document {
                return Err(DomError::HierarchyRequest(
                    "a doctype may only be a child of a document".into(),
                ));
            }
            if let Some(existing) = inner.doctype {
                if existing != child && Some(existing) != replacing {
                    return Err(DomError::HierarchyRequest(
                        "document already has a doctype".into(),
                    ));
                }
            }
        }
        NodeKind::Element if parent_kind == NodeKind::Document => {
            if let Some(existing) = inner.document_element {
                if existing != child && Some(existing) != replacing {
                    return Err(DomError::HierarchyRequest(
                        "document already has a document element".into(),
                    ));
                }
            }
        }
        NodeKind::Text | NodeKind::CdataSection if parent_kind == NodeKind::Document => {
            return Err(DomError::HierarchyRequest(
                "character data cannot be a child of a document".into(),
            ));
        }
        _ => {}
    }

    Ok(())
}

/// Fails when `candidate` sits on `start`'s inclusive ancestor chain.
fn check_no_cycle(inner: &DocumentInner, start: NodeId, candidate: NodeId) -> Result<()> {
    let mut current = Some(start);
    while let Some(id) = current {
        if id == candidate {
            return Err(DomError::HierarchyRequest(
                "a node cannot become a descendant of itself".into(),
            ));
        }
        current = effective_parent(inner, id);
    }
    Ok(())
}

fn reference_index(inner: &DocumentInner, parent: NodeId, reference: Option<NodeId>) -> Result<usize> {
    let children = &inner.node(parent).children;
    match reference {
        None => Ok(children.len()),
        Some(reference) => children
            .iter()
            .position(|c| *c == reference)
            .ok_or_else(|| DomError::NotFound("reference node is not a child here".into())),
    }
}

fn attach_at(inner: &mut DocumentInner, parent: NodeId, child: NodeId, index: usize) {
    inner.node_mut(parent).children.insert(index, child);
    inner.node_mut(child).parent = Some(parent);

    if parent == NodeId::DOCUMENT {
        match inner.node(child).kind {
            NodeKind::Element => inner.document_element = Some(child),
            NodeKind::DocumentType => inner.doctype = Some(child),
            _ => {}
        }
    }

    if connected(inner, child) {
        register_subtree_ids(inner, child);
    }
}

/// Inserts `new_child` under `parent` before `reference` (append when None).
///
/// Validation happens up front so a failing call leaves the tree untouched;
/// a DocumentFragment is emptied into place child by child.
pub(crate) fn insert_before(
    inner: &mut DocumentInner,
    parent: NodeId,
    new_child: NodeId,
    reference: Option<NodeId>,
) -> Result<()> {
    if Some(new_child) == reference {
        return Ok(());
    }

    parent_accepts_children(inner.node(parent).kind)?;
    check_no_cycle(inner, parent, new_child)?;
    reference_index(inner, parent, reference)?;

    if inner.node(new_child).kind == NodeKind::DocumentFragment {
        let pieces = inner.node(new_child).children.clone();
        for piece in &pieces {
            check_placement(inner, parent, *piece, None)?;
        }
        if inner.node(parent).kind == NodeKind::Document {
            check_fragment_into_document(inner, &pieces, None)?;
        }

        for piece in pieces {
            detach(inner, piece);
            let index = reference_index(inner, parent, reference)?;
            attach_at(inner, parent, piece, index);
        }
        inner.bump();
        return Ok(());
    }

    check_placement(inner, parent, new_child, None)?;

    detach(inner, new_child);
    let index = reference_index(inner, parent, reference)?;
    attach_at(inner, parent, new_child, index);
    inner.bump();
    trace!(target: "dompath::tree", "inserted node under parent");
    Ok(())
}

/// A fragment may bring at most one element into a document, and none when
/// the document element survives the operation.
fn check_fragment_into_document(
    inner: &DocumentInner,
    pieces: &[NodeId],
    replacing: Option<NodeId>,
) -> Result<()> {
    let incoming = pieces
        .iter()
        .filter(|p| inner.node(**p).kind == NodeKind::Element)
        .count();
    let existing = match inner.document_element {
        Some(existing) if Some(existing) != replacing => 1,
        _ => 0,
    };
    if incoming + existing > 1 {
        return Err(DomError::HierarchyRequest(
            "document cannot have more than one document element".into(),
        ));
    }
    Ok(())
}

/// Swaps `old_child` for `new_child` (or a fragment's children) in place.
/// Returns nothing; the caller already holds both handles.
pub(crate) fn replace_child(
    inner: &mut DocumentInner,
    parent: NodeId,
    new_child: NodeId,
    old_child: NodeId,
) -> Result<()> {
    parent_accepts_children(inner.node(parent).kind)?;

    if inner.node(old_child).parent != Some(parent) {
        return Err(DomError::NotFound("old child is not a child here".into()));
    }
    if new_child == old_child {
        return Ok(());
    }
    check_no_cycle(inner, parent, new_child)?;

    if inner.node(new_child).kind == NodeKind::DocumentFragment {
        let pieces = inner.node(new_child).children.clone();
        for piece in &pieces {
            check_placement(inner, parent, *piece, Some(old_child))?;
        }
        if inner.node(parent).kind == NodeKind::Document {
            check_fragment_into_document(inner, &pieces, Some(old_child))?;
        }

        let index = reference_index(inner, parent, Some(old_child))?;
        detach(inner, old_child);
        let mut at = index;
        for piece in pieces {
            detach(inner, piece);
            attach_at(inner, parent, piece, at);
            at += 1;
        }
        inner.bump();
        return Ok(());
    }

    check_placement(inner, parent, new_child, Some(old_child))?;

    detach(inner, new_child);
    let index = reference_index(inner, parent, Some(old_child))?;
    detach(inner, old_child);
    attach_at(inner, parent, new_child, index);
    inner.bump();
    Ok(())
}

pub(crate) fn remove_child(
    inner: &mut DocumentInner,
    parent: NodeId,
    old_child: NodeId,
) -> Result<()> {
    if inner.node(old_child).parent != Some(parent) {
        return Err(DomError::NotFound("old child is not a child here".into()));
    }
    detach(inner, old_child);
    inner.bump();
    Ok(())
}

// ---- copying --------------------------------------------------------------

/// Detached copy in the same arena. Attributes are copied unconditionally,
/// children only when `deep`; the copy never carries id-index entries until
/// it is attached.
pub(crate) fn clone_node(inner: &mut DocumentInner, id: NodeId, deep: bool) -> NodeId {
    let mut data = inner.node(id).clone();
    data.parent = None;
    data.owner_element = None;
    let child_ids = std::mem::take(&mut data.children);
    let attr_ids = std::mem::take(&mut data.attrs);

    let copy = inner.alloc(data);

    for attr in attr_ids {
        let attr_copy = clone_node(inner, attr, false);
        inner.node_mut(attr_copy).owner_element = Some(copy);
        inner.node_mut(copy).attrs.push(attr_copy);
    }
    if deep {
        for child in child_ids {
            let child_copy = clone_node(inner, child, true);
            inner.node_mut(child_copy).parent = Some(copy);
            inner.node_mut(copy).children.push(child_copy);
        }
    }

    copy
}

/// Cross-arena copy used by import and adopt.
pub(crate) fn import_into(
    target: &mut DocumentInner,
    source: &DocumentInner,
    id: NodeId,
    deep: bool,
) -> NodeId {
    let mut data = source.node(id).clone();
    data.parent = None;
    data.owner_element = None;
    let child_ids = std::mem::take(&mut data.children);
    let attr_ids = std::mem::take(&mut data.attrs);

    let copy = target.alloc(data);

    for attr in attr_ids {
        let attr_copy = import_into(target, source, attr, false);
        target.node_mut(attr_copy).owner_element = Some(copy);
        target.node_mut(copy).attrs.push(attr_copy);
    }
    if deep {
        for child in child_ids {
            let child_copy = import_into(target, source, child, true);
            target.node_mut(child_copy).parent = Some(copy);
            target.node_mut(copy).children.push(child_copy);
        }
    }

    copy
}

/// Replaces an adopted-away subtree with inert placeholders so stale handles
/// into the source document observe empty detached nodes.
pub(crate) fn tombstone_subtree(inner: &mut DocumentInner, id: NodeId) {
    let node = inner.node(id);
    let children = node.children.clone();
    let attrs = node.attrs.clone();
    *inner.node_mut(id) = NodeData::tombstone();
    for child in children {
        tombstone_subtree(inner, child);
    }
    for attr in attrs {
        tombstone_subtree(inner, attr);
    }
}

// ---- values and text ------------------------------------------------------

pub(crate) fn set_node_value(inner: &mut DocumentInner, id: NodeId, value: &str) -> Result<()> {
    let kind = inner.node(id).kind;
    if !kind.has_mutable_value() {
        return Err(DomError::NoModificationAllowed(format!(
            "{kind:?} nodes have no writable value"
        )));
    }

    if kind == NodeKind::Attribute {
        check_declaration_value(&inner.node(id).name, value)?;
        set_attribute_value(inner, id, value);
    } else {
        inner.node_mut(id).value = Some(value.to_string());
    }
    inner.bump();
    Ok(())
}

/// Attribute value update with id-index upkeep.
fn set_attribute_value(inner: &mut DocumentInner, attr: NodeId, value: &str) {
    let owner = inner.node(attr).owner_element;
    let is_id = inner.node(attr).name.qualified() == "id";

    if is_id {
        if let Some(owner) = owner {
            if connected(inner, owner) {
                if let Some(old) = id_attribute_value(inner, owner) {
                    unregister_element_id(inner, owner, &old);
                }
            }
        }
    }

    inner.node_mut(attr).value = Some(value.to_string());

    if is_id {
        if let Some(owner) = owner {
            if connected(inner, owner) {
                register_element_id(inner, owner);
            }
        }
    }
}

/// Concatenated descendant Text/CDATA data for containers; the stored value
/// for character data, attributes and PIs; empty for documents and doctypes.
pub(crate) fn text_content(inner: &DocumentInner, id: NodeId) -> String {
    let node = inner.node(id);
    match node.kind {
        NodeKind::Document | NodeKind::DocumentType | NodeKind::Notation | NodeKind::Entity => {
            String::new()
        }
        NodeKind::Element | NodeKind::DocumentFragment | NodeKind::EntityReference => {
            let mut out = String::new();
            collect_text(inner, id, &mut out);
            out
        }
        _ => node.value.clone().unwrap_or_default(),
    }
}

fn collect_text(inner: &DocumentInner, id: NodeId, out: &mut String) {
    for child in &inner.node(id).children {
        let node = inner.node(*child);
        match node.kind {
            NodeKind::Text | NodeKind::CdataSection => {
                out.push_str(node.value.as_deref().unwrap_or(""));
            }
            NodeKind::Element | NodeKind::EntityReference => collect_text(inner, *child, out),
            _ => {}
        }
    }
}

/// The XPath string-value: like `text_content`, except the document node
/// yields the concatenated text of the whole tree.
pub(crate) fn string_value(inner: &DocumentInner, id: NodeId) -> String {
    match inner.node(id).kind {
        NodeKind::Document => {
            let mut out = String::new();
            collect_text(inner, id, &mut out);
            out
        }
        _ => text_content(inner, id),
    }
}

pub(crate) fn set_text_content(inner: &mut DocumentInner, id: NodeId, text: &str) -> Result<()> {
    match inner.node(id).kind {
        NodeKind::Document | NodeKind::DocumentType => Ok(()),
        NodeKind::EntityReference => Err(DomError::NoModificationAllowed(
            "entity references are read-only".into(),
        )),
        NodeKind::Element | NodeKind::DocumentFragment => {
            let children = inner.node(id).children.clone();
            for child in children {
                detach(inner, child);
            }
            if !text.is_empty() {
                let new_text = inner.alloc(NodeData::text(text.to_string()));
                attach_at(inner, id, new_text, 0);
            }
            inner.bump();
            Ok(())
        }
        _ => set_node_value(inner, id, text),
    }
}

// ---- character data -------------------------------------------------------

pub(crate) fn data_len(inner: &DocumentInner, id: NodeId) -> usize {
    inner
        .node(id)
        .value
        .as_deref()
        .map(|s| s.chars().count())
        .unwrap_or(0)
}

/// Maps a code-point offset into a byte offset, or None when out of range.
fn byte_offset(data: &str, offset: usize) -> Option<usize> {
    if offset == 0 {
        return Some(0);
    }
    let mut seen = 0;
    for (bytes, _) in data.char_indices() {
        if seen == offset {
            return Some(bytes);
        }
        seen += 1;
    }
    if seen == offset {
        Some(data.len())
    } else {
        None
    }
}

pub(crate) fn substring_data(
    inner: &DocumentInner,
    id: NodeId,
    offset: usize,
    count: usize,
) -> Result<String> {
    let data = inner.node(id).value.clone().unwrap_or_default();
    let start = byte_offset(&data, offset)
        .ok_or_else(|| DomError::IndexSize(format!("offset {offset} is past the data end")))?;
    let end = byte_offset(&data, offset.saturating_add(count)).unwrap_or(data.len());
    Ok(data[start..end].to_string())
}

pub(crate) fn replace_data(
    inner: &mut DocumentInner,
    id: NodeId,
    offset: usize,
    count: usize,
    replacement: &str,
) -> Result<()> {
    let data = inner.node(id).value.clone().unwrap_or_default();
    let start = byte_offset(&data, offset)
        .ok_or_else(|| DomError::IndexSize(format!("offset {offset} is past the data end")))?;
    let end = byte_offset(&data, offset.saturating_add(count)).unwrap_or(data.len());

    let mut updated = String::with_capacity(data.len() + replacement.len());
    updated.push_str(&data[..start]);
    updated.push_str(replacement);
    updated.push_str(&data[end..]);

    inner.node_mut(id).value = Some(updated);
    inner.bump();
    Ok(())
}

/// Splits a Text/CDATA node at `offset`; the tail becomes a new node of the
/// same kind inserted right after it when the node is attached.
pub(crate) fn split_text(inner: &mut DocumentInner, id: NodeId, offset: usize) -> Result<NodeId> {
    let kind = inner.node(id).kind;
    if !matches!(kind, NodeKind::Text | NodeKind::CdataSection) {
        return Err(DomError::NotSupported(format!(
            "split_text applies to text nodes, not {kind:?}"
        )));
    }

    let data = inner.node(id).value.clone().unwrap_or_default();
    let at = byte_offset(&data, offset)
        .ok_or_else(|| DomError::IndexSize(format!("offset {offset} is past the data end")))?;

    let tail = data[at..].to_string();
    inner.node_mut(id).value = Some(data[..at].to_string());

    let new_node = match kind {
        NodeKind::Text => inner.alloc(NodeData::text(tail)),
        _ => inner.alloc(NodeData::cdata(tail)),
    };

    if let Some(parent) = inner.node(id).parent {
        let index = inner
            .node(parent)
            .children
            .iter()
            .position(|c| *c == id)
            .map(|i| i + 1)
            .unwrap_or_else(|| inner.node(parent).children.len());
        attach_at(inner, parent, new_node, index);
    }

    inner.bump();
    Ok(new_node)
}

// ---- normalization --------------------------------------------------------

/// Coalesces runs of adjacent Text (not CDATA) children, depth first.
/// Idempotent; empty text nodes are kept.
pub(crate) fn normalize(inner: &mut DocumentInner, id: NodeId) {
    let mut index = 0;
    loop {
        let children = inner.node(id).children.clone();
        if index >= children.len() {
            break;
        }
        let current = children[index];

        if inner.node(current).kind == NodeKind::Text {
            let mut merged = inner.node(current).value.clone().unwrap_or_default();
            let mut end = index + 1;
            while end < children.len() && inner.node(children[end]).kind == NodeKind::Text {
                merged.push_str(inner.node(children[end]).value.as_deref().unwrap_or(""));
                end += 1;
            }
            if end > index + 1 {
                inner.node_mut(current).value = Some(merged);
                for dropped in &children[index + 1..end] {
                    inner.node_mut(*dropped).parent = None;
                }
                inner.node_mut(id).children.drain(index + 1..end);
                inner.bump();
            }
        } else {
            normalize(inner, current);
        }

        index += 1;
    }
}

// ---- attributes -----------------------------------------------------------

pub(crate) fn find_attribute(inner: &DocumentInner, element: NodeId, name: &str) -> Option<NodeId> {
    inner
        .node(element)
        .attrs
        .iter()
        .copied()
        .find(|attr| inner.node(*attr).name.qualified() == name)
}

pub(crate) fn find_attribute_ns(
    inner: &DocumentInner,
    element: NodeId,
    namespace_uri: &str,
    local_name: &str,
) -> Option<NodeId> {
    inner.node(element).attrs.iter().copied().find(|attr| {
        let name = &inner.node(*attr).name;
        name.namespace_uri() == namespace_uri && name.local_name() == local_name
    })
}

pub(crate) fn attribute_index(
    inner: &DocumentInner,
    element: NodeId,
    attr: NodeId,
) -> Option<usize> {
    inner.node(element).attrs.iter().position(|a| *a == attr)
}

/// The reserved-namespace rules for `xmlns`/`xmlns:*` declaration values.
fn check_declaration_value(name: &Name, value: &str) -> Result<()> {
    if !name.is_namespace_declaration() {
        return Ok(());
    }
    let declared = name.declared_prefix();
    if declared == "xmlns" {
        return Err(DomError::Namespace(
            "the 'xmlns' prefix cannot be declared".into(),
        ));
    }
    if declared == "xml" && value != XML_NAMESPACE {
        return Err(DomError::Namespace(
            "the 'xml' prefix cannot be rebound".into(),
        ));
    }
    if declared != "xml" && value == XML_NAMESPACE {
        return Err(DomError::Namespace(
            "the XML namespace cannot be bound to another prefix".into(),
        ));
    }
    if value == XMLNS_NAMESPACE {
        return Err(DomError::Namespace(
            "the xmlns namespace cannot be the target of a declaration".into(),
        ));
    }
    Ok(())
}

/// Creates or updates the attribute `name` on `element`. Matching follows
/// the name's flavor: namespace names match on (namespace, local), plain
/// names on the qualified string.
pub(crate) fn set_attribute(
    inner: &mut DocumentInner,
    element: NodeId,
    name: Name,
    value: &str,
) -> Result<()> {
    check_declaration_value(&name, value)?;
    // Uniqueness holds on both the qualified name and the (namespace, local)
    // pair, so either match is an update.
    let existing = if name.namespace_uri().is_empty() {
        find_attribute(inner, element, &name.qualified())
    } else {
        find_attribute_ns(inner, element, name.namespace_uri(), name.local_name())
            .or_else(|| find_attribute(inner, element, &name.qualified()))
    };

    match existing {
        Some(attr) => {
            inner.node_mut(attr).name = name;
            set_attribute_value(inner, attr, value);
        }
        None => {
            let is_id = name.qualified() == "id";
            let attr = inner.alloc(NodeData::attribute(name, value.to_string()));
            inner.node_mut(attr).owner_element = Some(element);
            inner.node_mut(element).attrs.push(attr);
            if is_id && connected(inner, element) {
                register_element_id(inner, element);
            }
        }
    }
    inner.bump();
    Ok(())
}

/// Attaches an attribute node; returns the attribute it displaced.
pub(crate) fn set_attribute_node(
    inner: &mut DocumentInner,
    element: NodeId,
    attr: NodeId,
) -> Result<Option<NodeId>> {
    if inner.node(attr).kind != NodeKind::Attribute {
        return Err(DomError::HierarchyRequest(
            "set_attribute_node requires an attribute node".into(),
        ));
    }
    match inner.node(attr).owner_element {
        Some(owner) if owner == element => return Ok(None),
        Some(_) => {
            return Err(DomError::InUseAttribute(
                "attribute already belongs to another element".into(),
            ));
        }
        None => {}
    }

    let name = inner.node(attr).name.clone();
    check_declaration_value(&name, inner.node(attr).value.as_deref().unwrap_or(""))?;
    let displaced = find_attribute(inner, element, &name.qualified()).or_else(|| {
        if name.namespace_uri().is_empty() {
            None
        } else {
            find_attribute_ns(inner, element, name.namespace_uri(), name.local_name())
        }
    });

    let connected_owner = connected(inner, element);

    if let Some(displaced) = displaced {
        if connected_owner {
            if let Some(old) = id_attribute_value(inner, element) {
                unregister_element_id(inner, element, &old);
            }
        }
        let slot = attribute_index(inner, element, displaced).expect("displaced attr present");
        inner.node_mut(displaced).owner_element = None;
        inner.node_mut(element).attrs[slot] = attr;
    } else {
        inner.node_mut(element).attrs.push(attr);
    }
    inner.node_mut(attr).owner_element = Some(element);

    if connected_owner {
        register_element_id(inner, element);
    }

    inner.bump();
    Ok(displaced)
}

pub(crate) fn remove_attribute_node(
    inner: &mut DocumentInner,
    element: NodeId,
    attr: NodeId,
) -> Result<NodeId> {
    if attribute_index(inner, element, attr).is_none() {
        return Err(DomError::NotFound(
            "attribute is not owned by this element".into(),
        ));
    }

    detach(inner, attr);
    inner.bump();
    Ok(attr)
}

/// Renames an element or attribute in place.
pub(crate) fn rename_node(inner: &mut DocumentInner, id: NodeId, name: Name) -> Result<()> {
    match inner.node(id).kind {
        NodeKind::Element => {
            inner.node_mut(id).name = name;
            Ok(())
        }
        NodeKind::Attribute => {
            let owner = inner.node(id).owner_element;
            if let Some(owner) = owner {
                let clashing = find_attribute(inner, owner, &name.qualified())
                    .or_else(|| {
                        if name.namespace_uri().is_empty() {
                            None
                        } else {
                            find_attribute_ns(
                                inner,
                                owner,
                                name.namespace_uri(),
                                name.local_name(),
                            )
                        }
                    })
                    .filter(|c| *c != id);
                if clashing.is_some() {
                    return Err(DomError::InUseAttribute(format!(
                        "element already has an attribute named '{}'",
                        name.qualified()
                    )));
                }

                let was_id = inner.node(id).name.qualified() == "id";
                if was_id && connected(inner, owner) {
                    if let Some(old) = id_attribute_value(inner, owner) {
                        unregister_element_id(inner, owner, &old);
                    }
                }
                inner.node_mut(id).name = name;
                if connected(inner, owner) {
                    register_element_id(inner, owner);
                }
            } else {
                inner.node_mut(id).name = name;
            }
            Ok(())
        }
        other => Err(DomError::NotSupported(format!(
            "{other:?} nodes cannot be renamed"
        ))),
    }
}

// ---- relationships --------------------------------------------------------

/// Reflexive containment over the effective-parent chain; an element
/// contains its attributes and namespace nodes.
pub(crate) fn contains_target(inner: &DocumentInner, a: &NodeTarget, b: &NodeTarget) -> bool {
    if a.same(b) {
        return true;
    }
    let a_id = match a {
        NodeTarget::Tree(id) => *id,
        // A synthetic node contains only itself.
        NodeTarget::Namespace(_) => return false,
    };
    let mut current = match b {
        NodeTarget::Tree(id) => Some(*id),
        NodeTarget::Namespace(ns) => Some(ns.owner),
    };
    while let Some(id) = current {
        if id == a_id {
            return true;
        }
        current = effective_parent(inner, id);
    }
    false
}

fn root_of(inner: &DocumentInner, target: &NodeTarget) -> NodeId {
    let mut current = match target {
        NodeTarget::Tree(id) => *id,
        NodeTarget::Namespace(ns) => ns.owner,
    };
    while let Some(parent) = effective_parent(inner, current) {
        current = parent;
    }
    current
}

const ORDER_ATTR: u64 = 1 << 32;
const ORDER_NAMESPACE: u64 = 2 << 32;
const ORDER_CHILD: u64 = 3 << 32;

/// Lexicographic document-order key: root slot, then one component per tree
/// level. Attributes sort after their element and before its namespace
/// nodes; both sort before the element's children.
pub(crate) fn order_key(inner: &DocumentInner, target: &NodeTarget) -> Vec<u64> {
    let mut key = Vec::new();
    let mut current;

    match target {
        NodeTarget::Tree(id) => {
            current = *id;
        }
        NodeTarget::Namespace(ns) => {
            key.push(ORDER_NAMESPACE | ns.order as u64);
            current = ns.owner;
        }
    }

    loop {
        let node = inner.node(current);
        if let Some(owner) = node.owner_element {
            let slot = attribute_index(inner, owner, current).unwrap_or(0);
            key.push(ORDER_ATTR | slot as u64);
            current = owner;
        } else if let Some(parent) = node.parent {
            let slot = inner
                .node(parent)
                .children
                .iter()
                .position(|c| *c == current)
                .unwrap_or(0);
            key.push(ORDER_CHILD | slot as u64);
            current = parent;
        } else {
            break;
        }
    }

    key.push(current.index() as u64);
    key.reverse();
    key
}

/// The `compare_document_position` bit mask describing `b` relative to `a`.
pub(crate) fn compare_position(inner: &DocumentInner, a: &NodeTarget, b: &NodeTarget) -> u16 {
    if a.same(b) {
        return 0;
    }

    if root_of(inner, a) != root_of(inner, b) {
        return DOCUMENT_POSITION_DISCONNECTED;
    }

    if contains_target(inner, a, b) {
        return DOCUMENT_POSITION_CONTAINS | DOCUMENT_POSITION_FOLLOWING;
    }
    if contains_target(inner, b, a) {
        return DOCUMENT_POSITION_CONTAINED_BY | DOCUMENT_POSITION_PRECEDING;
    }

    let key_a = order_key(inner, a);
    let key_b = order_key(inner, b);
    if key_a < key_b {
        DOCUMENT_POSITION_FOLLOWING
    } else {
        DOCUMENT_POSITION_PRECEDING
    }
}

/// Deep structural equality between nodes of possibly different documents.
pub(crate) fn is_equal(
    inner_a: &DocumentInner,
    inner_b: &DocumentInner,
    a: NodeId,
    b: NodeId,
) -> bool {
    let node_a = inner_a.node(a);
    let node_b = inner_b.node(b);

    if node_a.kind != node_b.kind
        || node_a.name != node_b.name
        || node_a.value != node_b.value
        || node_a.doctype != node_b.doctype
    {
        return false;
    }

    if node_a.attrs.len() != node_b.attrs.len() {
        return false;
    }
    for attr_a in &node_a.attrs {
        let attr_a = inner_a.node(*attr_a);
        let matched = node_b.attrs.iter().any(|attr_b| {
            let attr_b = inner_b.node(*attr_b);
            attr_a.name == attr_b.name && attr_a.value == attr_b.value
        });
        if !matched {
            return false;
        }
    }

    if node_a.children.len() != node_b.children.len() {
        return false;
    }
    node_a
        .children
        .iter()
        .zip(node_b.children.iter())
        .all(|(ca, cb)| is_equal(inner_a, inner_b, *ca, *cb))
}

// ---- namespace lookups ----------------------------------------------------

fn nearest_element(inner: &DocumentInner, id: NodeId) -> Option<NodeId> {
    let mut current = Some(id);
    while let Some(id) = current {
        match inner.node(id).kind {
            NodeKind::Element => return Some(id),
            NodeKind::Document => return inner.document_element,
            _ => current = effective_parent(inner, id),
        }
    }
    None
}

/// Resolves `prefix` (None for the default namespace) by walking the
/// ancestor elements' declarations; the two built-in bindings always win.
pub(crate) fn lookup_namespace_uri(
    inner: &DocumentInner,
    id: NodeId,
    prefix: Option<&str>,
) -> Option<String> {
    match prefix {
        Some("xml") => return Some(XML_NAMESPACE.to_string()),
        Some("xmlns") => return Some(XMLNS_NAMESPACE.to_string()),
        _ => {}
    }

    let mut current = nearest_element(inner, id);
    while let Some(element) = current {
        let node = inner.node(element);

        // The element's own expanded name declares its prefix implicitly.
        let own_prefix = node.name.prefix();
        let matches_own = match prefix {
            Some(p) => own_prefix == p,
            None => own_prefix.is_empty(),
        };
        if matches_own && !node.name.namespace_uri().is_empty() {
            return Some(node.name.namespace_uri().to_string());
        }

        for attr in &node.attrs {
            let attr = inner.node(*attr);
            let declares = match prefix {
                Some(p) => attr.name.prefix() == "xmlns" && attr.name.local_name() == p,
                None => attr.name.prefix().is_empty() && attr.name.local_name() == "xmlns",
            };
            if declares {
                let value = attr.value.clone().unwrap_or_default();
                return if value.is_empty() { None } else { Some(value) };
            }
        }

        current = match inner.node(element).parent {
            Some(p) if inner.node(p).kind == NodeKind::Element => Some(p),
            _ => None,
        };
    }
    None
}

/// Finds a prefix currently bound to `uri` at `id`.
pub(crate) fn lookup_prefix(inner: &DocumentInner, id: NodeId, uri: &str) -> Option<String> {
    let start = nearest_element(inner, id)?;

    let mut current = Some(start);
    while let Some(element) = current {
        let node = inner.node(element);

        if node.name.namespace_uri() == uri && !node.name.prefix().is_empty() {
            let prefix = node.name.prefix().to_string();
            if lookup_namespace_uri(inner, start, Some(&prefix)).as_deref() == Some(uri) {
                return Some(prefix);
            }
        }

        for attr in &node.attrs {
            let attr = inner.node(*attr);
            if attr.name.prefix() == "xmlns" && attr.value.as_deref() == Some(uri) {
                let candidate = attr.name.local_name().to_string();
                if lookup_namespace_uri(inner, start, Some(&candidate)).as_deref() == Some(uri) {
                    return Some(candidate);
                }
            }
        }

        current = match inner.node(element).parent {
            Some(p) if inner.node(p).kind == NodeKind::Element => Some(p),
            _ => None,
        };
    }
    None
}
