//! The Document: owner of the node arena, the id index, the live-collection
//! version counter, and the reader/writer lock every public operation goes
//! through.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;
use tracing::trace;

use crate::collections::NodeList;
use crate::name::Name;
use crate::node::{NodeData, NodeId, NodeKind, NodeRef};
use crate::result::{DomError, Result, XPathError};
use crate::tree;
use crate::xpath::{self, NamespaceResolver, XPathExpression, XPathResult};

/// All mutable document state, guarded by the document's `RwLock`.
pub(crate) struct DocumentInner {
    nodes: Vec<NodeData>,
    pub document_element: Option<NodeId>,
    pub doctype: Option<NodeId>,
    pub id_map: AHashMap<String, NodeId>,
    /// Bumped by every mutation; live collections compare it to decide
    /// whether their cache is stale.
    version: u64,
    pub url: String,
    pub document_uri: String,
    pub character_set: String,
    pub content_type: String,
}

impl DocumentInner {
    fn new() -> Self {
        Self {
            nodes: vec![NodeData::document()],
            document_element: None,
            doctype: None,
            id_map: AHashMap::new(),
            version: 0,
            url: String::new(),
            document_uri: String::new(),
            character_set: "UTF-8".to_string(),
            content_type: "application/xml".to_string(),
        }
    }

    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.index()]
    }

    pub fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(data);
        id
    }

    pub fn bump(&mut self) {
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

pub(crate) struct DocumentData {
    inner: RwLock<DocumentInner>,
}

/// A shared handle on one XML document.
///
/// Clones refer to the same document; all reads take the document's shared
/// lock and all mutations its exclusive lock, so a `Document` may be used
/// from several threads at once.
#[derive(Clone)]
pub struct Document {
    pub(crate) data: Arc<DocumentData>,
}

impl Document {
    pub(crate) fn new_empty() -> Self {
        Self {
            data: Arc::new(DocumentData {
                inner: RwLock::new(DocumentInner::new()),
            }),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, DocumentInner> {
        self.data
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, DocumentInner> {
        self.data
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn same_document(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.data) as usize
    }

    /// The two documents ordered by identity; cross-document operations
    /// acquire locks in this order so concurrent pairs cannot deadlock.
    pub(crate) fn ordered_pair(&self, other: &Document) -> (Document, Document) {
        if self.identity() <= other.identity() {
            (self.clone(), other.clone())
        } else {
            (other.clone(), self.clone())
        }
    }

    pub(crate) fn is_first(&self, candidate: &Document) -> bool {
        self.same_document(candidate)
    }

    /// The document node itself, usable as an ordinary [`NodeRef`].
    pub fn as_node(&self) -> NodeRef {
        NodeRef::tree(self.clone(), NodeId::DOCUMENT)
    }

    /// The single element child, once one has been attached.
    pub fn document_element(&self) -> Option<NodeRef> {
        let id = self.read().document_element?;
        Some(NodeRef::tree(self.clone(), id))
    }

    pub fn doctype(&self) -> Option<NodeRef> {
        let id = self.read().doctype?;
        Some(NodeRef::tree(self.clone(), id))
    }

    pub fn url(&self) -> String {
        self.read().url.clone()
    }

    pub fn document_uri(&self) -> String {
        self.read().document_uri.clone()
    }

    pub fn character_set(&self) -> String {
        self.read().character_set.clone()
    }

    pub fn content_type(&self) -> String {
        self.read().content_type.clone()
    }

    pub(crate) fn set_character_set(&self, charset: &str) {
        self.write().character_set = charset.to_string();
    }

    pub(crate) fn set_document_uri(&self, uri: &str) {
        let mut inner = self.write();
        inner.document_uri = uri.to_string();
        inner.url = uri.to_string();
    }

    // ---- factories -------------------------------------------------------

    fn create(&self, data: NodeData) -> NodeRef {
        let id = self.write().alloc(data);
        NodeRef::tree(self.clone(), id)
    }

    pub fn create_element(&self, name: &str) -> Result<NodeRef> {
        let name = Name::parse(name)?;
        Ok(self.create(NodeData::element(name)))
    }

    pub fn create_element_ns(&self, namespace_uri: &str, qualified: &str) -> Result<NodeRef> {
        let name = Name::parse_ns(namespace_uri, qualified)?;
        if name.is_namespace_declaration() {
            return Err(DomError::Namespace(format!(
                "'{qualified}' cannot be used as an element name"
            )));
        }
        Ok(self.create(NodeData::element(name)))
    }

    pub fn create_attribute(&self, name: &str) -> Result<NodeRef> {
        let name = Name::parse(name)?;
        Ok(self.create(NodeData::attribute(name, String::new())))
    }

    pub fn create_attribute_with(&self, name: &str, value: &str) -> Result<NodeRef> {
        let name = Name::parse(name)?;
        Ok(self.create(NodeData::attribute(name, value.to_string())))
    }

    pub fn create_attribute_ns(&self, namespace_uri: &str, qualified: &str) -> Result<NodeRef> {
        let name = Name::parse_ns(namespace_uri, qualified)?;
        Ok(self.create(NodeData::attribute(name, String::new())))
    }

    pub fn create_text_node(&self, data: &str) -> NodeRef {
        self.create(NodeData::text(data.to_string()))
    }

    pub fn create_cdata_section(&self, data: &str) -> Result<NodeRef> {
        if data.contains("]]>") {
            return Err(DomError::InvalidCharacter(
                "CDATA content may not contain ']]>'".into(),
            ));
        }
        Ok(self.create(NodeData::cdata(data.to_string())))
    }

    pub fn create_comment(&self, data: &str) -> NodeRef {
        self.create(NodeData::comment(data.to_string()))
    }

    pub fn create_processing_instruction(&self, target: &str, data: &str) -> Result<NodeRef> {
        if !crate::name::is_valid_ncname(target) {
            return Err(DomError::InvalidCharacter(format!(
                "'{target}' is not a valid processing-instruction target"
            )));
        }
        if data.contains("?>") {
            return Err(DomError::InvalidCharacter(
                "processing-instruction data may not contain '?>'".into(),
            ));
        }
        Ok(self.create(NodeData::processing_instruction(
            target.to_string(),
            data.to_string(),
        )))
    }

    pub fn create_document_fragment(&self) -> NodeRef {
        self.create(NodeData::fragment())
    }

    pub fn create_entity_reference(&self, name: &str) -> Result<NodeRef> {
        if !crate::name::is_valid_name(name) {
            return Err(DomError::InvalidCharacter(format!(
                "'{name}' is not a valid entity name"
            )));
        }
        Ok(self.create(NodeData::entity_reference(name.to_string())))
    }

    // ---- queries ---------------------------------------------------------

    /// The element whose `id` attribute equals `id`, if any element in the
    /// tree carries it.
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeRef> {
        if id.is_empty() {
            return None;
        }
        let found = *self.read().id_map.get(id)?;
        Some(NodeRef::tree(self.clone(), found))
    }

    /// Live list of all elements named `name` (`*` for all), document order.
    pub fn get_elements_by_tag_name(&self, name: &str) -> NodeList {
        NodeList::tag_name(self.clone(), NodeId::DOCUMENT, name)
    }

    pub fn get_elements_by_tag_name_ns(&self, namespace_uri: &str, local_name: &str) -> NodeList {
        NodeList::tag_name_ns(self.clone(), NodeId::DOCUMENT, namespace_uri, local_name)
    }

    // ---- cross-document and whole-document operations --------------------

    /// A detached copy of `node` owned by this document. `deep` copies the
    /// subtree; attributes are copied either way.
    pub fn import_node(&self, node: &NodeRef, deep: bool) -> Result<NodeRef> {
        let src_id = node.expect_tree_id()?;

        if self.same_document(&node.doc) {
            let mut inner = self.write();
            let kind = inner.node(src_id).kind;
            import_kind_check(kind)?;
            let copy = tree::clone_node(&mut inner, src_id, deep);
            return Ok(NodeRef::tree(self.clone(), copy));
        }

        let (first, second) = self.ordered_pair(&node.doc);
        let mut guard_one = first.write();
        let mut guard_two = second.write();
        let (target, source) = if self.is_first(&first) {
            (&mut *guard_one, &mut *guard_two)
        } else {
            (&mut *guard_two, &mut *guard_one)
        };

        import_kind_check(source.node(src_id).kind)?;
        let copy = tree::import_into(target, source, src_id, deep);
        target.bump();
        Ok(NodeRef::tree(self.clone(), copy))
    }

    /// Moves `node` (and its subtree) into this document: detaches it from
    /// its old parent, transfers ownership, and returns the handle valid in
    /// this document.
    pub fn adopt_node(&self, node: &NodeRef) -> Result<NodeRef> {
        let src_id = node.expect_tree_id()?;

        if self.same_document(&node.doc) {
            let mut inner = self.write();
            import_kind_check(inner.node(src_id).kind)?;
            tree::detach(&mut inner, src_id);
            inner.bump();
            return Ok(node.clone());
        }

        let (first, second) = self.ordered_pair(&node.doc);
        let mut guard_one = first.write();
        let mut guard_two = second.write();
        let (target, source) = if self.is_first(&first) {
            (&mut *guard_one, &mut *guard_two)
        } else {
            (&mut *guard_two, &mut *guard_one)
        };

        import_kind_check(source.node(src_id).kind)?;
        tree::detach(source, src_id);
        let moved = tree::import_into(target, source, src_id, true);
        tree::tombstone_subtree(source, src_id);
        source.bump();
        target.bump();
        trace!(target: "dompath::document", "adopted subtree into new document");
        Ok(NodeRef::tree(self.clone(), moved))
    }

    /// Renames an element or attribute in place.
    pub fn rename_node(
        &self,
        node: &NodeRef,
        namespace_uri: &str,
        qualified: &str,
    ) -> Result<NodeRef> {
        if !self.same_document(&node.doc) {
            return Err(DomError::WrongDocument(
                "node belongs to a different document".into(),
            ));
        }
        let id = node.expect_tree_id()?;
        let name = if namespace_uri.is_empty() && !qualified.contains(':') {
            Name::parse(qualified)?
        } else {
            Name::parse_ns(namespace_uri, qualified)?
        };

        let mut inner = self.write();
        tree::rename_node(&mut inner, id, name)?;
        inner.bump();
        Ok(node.clone())
    }

    /// Runs `normalize` over the whole tree.
    pub fn normalize_document(&self) {
        let mut inner = self.write();
        tree::normalize(&mut inner, NodeId::DOCUMENT);
    }

    // ---- XPath -----------------------------------------------------------

    /// Compiles `expr`, consulting the process-wide expression cache.
    pub fn create_expression(&self, expr: &str) -> Result<XPathExpression, XPathError> {
        xpath::create_expression(expr)
    }

    /// Compiles (or fetches) `expr` and evaluates it against `context`,
    /// shaping the result as `result_type` (the crate::xpath type codes). A
    /// previous result may be passed back in to reuse its allocations.
    pub fn evaluate(
        &self,
        expr: &str,
        context: &NodeRef,
        resolver: Option<&dyn NamespaceResolver>,
        result_type: u16,
        reused: Option<XPathResult>,
    ) -> Result<XPathResult, XPathError> {
        let compiled = xpath::create_expression(expr)?;
        compiled.evaluate_full(context, resolver, result_type, reused)
    }

    /// Serializes the whole document to a `String` (no indentation).
    pub fn to_xml(&self) -> String {
        let mut out = Vec::new();
        // Writing to a Vec cannot fail.
        crate::encoder::Encoder::new(&mut out)
            .encode(&self.as_node())
            .unwrap();
        String::from_utf8(out).unwrap_or_else(|e| {
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        })
    }
}

fn import_kind_check(kind: NodeKind) -> Result<()> {
    match kind {
        NodeKind::Document | NodeKind::DocumentType => Err(DomError::NotSupported(format!(
            "{kind:?} nodes cannot be imported or adopted"
        ))),
        _ => Ok(()),
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.same_document(other)
    }
}

impl Eq for Document {}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Document")
            .field("nodes", &inner.nodes.len())
            .field("document_element", &inner.document_element)
            .field("version", &inner.version)
            .finish()
    }
}

/// The DOM implementation object: document-level factories.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomImplementation;

impl DomImplementation {
    pub fn new() -> Self {
        Self
    }

    /// A new document, optionally with a document element named
    /// `qualified` in `namespace_uri`, and an optional doctype created by
    /// [`Self::create_document_type`].
    pub fn create_document(
        &self,
        namespace_uri: &str,
        qualified: Option<&str>,
        doctype: Option<&NodeRef>,
    ) -> Result<Document> {
        let doc = Document::new_empty();

        if let Some(dt) = doctype {
            let imported = doc.import_doctype(dt)?;
            doc.as_node().append_child(&imported)?;
        }

        if let Some(qualified) = qualified {
            let root = if namespace_uri.is_empty() && !qualified.contains(':') {
                doc.create_element(qualified)?
            } else {
                doc.create_element_ns(namespace_uri, qualified)?
            };
            doc.as_node().append_child(&root)?;
        }

        Ok(doc)
    }

    /// A detached DocumentType node. It is hosted by a private document until
    /// [`Self::create_document`] copies it into its real owner.
    pub fn create_document_type(
        &self,
        qualified: &str,
        public_id: &str,
        system_id: &str,
    ) -> Result<NodeRef> {
        if !crate::name::is_valid_name(qualified) {
            return Err(DomError::InvalidCharacter(format!(
                "'{qualified}' is not a valid doctype name"
            )));
        }
        let host = Document::new_empty();
        let id = host.write().alloc(NodeData::document_type(
            qualified.to_string(),
            public_id.to_string(),
            system_id.to_string(),
        ));
        Ok(NodeRef::tree(host, id))
    }

    /// DOM Core feature strings.
    pub fn has_feature(&self, feature: &str, version: &str) -> bool {
        matches!(feature.to_ascii_lowercase().as_str(), "core" | "xml")
            && matches!(version, "" | "1.0" | "2.0")
    }
}

impl Document {
    /// Copies a doctype node (possibly hosted elsewhere) into this document.
    fn import_doctype(&self, doctype: &NodeRef) -> Result<NodeRef> {
        let src_id = doctype.expect_tree_id()?;
        if doctype.node_kind() != NodeKind::DocumentType {
            return Err(DomError::HierarchyRequest(
                "not a DocumentType node".into(),
            ));
        }

        if self.same_document(&doctype.doc) {
            return Ok(doctype.clone());
        }

        let (first, second) = self.ordered_pair(&doctype.doc);
        let mut guard_one = first.write();
        let mut guard_two = second.write();
        let (target, source) = if self.is_first(&first) {
            (&mut *guard_one, &mut *guard_two)
        } else {
            (&mut *guard_two, &mut *guard_one)
        };

        let copy = tree::import_into(target, source, src_id, false);
        Ok(NodeRef::tree(self.clone(), copy))
    }
}
