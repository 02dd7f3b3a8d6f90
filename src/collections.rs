//! Live node collections.
//!
//! A list carries its root and filter, plus a cache stamped with the
//! document's mutation version. Every observation compares versions and
//! rebuilds lazily, so the list reflects all mutations that happened before
//! the read without the document having to push notifications.

use std::sync::Mutex;

use crate::document::Document;
use crate::node::{NodeId, NodeKind, NodeRef};

#[derive(Debug, Clone)]
enum ListSource {
    /// Always empty (lists requested on synthetic nodes).
    Empty,
    /// The direct children of one node.
    Children(NodeId),
    /// Descendant elements of `root` matching a qualified name (`*` matches
    /// every element); the root itself is never included.
    TagName { root: NodeId, name: String },
    /// Descendant elements matching (namespace, local), `*` wildcards both.
    TagNameNs {
        root: NodeId,
        namespace_uri: String,
        local_name: String,
    },
}

#[derive(Debug, Default)]
struct ListCache {
    version: Option<u64>,
    items: Vec<NodeId>,
}

/// A live list of nodes: its contents track the document, not the moment the
/// list was created.
#[derive(Debug)]
pub struct NodeList {
    doc: Document,
    source: ListSource,
    cache: Mutex<ListCache>,
}

impl NodeList {
    pub(crate) fn empty(doc: Document) -> Self {
        Self::new(doc, ListSource::Empty)
    }

    pub(crate) fn children(doc: Document, parent: NodeId) -> Self {
        Self::new(doc, ListSource::Children(parent))
    }

    pub(crate) fn tag_name(doc: Document, root: NodeId, name: &str) -> Self {
        Self::new(
            doc,
            ListSource::TagName {
                root,
                name: name.to_string(),
            },
        )
    }

    pub(crate) fn tag_name_ns(
        doc: Document,
        root: NodeId,
        namespace_uri: &str,
        local_name: &str,
    ) -> Self {
        Self::new(
            doc,
            ListSource::TagNameNs {
                root,
                namespace_uri: namespace_uri.to_string(),
                local_name: local_name.to_string(),
            },
        )
    }

    fn new(doc: Document, source: ListSource) -> Self {
        Self {
            doc,
            source,
            cache: Mutex::new(ListCache::default()),
        }
    }

    fn refreshed<T>(&self, read: impl FnOnce(&[NodeId]) -> T) -> T {
        let inner = self.doc.read();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        if cache.version != Some(inner.version()) {
            cache.items.clear();
            match &self.source {
                ListSource::Empty => {}
                ListSource::Children(parent) => {
                    cache.items.extend(inner.node(*parent).children.iter().copied());
                }
                ListSource::TagName { root, name } => {
                    let star = name == "*";
                    for id in crate::tree::descendants(&inner, *root) {
                        let node = inner.node(id);
                        if node.kind == NodeKind::Element
                            && (star || node.name.qualified() == *name)
                        {
                            cache.items.push(id);
                        }
                    }
                }
                ListSource::TagNameNs {
                    root,
                    namespace_uri,
                    local_name,
                } => {
                    for id in crate::tree::descendants(&inner, *root) {
                        let node = inner.node(id);
                        if node.kind == NodeKind::Element
                            && (namespace_uri == "*"
                                || node.name.namespace_uri() == *namespace_uri)
                            && (local_name == "*" || node.name.local_name() == *local_name)
                        {
                            cache.items.push(id);
                        }
                    }
                }
            }
            cache.version = Some(inner.version());
        }

        read(&cache.items)
    }

    /// Current number of members.
    pub fn length(&self) -> usize {
        self.refreshed(|items| items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// The member at `index` in document order, if any.
    pub fn item(&self, index: usize) -> Option<NodeRef> {
        let id = self.refreshed(|items| items.get(index).copied())?;
        Some(NodeRef::tree(self.doc.clone(), id))
    }

    /// A point-in-time snapshot of the current members.
    pub fn to_vec(&self) -> Vec<NodeRef> {
        self.refreshed(|items| items.to_vec())
            .into_iter()
            .map(|id| NodeRef::tree(self.doc.clone(), id))
            .collect()
    }
}
