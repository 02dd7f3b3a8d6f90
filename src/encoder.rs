//! Serialization: writes the byte-exact XML form of any node or subtree.
//!
//! Elements always close explicitly (`<a></a>`, never `<a/>`), attribute
//! values are double-quoted with inner quotes escaped numerically, and CDATA
//! and comments are emitted raw. With the default of no indentation the
//! output is fully deterministic for a given tree.

use std::io::{self, Write};

use crate::document::DocumentInner;
use crate::escape::escape_text;
use crate::node::{NodeId, NodeKind, NodeRef, NodeTarget};

/// Streams XML bytes for nodes into a writer.
pub struct Encoder<W: Write> {
    writer: W,
    indent: Option<String>,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            indent: None,
        }
    }

    /// Pretty-prints element content with `indent` per depth level. The
    /// default (no indent) keeps output byte-deterministic.
    pub fn with_indent(mut self, indent: &str) -> Self {
        self.indent = Some(indent.to_string());
        self
    }

    /// Serializes `node` and its subtree.
    pub fn encode(&mut self, node: &NodeRef) -> io::Result<()> {
        match &node.target {
            NodeTarget::Tree(id) => {
                let inner = node.doc.read();
                self.encode_node(&inner, *id, 0)
            }
            // Synthetic namespace nodes have no serialized form.
            NodeTarget::Namespace(_) => Ok(()),
        }
    }

    fn encode_node(&mut self, inner: &DocumentInner, id: NodeId, depth: usize) -> io::Result<()> {
        let node = inner.node(id);
        match node.kind {
            NodeKind::Document => {
                self.writer.write_all(b"<?xml version=\"1.0\"?>")?;
                for child in &node.children {
                    self.newline(depth)?;
                    self.encode_node(inner, *child, depth)?;
                }
                Ok(())
            }

            NodeKind::Element => self.encode_element(inner, id, depth),

            NodeKind::Text => {
                escape_text(&mut self.writer, node.value.as_deref().unwrap_or(""))
            }

            NodeKind::CdataSection => {
                self.writer.write_all(b"<![CDATA[")?;
                self.writer
                    .write_all(node.value.as_deref().unwrap_or("").as_bytes())?;
                self.writer.write_all(b"]]>")
            }

            NodeKind::Comment => {
                self.writer.write_all(b"<!--")?;
                self.writer
                    .write_all(node.value.as_deref().unwrap_or("").as_bytes())?;
                self.writer.write_all(b"-->")
            }

            NodeKind::ProcessingInstruction => {
                self.writer.write_all(b"<?")?;
                self.writer.write_all(node.node_name().as_bytes())?;
                let data = node.value.as_deref().unwrap_or("");
                if !data.is_empty() {
                    self.writer.write_all(b" ")?;
                    self.writer.write_all(data.as_bytes())?;
                }
                self.writer.write_all(b"?>")
            }

            NodeKind::DocumentType => {
                self.writer.write_all(b"<!DOCTYPE ")?;
                self.writer.write_all(node.node_name().as_bytes())?;
                if let Some(ids) = &node.doctype {
                    if !ids.public_id.is_empty() {
                        write!(self.writer, " PUBLIC \"{}\"", ids.public_id)?;
                    }
                    if !ids.system_id.is_empty() {
                        write!(self.writer, " SYSTEM \"{}\"", ids.system_id)?;
                    }
                }
                self.writer.write_all(b">")
            }

            NodeKind::DocumentFragment => {
                for child in &node.children {
                    self.encode_node(inner, *child, depth)?;
                }
                Ok(())
            }

            NodeKind::EntityReference => {
                write!(self.writer, "&{};", node.node_name())
            }

            // Attribute nodes serialize as their escaped value; the
            // remaining DTD kinds have no content form.
            NodeKind::Attribute => {
                escape_text(&mut self.writer, node.value.as_deref().unwrap_or(""))
            }
            NodeKind::Entity | NodeKind::Notation | NodeKind::Namespace => Ok(()),
        }
    }

    fn encode_element(&mut self, inner: &DocumentInner, id: NodeId, depth: usize) -> io::Result<()> {
        let node = inner.node(id);
        let qualified = node.node_name();

        self.writer.write_all(b"<")?;
        self.writer.write_all(qualified.as_bytes())?;
        for attr in &node.attrs {
            let attr = inner.node(*attr);
            self.writer.write_all(b" ")?;
            self.writer.write_all(attr.node_name().as_bytes())?;
            self.writer.write_all(b"=\"")?;
            escape_text(&mut self.writer, attr.value.as_deref().unwrap_or(""))?;
            self.writer.write_all(b"\"")?;
        }
        self.writer.write_all(b">")?;

        let children = &node.children;
        let indent_children = self.indent.is_some()
            && !children.is_empty()
            && children
                .iter()
                .all(|c| !inner.node(*c).kind.is_character_data());

        for child in children {
            if indent_children {
                self.newline(depth + 1)?;
            }
            self.encode_node(inner, *child, depth + 1)?;
        }
        if indent_children {
            self.newline(depth)?;
        }

        self.writer.write_all(b"</")?;
        self.writer.write_all(qualified.as_bytes())?;
        self.writer.write_all(b">")
    }

    fn newline(&mut self, depth: usize) -> io::Result<()> {
        if let Some(indent) = &self.indent {
            self.writer.write_all(b"\n")?;
            for _ in 0..depth {
                self.writer.write_all(indent.as_bytes())?;
            }
        }
        Ok(())
    }
}

/// Serializes any node to a `String` with no indentation.
pub fn encode_to_string(node: &NodeRef) -> String {
    let mut out = Vec::new();
    // Writing to a Vec cannot fail.
    Encoder::new(&mut out).encode(node).unwrap();
    String::from_utf8_lossy(&out).into_owned()
}
