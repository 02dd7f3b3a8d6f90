//! Decoding: consumes the quick-xml token stream and builds the document
//! tree, recording per-node source positions and enforcing the namespace
//! constraints the data model demands.
//!
//! The whole input buffer is held in memory; that keeps the byte offsets the
//! position records and parse errors carry exact.

use std::io::Read;

use memchr::{memchr_iter, memrchr};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, trace};

use crate::document::{Document, DocumentInner};
use crate::escape::{is_xml_char, unescape_text};
use crate::name::{self, Name, XMLNS_NAMESPACE, XML_NAMESPACE};
use crate::node::{NodeData, NodeId, SourcePosition};
use crate::result::{DomError, Result};
use crate::tree;

/// Callback resolving a charset label to UTF-8 bytes. Returns None when the
/// label is unknown.
pub type CharsetDecoder = fn(label: &str, bytes: &[u8]) -> Option<Vec<u8>>;

/// The default charset callback, backed by `encoding_rs`'s label registry.
pub fn default_charset_decoder(label: &str, bytes: &[u8]) -> Option<Vec<u8>> {
    let encoding = encoding_rs::Encoding::for_label(label.as_bytes())?;
    let (text, _, _) = encoding.decode(bytes);
    Some(text.into_owned().into_bytes())
}

/// Builds a [`Document`] from a byte buffer.
pub struct Decoder {
    bytes: Vec<u8>,
    charset_decoder: CharsetDecoder,
    declared_charset: Option<String>,
}

/// One level of in-scope namespace declarations.
type NsScope = Vec<(String, String)>;

impl Decoder {
    pub fn new<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Self {
            bytes: bytes.into(),
            charset_decoder: default_charset_decoder,
            declared_charset: None,
        }
    }

    pub fn from_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::new(bytes))
    }

    /// Overrides the charset callback.
    pub fn with_charset_decoder(mut self, decoder: CharsetDecoder) -> Self {
        self.charset_decoder = decoder;
        self
    }

    /// Consumes the input and produces the document, or a `ParsingError`
    /// carrying the byte offset where decoding stopped.
    pub fn decode(mut self) -> Result<Document> {
        self.transcode_if_needed()?;

        let doc = Document::new_empty();
        {
            let mut inner = doc.write();
            if let Some(charset) = &self.declared_charset {
                inner.character_set = charset.clone();
            }
            let mut builder = TreeBuilder {
                bytes: &self.bytes,
                line_starts: line_starts(&self.bytes),
                inner: &mut *inner,
                stack: vec![NodeId::DOCUMENT],
                scopes: Vec::new(),
            };
            builder.run()?;
        }
        debug!(target: "dompath::decoder", "decoded document");
        Ok(doc)
    }

    /// Re-decodes the buffer to UTF-8 when a BOM or the XML declaration says
    /// it is something else. The decoding itself is the callback's job.
    fn transcode_if_needed(&mut self) -> Result<()> {
        if self.bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.bytes.drain(..3);
        }

        let label = match sniff_charset(&self.bytes) {
            Some(label) => label,
            None => return Ok(()),
        };
        self.declared_charset = Some(label.clone());

        if label.eq_ignore_ascii_case("utf-8") {
            return Ok(());
        }

        match (self.charset_decoder)(&label, &self.bytes) {
            Some(decoded) => {
                trace!(target: "dompath::decoder", charset = %label, "transcoded input");
                self.bytes = decoded;
                Ok(())
            }
            None => Err(DomError::parsing(
                format!("unsupported character set '{label}'"),
                0,
            )),
        }
    }
}

/// BOM sniffing first, then the declaration's `encoding` pseudo-attribute.
fn sniff_charset(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Some("UTF-16LE".to_string());
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Some("UTF-16BE".to_string());
    }

    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    if let Ok(Event::Decl(decl)) = reader.read_event_into(&mut buf) {
        if let Some(Ok(encoding)) = decl.encoding() {
            return Some(String::from_utf8_lossy(&encoding).into_owned());
        }
    }
    None
}

/// Byte offsets where each line begins.
fn line_starts(bytes: &[u8]) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(memchr_iter(b'\n', bytes).map(|i| i + 1));
    starts
}

struct TreeBuilder<'a> {
    bytes: &'a [u8],
    line_starts: Vec<usize>,
    inner: &'a mut DocumentInner,
    stack: Vec<NodeId>,
    scopes: Vec<NsScope>,
}

impl<'a> TreeBuilder<'a> {
    fn run(&mut self) -> Result<()> {
        let mut reader = Reader::from_reader(self.bytes);
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| DomError::parsing(e.to_string(), reader.buffer_position()))?;
            let offset = reader.buffer_position();

            match event {
                Event::Decl(_) => {
                    // The XML declaration never becomes a node.
                }
                Event::Start(start) => {
                    let raw = start.name().as_ref().to_vec();
                    let attrs = collect_raw_attributes(&start, offset)?;
                    self.open_element(&raw, attrs, offset, false)?;
                }
                Event::Empty(start) => {
                    let raw = start.name().as_ref().to_vec();
                    let attrs = collect_raw_attributes(&start, offset)?;
                    self.open_element(&raw, attrs, offset, true)?;
                }
                Event::End(_) => {
                    if self.stack.len() <= 1 {
                        return Err(DomError::parsing("unexpected end tag", offset));
                    }
                    self.stack.pop();
                    self.scopes.pop();
                }
                Event::Text(text) => {
                    let raw_len = text.len();
                    self.char_data(&text, offset - raw_len)?;
                }
                Event::CData(cdata) => {
                    self.cdata(&cdata, offset)?;
                }
                Event::Comment(comment) => {
                    self.comment(&comment, offset)?;
                }
                Event::PI(pi) => {
                    self.processing_instruction(&pi, offset)?;
                }
                Event::DocType(doctype) => {
                    self.doctype(&doctype, offset)?;
                }
                Event::Eof => {
                    if self.stack.len() > 1 {
                        return Err(DomError::parsing("unexpected end of input", offset));
                    }
                    if self.inner.document_element.is_none() {
                        return Err(DomError::parsing("missing document element", offset));
                    }
                    return Ok(());
                }
            }
            buf.clear();
        }
    }

    fn position_at(&self, offset: usize) -> SourcePosition {
        let line = self.line_starts.partition_point(|start| *start <= offset);
        let column = offset - self.line_starts[line - 1] + 1;
        SourcePosition {
            line: line as u32,
            column: column as u32,
            offset,
        }
    }

    /// Resolves `prefix` against the scope stack (an empty prefix resolves
    /// the default namespace).
    fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        match prefix {
            "xml" => return Some(XML_NAMESPACE.to_string()),
            "xmlns" => return Some(XMLNS_NAMESPACE.to_string()),
            _ => {}
        }
        for scope in self.scopes.iter().rev() {
            for (declared, uri) in scope.iter().rev() {
                if declared == prefix {
                    return if uri.is_empty() { None } else { Some(uri.clone()) };
                }
            }
        }
        None
    }

    fn open_element(
        &mut self,
        raw_name: &[u8],
        attrs: Vec<RawAttribute>,
        end_offset: usize,
        self_closing: bool,
    ) -> Result<()> {
        let tag_start = memrchr(b'<', &self.bytes[..end_offset]).unwrap_or(0);
        let qualified = String::from_utf8_lossy(raw_name).into_owned();

        if !name::is_valid_name(&qualified) {
            return Err(DomError::parsing(
                format!("'{qualified}' is not a valid element name"),
                tag_start,
            ));
        }

        // Declarations on this very tag are already in scope for its name.
        let scope = collect_declarations(&attrs, tag_start)?;
        self.scopes.push(scope);

        let (prefix, local) = match qualified.split_once(':') {
            Some((p, l)) => (p.to_string(), l.to_string()),
            None => (String::new(), qualified.clone()),
        };
        if prefix == "xmlns" {
            return Err(DomError::parsing(
                "element names may not use the 'xmlns' prefix",
                tag_start,
            ));
        }

        let namespace_uri = match self.resolve_prefix(&prefix) {
            Some(uri) => uri,
            None if prefix.is_empty() => String::new(),
            None => {
                return Err(DomError::parsing(
                    format!("unbound namespace prefix '{prefix}'"),
                    tag_start,
                ));
            }
        };

        let mut element = NodeData::element(Name::raw(&namespace_uri, &prefix, &local));
        element.position = Some(self.position_at(tag_start));
        let element_id = self.inner.alloc(element);

        for attr in attrs {
            let attr_id = self.build_attribute(&attr, tag_start, end_offset)?;
            self.inner.node_mut(attr_id).owner_element = Some(element_id);
            self.inner.node_mut(element_id).attrs.push(attr_id);
        }

        let parent = *self.stack.last().expect("stack holds the document");
        tree::insert_before(self.inner, parent, element_id, None)
            .map_err(|e| DomError::parsing(e.to_string(), tag_start))?;

        if self_closing {
            self.scopes.pop();
        } else {
            self.stack.push(element_id);
        }
        Ok(())
    }

    fn build_attribute(
        &mut self,
        attr: &RawAttribute,
        tag_start: usize,
        tag_end: usize,
    ) -> Result<NodeId> {
        let qualified = &attr.qualified;
        if !name::is_valid_name(qualified) {
            return Err(DomError::parsing(
                format!("'{qualified}' is not a valid attribute name"),
                tag_start,
            ));
        }

        let (prefix, local) = match qualified.split_once(':') {
            Some((p, l)) => (p.to_string(), l.to_string()),
            None => (String::new(), qualified.clone()),
        };

        let name = if prefix == "xmlns" || (prefix.is_empty() && local == "xmlns") {
            // Namespace declarations are stored as attributes in the xmlns
            // namespace.
            Name::raw(XMLNS_NAMESPACE, &prefix, &local)
        } else if prefix.is_empty() {
            Name::raw("", "", &local)
        } else {
            let uri = self.resolve_prefix(&prefix).ok_or_else(|| {
                DomError::parsing(format!("unbound namespace prefix '{prefix}'"), tag_start)
            })?;
            Name::raw(&uri, &prefix, &local)
        };

        let mut data = NodeData::attribute(name, attr.value.clone());
        let offset = attribute_offset(&self.bytes[tag_start..tag_end.min(self.bytes.len())], qualified)
            .map(|rel| tag_start + rel);
        if let Some(offset) = offset {
            data.position = Some(self.position_at(offset));
        }

        Ok(self.inner.alloc(data))
    }

    fn char_data(&mut self, raw: &[u8], offset: usize) -> Result<()> {
        let text = unescape_text(&String::from_utf8_lossy(raw));
        for c in text.chars() {
            if !is_xml_char(c) {
                return Err(DomError::parsing(
                    format!("invalid character U+{:04X} in character data", c as u32),
                    offset,
                ));
            }
        }

        let parent = *self.stack.last().expect("stack holds the document");
        if parent == NodeId::DOCUMENT {
            if text.chars().all(|c| c.is_ascii_whitespace()) {
                return Ok(());
            }
            return Err(DomError::parsing(
                "character data outside the document element",
                offset,
            ));
        }

        let mut data = NodeData::text(text);
        data.position = Some(self.position_at(offset));
        let id = self.inner.alloc(data);
        tree::insert_before(self.inner, parent, id, None)
            .map_err(|e| DomError::parsing(e.to_string(), offset))?;
        Ok(())
    }

    fn cdata(&mut self, raw: &[u8], offset: usize) -> Result<()> {
        let text = String::from_utf8_lossy(raw).into_owned();
        for c in text.chars() {
            if !is_xml_char(c) {
                return Err(DomError::parsing(
                    format!("invalid character U+{:04X} in CDATA section", c as u32),
                    offset,
                ));
            }
        }

        let parent = *self.stack.last().expect("stack holds the document");
        let id = self.inner.alloc(NodeData::cdata(text));
        tree::insert_before(self.inner, parent, id, None)
            .map_err(|e| DomError::parsing(e.to_string(), offset))?;
        Ok(())
    }

    fn comment(&mut self, raw: &[u8], offset: usize) -> Result<()> {
        let text = String::from_utf8_lossy(raw).into_owned();
        if text.contains("--") {
            return Err(DomError::parsing("'--' is not permitted in comments", offset));
        }

        let parent = *self.stack.last().expect("stack holds the document");
        let id = self.inner.alloc(NodeData::comment(text));
        tree::insert_before(self.inner, parent, id, None)
            .map_err(|e| DomError::parsing(e.to_string(), offset))?;
        Ok(())
    }

    fn processing_instruction(&mut self, raw: &[u8], offset: usize) -> Result<()> {
        let content = String::from_utf8_lossy(raw).into_owned();
        let (target, data) = match content.split_once(|c: char| c.is_ascii_whitespace()) {
            Some((target, rest)) => (target.to_string(), rest.trim_start().to_string()),
            None => (content.clone(), String::new()),
        };

        // The XML declaration (and any case variant of it) is not a node.
        if target.eq_ignore_ascii_case("xml") {
            return Ok(());
        }
        if !name::is_valid_ncname(&target) {
            return Err(DomError::parsing(
                format!("'{target}' is not a valid processing-instruction target"),
                offset,
            ));
        }

        let parent = *self.stack.last().expect("stack holds the document");
        let id = self
            .inner
            .alloc(NodeData::processing_instruction(target, data));
        tree::insert_before(self.inner, parent, id, None)
            .map_err(|e| DomError::parsing(e.to_string(), offset))?;
        Ok(())
    }

    fn doctype(&mut self, raw: &[u8], offset: usize) -> Result<()> {
        let content = String::from_utf8_lossy(raw).into_owned();
        let (doctype_name, public_id, system_id) = parse_doctype(&content)
            .ok_or_else(|| DomError::parsing("malformed DOCTYPE declaration", offset))?;

        let id = self
            .inner
            .alloc(NodeData::document_type(doctype_name, public_id, system_id));
        tree::insert_before(self.inner, NodeId::DOCUMENT, id, None)
            .map_err(|e| DomError::parsing(e.to_string(), offset))?;
        Ok(())
    }
}

struct RawAttribute {
    qualified: String,
    value: String,
}

fn collect_raw_attributes(
    start: &quick_xml::events::BytesStart<'_>,
    offset: usize,
) -> Result<Vec<RawAttribute>> {
    let mut out = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DomError::parsing(e.to_string(), offset))?;
        out.push(RawAttribute {
            qualified: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value: unescape_text(&String::from_utf8_lossy(&attr.value)),
        });
    }
    Ok(out)
}

/// Extracts this tag's namespace declarations and validates them against the
/// reserved-namespace rules.
fn collect_declarations(attrs: &[RawAttribute], offset: usize) -> Result<NsScope> {
    let mut scope = NsScope::new();
    for attr in attrs {
        let (declared_prefix, is_declaration) = match attr.qualified.split_once(':') {
            Some(("xmlns", local)) => (local.to_string(), true),
            None if attr.qualified == "xmlns" => (String::new(), true),
            _ => (String::new(), false),
        };
        if !is_declaration {
            continue;
        }

        let uri = &attr.value;
        if declared_prefix == "xmlns" {
            return Err(DomError::parsing(
                "the 'xmlns' prefix cannot be declared",
                offset,
            ));
        }
        if declared_prefix == "xml" && uri != XML_NAMESPACE {
            return Err(DomError::parsing(
                "the 'xml' prefix cannot be rebound",
                offset,
            ));
        }
        if declared_prefix != "xml" && uri == XML_NAMESPACE {
            return Err(DomError::parsing(
                "the XML namespace cannot be bound to another prefix",
                offset,
            ));
        }
        if uri == XMLNS_NAMESPACE {
            return Err(DomError::parsing(
                "the xmlns namespace cannot be the target of a declaration",
                offset,
            ));
        }

        scope.push((declared_prefix, uri.clone()));
    }
    Ok(scope)
}

/// Finds the byte offset of attribute `name` within the tag bytes, skipping
/// quoted attribute values so a value containing the name cannot match.
fn attribute_offset(tag: &[u8], name: &str) -> Option<usize> {
    let needle = name.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < tag.len() {
        let byte = tag[i];
        match quote {
            Some(q) => {
                if byte == q {
                    quote = None;
                }
            }
            None => match byte {
                b'"' | b'\'' => quote = Some(byte),
                _ => {
                    let preceded_by_space = i > 0 && tag[i - 1].is_ascii_whitespace();
                    if preceded_by_space && tag[i..].starts_with(needle) {
                        let after = tag.get(i + needle.len());
                        let terminated = matches!(after, None | Some(b'='))
                            || after.is_some_and(|b| b.is_ascii_whitespace());
                        if terminated {
                            return Some(i);
                        }
                    }
                }
            },
        }
        i += 1;
    }
    None
}

/// `name (PUBLIC "pub" "sys" | SYSTEM "sys")?`, quotes either flavor; an
/// internal subset after the identifiers is tolerated and ignored.
fn parse_doctype(content: &str) -> Option<(String, String, String)> {
    let rest = content.trim_start();
    let name_end = rest
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(rest.len());
    let doctype_name = &rest[..name_end];
    if !name::is_valid_name(doctype_name) {
        return None;
    }

    let mut rest = rest[name_end..].trim_start();
    let mut public_id = String::new();
    let mut system_id = String::new();

    if let Some(after) = rest.strip_prefix("PUBLIC") {
        rest = after.trim_start();
        let (value, after) = take_quoted(rest)?;
        public_id = value;
        rest = after.trim_start();
        let (value, _) = take_quoted(rest)?;
        system_id = value;
    } else if let Some(after) = rest.strip_prefix("SYSTEM") {
        rest = after.trim_start();
        let (value, _) = take_quoted(rest)?;
        system_id = value;
    }

    Some((doctype_name.to_string(), public_id, system_id))
}

fn take_quoted(s: &str) -> Option<(String, &str)> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &s[1..];
    let end = rest.find(quote)?;
    Some((rest[..end].to_string(), &rest[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctype_identifiers() {
        assert_eq!(
            parse_doctype("html"),
            Some(("html".into(), String::new(), String::new()))
        );
        assert_eq!(
            parse_doctype(r#"r PUBLIC "pub-id" "sys-id""#),
            Some(("r".into(), "pub-id".into(), "sys-id".into()))
        );
        assert_eq!(
            parse_doctype(r#"r SYSTEM 'sys-id'"#),
            Some(("r".into(), String::new(), "sys-id".into()))
        );
        assert!(parse_doctype("").is_none());
        assert!(parse_doctype(r#"r PUBLIC "only-one""#).is_none());
    }

    #[test]
    fn attribute_offsets_skip_quoted_values() {
        let tag = br#"<a href="b c" c="1">"#;
        assert_eq!(attribute_offset(tag, "href"), Some(3));
        // The 'c' inside the href value must not match.
        assert_eq!(attribute_offset(tag, "c"), Some(14));
    }

    #[test]
    fn line_index() {
        let starts = line_starts(b"ab\ncd\n\nef");
        assert_eq!(starts, vec![0, 3, 6, 7]);
    }
}
