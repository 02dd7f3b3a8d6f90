//! An in-memory XML document engine: a DOM Level 2 Core tree with byte-exact
//! serialization and an XPath 1.0 query engine over it.
//!
//! ```
//! let doc = dompath::parse_str(r#"<r><b id="1"><t>A</t></b></r>"#).unwrap();
//! let result = doc
//!     .evaluate("count(//t)", &doc.as_node(), None, dompath::xpath::NUMBER_TYPE, None)
//!     .unwrap();
//! assert_eq!(result.number_value().unwrap(), 1.0);
//! ```
//!
//! Documents are built through [`Decoder`] (backed by quick-xml) or the
//! [`DomImplementation`] factories, queried and mutated through [`NodeRef`]
//! handles, and written back out through [`Encoder`]. Every public operation
//! takes the owning document's reader/writer lock, so documents can be
//! shared across threads.

pub mod collections;
pub mod decoder;
pub mod document;
pub mod encoder;
pub mod escape;
pub mod name;
pub mod node;
pub mod result;
pub mod xpath;

mod tree;

pub use collections::NodeList;
pub use decoder::{default_charset_decoder, CharsetDecoder, Decoder};
pub use document::{Document, DomImplementation};
pub use encoder::{encode_to_string, Encoder};
pub use name::{Name, XMLNS_NAMESPACE, XML_NAMESPACE};
pub use node::{
    NodeKind, NodeRef, SourcePosition, DOCUMENT_POSITION_CONTAINED_BY,
    DOCUMENT_POSITION_CONTAINS, DOCUMENT_POSITION_DISCONNECTED, DOCUMENT_POSITION_FOLLOWING,
    DOCUMENT_POSITION_PRECEDING, RANGE_END_TO_END, RANGE_END_TO_START, RANGE_START_TO_END,
    RANGE_START_TO_START,
};
pub use result::{DomError, Result, XPathError};
pub use xpath::{
    EvalOptions, NamespaceResolver, VariableValue, XPathExpression, XPathResult,
};

use std::io::Read;

/// Decodes a document from a string.
pub fn parse_str(xml: &str) -> Result<Document> {
    Decoder::new(xml.as_bytes().to_vec()).decode()
}

/// Decodes a document from a byte buffer.
pub fn parse_bytes<B: Into<Vec<u8>>>(bytes: B) -> Result<Document> {
    Decoder::new(bytes).decode()
}

/// Decodes a document from a reader, buffering it fully first.
pub fn parse_reader<R: Read>(reader: R) -> Result<Document> {
    let decoder = Decoder::from_reader(reader)
        .map_err(|e| DomError::parsing(format!("read failed: {e}"), 0))?;
    decoder.decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_serialize() {
        let doc = parse_str(r#"<r><b id="1"><t>A</t></b><b id="2"><t>B</t></b></r>"#).unwrap();

        let count = doc
            .evaluate("count(//t)", &doc.as_node(), None, xpath::NUMBER_TYPE, None)
            .unwrap();
        assert_eq!(count.number_value().unwrap(), 2.0);

        let by_id = doc.get_element_by_id("2").unwrap();
        assert_eq!(by_id.tag_name(), "b");

        assert_eq!(
            doc.to_xml(),
            r#"<?xml version="1.0"?><r><b id="1"><t>A</t></b><b id="2"><t>B</t></b></r>"#
        );
    }
}
