//! Decoding and serialization: namespaces, source positions, doctypes,
//! charset handling, malformed-input errors, and byte-exact round trips.

use dompath::{encode_to_string, parse_bytes, parse_str, DomError, NodeKind};

#[test]
fn basic_parse_and_shape() {
    let doc = parse_str(r#"<?xml version="1.0"?><r><b id="1"><t>A</t></b><b id="2"><t>B</t></b></r>"#)
        .unwrap();

    let root = doc.document_element().unwrap();
    assert_eq!(root.node_name(), "r");
    assert_eq!(root.child_nodes().length(), 2);
    assert_eq!(doc.get_element_by_id("1").unwrap().node_name(), "b");
    assert_eq!(doc.character_set(), "UTF-8");
    assert_eq!(doc.content_type(), "application/xml");
}

#[test]
fn namespaces_resolve_during_decode() {
    let doc = parse_str(r#"<r xmlns:p="http://ex/p"><p:c>x</p:c></r>"#).unwrap();
    let root = doc.document_element().unwrap();
    assert_eq!(root.local_name(), "r");
    assert_eq!(root.namespace_uri(), "");

    let child = root.first_child().unwrap();
    assert_eq!(child.local_name(), "c");
    assert_eq!(child.namespace_uri(), "http://ex/p");
    assert_eq!(child.node_name(), "p:c");
    assert_eq!(child.prefix(), "p");

    // The declaration survives as an attribute in the xmlns namespace.
    let decl = root.get_attribute_node("xmlns:p").unwrap();
    assert_eq!(decl.namespace_uri(), "http://www.w3.org/2000/xmlns/");
    assert_eq!(decl.node_value().as_deref(), Some("http://ex/p"));
}

#[test]
fn default_namespace_applies_to_elements_only() {
    let doc = parse_str(r#"<r xmlns="http://ex/d" a="1"><c/></r>"#).unwrap();
    let root = doc.document_element().unwrap();
    assert_eq!(root.namespace_uri(), "http://ex/d");
    assert_eq!(root.first_child().unwrap().namespace_uri(), "http://ex/d");

    // Unprefixed attributes stay namespace-less.
    let attr = root.get_attribute_node("a").unwrap();
    assert_eq!(attr.namespace_uri(), "");
}

#[test]
fn source_positions_point_at_the_markup() {
    let doc = parse_str("<r>\n  <a b=\"1\"></a></r>").unwrap();
    let a = doc.document_element().unwrap().first_child().unwrap();

    let position = a.source_position().unwrap();
    assert_eq!(position.offset, 6);
    assert_eq!(position.line, 2);
    assert_eq!(position.column, 3);

    let attr = a.get_attribute_node("b").unwrap();
    let position = attr.source_position().unwrap();
    assert_eq!(position.offset, 9);
    assert_eq!(position.line, 2);
    assert_eq!(position.column, 6);
}

#[test]
fn doctype_and_processing_instructions() {
    let doc = parse_str(
        r#"<?xml version="1.0"?><!DOCTYPE r PUBLIC "pub-id" "sys-id"><?style here?><!--note--><r/>"#,
    )
    .unwrap();

    let doctype = doc.doctype().unwrap();
    assert_eq!(doctype.node_name(), "r");
    assert_eq!(doctype.public_id(), "pub-id");
    assert_eq!(doctype.system_id(), "sys-id");

    // Document children: doctype, PI, comment, element; the XML declaration
    // never materializes.
    let children = doc.as_node().child_nodes();
    assert_eq!(children.length(), 4);
    assert_eq!(children.item(0).unwrap().node_type(), 10);
    let pi = children.item(1).unwrap();
    assert_eq!(pi.node_kind(), NodeKind::ProcessingInstruction);
    assert_eq!(pi.target(), "style");
    assert_eq!(pi.data(), "here");
    assert_eq!(children.item(2).unwrap().node_kind(), NodeKind::Comment);

    let out = doc.to_xml();
    assert!(out.contains(r#"<!DOCTYPE r PUBLIC "pub-id" SYSTEM "sys-id">"#));
    assert!(out.contains("<?style here?>"));
}

#[test]
fn entity_references_in_content_unescape() {
    let doc = parse_str("<r a=\"1&amp;2\">x &lt; y &#65; &unknown;</r>").unwrap();
    let root = doc.document_element().unwrap();
    assert_eq!(root.get_attribute("a").as_deref(), Some("1&2"));
    // Unknown references pass through literally.
    assert_eq!(root.text_content(), "x < y A &unknown;");
}

#[test]
fn round_trip_preserves_byte_shapes() {
    let doc = parse_str(r#"<a x="1&amp;2"><b/><!--c--><![CDATA[<d>]]></a>"#).unwrap();
    let out = doc.to_xml();

    assert!(out.contains(r#"x="1&amp;2""#), "{out}");
    assert!(out.contains("<b></b>"), "{out}");
    assert!(!out.contains("<b/>"), "{out}");
    assert!(out.contains("<!--c-->"), "{out}");
    assert!(out.contains("<![CDATA[<d>]]>"), "{out}");
    assert!(out.starts_with("<?xml version=\"1.0\"?>"), "{out}");

    // Decode ∘ Encode is structure-preserving.
    let again = parse_str(&out).unwrap();
    assert!(again
        .document_element()
        .unwrap()
        .is_equal_node(&doc.document_element().unwrap()));
}

#[test]
fn serializing_subtrees_and_text() {
    let doc = parse_str("<r><c a=\"v\">t&amp;</c></r>").unwrap();
    let c = doc.document_element().unwrap().first_child().unwrap();
    assert_eq!(encode_to_string(&c), r#"<c a="v">t&amp;</c>"#);

    let text = c.first_child().unwrap();
    assert_eq!(encode_to_string(&text), "t&amp;");
}

#[test]
fn top_level_whitespace_is_dropped() {
    let doc = parse_str("<?xml version=\"1.0\"?>\n<r/>\n").unwrap();
    assert_eq!(doc.as_node().child_nodes().length(), 1);

    let err = parse_str("<r/>stray").unwrap_err();
    assert!(matches!(err, DomError::Parsing { .. }), "{err}");
}

#[test]
fn malformed_inputs_fail_with_offsets() {
    for bad in [
        "",
        "<r>",
        "<r></s>",
        "<r/><r2/>",
        "<xmlns:e/>",
        "<p:r/>",
        "<r xmlns:xml=\"http://wrong\"/>",
        "<r xmlns=\"http://www.w3.org/2000/xmlns/\"/>",
    ] {
        let err = parse_str(bad).unwrap_err();
        assert!(
            matches!(err, DomError::Parsing { .. }),
            "{bad:?} gave {err}"
        );
    }
}

#[test]
fn declared_charset_is_transcoded() {
    let mut bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r>caf".to_vec();
    bytes.push(0xE9);
    bytes.extend_from_slice(b"</r>");

    let doc = parse_bytes(bytes).unwrap();
    assert_eq!(doc.document_element().unwrap().text_content(), "café");
    assert_eq!(doc.character_set(), "ISO-8859-1");
}

#[test]
fn cdata_and_comment_nodes_round_trip() {
    let doc = parse_str("<r><![CDATA[a & b]]><!-- keep --></r>").unwrap();
    let root = doc.document_element().unwrap();
    let cdata = root.first_child().unwrap();
    assert_eq!(cdata.node_kind(), NodeKind::CdataSection);
    assert_eq!(cdata.data(), "a & b");
    let comment = root.last_child().unwrap();
    assert_eq!(comment.node_kind(), NodeKind::Comment);
    assert_eq!(comment.data(), " keep ");

    assert_eq!(
        encode_to_string(&root),
        "<r><![CDATA[a & b]]><!-- keep --></r>"
    );
}
