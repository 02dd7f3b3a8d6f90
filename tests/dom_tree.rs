//! Tree construction, mutation failure modes, live collections, and the
//! structural invariants the data model guarantees.

use dompath::{
    DomError, DomImplementation, Document, NodeRef, DOCUMENT_POSITION_CONTAINED_BY,
    DOCUMENT_POSITION_CONTAINS, DOCUMENT_POSITION_DISCONNECTED, DOCUMENT_POSITION_FOLLOWING,
    DOCUMENT_POSITION_PRECEDING, XMLNS_NAMESPACE,
};

fn new_doc(root: &str) -> (Document, NodeRef) {
    let doc = DomImplementation::new()
        .create_document("", Some(root), None)
        .unwrap();
    let root = doc.document_element().unwrap();
    (doc, root)
}

#[test]
fn append_and_navigate() {
    let (doc, root) = new_doc("r");
    let a = doc.create_element("a").unwrap();
    let b = doc.create_element("b").unwrap();
    let c = doc.create_element("c").unwrap();
    root.append_child(&a).unwrap();
    root.append_child(&b).unwrap();
    root.insert_before(&c, Some(&b)).unwrap();

    // r -> a, c, b
    assert_eq!(root.first_child().unwrap(), a);
    assert_eq!(root.last_child().unwrap(), b);
    assert_eq!(a.next_sibling().unwrap(), c);
    assert_eq!(b.previous_sibling().unwrap(), c);
    assert_eq!(c.parent_node().unwrap(), root);
    assert_eq!(root.child_nodes().length(), 3);

    for child in [&a, &b, &c] {
        assert_eq!(child.parent_node().unwrap(), root);
        assert_eq!(child.owner_document().unwrap(), doc);
    }
}

#[test]
fn reinsertion_moves_a_parented_node() {
    let (doc, root) = new_doc("r");
    let a = doc.create_element("a").unwrap();
    let b = doc.create_element("b").unwrap();
    root.append_child(&a).unwrap();
    root.append_child(&b).unwrap();

    // Moving a after b detaches it first.
    root.insert_before(&a, None).unwrap();
    assert_eq!(root.first_child().unwrap(), b);
    assert_eq!(root.last_child().unwrap(), a);
    assert_eq!(root.child_nodes().length(), 2);
}

#[test]
fn insertion_failure_modes() {
    let (doc, root) = new_doc("r");
    let child = doc.create_element("c").unwrap();
    root.append_child(&child).unwrap();

    // Cycle: a node cannot become a descendant of itself.
    let err = child.append_child(&root).unwrap_err();
    assert!(matches!(err, DomError::HierarchyRequest(_)), "{err}");
    let err = root.append_child(&root).unwrap_err();
    assert!(matches!(err, DomError::HierarchyRequest(_)), "{err}");

    // Reference node that is not a child here.
    let stranger = doc.create_element("s").unwrap();
    let newcomer = doc.create_element("n").unwrap();
    let err = root.insert_before(&newcomer, Some(&stranger)).unwrap_err();
    assert!(matches!(err, DomError::NotFound(_)), "{err}");

    // A node from another document.
    let other = DomImplementation::new()
        .create_document("", Some("o"), None)
        .unwrap();
    let foreign = other.create_element("f").unwrap();
    let err = root.append_child(&foreign).unwrap_err();
    assert!(matches!(err, DomError::WrongDocument(_)), "{err}");

    // Text directly under the document node.
    let text = doc.create_text_node("loose");
    let err = doc.as_node().append_child(&text).unwrap_err();
    assert!(matches!(err, DomError::HierarchyRequest(_)), "{err}");

    // A second document element.
    let second = doc.create_element("r2").unwrap();
    let err = doc.as_node().append_child(&second).unwrap_err();
    assert!(matches!(err, DomError::HierarchyRequest(_)), "{err}");
}

#[test]
fn fragment_insertion_expands_in_order() {
    let (doc, root) = new_doc("r");
    let fragment = doc.create_document_fragment();
    let one = doc.create_element("one").unwrap();
    let two = doc.create_element("two").unwrap();
    fragment.append_child(&one).unwrap();
    fragment.append_child(&two).unwrap();

    let marker = doc.create_element("marker").unwrap();
    root.append_child(&marker).unwrap();
    root.insert_before(&fragment, Some(&marker)).unwrap();

    // The fragment itself ends empty; its children moved in order.
    assert!(!fragment.has_child_nodes());
    let children = root.child_nodes();
    assert_eq!(children.item(0).unwrap(), one);
    assert_eq!(children.item(1).unwrap(), two);
    assert_eq!(children.item(2).unwrap(), marker);
}

#[test]
fn fragment_cannot_bring_two_elements_into_a_document() {
    let doc = DomImplementation::new()
        .create_document("", None, None)
        .unwrap();
    let fragment = doc.create_document_fragment();
    fragment
        .append_child(&doc.create_element("a").unwrap())
        .unwrap();
    fragment
        .append_child(&doc.create_element("b").unwrap())
        .unwrap();

    let err = doc.as_node().append_child(&fragment).unwrap_err();
    assert!(matches!(err, DomError::HierarchyRequest(_)), "{err}");
    // Validation happens before any mutation: the fragment kept its pieces.
    assert_eq!(fragment.child_nodes().length(), 2);
    assert!(doc.document_element().is_none());
}

#[test]
fn replace_child_semantics() {
    let (doc, root) = new_doc("r");
    let old = doc.create_element("old").unwrap();
    let other = doc.create_element("other").unwrap();
    root.append_child(&old).unwrap();

    // Self-replace is a no-op.
    root.replace_child(&old, &old).unwrap();
    assert_eq!(root.child_nodes().length(), 1);

    // Replacing a non-child fails.
    let err = root.replace_child(&other, &other).unwrap_err();
    assert!(matches!(err, DomError::NotFound(_)), "{err}");

    let newcomer = doc.create_element("new").unwrap();
    let removed = root.replace_child(&newcomer, &old).unwrap();
    assert_eq!(removed, old);
    assert!(old.parent_node().is_none());
    assert_eq!(root.first_child().unwrap(), newcomer);

    // Fragment replacement: first child lands in place, rest follow.
    let fragment = doc.create_document_fragment();
    let x = doc.create_element("x").unwrap();
    let y = doc.create_element("y").unwrap();
    fragment.append_child(&x).unwrap();
    fragment.append_child(&y).unwrap();
    root.replace_child(&fragment, &newcomer).unwrap();
    assert_eq!(root.child_nodes().item(0).unwrap(), x);
    assert_eq!(root.child_nodes().item(1).unwrap(), y);
}

#[test]
fn remove_child_clears_document_element() {
    let (doc, root) = new_doc("r");
    doc.as_node().remove_child(&root).unwrap();
    assert!(doc.document_element().is_none());
    assert!(root.parent_node().is_none());

    // The document accepts a fresh element afterwards.
    let replacement = doc.create_element("again").unwrap();
    doc.as_node().append_child(&replacement).unwrap();
    assert_eq!(doc.document_element().unwrap(), replacement);
}

#[test]
fn clone_node_shallow_and_deep() {
    let (doc, root) = new_doc("r");
    let el = doc.create_element("el").unwrap();
    el.set_attribute("k", "v").unwrap();
    let inner = doc.create_element("inner").unwrap();
    inner
        .append_child(&doc.create_text_node("payload"))
        .unwrap();
    el.append_child(&inner).unwrap();
    root.append_child(&el).unwrap();

    let shallow = el.clone_node(false);
    assert!(shallow.parent_node().is_none());
    assert_eq!(shallow.get_attribute("k").as_deref(), Some("v"));
    assert!(!shallow.has_child_nodes());

    let deep = el.clone_node(true);
    assert!(deep.is_equal_node(&el));
    assert!(!deep.is_same_node(&el));

    // Attribute clones are detached from their element.
    let attr = el.get_attribute_node("k").unwrap();
    let attr_clone = attr.clone_node(true);
    assert!(attr_clone.owner_element().is_none());
    assert_eq!(attr.owner_element().unwrap(), el);
}

#[test]
fn normalize_coalesces_adjacent_text() {
    let (doc, root) = new_doc("r");
    root.append_child(&doc.create_text_node("a")).unwrap();
    root.append_child(&doc.create_text_node("")).unwrap();
    root.append_child(&doc.create_text_node("b")).unwrap();
    let cdata = doc.create_cdata_section("cd").unwrap();
    root.append_child(&cdata).unwrap();
    root.append_child(&doc.create_text_node("c")).unwrap();

    root.normalize();
    let children = root.child_nodes();
    assert_eq!(children.length(), 3);
    assert_eq!(children.item(0).unwrap().data(), "ab");
    assert_eq!(children.item(1).unwrap(), cdata);
    assert_eq!(children.item(2).unwrap().data(), "c");

    // Idempotent, and a run of empties survives as one empty node.
    root.normalize();
    assert_eq!(root.child_nodes().length(), 3);

    let (_, root2) = new_doc("r");
    let doc2 = root2.owner_document().unwrap();
    root2.append_child(&doc2.create_text_node("")).unwrap();
    root2.append_child(&doc2.create_text_node("")).unwrap();
    root2.normalize();
    assert_eq!(root2.child_nodes().length(), 1);
    assert_eq!(root2.first_child().unwrap().data(), "");
}

#[test]
fn node_value_mutability_is_kind_specific() {
    let (doc, root) = new_doc("r");
    let text = doc.create_text_node("t");
    text.set_node_value("changed").unwrap();
    assert_eq!(text.node_value().as_deref(), Some("changed"));

    let err = root.set_node_value("nope").unwrap_err();
    assert!(matches!(err, DomError::NoModificationAllowed(_)), "{err}");
    let err = doc.as_node().set_node_value("nope").unwrap_err();
    assert!(matches!(err, DomError::NoModificationAllowed(_)), "{err}");
}

#[test]
fn id_index_tracks_attribute_changes() {
    let (doc, root) = new_doc("r");
    let el = doc.create_element("e").unwrap();
    el.set_attribute("id", "k").unwrap();

    // Detached elements are not indexed.
    assert!(doc.get_element_by_id("k").is_none());

    root.append_child(&el).unwrap();
    assert_eq!(doc.get_element_by_id("k").unwrap(), el);

    el.set_attribute("id", "k2").unwrap();
    assert!(doc.get_element_by_id("k").is_none());
    assert_eq!(doc.get_element_by_id("k2").unwrap(), el);

    el.remove_attribute("id").unwrap();
    assert!(doc.get_element_by_id("k2").is_none());

    // Detaching a subtree drops its entries.
    el.set_attribute("id", "k3").unwrap();
    assert_eq!(doc.get_element_by_id("k3").unwrap(), el);
    root.remove_child(&el).unwrap();
    assert!(doc.get_element_by_id("k3").is_none());
}

#[test]
fn live_collections_observe_mutations() {
    let (doc, root) = new_doc("r");
    let list = root.get_elements_by_tag_name("x");
    assert_eq!(list.length(), 0);

    let x = doc.create_element("x").unwrap();
    root.append_child(&x).unwrap();
    assert_eq!(list.length(), 1);
    assert_eq!(list.item(0).unwrap(), x);

    // Nested descendants count too; the receiver itself never does.
    let y = doc.create_element("x").unwrap();
    x.append_child(&y).unwrap();
    assert_eq!(list.length(), 2);

    root.remove_child(&x).unwrap();
    assert_eq!(list.length(), 0);

    let all = doc.get_elements_by_tag_name("*");
    assert_eq!(all.length(), 1);
    assert_eq!(all.item(0).unwrap(), root);
}

#[test]
fn document_position_bits() {
    let (doc, root) = new_doc("r");
    let a = doc.create_element("a").unwrap();
    let b = doc.create_element("b").unwrap();
    root.append_child(&a).unwrap();
    root.append_child(&b).unwrap();

    assert_eq!(root.compare_document_position(&root), 0);
    assert_eq!(
        root.compare_document_position(&a),
        DOCUMENT_POSITION_CONTAINS | DOCUMENT_POSITION_FOLLOWING
    );
    assert_eq!(
        a.compare_document_position(&root),
        DOCUMENT_POSITION_CONTAINED_BY | DOCUMENT_POSITION_PRECEDING
    );
    assert_eq!(a.compare_document_position(&b), DOCUMENT_POSITION_FOLLOWING);
    assert_eq!(b.compare_document_position(&a), DOCUMENT_POSITION_PRECEDING);

    // Exactly one direction carries FOLLOWING for distinct connected nodes.
    let forward = a.compare_document_position(&b) & DOCUMENT_POSITION_FOLLOWING;
    let backward = b.compare_document_position(&a) & DOCUMENT_POSITION_FOLLOWING;
    assert!((forward != 0) ^ (backward != 0));

    // Detached trees are disconnected from the document tree.
    let loose = doc.create_element("loose").unwrap();
    assert_eq!(
        root.compare_document_position(&loose),
        DOCUMENT_POSITION_DISCONNECTED
    );

    assert!(root.contains(&root));
    assert!(root.contains(&a));
    assert!(!a.contains(&root));
}

#[test]
fn attribute_node_operations() {
    let (doc, _root) = new_doc("r");
    let e1 = doc.create_element("e1").unwrap();
    let e2 = doc.create_element("e2").unwrap();

    let attr = doc.create_attribute_with("k", "v").unwrap();
    assert!(e1.set_attribute_node(&attr).unwrap().is_none());
    assert_eq!(attr.owner_element().unwrap(), e1);

    // An owned attribute cannot move without being removed first.
    let err = e2.set_attribute_node(&attr).unwrap_err();
    assert!(matches!(err, DomError::InUseAttribute(_)), "{err}");

    // Replacing by name hands back the displaced node.
    let replacement = doc.create_attribute_with("k", "v2").unwrap();
    let displaced = e1.set_attribute_node(&replacement).unwrap().unwrap();
    assert_eq!(displaced, attr);
    assert!(attr.owner_element().is_none());
    assert_eq!(e1.get_attribute("k").as_deref(), Some("v2"));

    e1.remove_attribute_node(&replacement).unwrap();
    assert!(!e1.has_attribute("k"));
}

#[test]
fn toggle_attribute_flips_presence() {
    let (doc, _root) = new_doc("r");
    let el = doc.create_element("e").unwrap();

    assert!(el.toggle_attribute("hidden", None).unwrap());
    assert!(el.has_attribute("hidden"));
    assert!(!el.toggle_attribute("hidden", None).unwrap());
    assert!(!el.has_attribute("hidden"));

    assert!(!el.toggle_attribute("hidden", Some(false)).unwrap());
    assert!(el.toggle_attribute("hidden", Some(true)).unwrap());
    assert!(el.toggle_attribute("hidden", Some(true)).unwrap());
    assert!(el.has_attribute("hidden"));
}

#[test]
fn character_data_operations() {
    let (doc, root) = new_doc("r");
    let text = doc.create_text_node("hello");
    root.append_child(&text).unwrap();

    assert_eq!(text.length(), 5);
    assert_eq!(text.substring_data(1, 3).unwrap(), "ell");
    assert!(matches!(
        text.substring_data(10, 1).unwrap_err(),
        DomError::IndexSize(_)
    ));

    text.append_data(" world").unwrap();
    text.insert_data(0, ">> ").unwrap();
    assert_eq!(text.data(), ">> hello world");
    text.delete_data(0, 3).unwrap();
    text.replace_data(0, 5, "goodbye").unwrap();
    assert_eq!(text.data(), "goodbye world");

    // Offsets count code points, not bytes.
    let unicode = doc.create_text_node("héllo");
    assert_eq!(unicode.length(), 5);
    assert_eq!(unicode.substring_data(1, 2).unwrap(), "él");

    let tail = text.split_text(7).unwrap();
    assert_eq!(text.data(), "goodbye");
    assert_eq!(tail.data(), " world");
    assert_eq!(text.next_sibling().unwrap(), tail);
}

#[test]
fn text_content_aggregates_descendants() {
    let (doc, root) = new_doc("r");
    let inner = doc.create_element("inner").unwrap();
    inner.append_child(&doc.create_text_node("A")).unwrap();
    inner
        .append_child(&doc.create_comment("not text"))
        .unwrap();
    inner
        .append_child(&doc.create_cdata_section("B").unwrap())
        .unwrap();
    root.append_child(&inner).unwrap();
    root.append_child(&doc.create_text_node("C")).unwrap();

    assert_eq!(root.text_content(), "ABC");
    assert_eq!(inner.text_content(), "AB");

    root.set_text_content("flat").unwrap();
    assert_eq!(root.child_nodes().length(), 1);
    assert_eq!(root.text_content(), "flat");
}

#[test]
fn namespace_lookups_walk_ancestors() {
    let (doc, root) = new_doc("r");
    root.set_attribute_ns(XMLNS_NAMESPACE, "xmlns:p", "http://ex/p")
        .unwrap();
    root.set_attribute_ns(XMLNS_NAMESPACE, "xmlns", "http://ex/d")
        .unwrap();
    let child = doc.create_element("c").unwrap();
    root.append_child(&child).unwrap();

    assert_eq!(
        child.lookup_namespace_uri(Some("p")).as_deref(),
        Some("http://ex/p")
    );
    assert_eq!(
        child.lookup_namespace_uri(None).as_deref(),
        Some("http://ex/d")
    );
    assert!(child.lookup_namespace_uri(Some("q")).is_none());
    assert_eq!(child.lookup_prefix("http://ex/p").as_deref(), Some("p"));
    assert!(child.is_default_namespace("http://ex/d"));
    assert!(!child.is_default_namespace("http://ex/other"));

    // The xml prefix is built in.
    assert_eq!(
        child.lookup_namespace_uri(Some("xml")).as_deref(),
        Some("http://www.w3.org/XML/1998/namespace")
    );
}

#[test]
fn reserved_namespace_attribute_rules() {
    let (_doc, root) = new_doc("r");

    // xmlns declarations must live in the xmlns namespace.
    let err = root
        .set_attribute_ns("http://wrong", "xmlns:p", "u")
        .unwrap_err();
    assert!(matches!(err, DomError::Namespace(_)), "{err}");

    // The xmlns name bound anywhere but its own namespace is rejected.
    let err = root
        .set_attribute_ns(XMLNS_NAMESPACE, "p:q", "u")
        .unwrap_err();
    assert!(matches!(err, DomError::Namespace(_)), "{err}");

    // The xmlns namespace cannot become a default namespace, and the xmlns
    // prefix cannot be declared at all.
    let err = root
        .set_attribute_ns(XMLNS_NAMESPACE, "xmlns", XMLNS_NAMESPACE)
        .unwrap_err();
    assert!(matches!(err, DomError::Namespace(_)), "{err}");
    let err = root
        .set_attribute_ns(XMLNS_NAMESPACE, "xmlns:xmlns", "u")
        .unwrap_err();
    assert!(matches!(err, DomError::Namespace(_)), "{err}");
}

#[test]
fn import_and_adopt_transfer_ownership() {
    let (doc_a, root_a) = new_doc("a");
    let (doc_b, root_b) = new_doc("b");

    let el = doc_a.create_element("payload").unwrap();
    el.set_attribute("k", "v").unwrap();
    el.append_child(&doc_a.create_text_node("data")).unwrap();
    root_a.append_child(&el).unwrap();

    // Import: a detached copy; the original stays put.
    let imported = doc_b.import_node(&el, true).unwrap();
    assert!(imported.parent_node().is_none());
    assert_eq!(imported.owner_document().unwrap(), doc_b);
    assert!(imported.is_equal_node(&el));
    assert_eq!(el.parent_node().unwrap(), root_a);
    root_b.append_child(&imported).unwrap();

    // Adopt: the node moves; the returned handle lives in the target.
    let adopted = doc_b.adopt_node(&el).unwrap();
    assert_eq!(adopted.owner_document().unwrap(), doc_b);
    assert!(adopted.parent_node().is_none());
    assert_eq!(adopted.get_attribute("k").as_deref(), Some("v"));
    root_b.append_child(&adopted).unwrap();
    assert!(root_a.child_nodes().is_empty());

    // Documents themselves cannot be imported.
    let err = doc_b.import_node(&doc_a.as_node(), true).unwrap_err();
    assert!(matches!(err, DomError::NotSupported(_)), "{err}");
}

#[test]
fn rename_node_updates_names_and_id_index() {
    let (doc, root) = new_doc("r");
    let el = doc.create_element("before").unwrap();
    root.append_child(&el).unwrap();

    doc.rename_node(&el, "", "after").unwrap();
    assert_eq!(el.node_name(), "after");

    el.set_attribute("data", "v").unwrap();
    let attr = el.get_attribute_node("data").unwrap();
    doc.rename_node(&attr, "", "id").unwrap();
    assert_eq!(doc.get_element_by_id("v").unwrap(), el);

    let err = doc.rename_node(&doc.create_text_node("t"), "", "x").unwrap_err();
    assert!(matches!(err, DomError::NotSupported(_)), "{err}");
}

#[test]
fn doctype_factory_and_attachment() {
    let implementation = DomImplementation::new();
    let doctype = implementation
        .create_document_type("r", "pub-id", "sys-id")
        .unwrap();
    let doc = implementation
        .create_document("", Some("r"), Some(&doctype))
        .unwrap();

    let attached = doc.doctype().unwrap();
    assert_eq!(attached.node_name(), "r");
    assert_eq!(attached.public_id(), "pub-id");
    assert_eq!(attached.system_id(), "sys-id");

    // The doctype precedes the document element among the document's
    // children.
    assert_eq!(doc.as_node().first_child().unwrap(), attached);
    assert_eq!(
        doc.as_node().last_child().unwrap(),
        doc.document_element().unwrap()
    );

    // DocumentType nodes cannot be imported into other documents.
    let other = implementation.create_document("", None, None).unwrap();
    let err = other.import_node(&attached, true).unwrap_err();
    assert!(matches!(err, DomError::NotSupported(_)), "{err}");
}

#[test]
fn implementation_features() {
    let implementation = DomImplementation::new();
    assert!(implementation.has_feature("Core", "2.0"));
    assert!(implementation.has_feature("XML", "1.0"));
    assert!(!implementation.has_feature("Range", "2.0"));
}

#[test]
fn documents_are_thread_safe() {
    let (doc, root) = new_doc("r");
    let reader_doc = doc.clone();

    let reader = std::thread::spawn(move || {
        let mut max_seen = 0;
        for _ in 0..200 {
            let len = reader_doc.get_elements_by_tag_name("x").length();
            max_seen = max_seen.max(len);
        }
        max_seen
    });

    for _ in 0..50 {
        let x = doc.create_element("x").unwrap();
        root.append_child(&x).unwrap();
    }

    let max_seen = reader.join().unwrap();
    assert!(max_seen <= 50);
    assert_eq!(doc.get_elements_by_tag_name("x").length(), 50);
}
