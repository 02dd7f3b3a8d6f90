//! XPath evaluation: the axes, predicates, operators, function library,
//! result shapes, and the document-order guarantees node-sets carry.

use dompath::xpath::{
    self, ANY_TYPE, BOOLEAN_TYPE, FIRST_ORDERED_NODE_TYPE, NUMBER_TYPE,
    ORDERED_NODE_SNAPSHOT_TYPE, STRING_TYPE, UNORDERED_NODE_ITERATOR_TYPE,
};
use dompath::{parse_str, Document, EvalOptions, NamespaceResolver, NodeRef, VariableValue, XPathError};

fn number(doc: &Document, context: &NodeRef, expr: &str) -> f64 {
    doc.evaluate(expr, context, None, NUMBER_TYPE, None)
        .unwrap()
        .number_value()
        .unwrap()
}

fn string(doc: &Document, context: &NodeRef, expr: &str) -> String {
    doc.evaluate(expr, context, None, STRING_TYPE, None)
        .unwrap()
        .string_value()
        .unwrap()
        .to_string()
}

fn boolean(doc: &Document, context: &NodeRef, expr: &str) -> bool {
    doc.evaluate(expr, context, None, BOOLEAN_TYPE, None)
        .unwrap()
        .boolean_value()
        .unwrap()
}

fn snapshot(doc: &Document, context: &NodeRef, expr: &str) -> Vec<NodeRef> {
    let result = doc
        .evaluate(expr, context, None, ORDERED_NODE_SNAPSHOT_TYPE, None)
        .unwrap();
    let mut out = Vec::new();
    for i in 0..result.snapshot_length().unwrap() {
        out.push(result.snapshot_item(i).unwrap().unwrap());
    }
    out
}

#[test]
fn parse_and_query_scenario() {
    let doc = parse_str(r#"<?xml version="1.0"?><r><b id="1"><t>A</t></b><b id="2"><t>B</t></b></r>"#)
        .unwrap();
    let root = doc.document_element().unwrap();

    let nodes = snapshot(&doc, &root, "//b");
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].get_attribute("id").as_deref(), Some("1"));
    assert_eq!(nodes[1].get_attribute("id").as_deref(), Some("2"));

    assert_eq!(number(&doc, &root, "count(//t)"), 2.0);
}

#[test]
fn local_name_matches_namespaced_elements() {
    let doc = parse_str(r#"<r xmlns:p="http://ex/p"><p:c>x</p:c></r>"#).unwrap();
    let context = doc.as_node();

    let nodes = snapshot(&doc, &context, "//*[local-name()='c']");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_name(), "p:c");
    assert_eq!(nodes[0].namespace_uri(), "http://ex/p");

    // Literal qualified-name matching works without a resolver.
    let nodes = snapshot(&doc, &context, "//p:c");
    assert_eq!(nodes.len(), 1);

    assert_eq!(string(&doc, &context, "name(//p:c)"), "p:c");
    assert_eq!(string(&doc, &context, "local-name(//p:c)"), "c");
    assert_eq!(
        string(&doc, &context, "namespace-uri(//p:c)"),
        "http://ex/p"
    );
}

#[test]
fn positional_predicates() {
    let doc = parse_str("<r><i/><i/><i/><i/></r>").unwrap();
    let context = doc.as_node();
    let all = snapshot(&doc, &context, "//i");
    assert_eq!(all.len(), 4);

    let last = doc
        .evaluate("//i[last()]", &context, None, FIRST_ORDERED_NODE_TYPE, None)
        .unwrap()
        .single_node_value()
        .unwrap()
        .unwrap();
    assert_eq!(last, all[3]);

    let second = doc
        .evaluate(
            "//i[position()=2]",
            &context,
            None,
            FIRST_ORDERED_NODE_TYPE,
            None,
        )
        .unwrap()
        .single_node_value()
        .unwrap()
        .unwrap();
    assert_eq!(second, all[1]);

    let odd = snapshot(&doc, &context, "//i[position() mod 2 = 1]");
    assert_eq!(odd.len(), 2);
    assert_eq!(odd[0], all[0]);
    assert_eq!(odd[1], all[2]);

    // Abbreviated numeric predicates.
    let third = snapshot(&doc, &context, "//i[3]");
    assert_eq!(third, vec![all[2].clone()]);
}

#[test]
fn arithmetic_boundaries() {
    let doc = parse_str("<r/>").unwrap();
    let context = doc.as_node();

    assert_eq!(number(&doc, &context, "1 div 0"), f64::INFINITY);
    assert_eq!(number(&doc, &context, "-1 div 0"), f64::NEG_INFINITY);
    assert!(number(&doc, &context, "0 div 0").is_nan());
    assert!(number(&doc, &context, "1 mod 0").is_nan());

    assert_eq!(number(&doc, &context, "5 mod 2"), 1.0);
    assert_eq!(number(&doc, &context, "5 mod -2"), 1.0);
    assert_eq!(number(&doc, &context, "-5 mod 2"), -1.0);

    assert_eq!(number(&doc, &context, "'3' + 4"), 7.0);
    assert_eq!(number(&doc, &context, "2 * 3 + 4"), 10.0);
    assert_eq!(number(&doc, &context, "2 + 3 * 4"), 14.0);
    assert_eq!(number(&doc, &context, "-(2 + 1)"), -3.0);
    assert!(number(&doc, &context, "'x' + 1").is_nan());
}

#[test]
fn string_functions() {
    let doc = parse_str("<r/>").unwrap();
    let c = doc.as_node();

    assert_eq!(string(&doc, &c, "substring('hello', 1, 3)"), "hel");
    assert_eq!(string(&doc, &c, "substring('12345', 0)"), "12345");
    assert_eq!(string(&doc, &c, "substring('12345', -2, 4)"), "1");
    assert_eq!(string(&doc, &c, "substring('12345', 1.5, 2.6)"), "234");

    assert_eq!(string(&doc, &c, "concat('a', 'b', 'c')"), "abc");
    assert!(boolean(&doc, &c, "starts-with('hello', 'he')"));
    assert!(boolean(&doc, &c, "contains('hello', 'ell')"));
    assert_eq!(string(&doc, &c, "substring-before('a=b', '=')"), "a");
    assert_eq!(string(&doc, &c, "substring-after('a=b', '=')"), "b");
    assert_eq!(string(&doc, &c, "substring-before('ab', 'x')"), "");

    assert_eq!(number(&doc, &c, "string-length('héllo')"), 5.0);
    assert_eq!(
        string(&doc, &c, "normalize-space('  a   b  c ')"),
        "a b c"
    );
    assert_eq!(string(&doc, &c, "translate('bar', 'abc', 'ABC')"), "BAr");
    assert_eq!(
        string(&doc, &c, "translate('--aaa--', 'abc-', 'ABC')"),
        "AAA"
    );

    assert_eq!(string(&doc, &c, "string(1 div 0)"), "Infinity");
    assert_eq!(string(&doc, &c, "string(0.5)"), "0.5");
    assert_eq!(string(&doc, &c, "string(2)"), "2");
    assert_eq!(string(&doc, &c, "string(true())"), "true");
}

#[test]
fn number_functions() {
    let doc = parse_str("<r><v>1</v><v>2.5</v><v>3</v></r>").unwrap();
    let c = doc.as_node();

    assert_eq!(number(&doc, &c, "sum(//v)"), 6.5);
    assert_eq!(number(&doc, &c, "floor(2.7)"), 2.0);
    assert_eq!(number(&doc, &c, "ceiling(2.1)"), 3.0);
    assert_eq!(number(&doc, &c, "round(2.5)"), 3.0);
    assert_eq!(number(&doc, &c, "round(-2.5)"), -3.0);
    assert_eq!(number(&doc, &c, "number('  4 ')"), 4.0);
    assert!(number(&doc, &c, "number('four')").is_nan());
}

#[test]
fn boolean_functions_and_comparisons() {
    let doc = parse_str(r#"<r xml:lang="en-US"><b id="1">x</b><b id="2">y</b></r>"#).unwrap();
    let c = doc.as_node();

    assert!(boolean(&doc, &c, "boolean(//b)"));
    assert!(!boolean(&doc, &c, "boolean(//missing)"));
    assert!(boolean(&doc, &c, "not(false())"));
    assert!(boolean(&doc, &c, "true() and not(false())"));
    assert!(boolean(&doc, &c, "false() or true()"));

    // Node-set comparisons are existential.
    assert!(boolean(&doc, &c, "//b = 'x'"));
    assert!(boolean(&doc, &c, "//b != 'x'"));
    assert!(!boolean(&doc, &c, "//missing = //b"));
    assert!(boolean(&doc, &c, "//b/@id = '2'"));
    assert!(boolean(&doc, &c, "count(//b) > 1"));

    // lang() walks ancestors, case-insensitively, matching subtags.
    let b = doc.document_element().unwrap().first_child().unwrap();
    assert!(boolean(&doc, &b, "lang('en')"));
    assert!(boolean(&doc, &b, "lang('EN-us')"));
    assert!(!boolean(&doc, &b, "lang('fr')"));
}

#[test]
fn id_function_splits_whitespace() {
    let doc = parse_str(r#"<r><a id="k1"/><a id="k2"/><a id="k3"/></r>"#).unwrap();
    let c = doc.as_node();

    let nodes = snapshot(&doc, &c, "id('k3 k1')");
    assert_eq!(nodes.len(), 2);
    // Document order, not argument order.
    assert_eq!(nodes[0].get_attribute("id").as_deref(), Some("k1"));
    assert_eq!(nodes[1].get_attribute("id").as_deref(), Some("k3"));
}

#[test]
fn axes_cover_the_tree() {
    let doc = parse_str(r#"<r><a><a1/><a2/></a><b at="v"><b1/></b><c/></r>"#).unwrap();
    let context = doc.as_node();
    let b = snapshot(&doc, &context, "//b")[0].clone();

    assert_eq!(snapshot(&doc, &b, "parent::*")[0].node_name(), "r");
    assert_eq!(snapshot(&doc, &b, "ancestor::*").len(), 1);
    assert_eq!(snapshot(&doc, &b, "ancestor-or-self::*").len(), 2);
    assert_eq!(snapshot(&doc, &b, "child::*")[0].node_name(), "b1");
    assert_eq!(snapshot(&doc, &b, "descendant-or-self::*").len(), 2);

    let following = snapshot(&doc, &b, "following::*");
    assert_eq!(
        following.iter().map(|n| n.node_name()).collect::<Vec<_>>(),
        vec!["c"]
    );
    let preceding = snapshot(&doc, &b, "preceding::*");
    assert_eq!(
        preceding.iter().map(|n| n.node_name()).collect::<Vec<_>>(),
        vec!["a", "a1", "a2"]
    );
    assert_eq!(
        snapshot(&doc, &b, "following-sibling::*")[0].node_name(),
        "c"
    );
    assert_eq!(
        snapshot(&doc, &b, "preceding-sibling::*")[0].node_name(),
        "a"
    );

    let attrs = snapshot(&doc, &b, "attribute::*");
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs[0].node_name(), "at");
    assert_eq!(attrs[0].node_value().as_deref(), Some("v"));

    // Shorthand @ and .. forms.
    assert_eq!(string(&doc, &b, "string(@at)"), "v");
    assert_eq!(snapshot(&doc, &b, "../c").len(), 1);
    assert_eq!(snapshot(&doc, &b, "self::b").len(), 1);
    assert_eq!(snapshot(&doc, &b, "self::nope").len(), 0);
}

#[test]
fn namespace_axis_synthesizes_nodes() {
    let doc = parse_str(r#"<r xmlns:p="http://ex/p"><c/></r>"#).unwrap();
    let c = doc.document_element().unwrap().first_child().unwrap();

    assert_eq!(number(&doc, &c, "count(namespace::*)"), 2.0);

    let nodes = snapshot(&doc, &c, "namespace::*");
    assert_eq!(nodes.len(), 2);
    // Ordered by prefix: p, then the implicit xml binding.
    assert_eq!(nodes[0].node_name(), "p");
    assert_eq!(nodes[0].node_value().as_deref(), Some("http://ex/p"));
    assert_eq!(nodes[1].node_name(), "xml");
    assert_eq!(
        nodes[1].node_value().as_deref(),
        Some("http://www.w3.org/XML/1998/namespace")
    );

    for node in &nodes {
        assert_eq!(node.node_type(), 13);
        assert_eq!(node.parent_node().unwrap(), c);
    }

    let named = snapshot(&doc, &c, "namespace::p");
    assert_eq!(named.len(), 1);
}

#[test]
fn unions_are_document_ordered_and_deduped() {
    let doc = parse_str("<r><a/><b/><a/></r>").unwrap();
    let c = doc.as_node();

    let nodes = snapshot(&doc, &c, "//b | //a | //a");
    assert_eq!(
        nodes.iter().map(|n| n.node_name()).collect::<Vec<_>>(),
        vec!["a", "b", "a"]
    );

    let err = doc
        .evaluate("//a | 1", &c, None, ANY_TYPE, None)
        .unwrap_err();
    assert!(matches!(err, XPathError::Type(_)), "{err}");
}

#[test]
fn empty_document_queries_are_empty_not_errors() {
    let doc = dompath::DomImplementation::new()
        .create_document("", None, None)
        .unwrap();
    let nodes = snapshot(&doc, &doc.as_node(), "//foo");
    assert!(nodes.is_empty());
}

#[test]
fn parse_errors_carry_positions() {
    let doc = parse_str("<r/>").unwrap();
    let c = doc.as_node();

    let err = doc.evaluate("", &c, None, ANY_TYPE, None).unwrap_err();
    assert_eq!(err.code_name(), "INVALID_EXPRESSION_ERR");

    let err = doc.evaluate("//a )", &c, None, ANY_TYPE, None).unwrap_err();
    assert!(matches!(
        err,
        XPathError::InvalidExpression {
            position: Some(4),
            ..
        }
    ), "{err:?}");

    let err = doc
        .evaluate("unknown-fn()", &c, None, ANY_TYPE, None)
        .unwrap_err();
    assert!(matches!(err, XPathError::InvalidExpression { .. }), "{err}");

    let err = doc
        .evaluate("concat('one')", &c, None, ANY_TYPE, None)
        .unwrap_err();
    assert!(matches!(err, XPathError::InvalidExpression { .. }), "{err}");
}

#[test]
fn result_shapes_enforce_their_accessors() {
    let doc = parse_str("<r><x/></r>").unwrap();
    let c = doc.as_node();

    // ANY refines by value type.
    let result = doc.evaluate("count(//x)", &c, None, ANY_TYPE, None).unwrap();
    assert_eq!(result.result_type(), NUMBER_TYPE);
    let result = doc.evaluate("//x", &c, None, ANY_TYPE, None).unwrap();
    assert_eq!(result.result_type(), UNORDERED_NODE_ITERATOR_TYPE);

    // Wrong accessors fail with TYPE_ERR.
    let result = doc
        .evaluate("'text'", &c, None, STRING_TYPE, None)
        .unwrap();
    assert!(matches!(result.number_value(), Err(XPathError::Type(_))));
    assert!(matches!(result.snapshot_length(), Err(XPathError::Type(_))));

    // Conversions apply for scalar requests.
    assert_eq!(number(&doc, &c, "'  42 '"), 42.0);
    assert!(boolean(&doc, &c, "'non-empty'"));
}

#[test]
fn iterators_drain_and_invalidate() {
    let doc = parse_str("<r><x/><x/></r>").unwrap();
    let c = doc.as_node();

    let mut result = doc
        .evaluate("//x", &c, None, UNORDERED_NODE_ITERATOR_TYPE, None)
        .unwrap();
    assert!(result.iterate_next().unwrap().is_some());
    assert!(result.iterate_next().unwrap().is_some());
    assert!(result.iterate_next().unwrap().is_none());

    // A mutation between evaluation and iteration invalidates the stream.
    let mut result = doc
        .evaluate("//x", &c, None, UNORDERED_NODE_ITERATOR_TYPE, None)
        .unwrap();
    let root = doc.document_element().unwrap();
    root.append_child(&doc.create_element("x").unwrap()).unwrap();
    assert!(result.invalid_iterator_state());
    let err = result.iterate_next().unwrap_err();
    assert_eq!(err.code_name(), "INVALID_STATE_ERR");

    // Snapshots survive mutation.
    let result = doc
        .evaluate("//x", &c, None, ORDERED_NODE_SNAPSHOT_TYPE, None)
        .unwrap();
    root.append_child(&doc.create_element("x").unwrap()).unwrap();
    assert_eq!(result.snapshot_length().unwrap(), 3);
}

#[test]
fn variables_and_resolvers() {
    let doc = parse_str(r#"<r xmlns:p="http://ex/p"><p:c/></r>"#).unwrap();
    let c = doc.as_node();

    let expr = doc.create_expression("$n * 2").unwrap();
    let mut options = EvalOptions::default();
    options.result_type = NUMBER_TYPE;
    options.variables.insert("n".into(), VariableValue::Number(21.0));
    let result = expr.evaluate_with(&c, &options, None).unwrap();
    assert_eq!(result.number_value().unwrap(), 42.0);

    // Unknown variables fail at evaluation time.
    let expr = doc.create_expression("$missing").unwrap();
    assert!(expr.evaluate(&c, ANY_TYPE, None).is_err());

    // A resolver maps expression prefixes onto document namespaces.
    struct Fixed;
    impl NamespaceResolver for Fixed {
        fn resolve_prefix(&self, prefix: &str) -> Option<String> {
            (prefix == "q").then(|| "http://ex/p".to_string())
        }
    }

    let result = doc
        .evaluate("//q:c", &c, Some(&Fixed), ORDERED_NODE_SNAPSHOT_TYPE, None)
        .unwrap();
    assert_eq!(result.snapshot_length().unwrap(), 1);

    // Unresolvable prefixes are namespace errors.
    let err = doc
        .evaluate("//zz:c", &c, Some(&Fixed), ANY_TYPE, None)
        .unwrap_err();
    assert_eq!(err.code_name(), "NAMESPACE_ERR");

    // The context element itself resolves prefixes declared in scope.
    let root = doc.document_element().unwrap();
    let result = doc
        .evaluate(
            "//p:c",
            &c,
            Some(&root),
            ORDERED_NODE_SNAPSHOT_TYPE,
            None,
        )
        .unwrap();
    assert_eq!(result.snapshot_length().unwrap(), 1);
}

#[test]
fn evaluation_is_deterministic_and_cached() {
    let doc = parse_str("<r><a/><b/></r>").unwrap();
    let c = doc.as_node();

    let first = snapshot(&doc, &c, "//a | //b");
    let second = snapshot(&doc, &c, "//a | //b");
    assert_eq!(first, second);

    // Compiled expressions are shared and reusable across documents.
    let expr = xpath::create_expression("count(//a)").unwrap();
    let again = xpath::create_expression("count(//a)").unwrap();
    assert_eq!(expr.source(), again.source());

    let other = parse_str("<r><a/><a/></r>").unwrap();
    let result = expr.evaluate(&other.as_node(), NUMBER_TYPE, None).unwrap();
    assert_eq!(result.number_value().unwrap(), 2.0);
}

#[test]
fn filter_expressions_continue_into_paths() {
    let doc = parse_str(r#"<r><a id="k"><t>inner</t></a></r>"#).unwrap();
    let c = doc.as_node();

    let nodes = snapshot(&doc, &c, "id('k')/t");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].text_content(), "inner");

    let nodes = snapshot(&doc, &c, "(//t)[1]");
    assert_eq!(nodes.len(), 1);

    assert_eq!(string(&doc, &c, "string(//a/@id)"), "k");
}

#[test]
fn node_kind_tests() {
    let doc = parse_str("<r>text<!--c--><?pi data?><![CDATA[cd]]></r>").unwrap();
    let root = doc.document_element().unwrap();

    // text() matches Text and CDATA.
    assert_eq!(snapshot(&doc, &root, "child::text()").len(), 2);
    assert_eq!(snapshot(&doc, &root, "child::comment()").len(), 1);
    assert_eq!(
        snapshot(&doc, &root, "child::processing-instruction()").len(),
        1
    );
    assert_eq!(
        snapshot(&doc, &root, "child::processing-instruction('pi')").len(),
        1
    );
    assert_eq!(
        snapshot(&doc, &root, "child::processing-instruction('other')").len(),
        0
    );
    assert_eq!(snapshot(&doc, &root, "child::node()").len(), 4);
}
