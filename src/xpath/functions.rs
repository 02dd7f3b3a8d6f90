//! The XPath 1.0 core function library.
//!
//! https://www.w3.org/TR/1999/REC-xpath-19991116/#corelib
//!
//! Node-set: last position count id local-name namespace-uri name
//! String:   string concat starts-with contains substring-before
//!           substring-after substring string-length normalize-space
//!           translate
//! Boolean:  boolean not true false lang
//! Number:   number sum floor ceiling round

use crate::node::{NodeKind, NodeTarget};
use crate::result::XPathError;
use crate::tree;
use crate::xpath::context::Evaluation;
use crate::xpath::value::{
    node_string_value, string_to_number, Nodeset, Value, XNode,
};

/// The built-in functions, resolved by name at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Last,
    Position,
    Count,
    Id,
    LocalName,
    NamespaceUri,
    Name,
    String,
    Concat,
    StartsWith,
    Contains,
    SubstringBefore,
    SubstringAfter,
    Substring,
    StringLength,
    NormalizeSpace,
    Translate,
    Boolean,
    Not,
    True,
    False,
    Lang,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "last" => Self::Last,
            "position" => Self::Position,
            "count" => Self::Count,
            "id" => Self::Id,
            "local-name" => Self::LocalName,
            "namespace-uri" => Self::NamespaceUri,
            "name" => Self::Name,
            "string" => Self::String,
            "concat" => Self::Concat,
            "starts-with" => Self::StartsWith,
            "contains" => Self::Contains,
            "substring-before" => Self::SubstringBefore,
            "substring-after" => Self::SubstringAfter,
            "substring" => Self::Substring,
            "string-length" => Self::StringLength,
            "normalize-space" => Self::NormalizeSpace,
            "translate" => Self::Translate,
            "boolean" => Self::Boolean,
            "not" => Self::Not,
            "true" => Self::True,
            "false" => Self::False,
            "lang" => Self::Lang,
            "number" => Self::Number,
            "sum" => Self::Sum,
            "floor" => Self::Floor,
            "ceiling" => Self::Ceiling,
            "round" => Self::Round,
            _ => return None,
        })
    }

    /// (min, max) argument counts; None means unbounded.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Last | Self::Position | Self::True | Self::False => (0, Some(0)),
            Self::Count
            | Self::Id
            | Self::Boolean
            | Self::Not
            | Self::Lang
            | Self::Sum
            | Self::Floor
            | Self::Ceiling
            | Self::Round => (1, Some(1)),
            Self::LocalName
            | Self::NamespaceUri
            | Self::Name
            | Self::String
            | Self::StringLength
            | Self::NormalizeSpace
            | Self::Number => (0, Some(1)),
            Self::StartsWith | Self::Contains | Self::SubstringBefore | Self::SubstringAfter => {
                (2, Some(2))
            }
            Self::Substring => (2, Some(3)),
            Self::Translate => (3, Some(3)),
            Self::Concat => (2, None),
        }
    }
}

/// XPath `round`: halves away from zero, NaN and infinities preserved.
pub(crate) fn xpath_round(n: f64) -> f64 {
    n.round()
}

/// Dispatches a call; argument counts were checked at parse time.
pub(crate) fn call(
    function: Function,
    mut args: Vec<Value>,
    eval: &Evaluation<'_>,
) -> Result<Value, XPathError> {
    let inner = eval.inner;

    match function {
        Function::Last => Ok(Value::Number(eval.size as f64)),
        Function::Position => Ok(Value::Number(eval.position as f64)),

        Function::Count => {
            let set = take_nodeset(&mut args, "count")?;
            Ok(Value::Number(set.len() as f64))
        }

        Function::Id => {
            let arg = args.remove(0);
            let mut tokens = Vec::new();
            match arg {
                Value::Nodeset(set) => {
                    for node in set.iter() {
                        collect_id_tokens(&node_string_value(inner, node), &mut tokens);
                    }
                }
                other => collect_id_tokens(&other.to_string_value(inner), &mut tokens),
            }

            let mut found = Nodeset::new();
            for token in tokens {
                if let Some(element) = inner.id_map.get(&token) {
                    found.push(NodeTarget::Tree(*element));
                }
            }
            found.sort_document_order(inner);
            Ok(Value::Nodeset(found))
        }

        Function::LocalName => {
            let node = optional_node_arg(&mut args, eval)?;
            Ok(Value::String(
                node.map(|n| expanded_name(eval, &n).0).unwrap_or_default(),
            ))
        }

        Function::NamespaceUri => {
            let node = optional_node_arg(&mut args, eval)?;
            Ok(Value::String(
                node.map(|n| expanded_name(eval, &n).1).unwrap_or_default(),
            ))
        }

        Function::Name => {
            let node = optional_node_arg(&mut args, eval)?;
            Ok(Value::String(
                node.map(|n| expanded_name(eval, &n).2).unwrap_or_default(),
            ))
        }

        Function::String => Ok(Value::String(match args.pop() {
            Some(value) => value.to_string_value(inner),
            None => node_string_value(inner, &eval.node),
        })),

        Function::Concat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&arg.to_string_value(inner));
            }
            Ok(Value::String(out))
        }

        Function::StartsWith => {
            let (haystack, needle) = two_strings(&mut args, inner);
            Ok(Value::Boolean(haystack.starts_with(&needle)))
        }

        Function::Contains => {
            let (haystack, needle) = two_strings(&mut args, inner);
            Ok(Value::Boolean(haystack.contains(&needle)))
        }

        Function::SubstringBefore => {
            let (haystack, needle) = two_strings(&mut args, inner);
            Ok(Value::String(
                haystack
                    .find(&needle)
                    .map(|at| haystack[..at].to_string())
                    .unwrap_or_default(),
            ))
        }

        Function::SubstringAfter => {
            let (haystack, needle) = two_strings(&mut args, inner);
            Ok(Value::String(
                haystack
                    .find(&needle)
                    .map(|at| haystack[at + needle.len()..].to_string())
                    .unwrap_or_default(),
            ))
        }

        Function::Substring => {
            let source = args.remove(0).to_string_value(inner);
            let start = xpath_round(args.remove(0).to_number(inner));
            let length = if args.is_empty() {
                f64::INFINITY
            } else {
                xpath_round(args.remove(0).to_number(inner))
            };

            // 1-based code-point positions p with p >= start and
            // p < start + length; NaN comparisons exclude everything.
            let out: String = source
                .chars()
                .enumerate()
                .filter(|(i, _)| {
                    let position = (*i + 1) as f64;
                    position >= start && position < start + length
                })
                .map(|(_, c)| c)
                .collect();
            Ok(Value::String(out))
        }

        Function::StringLength => {
            let value = match args.pop() {
                Some(value) => value.to_string_value(inner),
                None => node_string_value(inner, &eval.node),
            };
            Ok(Value::Number(value.chars().count() as f64))
        }

        Function::NormalizeSpace => {
            let value = match args.pop() {
                Some(value) => value.to_string_value(inner),
                None => node_string_value(inner, &eval.node),
            };
            Ok(Value::String(
                value.split_ascii_whitespace().collect::<Vec<_>>().join(" "),
            ))
        }

        Function::Translate => {
            let source = args.remove(0).to_string_value(inner);
            let from: Vec<char> = args.remove(0).to_string_value(inner).chars().collect();
            let to: Vec<char> = args.remove(0).to_string_value(inner).chars().collect();

            let out: String = source
                .chars()
                .filter_map(|c| match from.iter().position(|f| *f == c) {
                    Some(index) => to.get(index).copied(),
                    None => Some(c),
                })
                .collect();
            Ok(Value::String(out))
        }

        Function::Boolean => Ok(Value::Boolean(args.remove(0).to_boolean())),
        Function::Not => Ok(Value::Boolean(!args.remove(0).to_boolean())),
        Function::True => Ok(Value::Boolean(true)),
        Function::False => Ok(Value::Boolean(false)),

        Function::Lang => {
            let wanted = args.remove(0).to_string_value(inner);
            Ok(Value::Boolean(language_matches(eval, &wanted)))
        }

        Function::Number => Ok(Value::Number(match args.pop() {
            Some(value) => value.to_number(inner),
            None => string_to_number(&node_string_value(inner, &eval.node)),
        })),

        Function::Sum => {
            let set = take_nodeset(&mut args, "sum")?;
            let total = set
                .iter()
                .map(|node| string_to_number(&node_string_value(inner, node)))
                .sum();
            Ok(Value::Number(total))
        }

        Function::Floor => Ok(Value::Number(args.remove(0).to_number(inner).floor())),
        Function::Ceiling => Ok(Value::Number(args.remove(0).to_number(inner).ceil())),
        Function::Round => Ok(Value::Number(xpath_round(args.remove(0).to_number(inner)))),
    }
}

fn take_nodeset(args: &mut Vec<Value>, function: &str) -> Result<Nodeset, XPathError> {
    match args.remove(0) {
        Value::Nodeset(set) => Ok(set),
        other => Err(XPathError::Type(format!(
            "{function}() requires a node-set, got a {}",
            other.type_name()
        ))),
    }
}

/// The optional node-set argument of local-name/namespace-uri/name: the
/// first node of the set in document order, or the context node.
fn optional_node_arg(
    args: &mut Vec<Value>,
    eval: &Evaluation<'_>,
) -> Result<Option<XNode>, XPathError> {
    match args.pop() {
        None => Ok(Some(eval.node.clone())),
        Some(Value::Nodeset(mut set)) => {
            set.sort_document_order(eval.inner);
            Ok(set.first().cloned())
        }
        Some(other) => Err(XPathError::Type(format!(
            "expected a node-set argument, got a {}",
            other.type_name()
        ))),
    }
}

fn two_strings(args: &mut Vec<Value>, inner: &crate::document::DocumentInner) -> (String, String) {
    let first = args.remove(0).to_string_value(inner);
    let second = args.remove(0).to_string_value(inner);
    (first, second)
}

fn collect_id_tokens(value: &str, out: &mut Vec<String>) {
    out.extend(value.split_ascii_whitespace().map(str::to_string));
}

/// (local-name, namespace-uri, qualified-name) of a node, per the XPath
/// expanded-name rules; kinds without an expanded name yield empties.
fn expanded_name(eval: &Evaluation<'_>, node: &XNode) -> (String, String, String) {
    match node {
        NodeTarget::Tree(id) => {
            let data = eval.inner.node(*id);
            match data.kind {
                NodeKind::Element | NodeKind::Attribute => (
                    data.name.local_name().to_string(),
                    data.name.namespace_uri().to_string(),
                    data.name.qualified(),
                ),
                NodeKind::ProcessingInstruction => {
                    let target = data.node_name();
                    (target.clone(), String::new(), target)
                }
                _ => (String::new(), String::new(), String::new()),
            }
        }
        NodeTarget::Namespace(ns) => {
            (ns.prefix.clone(), String::new(), ns.prefix.clone())
        }
    }
}

/// xml:lang ancestry check: case-insensitive, a bare primary tag matches its
/// subtags (`en` matches `en-US`).
fn language_matches(eval: &Evaluation<'_>, wanted: &str) -> bool {
    if wanted.is_empty() {
        return false;
    }
    let inner = eval.inner;

    let mut current = match &eval.node {
        NodeTarget::Tree(id) => Some(*id),
        NodeTarget::Namespace(ns) => Some(ns.owner),
    };
    while let Some(id) = current {
        if inner.node(id).kind == NodeKind::Element {
            if let Some(attr) = tree::find_attribute(inner, id, "xml:lang") {
                let lang = inner.node(attr).value.clone().unwrap_or_default();
                let lang = lang.to_ascii_lowercase();
                let wanted = wanted.to_ascii_lowercase();
                return lang == wanted || lang.starts_with(&format!("{wanted}-"));
            }
        }
        current = tree::effective_parent(inner, id);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_is_half_away_from_zero() {
        assert_eq!(xpath_round(2.5), 3.0);
        assert_eq!(xpath_round(-2.5), -3.0);
        assert_eq!(xpath_round(2.4), 2.0);
        assert!(xpath_round(f64::NAN).is_nan());
        assert_eq!(xpath_round(f64::INFINITY), f64::INFINITY);
    }
}
