//! XML names: the `Name` production, qualified-name handling, and the two
//! reserved namespaces.
//!
//! https://www.w3.org/TR/REC-xml/#NT-Name
//! https://www.w3.org/TR/REC-xml-names/

use std::fmt;

use crate::result::{DomError, Result};

/// The namespace the `xml` prefix is permanently bound to.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// The namespace every `xmlns`/`xmlns:*` declaration attribute lives in.
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// NameStartChar, minus the colon handling callers do themselves.
pub fn is_name_start_char(c: char) -> bool {
    matches!(c,
        'A'..='Z' | 'a'..='z' | '_' | ':'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

/// NameChar ::= NameStartChar | "-" | "." | [0-9] | #xB7 | [#x0300-#x036F] | [#x203F-#x2040]
pub fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9'
            | '\u{B7}'
            | '\u{300}'..='\u{36F}'
            | '\u{203F}'..='\u{2040}')
}

/// True iff `s` is non-empty and matches the XML `Name` production.
pub fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if is_name_start_char(first) => chars.all(is_name_char),
        _ => false,
    }
}

/// True iff `s` is a `Name` with no colon (an `NCName`).
pub fn is_valid_ncname(s: &str) -> bool {
    is_valid_name(s) && !s.contains(':')
}

/// An expanded node name: namespace URI, prefix, and local part.
///
/// The empty string stands in for "no namespace" and "no prefix"; the
/// qualified form is reassembled on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    namespace_uri: String,
    prefix: String,
    local: String,
}

impl Name {
    /// A name outside any namespace, validated against the Name production.
    pub fn parse(qualified: &str) -> Result<Self> {
        if !is_valid_name(qualified) {
            return Err(DomError::InvalidCharacter(format!(
                "'{qualified}' is not a valid XML name"
            )));
        }

        let (prefix, local) = split_qualified(qualified)?;

        Ok(Self {
            namespace_uri: String::new(),
            prefix: prefix.to_string(),
            local: local.to_string(),
        })
    }

    /// A namespace-qualified name. Enforces the reserved-namespace rules:
    /// the `xml` prefix and URI imply each other, and the `xmlns` prefix (or
    /// the literal `xmlns` name) is inseparable from the xmlns namespace.
    pub fn parse_ns(namespace_uri: &str, qualified: &str) -> Result<Self> {
        if !is_valid_name(qualified) {
            return Err(DomError::InvalidCharacter(format!(
                "'{qualified}' is not a valid XML name"
            )));
        }

        let (prefix, local) = split_qualified(qualified)?;

        if !prefix.is_empty() && namespace_uri.is_empty() {
            return Err(DomError::Namespace(format!(
                "prefixed name '{qualified}' requires a namespace URI"
            )));
        }
        if prefix == "xml" && namespace_uri != XML_NAMESPACE {
            return Err(DomError::Namespace(format!(
                "prefix 'xml' may only be bound to '{XML_NAMESPACE}'"
            )));
        }
        if namespace_uri == XML_NAMESPACE && prefix != "xml" {
            return Err(DomError::Namespace(format!(
                "namespace '{XML_NAMESPACE}' is reserved for the 'xml' prefix"
            )));
        }
        let is_xmlns_name = prefix == "xmlns" || (prefix.is_empty() && local == "xmlns");
        if is_xmlns_name && namespace_uri != XMLNS_NAMESPACE {
            return Err(DomError::Namespace(format!(
                "'{qualified}' must be in the '{XMLNS_NAMESPACE}' namespace"
            )));
        }
        if namespace_uri == XMLNS_NAMESPACE && !is_xmlns_name {
            return Err(DomError::Namespace(format!(
                "namespace '{XMLNS_NAMESPACE}' is reserved for namespace declarations"
            )));
        }

        Ok(Self {
            namespace_uri: namespace_uri.to_string(),
            prefix: prefix.to_string(),
            local: local.to_string(),
        })
    }

    /// A name that skips validation, for internal constants (`#text`,
    /// PI targets already validated elsewhere, …).
    pub(crate) fn raw(namespace_uri: &str, prefix: &str, local: &str) -> Self {
        Self {
            namespace_uri: namespace_uri.to_string(),
            prefix: prefix.to_string(),
            local: local.to_string(),
        }
    }

    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// `prefix:local`, or just `local` when there is no prefix.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }

    /// True when this name is an `xmlns` or `xmlns:*` declaration attribute.
    pub fn is_namespace_declaration(&self) -> bool {
        self.prefix == "xmlns" || (self.prefix.is_empty() && self.local == "xmlns")
    }

    /// For a declaration attribute, the prefix being declared; empty for the
    /// default-namespace declaration.
    pub fn declared_prefix(&self) -> &str {
        if self.prefix == "xmlns" {
            &self.local
        } else {
            ""
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{}:{}", self.prefix, self.local)
        }
    }
}

/// Splits `prefix:local`, rejecting empty parts and second colons.
fn split_qualified(qualified: &str) -> Result<(&str, &str)> {
    match qualified.split_once(':') {
        None => Ok(("", qualified)),
        Some((prefix, local)) => {
            if prefix.is_empty() || local.is_empty() || local.contains(':') {
                Err(DomError::Namespace(format!(
                    "'{qualified}' is not a well-formed qualified name"
                )))
            } else {
                Ok((prefix, local))
            }
        }
    }
}
