use std::result::Result as StdResult;

use thiserror::Error;

pub type Result<T, E = DomError> = StdResult<T, E>;

/// DOM exception values.
///
/// Every failing tree operation returns one of these; the variant carries the
/// symbolic code name in its `Display` form (`HierarchyRequestError: …`) so
/// callers can match on either the value or the rendered code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    /// A node was inserted somewhere it cannot live (wrong parent kind,
    /// ancestor cycle, second document element, …).
    #[error("HierarchyRequestError: {0}")]
    HierarchyRequest(String),

    /// A reference node is not where the caller said it was.
    #[error("NotFoundError: {0}")]
    NotFound(String),

    /// A node owned by one document was used inside another.
    #[error("WrongDocumentError: {0}")]
    WrongDocument(String),

    /// A name failed the XML Name production.
    #[error("InvalidCharacterError: {0}")]
    InvalidCharacter(String),

    /// The node kind does not permit the attempted modification.
    #[error("NoModificationAllowedError: {0}")]
    NoModificationAllowed(String),

    /// The attribute node is already owned by another element.
    #[error("InUseAttributeError: {0}")]
    InUseAttribute(String),

    /// A character-data offset or count is out of range.
    #[error("IndexSizeError: {0}")]
    IndexSize(String),

    /// A qualified name or namespace URI violates the namespace rules.
    #[error("NamespaceError: {0}")]
    Namespace(String),

    /// The object is in a state that forbids the operation.
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    /// The implementation does not support the requested object or operation.
    #[error("NotSupportedError: {0}")]
    NotSupported(String),

    /// The input byte stream is not well-formed XML. Carries the byte offset
    /// where decoding stopped.
    #[error("ParsingError: {message} (byte {offset})")]
    Parsing { message: String, offset: usize },
}

impl DomError {
    pub fn parsing<S: Into<String>>(message: S, offset: usize) -> Self {
        Self::Parsing {
            message: message.into(),
            offset,
        }
    }

    /// The symbolic code name carried by the error, without the message.
    pub fn code_name(&self) -> &'static str {
        match self {
            Self::HierarchyRequest(_) => "HierarchyRequestError",
            Self::NotFound(_) => "NotFoundError",
            Self::WrongDocument(_) => "WrongDocumentError",
            Self::InvalidCharacter(_) => "InvalidCharacterError",
            Self::NoModificationAllowed(_) => "NoModificationAllowedError",
            Self::InUseAttribute(_) => "InUseAttributeError",
            Self::IndexSize(_) => "IndexSizeError",
            Self::Namespace(_) => "NamespaceError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::NotSupported(_) => "NotSupportedError",
            Self::Parsing { .. } => "ParsingError",
        }
    }
}

/// XPath errors, separate from the DOM set because the code names differ.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum XPathError {
    /// The expression source does not parse. `position` is the byte offset
    /// into the expression where parsing stopped, when known.
    #[error("INVALID_EXPRESSION_ERR: {message}{}", position_suffix(.position))]
    InvalidExpression {
        message: String,
        position: Option<usize>,
    },

    /// A result accessor was called for a shape the result does not have.
    #[error("TYPE_ERR: {0}")]
    Type(String),

    /// The context node belongs to a different document than the evaluator.
    #[error("WRONG_DOCUMENT_ERR: {0}")]
    WrongDocument(String),

    /// A prefix in the expression could not be resolved.
    #[error("NAMESPACE_ERR: {0}")]
    Namespace(String),

    /// The requested result type or construct is not supported.
    #[error("NOT_SUPPORTED_ERR: {0}")]
    NotSupported(String),

    /// The result is no longer consumable (its document has mutated).
    #[error("INVALID_STATE_ERR: {0}")]
    InvalidState(String),
}

impl XPathError {
    pub fn expression<S: Into<String>>(message: S) -> Self {
        Self::InvalidExpression {
            message: message.into(),
            position: None,
        }
    }

    pub fn expression_at<S: Into<String>>(message: S, position: usize) -> Self {
        Self::InvalidExpression {
            message: message.into(),
            position: Some(position),
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            Self::InvalidExpression { .. } => "INVALID_EXPRESSION_ERR",
            Self::Type(_) => "TYPE_ERR",
            Self::WrongDocument(_) => "WRONG_DOCUMENT_ERR",
            Self::Namespace(_) => "NAMESPACE_ERR",
            Self::NotSupported(_) => "NOT_SUPPORTED_ERR",
            Self::InvalidState(_) => "INVALID_STATE_ERR",
        }
    }
}

fn position_suffix(position: &Option<usize>) -> String {
    match position {
        Some(pos) => format!(" (offset {pos})"),
        None => String::new(),
    }
}
