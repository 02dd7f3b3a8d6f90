//! The XPath lexer: turns expression source into [`ExprToken`]s, each tagged
//! with its byte offset for error reporting.
//!
//! https://www.w3.org/TR/1999/REC-xpath-19991116/#exprlex

use once_cell::sync::Lazy;
use regex::Regex;

use crate::result::XPathError;
use crate::xpath::tokens::{AxisName, ExprToken, NameTest, NodeType, Operator};

type Id<T> = (&'static str, T);

static DOUBLE_CHAR_TOKENS: [Id<ExprToken>; 5] = [
    ("<=", ExprToken::Operator(Operator::LessThanOrEqual)),
    (">=", ExprToken::Operator(Operator::GreaterThanOrEqual)),
    ("!=", ExprToken::Operator(Operator::DoesNotEqual)),
    ("//", ExprToken::Operator(Operator::DoubleForwardSlash)),
    ("..", ExprToken::ParentNode),
];

// `.` sits here because the number scan already claimed `.5` forms.
static SINGLE_CHAR_TOKENS: [Id<ExprToken>; 14] = [
    ("/", ExprToken::Operator(Operator::ForwardSlash)),
    ("(", ExprToken::LeftParen),
    (")", ExprToken::RightParen),
    ("[", ExprToken::LeftBracket),
    ("]", ExprToken::RightBracket),
    ("@", ExprToken::AtSign),
    (".", ExprToken::Period),
    ("+", ExprToken::Operator(Operator::Plus)),
    ("-", ExprToken::Operator(Operator::Minus)),
    ("|", ExprToken::Operator(Operator::Pipe)),
    ("=", ExprToken::Operator(Operator::Equal)),
    ("<", ExprToken::Operator(Operator::LessThan)),
    (">", ExprToken::Operator(Operator::GreaterThan)),
    (",", ExprToken::Comma),
];

/// Recognized only where an operand just ended (§3.7: `*` is otherwise a
/// name test, and these names are otherwise element names).
static NAMED_OPERATORS: [Id<Operator>; 5] = [
    ("and", Operator::And),
    ("or", Operator::Or),
    ("mod", Operator::Mod),
    ("div", Operator::Div),
    ("*", Operator::Star),
];

static AXES: [Id<AxisName>; 13] = [
    ("ancestor-or-self", AxisName::AncestorOrSelf),
    ("ancestor", AxisName::Ancestor),
    ("attribute", AxisName::Attribute),
    ("child", AxisName::Child),
    ("descendant-or-self", AxisName::DescendantOrSelf),
    ("descendant", AxisName::Descendant),
    ("following-sibling", AxisName::FollowingSibling),
    ("following", AxisName::Following),
    ("namespace", AxisName::Namespace),
    ("parent", AxisName::Parent),
    ("preceding-sibling", AxisName::PrecedingSibling),
    ("preceding", AxisName::Preceding),
    ("self", AxisName::SelfAxis),
];

static NODE_TYPES: [Id<NodeType>; 4] = [
    ("comment", NodeType::Comment),
    ("text", NodeType::Text),
    (
        "processing-instruction",
        NodeType::ProcessingInstruction(None),
    ),
    ("node", NodeType::Node),
];

// NCName ::= Name - (Char* ':' Char*)
static NCNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\d\W][\w.\-]*").expect("ncname regex"));

/// A token plus the byte offset where it started.
pub(crate) type SpannedToken = (usize, ExprToken);

pub(crate) struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    /// Whether the previous token ended an operand, which flips `*` and the
    /// operator names into operator interpretation.
    after_operand: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            after_operand: false,
        }
    }

    /// Lexes the whole expression.
    pub fn tokenize(source: &'a str) -> Result<Vec<SpannedToken>, XPathError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self
            .rest()
            .trim_start_matches([' ', '\t', '\r', '\n']);
        self.pos = self.source.len() - trimmed.len();
    }

    fn next_token(&mut self) -> Result<Option<SpannedToken>, XPathError> {
        self.skip_whitespace();
        if self.rest().is_empty() {
            return Ok(None);
        }

        let start = self.pos;
        let token = self.scan()?;
        self.after_operand = token.ends_operand();
        Ok(Some((start, token)))
    }

    fn scan(&mut self) -> Result<ExprToken, XPathError> {
        if self.after_operand {
            if let Some(op) = self.scan_named_operator() {
                return Ok(op);
            }
        }

        if let Some(token) = self.scan_table(&DOUBLE_CHAR_TOKENS) {
            return Ok(token);
        }
        if let Some(literal) = self.scan_literal()? {
            return Ok(literal);
        }
        if let Some(number) = self.scan_number()? {
            return Ok(number);
        }
        if let Some(token) = self.scan_table(&SINGLE_CHAR_TOKENS) {
            return Ok(token);
        }
        if let Some(axis) = self.scan_axis() {
            return Ok(axis);
        }
        if let Some(node_type) = self.scan_node_type()? {
            return Ok(node_type);
        }
        if let Some(var) = self.scan_variable_reference()? {
            return Ok(var);
        }
        if let Some(name) = self.scan_name()? {
            return Ok(name);
        }

        Err(XPathError::expression_at(
            format!(
                "unexpected character '{}'",
                self.rest().chars().next().unwrap_or('\0')
            ),
            self.pos,
        ))
    }

    fn scan_table<T: Clone + Into<ExprToken>>(&mut self, table: &[Id<T>]) -> Option<ExprToken> {
        let rest = self.rest();
        for (text, token) in table {
            if rest.starts_with(text) {
                self.pos += text.len();
                return Some(token.clone().into());
            }
        }
        None
    }

    fn scan_named_operator(&mut self) -> Option<ExprToken> {
        let rest = self.rest();
        for (text, op) in &NAMED_OPERATORS {
            if let Some(after) = rest.strip_prefix(text) {
                // A name must end here, or this is a longer name test.
                let boundary = *text == "*"
                    || !after
                        .chars()
                        .next()
                        .is_some_and(|c| crate::name::is_name_char(c));
                if boundary {
                    self.pos += text.len();
                    return Some(ExprToken::Operator(*op));
                }
            }
        }
        None
    }

    // Literal ::= '"' [^"]* '"' | "'" [^']* "'"
    fn scan_literal(&mut self) -> Result<Option<ExprToken>, XPathError> {
        let rest = self.rest();
        let quote = match rest.chars().next() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Ok(None),
        };

        match rest[1..].find(quote) {
            Some(end) => {
                let value = rest[1..end + 1].to_string();
                self.pos += end + 2;
                Ok(Some(ExprToken::Literal(value)))
            }
            None => Err(XPathError::expression_at(
                "unterminated string literal",
                self.pos,
            )),
        }
    }

    // Number ::= Digits ('.' Digits?)? | '.' Digits
    fn scan_number(&mut self) -> Result<Option<ExprToken>, XPathError> {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let leading_digit = bytes.first().is_some_and(|b| b.is_ascii_digit());
        let leading_point = bytes.first() == Some(&b'.')
            && bytes.get(1).is_some_and(|b| b.is_ascii_digit());
        if !leading_digit && !leading_point {
            return Ok(None);
        }

        let mut end = 0;
        let mut seen_point = false;
        while end < bytes.len() {
            match bytes[end] {
                b'0'..=b'9' => end += 1,
                b'.' if !seen_point => {
                    seen_point = true;
                    end += 1;
                }
                _ => break,
            }
        }

        let text = &rest[..end];
        let value: f64 = text.parse().map_err(|_| {
            XPathError::expression_at(format!("'{text}' is not a number"), self.pos)
        })?;
        self.pos += end;
        Ok(Some(ExprToken::Number(value)))
    }

    // AxisSpecifier ::= AxisName '::'
    fn scan_axis(&mut self) -> Option<ExprToken> {
        let rest = self.rest();
        for (text, axis) in &AXES {
            if let Some(after) = rest.strip_prefix(text) {
                if after.starts_with("::") {
                    self.pos += text.len() + 2;
                    return Some(ExprToken::Axis(*axis));
                }
            }
        }
        None
    }

    // NodeType '(' ')' | 'processing-instruction' '(' Literal ')'
    fn scan_node_type(&mut self) -> Result<Option<ExprToken>, XPathError> {
        let rest = self.rest();
        for (text, node_type) in &NODE_TYPES {
            let Some(after) = rest.strip_prefix(text) else {
                continue;
            };
            let args = after.trim_start_matches([' ', '\t', '\r', '\n']);
            if !args.starts_with('(') {
                continue;
            }

            let consumed_to_paren = rest.len() - args.len() + 1;
            let inner = args[1..].trim_start_matches([' ', '\t', '\r', '\n']);

            if inner.starts_with(')') {
                let consumed = rest.len() - inner.len() + 1;
                self.pos += consumed;
                return Ok(Some(ExprToken::NodeType(node_type.clone())));
            }

            if matches!(node_type, NodeType::ProcessingInstruction(_)) {
                let quote = inner.chars().next().filter(|c| *c == '"' || *c == '\'');
                if let Some(quote) = quote {
                    if let Some(end) = inner[1..].find(quote) {
                        let target = inner[1..end + 1].to_string();
                        let after_literal =
                            inner[end + 2..].trim_start_matches([' ', '\t', '\r', '\n']);
                        if let Some(stripped) = after_literal.strip_prefix(')') {
                            let consumed = rest.len() - stripped.len();
                            self.pos += consumed;
                            return Ok(Some(ExprToken::NodeType(
                                NodeType::ProcessingInstruction(Some(target)),
                            )));
                        }
                    }
                }
            }

            return Err(XPathError::expression_at(
                format!("malformed {text}() node test"),
                self.pos + consumed_to_paren,
            ));
        }
        Ok(None)
    }

    // '$' QName
    fn scan_variable_reference(&mut self) -> Result<Option<ExprToken>, XPathError> {
        if !self.rest().starts_with('$') {
            return Ok(None);
        }
        let after = &self.rest()[1..];
        match scan_qname(after) {
            Some((len, name)) => {
                self.pos += 1 + len;
                Ok(Some(ExprToken::VariableReference(name)))
            }
            None => Err(XPathError::expression_at(
                "'$' must be followed by a variable name",
                self.pos,
            )),
        }
    }

    // NameTest ::= '*' | NCName ':' '*' | QName
    // FunctionName ::= QName - NodeType
    fn scan_name(&mut self) -> Result<Option<ExprToken>, XPathError> {
        let rest = self.rest();

        if rest.starts_with('*') {
            self.pos += 1;
            return Ok(Some(ExprToken::NameTest(NameTest::any())));
        }

        let Some(prefix_match) = NCNAME.find(rest) else {
            return Ok(None);
        };
        let first = &rest[..prefix_match.end()];
        let after_first = &rest[prefix_match.end()..];

        // prefix:* and prefix:local
        if let Some(after_colon) = after_first.strip_prefix(':') {
            if after_colon.starts_with('*') {
                self.pos += first.len() + 2;
                return Ok(Some(ExprToken::NameTest(NameTest::prefixed_any(first))));
            }
            if let Some(local_match) = NCNAME.find(after_colon) {
                let local = &after_colon[..local_match.end()];
                let consumed = first.len() + 1 + local.len();
                let after_name = &rest[consumed..];
                if looks_like_call(after_name) {
                    self.pos += consumed;
                    return Ok(Some(ExprToken::FunctionName(format!("{first}:{local}"))));
                }
                self.pos += consumed;
                return Ok(Some(ExprToken::NameTest(NameTest::qualified(first, local))));
            }
        }

        if looks_like_call(after_first) {
            self.pos += first.len();
            return Ok(Some(ExprToken::FunctionName(first.to_string())));
        }

        self.pos += first.len();
        Ok(Some(ExprToken::NameTest(NameTest::local(first))))
    }
}

fn scan_qname(s: &str) -> Option<(usize, String)> {
    let first = NCNAME.find(s)?;
    let mut len = first.end();
    if let Some(rest) = s[len..].strip_prefix(':') {
        if let Some(second) = NCNAME.find(rest) {
            len += 1 + second.end();
        }
    }
    Some((len, s[..len].to_string()))
}

/// Function calls are names directly followed by `(`, whitespace allowed.
fn looks_like_call(after_name: &str) -> bool {
    after_name
        .trim_start_matches([' ', '\t', '\r', '\n'])
        .starts_with('(')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<ExprToken> {
        Lexer::tokenize(src)
            .unwrap()
            .into_iter()
            .map(|(_, t)| t)
            .collect()
    }

    #[test]
    fn punctuation_and_operators() {
        assert_eq!(
            lex("//a | /b"),
            vec![
                ExprToken::Operator(Operator::DoubleForwardSlash),
                ExprToken::NameTest(NameTest::local("a")),
                ExprToken::Operator(Operator::Pipe),
                ExprToken::Operator(Operator::ForwardSlash),
                ExprToken::NameTest(NameTest::local("b")),
            ]
        );
    }

    #[test]
    fn star_is_context_sensitive() {
        // Leading: wildcard. After an operand: multiplication.
        assert_eq!(
            lex("* div 2"),
            vec![
                ExprToken::NameTest(NameTest::any()),
                ExprToken::Operator(Operator::Div),
                ExprToken::Number(2.0),
            ]
        );
        assert_eq!(
            lex("2 * 3"),
            vec![
                ExprToken::Number(2.0),
                ExprToken::Operator(Operator::Star),
                ExprToken::Number(3.0),
            ]
        );
    }

    #[test]
    fn operator_names_can_be_element_names() {
        assert_eq!(
            lex("div/mod"),
            vec![
                ExprToken::NameTest(NameTest::local("div")),
                ExprToken::Operator(Operator::ForwardSlash),
                ExprToken::NameTest(NameTest::local("mod")),
            ]
        );
    }

    #[test]
    fn axes_and_node_types() {
        assert_eq!(
            lex("child::text()"),
            vec![
                ExprToken::Axis(AxisName::Child),
                ExprToken::NodeType(NodeType::Text),
            ]
        );
        assert_eq!(
            lex("processing-instruction('style')"),
            vec![ExprToken::NodeType(NodeType::ProcessingInstruction(Some(
                "style".into()
            )))]
        );
    }

    #[test]
    fn numbers_and_literals() {
        assert_eq!(
            lex("1.5 .5 'one' \"two\""),
            vec![
                ExprToken::Number(1.5),
                ExprToken::Number(0.5),
                ExprToken::Literal("one".into()),
                ExprToken::Literal("two".into()),
            ]
        );
    }

    #[test]
    fn functions_variables_and_qnames() {
        assert_eq!(
            lex("count($items) + p:last"),
            vec![
                ExprToken::FunctionName("count".into()),
                ExprToken::LeftParen,
                ExprToken::VariableReference("items".into()),
                ExprToken::RightParen,
                ExprToken::Operator(Operator::Plus),
                ExprToken::NameTest(NameTest::qualified("p", "last")),
            ]
        );
    }

    #[test]
    fn errors_carry_offsets() {
        let err = Lexer::tokenize("a = 'unterminated").unwrap_err();
        assert_eq!(
            err,
            XPathError::expression_at("unterminated string literal", 4)
        );
    }
}
