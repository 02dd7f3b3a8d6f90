//! Recursive descent over the XPath 1.0 grammar.
//!
//! https://www.w3.org/TR/1999/REC-xpath-19991116/#section-Expressions
//!
//! Precedence low→high: Or, And, Equality, Relational, Additive,
//! Multiplicative, Unary, Union, Path. Abbreviations are rewritten at the
//! token level before parsing (`@` → `attribute::`, `//` →
//! `/descendant-or-self::node()/`, `.` → `self::node()`,
//! `..` → `parent::node()`).

use std::iter::Peekable;
use std::vec::IntoIter;

use crate::result::XPathError;
use crate::xpath::expressions::{
    And, Arithmetic, ArithmeticOp, ContextNode, Equality, ExpressionArg, Filter, FunctionCall,
    Literal, Negate, Or, Path, Relational, RelationalOp, RootNode, Step, Union,
    VariableReference,
};
use crate::xpath::functions::Function;
use crate::xpath::lexer::{Lexer, SpannedToken};
use crate::xpath::nodetest::{
    AnyNodeTest, AttributeTest, CommentTest, ElementTest, NamespaceTest, NodeTest,
    ProcessingInstructionTest, TextTest,
};
use crate::xpath::tokens::{AxisName, ExprToken, NodeType, Operator, PrincipalNodeType};
use crate::xpath::value::Value;

/// Compiles `source` into an expression tree.
pub(crate) fn parse(source: &str) -> Result<ExpressionArg, XPathError> {
    let raw = Lexer::tokenize(source)?;
    if raw.is_empty() {
        return Err(XPathError::expression("empty expression"));
    }

    let mut stepper = Stepper::new(expand_abbreviations(raw), source.len());
    let expr = parse_expression(&mut stepper)?.ok_or_else(|| {
        XPathError::expression_at("expected an expression", stepper.pos())
    })?;

    if let Some((pos, token)) = stepper.peek() {
        return Err(XPathError::expression_at(
            format!("trailing tokens starting with {token:?}"),
            *pos,
        ));
    }
    Ok(expr)
}

// https://www.w3.org/TR/1999/REC-xpath-19991116/#path-abbrev
fn expand_abbreviations(tokens: Vec<SpannedToken>) -> Vec<SpannedToken> {
    let mut out = Vec::with_capacity(tokens.len());
    for (pos, token) in tokens {
        match token {
            ExprToken::AtSign => out.push((pos, AxisName::Attribute.into())),

            ExprToken::Operator(Operator::DoubleForwardSlash) => out.extend([
                (pos, Operator::ForwardSlash.into()),
                (pos, AxisName::DescendantOrSelf.into()),
                (pos, NodeType::Node.into()),
                (pos, Operator::ForwardSlash.into()),
            ]),

            ExprToken::Period => out.extend([
                (pos, AxisName::SelfAxis.into()),
                (pos, NodeType::Node.into()),
            ]),

            ExprToken::ParentNode => out.extend([
                (pos, AxisName::Parent.into()),
                (pos, NodeType::Node.into()),
            ]),

            other => out.push((pos, other)),
        }
    }
    out
}

type ExpressionResult = Result<Option<ExpressionArg>, XPathError>;

// Expr ::= OrExpr
fn parse_expression(step: &mut Stepper) -> ExpressionResult {
    parse_or_expression(step)
}

// OrExpr ::= AndExpr | OrExpr 'or' AndExpr
fn parse_or_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(mut left) = parse_and_expression(step)? else {
        return Ok(None);
    };
    while step.consume_if(Operator::Or) {
        let right = require(parse_and_expression(step)?, step, "'or'")?;
        left = Box::new(Or::new(left, right));
    }
    Ok(Some(left))
}

// AndExpr ::= EqualityExpr | AndExpr 'and' EqualityExpr
fn parse_and_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(mut left) = parse_equality_expression(step)? else {
        return Ok(None);
    };
    while step.consume_if(Operator::And) {
        let right = require(parse_equality_expression(step)?, step, "'and'")?;
        left = Box::new(And::new(left, right));
    }
    Ok(Some(left))
}

// EqualityExpr ::= RelationalExpr | EqualityExpr ('=' | '!=') RelationalExpr
fn parse_equality_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(mut left) = parse_relational_expression(step)? else {
        return Ok(None);
    };
    loop {
        if step.consume_if(Operator::Equal) {
            let right = require(parse_relational_expression(step)?, step, "'='")?;
            left = Box::new(Equality::equal(left, right));
        } else if step.consume_if(Operator::DoesNotEqual) {
            let right = require(parse_relational_expression(step)?, step, "'!='")?;
            left = Box::new(Equality::not_equal(left, right));
        } else {
            return Ok(Some(left));
        }
    }
}

// RelationalExpr ::= AdditiveExpr
//                  | RelationalExpr ('<' | '>' | '<=' | '>=') AdditiveExpr
fn parse_relational_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(mut left) = parse_additive_expression(step)? else {
        return Ok(None);
    };
    loop {
        let op = if step.consume_if(Operator::LessThan) {
            RelationalOp::LessThan
        } else if step.consume_if(Operator::LessThanOrEqual) {
            RelationalOp::LessThanOrEqual
        } else if step.consume_if(Operator::GreaterThan) {
            RelationalOp::GreaterThan
        } else if step.consume_if(Operator::GreaterThanOrEqual) {
            RelationalOp::GreaterThanOrEqual
        } else {
            return Ok(Some(left));
        };
        let right = require(parse_additive_expression(step)?, step, "comparison")?;
        left = Box::new(Relational::new(op, left, right));
    }
}

// AdditiveExpr ::= MultiplicativeExpr
//                | AdditiveExpr ('+' | '-') MultiplicativeExpr
fn parse_additive_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(mut left) = parse_multiplicative_expression(step)? else {
        return Ok(None);
    };
    loop {
        let op = if step.consume_if(Operator::Plus) {
            ArithmeticOp::Add
        } else if step.consume_if(Operator::Minus) {
            ArithmeticOp::Subtract
        } else {
            return Ok(Some(left));
        };
        let right = require(parse_multiplicative_expression(step)?, step, "'+'/'-'")?;
        left = Box::new(Arithmetic::new(op, left, right));
    }
}

// MultiplicativeExpr ::= UnaryExpr
//                      | MultiplicativeExpr ('*' | 'div' | 'mod') UnaryExpr
fn parse_multiplicative_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(mut left) = parse_unary_expression(step)? else {
        return Ok(None);
    };
    loop {
        let op = if step.consume_if(Operator::Star) {
            ArithmeticOp::Multiply
        } else if step.consume_if(Operator::Div) {
            ArithmeticOp::Divide
        } else if step.consume_if(Operator::Mod) {
            ArithmeticOp::Modulo
        } else {
            return Ok(Some(left));
        };
        let right = require(parse_unary_expression(step)?, step, "multiplicative operator")?;
        left = Box::new(Arithmetic::new(op, left, right));
    }
}

// UnaryExpr ::= UnionExpr | '-' UnaryExpr
fn parse_unary_expression(step: &mut Stepper) -> ExpressionResult {
    if step.consume_if(Operator::Minus) {
        let operand = require(parse_unary_expression(step)?, step, "unary '-'")?;
        return Ok(Some(Box::new(Negate(operand))));
    }
    parse_union_expression(step)
}

// UnionExpr ::= PathExpr | UnionExpr '|' PathExpr
fn parse_union_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(mut left) = parse_path_expression(step)? else {
        return Ok(None);
    };
    while step.consume_if(Operator::Pipe) {
        let right = require(parse_path_expression(step)?, step, "'|'")?;
        left = Box::new(Union::new(left, right));
    }
    Ok(Some(left))
}

// PathExpr ::= LocationPath
//            | FilterExpr
//            | FilterExpr '/' RelativeLocationPath
fn parse_path_expression(step: &mut Stepper) -> ExpressionResult {
    if let Some(path) = parse_location_path(step)? {
        return Ok(Some(path));
    }

    let Some(filter) = parse_filter_expression(step)? else {
        return Ok(None);
    };

    if step.consume_if(Operator::ForwardSlash) {
        let steps = parse_steps(step)?;
        if steps.is_empty() {
            return Err(XPathError::expression_at(
                "expected a step after '/'",
                step.pos(),
            ));
        }
        return Ok(Some(Box::new(Path::new(filter, steps))));
    }
    Ok(Some(filter))
}

// LocationPath ::= RelativeLocationPath | AbsoluteLocationPath
// AbsoluteLocationPath ::= '/' RelativeLocationPath?
fn parse_location_path(step: &mut Stepper) -> ExpressionResult {
    if step.consume_if(Operator::ForwardSlash) {
        let steps = parse_steps(step)?;
        if steps.is_empty() {
            return Ok(Some(Box::new(RootNode)));
        }
        return Ok(Some(Box::new(Path::new(Box::new(RootNode), steps))));
    }

    let steps = parse_steps(step)?;
    if steps.is_empty() {
        return Ok(None);
    }
    Ok(Some(Box::new(Path::new(Box::new(ContextNode), steps))))
}

// RelativeLocationPath ::= Step | RelativeLocationPath '/' Step
fn parse_steps(step: &mut Stepper) -> Result<Vec<Step>, XPathError> {
    let mut steps = Vec::new();
    let Some(first) = parse_step(step)? else {
        return Ok(steps);
    };
    steps.push(first);

    while step.consume_if(Operator::ForwardSlash) {
        match parse_step(step)? {
            Some(next) => steps.push(next),
            None => {
                return Err(XPathError::expression_at(
                    "expected a step after '/'",
                    step.pos(),
                ));
            }
        }
    }
    Ok(steps)
}

// Step ::= AxisSpecifier NodeTest Predicate* | AbbreviatedStep
fn parse_step(step: &mut Stepper) -> Result<Option<Step>, XPathError> {
    let explicit_axis = match step.peek() {
        Some((_, ExprToken::Axis(axis))) => {
            let axis = *axis;
            step.advance();
            Some(axis)
        }
        _ => None,
    };
    let axis = explicit_axis.unwrap_or(AxisName::Child);

    let node_test: Box<dyn NodeTest> = match step.peek() {
        Some((_, ExprToken::NodeType(_))) => {
            let Some((_, ExprToken::NodeType(node_type))) = step.advance() else {
                unreachable!("peeked a node type");
            };
            match node_type {
                NodeType::Node => Box::new(AnyNodeTest),
                NodeType::Text => Box::new(TextTest),
                NodeType::Comment => Box::new(CommentTest),
                NodeType::ProcessingInstruction(target) => {
                    Box::new(ProcessingInstructionTest::new(target))
                }
            }
        }
        Some((_, ExprToken::NameTest(_))) => {
            let Some((_, ExprToken::NameTest(name))) = step.advance() else {
                unreachable!("peeked a name test");
            };
            match axis.principal_node_type() {
                PrincipalNodeType::Attribute => Box::new(AttributeTest::new(name)),
                PrincipalNodeType::Namespace => Box::new(NamespaceTest::new(name)),
                PrincipalNodeType::Element => Box::new(ElementTest::new(name)),
            }
        }
        _ => {
            if explicit_axis.is_some() {
                return Err(XPathError::expression_at(
                    "expected a node test after the axis",
                    step.pos(),
                ));
            }
            return Ok(None);
        }
    };

    let predicates = parse_predicates(step)?;
    Ok(Some(Step::new(axis, node_test, predicates)))
}

// Predicate ::= '[' Expr ']'
fn parse_predicates(step: &mut Stepper) -> Result<Vec<ExpressionArg>, XPathError> {
    let mut predicates = Vec::new();
    while step.consume_if(ExprToken::LeftBracket) {
        let expr = parse_expression(step)?.ok_or_else(|| {
            XPathError::expression_at("expected a predicate expression", step.pos())
        })?;
        step.expect(ExprToken::RightBracket)?;
        predicates.push(expr);
    }
    Ok(predicates)
}

// FilterExpr ::= PrimaryExpr | FilterExpr Predicate
fn parse_filter_expression(step: &mut Stepper) -> ExpressionResult {
    let Some(primary) = parse_primary_expression(step)? else {
        return Ok(None);
    };
    let predicates = parse_predicates(step)?;
    if predicates.is_empty() {
        Ok(Some(primary))
    } else {
        Ok(Some(Box::new(Filter::new(primary, predicates))))
    }
}

// PrimaryExpr ::= VariableReference | '(' Expr ')' | Literal | Number
//               | FunctionCall
fn parse_primary_expression(step: &mut Stepper) -> ExpressionResult {
    match step.peek() {
        Some((_, ExprToken::Literal(_))) => {
            let Some((_, ExprToken::Literal(value))) = step.advance() else {
                unreachable!("peeked a literal");
            };
            Ok(Some(Box::new(Literal::from(Value::String(value)))))
        }

        Some((_, ExprToken::Number(_))) => {
            let Some((_, ExprToken::Number(value))) = step.advance() else {
                unreachable!("peeked a number");
            };
            Ok(Some(Box::new(Literal::from(Value::Number(value)))))
        }

        Some((_, ExprToken::VariableReference(_))) => {
            let Some((_, ExprToken::VariableReference(name))) = step.advance() else {
                unreachable!("peeked a variable reference");
            };
            Ok(Some(Box::new(VariableReference(name))))
        }

        Some((_, ExprToken::LeftParen)) => {
            step.advance();
            let expr = parse_expression(step)?.ok_or_else(|| {
                XPathError::expression_at("expected an expression after '('", step.pos())
            })?;
            step.expect(ExprToken::RightParen)?;
            Ok(Some(expr))
        }

        Some((_, ExprToken::FunctionName(_))) => parse_function_call(step),

        _ => Ok(None),
    }
}

// FunctionCall ::= FunctionName '(' (Argument (',' Argument)*)? ')'
fn parse_function_call(step: &mut Stepper) -> ExpressionResult {
    let Some((name_pos, ExprToken::FunctionName(name))) = step.advance() else {
        unreachable!("caller peeked a function name");
    };

    let function = Function::from_name(&name).ok_or_else(|| {
        XPathError::expression_at(format!("unknown function '{name}'"), name_pos)
    })?;

    step.expect(ExprToken::LeftParen)?;
    let mut args: Vec<ExpressionArg> = Vec::new();
    if !step.consume_if(ExprToken::RightParen) {
        loop {
            let arg = parse_expression(step)?.ok_or_else(|| {
                XPathError::expression_at("expected a function argument", step.pos())
            })?;
            args.push(arg);
            if step.consume_if(ExprToken::Comma) {
                continue;
            }
            step.expect(ExprToken::RightParen)?;
            break;
        }
    }

    let (min, max) = function.arity();
    if args.len() < min || max.is_some_and(|max| args.len() > max) {
        let expected = match max {
            Some(max) if max == min => format!("{min}"),
            Some(max) => format!("{min}..{max}"),
            None => format!("at least {min}"),
        };
        return Err(XPathError::expression_at(
            format!("{name}() takes {expected} arguments, got {}", args.len()),
            name_pos,
        ));
    }

    Ok(Some(Box::new(FunctionCall::new(function, args))))
}

fn require(
    expr: Option<ExpressionArg>,
    step: &mut Stepper,
    after: &str,
) -> Result<ExpressionArg, XPathError> {
    expr.ok_or_else(|| {
        XPathError::expression_at(format!("missing operand after {after}"), step.pos())
    })
}

/// Token cursor with lookahead and positions for error reporting.
struct Stepper {
    tokens: Peekable<IntoIter<SpannedToken>>,
    source_len: usize,
}

impl Stepper {
    fn new(tokens: Vec<SpannedToken>, source_len: usize) -> Self {
        Self {
            tokens: tokens.into_iter().peekable(),
            source_len,
        }
    }

    fn peek(&mut self) -> Option<&SpannedToken> {
        self.tokens.peek()
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        self.tokens.next()
    }

    /// Offset of the next token, or the end of the source.
    fn pos(&mut self) -> usize {
        self.tokens.peek().map(|(pos, _)| *pos).unwrap_or(self.source_len)
    }

    fn consume_if<T: Into<ExprToken>>(&mut self, token: T) -> bool {
        let token = token.into();
        if self.tokens.peek().is_some_and(|(_, t)| *t == token) {
            self.tokens.next();
            true
        } else {
            false
        }
    }

    fn expect<T: Into<ExprToken>>(&mut self, token: T) -> Result<(), XPathError> {
        let token = token.into();
        match self.advance() {
            Some((_, found)) if found == token => Ok(()),
            Some((pos, found)) => Err(XPathError::expression_at(
                format!("expected {token:?}, found {found:?}"),
                pos,
            )),
            None => Err(XPathError::expression_at(
                format!("expected {token:?} before the end of the expression"),
                self.source_len,
            )),
        }
    }
}
