//! Expression AST.
//!
//! https://www.w3.org/TR/1999/REC-xpath-19991116/#section-Expressions
//!
//! Every AST node implements [`Expression`] and evaluates against an
//! [`Evaluation`] context. Node-sets produced by paths and unions are
//! restored to document order before they leave the producing expression.

use std::fmt;

use ahash::AHashSet;

use crate::node::NodeTarget;
use crate::result::XPathError;
use crate::xpath::context::{axis_nodes, Evaluation};
use crate::xpath::functions::{self, Function};
use crate::xpath::nodetest::NodeTest;
use crate::xpath::tokens::AxisName;
use crate::xpath::value::{compare_equal, Nodeset, Value};

pub type ExpressionArg = Box<dyn Expression>;

pub trait Expression: fmt::Debug + Send + Sync {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError>;
}

// ---- primary expressions --------------------------------------------------

/// A string or number literal.
#[derive(Debug)]
pub struct Literal(Value);

impl From<Value> for Literal {
    fn from(value: Value) -> Self {
        Literal(value)
    }
}

impl Expression for Literal {
    fn eval(&self, _eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        Ok(self.0.clone())
    }
}

/// `$name`
#[derive(Debug)]
pub struct VariableReference(pub String);

impl Expression for VariableReference {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        eval.variable(&self.0)
            .ok_or_else(|| XPathError::expression(format!("unknown variable ${}", self.0)))
    }
}

/// The document root selected by an absolute path.
#[derive(Debug)]
pub struct RootNode;

impl Expression for RootNode {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        Ok(Value::Nodeset(Nodeset::from_nodes(vec![eval.root()])))
    }
}

/// The context node a relative path starts from.
#[derive(Debug)]
pub struct ContextNode;

impl Expression for ContextNode {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        Ok(Value::Nodeset(Nodeset::from_nodes(vec![eval.node.clone()])))
    }
}

// ---- boolean connectives --------------------------------------------------

/// `or`, short-circuiting on boolean conversion.
#[derive(Debug)]
pub struct Or {
    left: ExpressionArg,
    right: ExpressionArg,
}

impl Or {
    pub fn new(left: ExpressionArg, right: ExpressionArg) -> Self {
        Self { left, right }
    }
}

impl Expression for Or {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        if self.left.eval(eval)?.to_boolean() {
            return Ok(Value::Boolean(true));
        }
        Ok(Value::Boolean(self.right.eval(eval)?.to_boolean()))
    }
}

/// `and`, short-circuiting on boolean conversion.
#[derive(Debug)]
pub struct And {
    left: ExpressionArg,
    right: ExpressionArg,
}

impl And {
    pub fn new(left: ExpressionArg, right: ExpressionArg) -> Self {
        Self { left, right }
    }
}

impl Expression for And {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        if !self.left.eval(eval)?.to_boolean() {
            return Ok(Value::Boolean(false));
        }
        Ok(Value::Boolean(self.right.eval(eval)?.to_boolean()))
    }
}

// ---- comparisons ----------------------------------------------------------

/// `=` and `!=` with the node-set pairing rules.
#[derive(Debug)]
pub struct Equality {
    left: ExpressionArg,
    right: ExpressionArg,
    negate: bool,
}

impl Equality {
    pub fn equal(left: ExpressionArg, right: ExpressionArg) -> Self {
        Self {
            left,
            right,
            negate: false,
        }
    }

    pub fn not_equal(left: ExpressionArg, right: ExpressionArg) -> Self {
        Self {
            left,
            right,
            negate: true,
        }
    }
}

impl Expression for Equality {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        let left = self.left.eval(eval)?;
        let right = self.right.eval(eval)?;
        Ok(Value::Boolean(compare_equal(
            eval.inner,
            &left,
            &right,
            self.negate,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationalOp {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// `<` `<=` `>` `>=`: always numeric.
#[derive(Debug)]
pub struct Relational {
    op: RelationalOp,
    left: ExpressionArg,
    right: ExpressionArg,
}

impl Relational {
    pub fn new(op: RelationalOp, left: ExpressionArg, right: ExpressionArg) -> Self {
        Self { op, left, right }
    }
}

impl Expression for Relational {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        let left = self.left.eval(eval)?.to_number(eval.inner);
        let right = self.right.eval(eval)?.to_number(eval.inner);
        let result = match self.op {
            RelationalOp::LessThan => left < right,
            RelationalOp::LessThanOrEqual => left <= right,
            RelationalOp::GreaterThan => left > right,
            RelationalOp::GreaterThanOrEqual => left >= right,
        };
        Ok(Value::Boolean(result))
    }
}

// ---- arithmetic -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug)]
pub struct Arithmetic {
    op: ArithmeticOp,
    left: ExpressionArg,
    right: ExpressionArg,
}

impl Arithmetic {
    pub fn new(op: ArithmeticOp, left: ExpressionArg, right: ExpressionArg) -> Self {
        Self { op, left, right }
    }
}

impl Expression for Arithmetic {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        let left = self.left.eval(eval)?.to_number(eval.inner);
        let right = self.right.eval(eval)?.to_number(eval.inner);
        let result = match self.op {
            ArithmeticOp::Add => left + right,
            ArithmeticOp::Subtract => left - right,
            // IEEE division gives div-by-zero the sign of the dividend.
            ArithmeticOp::Multiply => left * right,
            ArithmeticOp::Divide => left / right,
            // mod is a - b * trunc(a/b); a zero divisor falls out as NaN.
            ArithmeticOp::Modulo => left - right * (left / right).trunc(),
        };
        Ok(Value::Number(result))
    }
}

/// Unary minus.
#[derive(Debug)]
pub struct Negate(pub ExpressionArg);

impl Expression for Negate {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        Ok(Value::Number(-self.0.eval(eval)?.to_number(eval.inner)))
    }
}

// ---- union ----------------------------------------------------------------

/// `|`: both sides must be node-sets; the result is re-sorted and deduped.
#[derive(Debug)]
pub struct Union {
    left: ExpressionArg,
    right: ExpressionArg,
}

impl Union {
    pub fn new(left: ExpressionArg, right: ExpressionArg) -> Self {
        Self { left, right }
    }
}

impl Expression for Union {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        let mut left = self.left.eval(eval)?.into_nodeset()?;
        let right = self.right.eval(eval)?.into_nodeset()?;
        left.extend(right);
        left.sort_document_order(eval.inner);
        Ok(Value::Nodeset(left))
    }
}

// ---- paths ----------------------------------------------------------------

/// A location path: a starting expression plus a chain of steps.
#[derive(Debug)]
pub struct Path {
    start: ExpressionArg,
    steps: Vec<Step>,
}

impl Path {
    pub fn new(start: ExpressionArg, steps: Vec<Step>) -> Self {
        Self { start, steps }
    }
}

impl Expression for Path {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        let mut set = self.start.eval(eval)?.into_nodeset()?;
        for step in &self.steps {
            set.sort_document_order(eval.inner);
            set = step.evaluate(eval, set)?;
        }
        set.sort_document_order(eval.inner);
        Ok(Value::Nodeset(set))
    }
}

/// One step: axis, node test, predicates.
#[derive(Debug)]
pub struct Step {
    axis: AxisName,
    node_test: Box<dyn NodeTest>,
    predicates: Vec<Predicate>,
}

impl Step {
    pub fn new(
        axis: AxisName,
        node_test: Box<dyn NodeTest>,
        predicates: Vec<ExpressionArg>,
    ) -> Self {
        Self {
            axis,
            node_test,
            predicates: predicates.into_iter().map(Predicate).collect(),
        }
    }

    /// Evaluates the step for every node of the (document-ordered) input
    /// set: axis plus node test per node, duplicates removed, predicates
    /// applied sequentially over the combined step output.
    fn evaluate(&self, eval: &Evaluation<'_>, input: Nodeset) -> Result<Nodeset, XPathError> {
        let size = input.len();
        let mut collected = Nodeset::new();

        for (index, node) in input.iter().enumerate() {
            let context = eval.with_node(node.clone(), index + 1, size);
            for candidate in axis_nodes(&context, self.axis, node) {
                if self.node_test.matches(&context, &candidate) {
                    collected.push(candidate);
                }
            }
        }

        dedup_preserving_order(&mut collected);

        for predicate in &self.predicates {
            collected = predicate.filter(eval, collected)?;
        }
        Ok(collected)
    }
}

/// Drops later duplicates, keeping the first occurrence in step order.
fn dedup_preserving_order(set: &mut Nodeset) {
    let mut seen: AHashSet<(u8, usize)> = AHashSet::new();
    set.retain(|node| {
        let key = match node {
            NodeTarget::Tree(id) => (0u8, id.index()),
            NodeTarget::Namespace(ns) => (1u8, std::sync::Arc::as_ptr(ns) as usize),
        };
        seen.insert(key)
    });
}

// https://www.w3.org/TR/1999/REC-xpath-19991116/#predicates
#[derive(Debug)]
pub struct Predicate(ExpressionArg);

impl Predicate {
    /// Keeps the nodes for which the predicate holds: a numeric result
    /// selects by position (`round(number) == position`), anything else by
    /// boolean conversion.
    fn filter(&self, eval: &Evaluation<'_>, set: Nodeset) -> Result<Nodeset, XPathError> {
        let size = set.len();
        let mut kept = Nodeset::new();

        for (index, node) in set.iter().enumerate() {
            let context = eval.with_node(node.clone(), index + 1, size);
            let value = self.0.eval(&context)?;
            let holds = match value {
                Value::Number(n) => functions::xpath_round(n) == (index + 1) as f64,
                other => other.to_boolean(),
            };
            if holds {
                kept.push(node.clone());
            }
        }
        Ok(kept)
    }
}

/// A primary expression filtered by predicates, possibly continuing into a
/// relative path (`FilterExpr ('/' | '//') RelativeLocationPath`).
#[derive(Debug)]
pub struct Filter {
    primary: ExpressionArg,
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new(primary: ExpressionArg, predicates: Vec<ExpressionArg>) -> Self {
        Self {
            primary,
            predicates: predicates.into_iter().map(Predicate).collect(),
        }
    }
}

impl Expression for Filter {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        let value = self.primary.eval(eval)?;
        if self.predicates.is_empty() {
            return Ok(value);
        }

        let mut set = value.into_nodeset()?;
        set.sort_document_order(eval.inner);
        for predicate in &self.predicates {
            set = predicate.filter(eval, set)?;
        }
        Ok(Value::Nodeset(set))
    }
}

// ---- function calls -------------------------------------------------------

#[derive(Debug)]
pub struct FunctionCall {
    function: Function,
    args: Vec<ExpressionArg>,
}

impl FunctionCall {
    pub fn new(function: Function, args: Vec<ExpressionArg>) -> Self {
        Self { function, args }
    }
}

impl Expression for FunctionCall {
    fn eval(&self, eval: &Evaluation<'_>) -> Result<Value, XPathError> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(arg.eval(eval)?);
        }
        functions::call(self.function, args, eval)
    }
}
