//! Expression constructors
//!
//! This module provides both function-based and operator-based expressions
//! over [`Node`]s:
//!
//! ```ignore
//! // Function style
//! and([eq(&first_name, "Karen"), is_null(&manager)])
//!
//! // Operator style (via std::ops traits)
//! budget.clone() - spent.clone()   // Sub
//! cond_a & cond_b                  // BitAnd is logical AND
//! !cond                            // Not
//! ```
//!
//! Values convert implicitly, so `eq(&name, "Karen")` binds a parameter.

use super::{Node, NodeKind};
use crate::value::Value;
use compact_str::CompactString;
use smallvec::SmallVec;

// =============================================================================
// Operators
// =============================================================================

/// Operator of an [`Operation`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    And,
    Or,
    Xor,
    Not,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    Like,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negative,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    BitInvert,
    /// Matches every row; renders as a true constant
    All,
    /// Matches no row; renders as a false constant
    None,
    /// Named SQL function call
    Function,
}

impl Operator {
    /// Infix SQL text for operators that render between their operands.
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::GreaterThan => ">",
            Operator::GreaterEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessEqual => "<=",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Xor => "XOR",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::BitAnd => "&",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::ShiftLeft => "<<",
            Operator::ShiftRight => ">>",
            _ => "",
        }
    }
}

/// An expression node: an operator applied to operand nodes.
#[derive(Debug, Clone)]
pub struct Operation {
    pub(crate) op: Operator,
    pub(crate) operands: SmallVec<[Node; 2]>,
    pub(crate) func: CompactString,
    pub(crate) aggregate: bool,
    pub(crate) distinct: bool,
}

impl Operation {
    #[inline]
    pub fn op(&self) -> Operator {
        self.op
    }

    #[inline]
    pub fn operands(&self) -> &[Node] {
        &self.operands
    }

    #[inline]
    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }
}

fn operation(op: Operator, operands: SmallVec<[Node; 2]>) -> Node {
    Node::new(
        NodeKind::Operation(Operation {
            op,
            operands,
            func: CompactString::default(),
            aggregate: false,
            distinct: false,
        }),
        None,
    )
}

fn binary(op: Operator, left: impl Into<Node>, right: impl Into<Node>) -> Node {
    let mut operands = SmallVec::new();
    operands.push(left.into());
    operands.push(right.into());
    operation(op, operands)
}

fn unary(op: Operator, operand: impl Into<Node>) -> Node {
    let mut operands = SmallVec::new();
    operands.push(operand.into());
    operation(op, operands)
}

/// Builds a variadic operation, splicing in unaliased nested operations of
/// the same operator so `and(and(a, b), c)` equals `and(a, b, c)`.
fn variadic<I>(op: Operator, nodes: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    let mut operands: SmallVec<[Node; 2]> = SmallVec::new();
    for node in nodes {
        let node = node.into();
        match node.kind() {
            NodeKind::Operation(inner) if inner.op == op && node.alias().is_none() => {
                operands.extend(inner.operands.iter().cloned());
            }
            _ => operands.push(node),
        }
    }
    operation(op, operands)
}

// =============================================================================
// Comparisons
// =============================================================================

/// Equality comparison (`=`).
pub fn eq(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::Equal, left, right)
}

/// Inequality comparison (`<>`).
pub fn neq(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::NotEqual, left, right)
}

/// Greater-than comparison (`>`).
pub fn gt(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::GreaterThan, left, right)
}

/// Greater-than-or-equal comparison (`>=`).
pub fn gte(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::GreaterEqual, left, right)
}

/// Less-than comparison (`<`).
pub fn lt(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::LessThan, left, right)
}

/// Less-than-or-equal comparison (`<=`).
pub fn lte(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::LessEqual, left, right)
}

// =============================================================================
// Logical
// =============================================================================

/// Logical AND over any number of conditions.
pub fn and<I>(conditions: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    variadic(Operator::And, conditions)
}

/// Logical OR over any number of conditions.
pub fn or<I>(conditions: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    variadic(Operator::Or, conditions)
}

/// Logical XOR.
pub fn xor(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::Xor, left, right)
}

/// Logical NOT.
pub fn not(condition: impl Into<Node>) -> Node {
    unary(Operator::Not, condition)
}

/// Condition matching every row.
pub fn all() -> Node {
    operation(Operator::All, SmallVec::new())
}

/// Condition matching no row.
pub fn none() -> Node {
    operation(Operator::None, SmallVec::new())
}

// =============================================================================
// NULL tests
// =============================================================================

/// IS NULL check.
pub fn is_null(expr: impl Into<Node>) -> Node {
    unary(Operator::IsNull, expr)
}

/// IS NOT NULL check.
pub fn is_not_null(expr: impl Into<Node>) -> Node {
    unary(Operator::IsNotNull, expr)
}

// =============================================================================
// Sets and patterns
// =============================================================================

/// IN over a list of values, each bound as its own parameter.
pub fn in_array<I>(expr: impl Into<Node>, values: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    binary(Operator::In, expr, Node::value(Value::list(values)))
}

/// NOT IN over a list of values.
pub fn not_in_array<I>(expr: impl Into<Node>, values: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    binary(Operator::NotIn, expr, Node::value(Value::list(values)))
}

/// LIKE pattern matching. The pattern is bound as a parameter.
pub fn like(expr: impl Into<Node>, pattern: impl Into<Value>) -> Node {
    binary(Operator::Like, expr, Node::value(pattern.into()))
}

/// LIKE prefix match, escaping wildcards in the prefix.
pub fn starts_with(expr: impl Into<Node>, prefix: impl AsRef<str>) -> Node {
    like(expr, format!("{}%", escape_like(prefix.as_ref())))
}

/// LIKE suffix match, escaping wildcards in the suffix.
pub fn ends_with(expr: impl Into<Node>, suffix: impl AsRef<str>) -> Node {
    like(expr, format!("%{}", escape_like(suffix.as_ref())))
}

/// LIKE substring match, escaping wildcards in the fragment.
pub fn contains(expr: impl Into<Node>, fragment: impl AsRef<str>) -> Node {
    like(expr, format!("%{}%", escape_like(fragment.as_ref())))
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Addition (`+`).
pub fn add(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::Add, left, right)
}

/// Subtraction (`-`).
pub fn subtract(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::Subtract, left, right)
}

/// Multiplication (`*`).
pub fn multiply(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::Multiply, left, right)
}

/// Division (`/`).
pub fn divide(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::Divide, left, right)
}

/// Modulo (`%`).
pub fn mod_(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::Modulo, left, right)
}

/// Unary minus.
pub fn negative(expr: impl Into<Node>) -> Node {
    unary(Operator::Negative, expr)
}

// =============================================================================
// Bitwise
// =============================================================================

/// Bitwise AND (`&`).
pub fn bit_and(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::BitAnd, left, right)
}

/// Bitwise OR (`|`).
pub fn bit_or(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::BitOr, left, right)
}

/// Bitwise XOR (`^`).
pub fn bit_xor(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::BitXor, left, right)
}

/// Left shift (`<<`).
pub fn shift_left(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::ShiftLeft, left, right)
}

/// Right shift (`>>`).
pub fn shift_right(left: impl Into<Node>, right: impl Into<Node>) -> Node {
    binary(Operator::ShiftRight, left, right)
}

/// Bitwise complement (`~`).
pub fn bit_invert(expr: impl Into<Node>) -> Node {
    unary(Operator::BitInvert, expr)
}

// =============================================================================
// Functions and aggregates
// =============================================================================

fn func_node<I>(name: &str, args: I, aggregate: bool, distinct: bool) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    Node::new(
        NodeKind::Operation(Operation {
            op: Operator::Function,
            operands: args.into_iter().map(Into::into).collect(),
            func: CompactString::new(name),
            aggregate,
            distinct,
        }),
        None,
    )
}

/// COUNT aggregate. With no arguments it renders as `COUNT(*)`.
pub fn count<I>(args: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    func_node("COUNT", args, true, false)
}

/// COUNT over every row.
pub fn count_all() -> Node {
    count(std::iter::empty::<Node>())
}

/// COUNT DISTINCT aggregate.
pub fn count_distinct<I>(args: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    func_node("COUNT", args, true, true)
}

/// SUM aggregate.
pub fn sum(expr: impl Into<Node>) -> Node {
    func_node("SUM", [expr.into()], true, false)
}

/// AVG aggregate.
pub fn avg(expr: impl Into<Node>) -> Node {
    func_node("AVG", [expr.into()], true, false)
}

/// MIN aggregate.
pub fn min(expr: impl Into<Node>) -> Node {
    func_node("MIN", [expr.into()], true, false)
}

/// MAX aggregate.
pub fn max(expr: impl Into<Node>) -> Node {
    func_node("MAX", [expr.into()], true, false)
}

/// ROUND function.
pub fn round(expr: impl Into<Node>) -> Node {
    func_node("ROUND", [expr.into()], false, false)
}

/// ABS function.
pub fn abs(expr: impl Into<Node>) -> Node {
    func_node("ABS", [expr.into()], false, false)
}

/// Any SQL function by name.
pub fn function<I>(name: &str, args: I) -> Node
where
    I: IntoIterator,
    I::Item: Into<Node>,
{
    func_node(name, args, false, false)
}

/// References a computed column registered with
/// [`QueryBuilder::alias`](crate::query::QueryBuilder::alias) by name, for
/// use in ORDER BY, GROUP BY, and HAVING.
pub fn alias_ref(name: impl Into<CompactString>) -> Node {
    Node::new(NodeKind::Alias(name.into()), None)
}

/// Wraps a literal value as a node.
pub fn value(value: impl Into<Value>) -> Node {
    Node::value(value)
}

// =============================================================================
// Operator overloads
// =============================================================================

impl std::ops::Add for Node {
    type Output = Node;
    fn add(self, rhs: Node) -> Node {
        add(self, rhs)
    }
}

impl std::ops::Sub for Node {
    type Output = Node;
    fn sub(self, rhs: Node) -> Node {
        subtract(self, rhs)
    }
}

impl std::ops::Mul for Node {
    type Output = Node;
    fn mul(self, rhs: Node) -> Node {
        multiply(self, rhs)
    }
}

impl std::ops::Div for Node {
    type Output = Node;
    fn div(self, rhs: Node) -> Node {
        divide(self, rhs)
    }
}

impl std::ops::Rem for Node {
    type Output = Node;
    fn rem(self, rhs: Node) -> Node {
        mod_(self, rhs)
    }
}

impl std::ops::Neg for Node {
    type Output = Node;
    fn neg(self) -> Node {
        negative(self)
    }
}

impl std::ops::BitAnd for Node {
    type Output = Node;
    fn bitand(self, rhs: Node) -> Node {
        and([self, rhs])
    }
}

impl std::ops::BitOr for Node {
    type Output = Node;
    fn bitor(self, rhs: Node) -> Node {
        or([self, rhs])
    }
}

impl std::ops::Not for Node {
    type Output = Node;
    fn not(self) -> Node {
        not(self)
    }
}
