use std::fmt;
use std::rc::Rc;

use crate::tokenizer::Span;

/// A parsed program: the top-level declaration list.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub declarations: Vec<Stmt>,
    pub span: Span,
}

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A function declaration, shared between statement position (`fun f() {}`)
/// and expression position (`var f = fun() {}`). The body is always a block.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// A bare expression in statement position.
    Expr(Expr),
    /// `var name = value` — `value` is a synthesized nil literal when the
    /// initializer is omitted.
    Var { name: Ident, value: Expr },
    If {
        cond: Expr,
        then_stmt: Box<Stmt>,
        else_stmt: Option<Box<Stmt>>,
    },
    While { cond: Expr, body: Box<Stmt> },
    Break,
    Continue,
    Return(Expr),
    /// `defer f(...)` — the parser guarantees the expression is a call.
    Defer(Expr),
    Assert(Expr),
    Block(Vec<Stmt>),
    Function(Rc<FunctionDecl>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    /// Number literal, kept as source text and parsed at evaluation time.
    Number(String),
    Str(String),
    Boolean(String),
    Identifier(String),
    /// A `//` comment in expression position; evaluates to nil.
    Comment(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Paren(Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: BinaryOp,
        rhs: Box<Expr>,
    },
    LogicalAnd {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    LogicalOr {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Assign {
        name: Ident,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        sequence: Box<Expr>,
        index: Box<Expr>,
    },
    Function(Rc<FunctionDecl>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
        };
        write!(f, "{}", op)
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, ExprKind::Call { .. })
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

// Display reconstructs a source-like rendering; assertion failures embed it.

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Nil => write!(f, "nil"),
            ExprKind::Number(text)
            | ExprKind::Boolean(text)
            | ExprKind::Identifier(text)
            | ExprKind::Comment(text) => write!(f, "{}", text),
            ExprKind::Str(text) => write!(f, "\"{}\"", text),
            ExprKind::List(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
            ExprKind::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            ExprKind::Paren(inner) => write!(f, "({})", inner),
            ExprKind::Unary { op, operand } => write!(f, "{}{}", op, operand),
            ExprKind::Binary { lhs, op, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            ExprKind::LogicalAnd { lhs, rhs } => write!(f, "{} && {}", lhs, rhs),
            ExprKind::LogicalOr { lhs, rhs } => write!(f, "{} || {}", lhs, rhs),
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => write!(f, "{} ? {} : {}", cond, then_expr, else_expr),
            ExprKind::Assign { name, value } => write!(f, "{} = {}", name, value),
            ExprKind::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            ExprKind::Index { sequence, index } => write!(f, "{}[{}]", sequence, index),
            ExprKind::Function(decl) => write!(f, "fun {}", decl.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::tokenizer::Tokenizer;

    fn first_expr(source: &str) -> Expr {
        let tokens = Tokenizer::new(source).tokenize();
        Parser::new(tokens)
            .parse_expression_only()
            .expect("parse failed")
    }

    #[test]
    fn display_round_trips_operators() {
        assert_eq!(first_expr("1 + 2 * 3").to_string(), "1 + 2 * 3");
        assert_eq!(first_expr("a == b").to_string(), "a == b");
        assert_eq!(first_expr("!done").to_string(), "!done");
    }

    #[test]
    fn display_renders_collections() {
        assert_eq!(first_expr("[1, 2, 3]").to_string(), "[1, 2, 3]");
        assert_eq!(
            first_expr("{\"k\": 1, \"v\": 2}").to_string(),
            "{\"k\": 1, \"v\": 2}"
        );
    }

    #[test]
    fn display_renders_calls_and_indexing() {
        assert_eq!(first_expr("f(1, x)").to_string(), "f(1, x)");
        assert_eq!(first_expr("xs[0]").to_string(), "xs[0]");
        assert_eq!(first_expr("x > 0 ? x : -x").to_string(), "x > 0 ? x : -x");
    }

    #[test]
    fn spans_nest() {
        let expr = first_expr("1 + 2 * 3");
        match &expr.kind {
            ExprKind::Binary { lhs, rhs, .. } => {
                assert!(expr.span.begin == lhs.span.begin);
                assert!(expr.span.end == rhs.span.end);
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }
}
