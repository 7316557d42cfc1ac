//! Syntax tree produced by the script parser.
//!
//! The tree is deliberately small: it covers the expression and statement
//! forms that markup bindings and event handlers use, and nothing that needs
//! a module system or classes.

use smallvec::SmallVec;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Nullish,
}

impl AssignOp {
    /// The binary operator a compound assignment applies, if any.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign | AssignOp::Nullish => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberKey {
    Static(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    Static(String),
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperty {
    pub key: PropertyKey,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrowBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

/// An arrow function literal. `source` keeps the exact text so callers can
/// derive a stable content hash for caching.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrowFunction {
    pub params: SmallVec<[String; 2]>,
    pub body: ArrowBody,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Template(Vec<TemplatePart>),
    Identifier(String),
    Member {
        object: Box<Expr>,
        property: MemberKey,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<ObjectProperty>),
    Arrow(Rc<ArrowFunction>),
    Await(Box<Expr>),
}

impl Expr {
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Identifier(_) | Expr::Member { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryStmt {
    pub block: Vec<Stmt>,
    pub param: Option<String>,
    pub handler: Option<Vec<Stmt>>,
    pub finalizer: Option<Vec<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Declare {
        kind: DeclKind,
        declarations: Vec<Declarator>,
    },
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: DeclKind,
        binding: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        kind: DeclKind,
        binding: String,
        object: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try(Box<TryStmt>),
    Empty,
}

/// One piece of a markup property value: either verbatim text or a `{...}`
/// binding expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Expression(Expr),
}

impl Segment {
    pub fn is_blank_literal(&self) -> bool {
        matches!(self, Segment::Literal(text) if text.trim().is_empty())
    }
}
