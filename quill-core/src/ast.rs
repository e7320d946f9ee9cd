//! Syntax tree consumed by the compiler
//!
//! Any front end may build these nodes; the only requirement is that every
//! node carries the [`Span`] it was produced from.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A braced sequence of statements
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// How an assignment binds its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignMode {
    /// `a = x`: reuse a visible binding, otherwise create one in the current scope
    Assign,
    /// `a := x` / `var a = x`: always create a binding in the current scope
    Declare,
}

/// Whether a loop over a subject uses `range` or `in` unpacking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeMode {
    /// `for k, v = range xs`
    Range,
    /// `for a, b in xs`
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
        mode: AssignMode,
    },
    /// `var a, b` without initializers
    Declare(Vec<Ident>),
    CompoundAssign {
        target: Expr,
        op: BinaryOp,
        value: Expr,
    },
    IncDec {
        target: Expr,
        increment: bool,
    },
    Block(Block),
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
    ForRange {
        targets: Vec<Expr>,
        mode: RangeMode,
        declare: bool,
        subject: Expr,
        body: Block,
    },
    Switch {
        subject: Option<Expr>,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    Break,
    Continue,
    Fallthrough,
    Return(Vec<Expr>),
    Defer(DeferBody),
    Go(Expr),
    Try {
        body: Block,
        catch: Option<CatchClause>,
        finally: Option<Block>,
    },
    Assert {
        cond: Expr,
        message: Option<Expr>,
    },
    Function(FunctionLit),
    Send {
        channel: Expr,
        value: Expr,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub binding: Option<Ident>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeferBody {
    /// `defer f(x)`: the call expression runs at exit
    Call(Expr),
    /// `defer { ... }`
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// True for expressions that denote a storage location
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        /// The last argument is spread with `...`
        spread: bool,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        object: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    SliceLit(Vec<Expr>),
    MapLit(Vec<(Expr, Expr)>),
    Function(Box<FunctionLit>),
    Type(TypeExpr),
    Make {
        ty: TypeExpr,
        args: Vec<Expr>,
    },
    Cast {
        ty: TypeExpr,
        value: Box<Expr>,
    },
    Recover,
    Panic(Box<Expr>),
}

/// Literal tokens. Numbers keep their source text so the compiler can
/// report malformed literals alongside every other error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(String),
    Float(String),
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Nil,
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionLit {
    pub name: Option<Ident>,
    pub params: Vec<Ident>,
    /// The last parameter collects trailing arguments
    pub variadic: bool,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeExpr {
    Int,
    Float,
    String,
    Bytes,
    Bool,
    Any,
    Slice(Box<TypeExpr>),
    Map(Box<TypeExpr>, Box<TypeExpr>),
    Chan(Box<TypeExpr>),
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Int => write!(f, "int"),
            TypeExpr::Float => write!(f, "float"),
            TypeExpr::String => write!(f, "string"),
            TypeExpr::Bytes => write!(f, "bytes"),
            TypeExpr::Bool => write!(f, "bool"),
            TypeExpr::Any => write!(f, "any"),
            TypeExpr::Slice(elem) => write!(f, "[]{}", elem),
            TypeExpr::Map(k, v) => write!(f, "map[{}]{}", k, v),
            TypeExpr::Chan(elem) => write!(f, "chan {}", elem),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    /// `<-ch`
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    AndNot,
    Shl,
    Shr,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    In,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::AndNot => "&^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::In => "in",
        };
        f.write_str(s)
    }
}
