//! Statement tree for one function.
//!
//! The Reader consumes this tree and the Writer produces it before printing
//! program text. Operands of node-producing expressions are identifiers;
//! constant operands (basic literals, `nil`, `true`/`false`, zero values)
//! stand for an unconnected input.

use serde::{Deserialize, Serialize};

use crate::kind::{BranchKind, LiteralKind};
use crate::resolve::{FieldExpr, TypeExpr};

/// A function declaration with named parameters and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    pub recv: Option<FieldExpr>,
    pub params: Vec<FieldExpr>,
    pub results: Vec<FieldExpr>,
    #[serde(default)]
    pub variadic: bool,
    pub body: Vec<Stmt>,
}

/// Ordering annotation attached to a statement: the ids of the statements
/// it must follow, and its own id if other statements follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqAnnotation {
    pub after: Vec<u32>,
    pub id: Option<u32>,
}

impl SeqAnnotation {
    /// Renders as `after;id`, e.g. `1,2;3` or `;4`.
    pub fn render(&self) -> String {
        let after: Vec<String> = self.after.iter().map(|a| a.to_string()).collect();
        let id = self.id.map(|i| i.to_string()).unwrap_or_default();
        format!("{};{}", after.join(","), id)
    }

    /// Parses the `after;id` form. Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let (after, id) = text.trim().split_once(';')?;
        let after = after
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().parse().ok())
            .collect::<Option<Vec<u32>>>()?;
        let id = match id.trim() {
            "" => None,
            s => Some(s.parse().ok()?),
        };
        Some(SeqAnnotation { after, id })
    }

    pub fn is_empty(&self) -> bool {
        self.after.is_empty() && self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub seq: Option<SeqAnnotation>,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt { kind, seq: None }
    }

    pub fn with_seq(mut self, seq: SeqAnnotation) -> Self {
        self.seq = (!seq.is_empty()).then_some(seq);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `a, b := value`; `_` discards.
    Define { names: Vec<String>, value: Expr },
    /// `targets = values`. Either one value for all targets or one value
    /// per target.
    Assign { targets: Vec<Expr>, values: Vec<Expr> },
    /// `var name T`
    VarDecl { name: String, ty: TypeExpr },
    /// `const name = value`
    ConstDecl { name: String, value: Expr },
    /// Expression statement (a call).
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        els: Vec<Stmt>,
    },
    /// `for index := 0; index < bound; index++`
    For {
        index: String,
        bound: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// `for key, value := range x`
    Range {
        key: String,
        value: Option<String>,
        x: Expr,
        body: Vec<Stmt>,
    },
    Branch(BranchKind),
    /// Bare `return`, only as the last statement of a function body.
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(String),
    Selector { x: Box<Expr>, name: String },
    Star(Box<Expr>),
    AddrOf(Box<Expr>),
    Unary { op: String, x: Box<Expr> },
    Binary {
        op: String,
        x: Box<Expr>,
        y: Box<Expr>,
    },
    Call {
        fun: Box<Expr>,
        args: Vec<Expr>,
        spread: bool,
    },
    Convert { ty: TypeExpr, x: Box<Expr> },
    Make { ty: TypeExpr, args: Vec<Expr> },
    Composite {
        ty: TypeExpr,
        fields: Vec<(String, Expr)>,
    },
    Index { x: Box<Expr>, key: Box<Expr> },
    TypeAssert { x: Box<Expr>, ty: TypeExpr },
    FuncLit {
        params: Vec<FieldExpr>,
        results: Vec<FieldExpr>,
        body: Vec<Stmt>,
    },
    BasicLit { kind: LiteralKind, text: String },
    /// Zero value of a type that has no literal zero.
    Zero(TypeExpr),
    Nil,
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn selector(x: Expr, name: impl Into<String>) -> Self {
        Expr::Selector {
            x: Box::new(x),
            name: name.into(),
        }
    }

    pub fn call(fun: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            fun: Box::new(fun),
            args,
            spread: false,
        }
    }

    pub fn binary(op: &str, x: Expr, y: Expr) -> Self {
        Expr::Binary {
            op: op.to_string(),
            x: Box::new(x),
            y: Box::new(y),
        }
    }

    pub fn int(text: impl Into<String>) -> Self {
        Expr::BasicLit {
            kind: LiteralKind::Int,
            text: text.into(),
        }
    }

    /// Whether the operand stands for a constant rather than a binding.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::BasicLit { .. } | Expr::Zero(_) | Expr::Nil => true,
            Expr::Ident(name) => name == "true" || name == "false",
            _ => false,
        }
    }

    /// The identifier this operand names, if it is one.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(name) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_annotation_round_trips_through_text() {
        let seq = SeqAnnotation {
            after: vec![1, 2],
            id: Some(3),
        };
        assert_eq!(seq.render(), "1,2;3");
        assert_eq!(SeqAnnotation::parse("1,2;3"), Some(seq));
        assert_eq!(
            SeqAnnotation::parse(";4"),
            Some(SeqAnnotation {
                after: vec![],
                id: Some(4)
            })
        );
        assert_eq!(SeqAnnotation::parse("no annotation"), None);
        assert_eq!(SeqAnnotation::parse("x;1"), None);
    }

    #[test]
    fn empty_annotation_is_dropped() {
        let stmt = Stmt::new(StmtKind::Return).with_seq(SeqAnnotation::default());
        assert!(stmt.seq.is_none());
    }

    #[test]
    fn constant_operands() {
        assert!(Expr::int("0").is_constant());
        assert!(Expr::Nil.is_constant());
        assert!(Expr::ident("false").is_constant());
        assert!(!Expr::ident("v1").is_constant());
    }
}
