//! Node variants.
//!
//! [`NodeKind`] is the closed set of node variants. It holds only the
//! per-variant binding state (bound types, callee, literal text, modes);
//! ports, nested blocks and placement live on [`Node`](crate::node::Node)
//! so that the kind can be serialized verbatim into the structural form.
//!
//! Port layout conventions:
//! - Variants with sequence ports put them at index 0 of the input list
//!   and (except [`NodeKind::Branch`]) index 0 of the output list.
//! - Data ports follow in source order: receiver or object first, then
//!   arguments, then the written value for "set" modes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::type_id::{TypeId, TypeRegistry};

// ---------------------------------------------------------------------------
// Sub-enums
// ---------------------------------------------------------------------------

/// Kind of a basic literal constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiteralKind {
    Int,
    Float,
    String,
    Char,
}

impl LiteralKind {
    /// Untyped constant type produced by a literal of this kind.
    pub fn type_id(self) -> TypeId {
        match self {
            LiteralKind::Int => TypeId::UNTYPED_INT,
            LiteralKind::Float => TypeId::UNTYPED_FLOAT,
            LiteralKind::String => TypeId::UNTYPED_STRING,
            LiteralKind::Char => TypeId::UNTYPED_RUNE,
        }
    }
}

/// Unconditional jumps out of normal statement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchKind {
    Break,
    Continue,
}

impl BranchKind {
    pub fn keyword(self) -> &'static str {
        match self {
            BranchKind::Break => "break",
            BranchKind::Continue => "continue",
        }
    }
}

/// Which boundary a ports node anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortsRole {
    /// Function parameters, exposed as outputs.
    Inputs,
    /// Function results, exposed as inputs.
    Outputs,
    /// Per-iteration bindings of a loop, exposed as outputs.
    LoopInputs,
}

/// What a call node calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    /// Package-level function `pkg.Name`.
    Func {
        package: String,
        name: String,
        sig: TypeId,
    },
    /// Method called on the value connected to the first data input.
    Method { name: String, sig: TypeId },
    /// Function value connected to the first data input.
    Value,
}

/// What a value node reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueTarget {
    /// Package-level variable.
    Var {
        package: String,
        name: String,
        ty: TypeId,
    },
    /// Package-level constant.
    Const {
        package: String,
        name: String,
        ty: TypeId,
    },
    /// Package-level function used as a value.
    Func {
        package: String,
        name: String,
        sig: TypeId,
    },
    /// Struct field of the connected object.
    Field { name: String },
    /// Method value of the connected object.
    Method { name: String },
    /// Pointer indirection of the connected object.
    Indirect,
}

impl ValueTarget {
    /// Whether the target can be written through a "set" value node.
    pub fn addressable(&self) -> bool {
        matches!(
            self,
            ValueTarget::Var { .. } | ValueTarget::Field { .. } | ValueTarget::Indirect
        )
    }

    /// Whether the node has an object input.
    pub fn has_object(&self) -> bool {
        matches!(
            self,
            ValueTarget::Field { .. } | ValueTarget::Method { .. } | ValueTarget::Indirect
        )
    }
}

pub const UNARY_OPS: &[&str] = &["!", "-", "^"];
pub const BINARY_OPS: &[&str] = &[
    "+", "-", "*", "/", "%", "&", "|", "^", "&^", "<<", ">>", "==", "!=", "<", "<=", ">", ">=",
    "&&", "||",
];

pub fn is_comparison(op: &str) -> bool {
    matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">=")
}

pub fn is_logical(op: &str) -> bool {
    matches!(op, "&&" | "||" | "!")
}

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// The closed set of node variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Function or method call. `spread` passes the last argument as `s...`.
    Call { callee: Callee, spread: bool },
    /// Variable, constant, function, field or method access; `set` writes.
    Value { target: ValueTarget, set: bool },
    /// Composite literal of the bound type; `addr` yields `&T{...}`.
    Composite { ty: Option<TypeId>, addr: bool },
    /// Type conversion to the bound type.
    Convert { ty: Option<TypeId> },
    /// `make` of the bound slice or map type.
    Make { ty: Option<TypeId> },
    /// `append`; `spread` appends a whole slice instead of elements.
    Append { spread: bool },
    /// `len`
    Len,
    /// `delete` on a map.
    Delete,
    /// Unary or binary operator.
    Operator { op: String, unary: bool },
    /// Type assertion `x.(T)` with comma-ok result.
    TypeAssert { ty: Option<TypeId> },
    /// Indexed read or, with `set`, indexed write.
    Index { set: bool },
    /// Conditional with true and false blocks.
    If,
    /// Counted or range loop with one body block.
    Loop,
    /// `break` or `continue`.
    Branch { kind: BranchKind },
    /// Function or loop boundary.
    Ports { role: PortsRole },
    /// Basic literal constant.
    Literal { kind: LiteralKind, text: String },
    /// Function literal with its own body block and ports nodes.
    FuncLiteral,
}

impl NodeKind {
    /// Short tag used in logs and diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Call { .. } => "call",
            NodeKind::Value { .. } => "value",
            NodeKind::Composite { .. } => "composite",
            NodeKind::Convert { .. } => "convert",
            NodeKind::Make { .. } => "make",
            NodeKind::Append { .. } => "append",
            NodeKind::Len => "len",
            NodeKind::Delete => "delete",
            NodeKind::Operator { .. } => "operator",
            NodeKind::TypeAssert { .. } => "type-assert",
            NodeKind::Index { .. } => "index",
            NodeKind::If => "if",
            NodeKind::Loop => "loop",
            NodeKind::Branch { .. } => "branch",
            NodeKind::Ports { .. } => "ports",
            NodeKind::Literal { .. } => "literal",
            NodeKind::FuncLiteral => "func-literal",
        }
    }

    /// Whether the node carries a sequence input at index 0.
    pub fn has_seq_input(&self) -> bool {
        matches!(
            self,
            NodeKind::Call { .. }
                | NodeKind::Value { .. }
                | NodeKind::Append { .. }
                | NodeKind::Len
                | NodeKind::Delete
                | NodeKind::Index { .. }
                | NodeKind::If
                | NodeKind::Loop
                | NodeKind::Branch { .. }
        )
    }

    /// Whether the node carries a sequence output at index 0.
    pub fn has_seq_output(&self) -> bool {
        self.has_seq_input() && !matches!(self, NodeKind::Branch { .. })
    }

    /// Number of nested blocks owned by the node.
    pub fn block_count(&self) -> usize {
        match self {
            NodeKind::If => 2,
            NodeKind::Loop | NodeKind::FuncLiteral => 1,
            _ => 0,
        }
    }

    /// Whether the data input at `index` takes its type from its source
    /// connection instead of declaring one.
    pub fn follows_source(&self, index: usize) -> bool {
        match self {
            NodeKind::Call {
                callee: Callee::Value | Callee::Method { .. },
                ..
            } => index == 0,
            NodeKind::Value { target, .. } => target.has_object() && index == 0,
            NodeKind::Convert { .. }
            | NodeKind::Append { .. }
            | NodeKind::Len
            | NodeKind::Delete
            | NodeKind::TypeAssert { .. }
            | NodeKind::Index { .. }
            | NodeKind::Loop => index == 0,
            NodeKind::Operator { .. } => true,
            _ => false,
        }
    }

    /// Types bound by this kind, for package reference counting.
    pub fn bound_types(&self) -> Vec<TypeId> {
        match self {
            NodeKind::Call {
                callee: Callee::Func { sig, .. } | Callee::Method { sig, .. },
                ..
            } => vec![*sig],
            NodeKind::Value { target, .. } => match target {
                ValueTarget::Var { ty, .. } | ValueTarget::Const { ty, .. } => vec![*ty],
                ValueTarget::Func { sig, .. } => vec![*sig],
                _ => vec![],
            },
            NodeKind::Composite { ty, .. }
            | NodeKind::Convert { ty }
            | NodeKind::Make { ty }
            | NodeKind::TypeAssert { ty } => ty.iter().copied().collect(),
            _ => vec![],
        }
    }

    /// Import paths referenced by this kind's bindings, including the
    /// package of a bound function, variable or constant.
    pub fn packages(&self, types: &TypeRegistry) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for ty in self.bound_types() {
            out.extend(types.packages_of(ty));
        }
        match self {
            NodeKind::Call {
                callee: Callee::Func { package, .. },
                ..
            }
            | NodeKind::Value {
                target:
                    ValueTarget::Var { package, .. }
                    | ValueTarget::Const { package, .. }
                    | ValueTarget::Func { package, .. },
                ..
            } => {
                out.insert(package.clone());
            }
            _ => {}
        }
        out
    }

    /// Checks that an operator kind names a known operator.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let NodeKind::Operator { op, unary } = self {
            let known = if *unary { UNARY_OPS } else { BINARY_OPS };
            if !known.contains(&op.as_str()) {
                return Err(CoreError::UnsupportedBinding {
                    reason: format!("unknown operator '{}'", op),
                });
            }
        }
        if let NodeKind::Literal { kind, text } = self {
            normalize_literal(*kind, text)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Literal text
// ---------------------------------------------------------------------------

/// Normalizes literal text typed by the user.
///
/// Numbers: a trailing `-` toggles the sign, leading zeros are trimmed,
/// `.5` becomes `0.5`, and the kind switches between int and float with
/// the presence of a fraction or exponent. Char literals keep only their
/// last character. Invalid text is rejected.
pub fn normalize_literal(kind: LiteralKind, text: &str) -> Result<(LiteralKind, String), CoreError> {
    match kind {
        LiteralKind::String => Ok((kind, text.to_string())),
        LiteralKind::Char => match text.chars().last() {
            Some(c) => Ok((kind, c.to_string())),
            None => Err(CoreError::InvalidLiteral {
                text: text.to_string(),
            }),
        },
        LiteralKind::Int | LiteralKind::Float => normalize_number(text),
    }
}

fn normalize_number(text: &str) -> Result<(LiteralKind, String), CoreError> {
    let invalid = || CoreError::InvalidLiteral {
        text: text.to_string(),
    };
    let mut body = text.trim();
    let mut negative = false;
    if let Some(rest) = body.strip_prefix('-') {
        negative = true;
        body = rest;
    }
    if let Some(rest) = body.strip_suffix('-') {
        negative = !negative;
        body = rest;
    }
    if body.is_empty() {
        body = "0";
    }

    let is_float = body.contains(['.', 'e', 'E']);
    let (int_part, rest) = match body.find(['.', 'e', 'E']) {
        Some(i) => (&body[..i], &body[i..]),
        None => (body, ""),
    };
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let trimmed = int_part.trim_start_matches('0');
    let int_part = if trimmed.is_empty() { "0" } else { trimmed };
    let normalized = format!("{}{}", int_part, rest);

    if is_float {
        normalized.parse::<f64>().map_err(|_| invalid())?;
    }
    let normalized = if negative && normalized.trim_start_matches(['0', '.']).is_empty() {
        normalized
    } else if negative {
        format!("-{}", normalized)
    } else {
        normalized
    };
    let kind = if is_float {
        LiteralKind::Float
    } else {
        LiteralKind::Int
    };
    Ok((kind, normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_port_layout() {
        assert!(NodeKind::If.has_seq_input());
        assert!(NodeKind::If.has_seq_output());
        let br = NodeKind::Branch {
            kind: BranchKind::Break,
        };
        assert!(br.has_seq_input());
        assert!(!br.has_seq_output());
        assert!(!NodeKind::Convert { ty: None }.has_seq_input());
    }

    #[test]
    fn numbers_normalize() {
        let n = |t| normalize_literal(LiteralKind::Int, t).unwrap();
        assert_eq!(n("007"), (LiteralKind::Int, "7".to_string()));
        assert_eq!(n(".5"), (LiteralKind::Float, "0.5".to_string()));
        assert_eq!(n("12-"), (LiteralKind::Int, "-12".to_string()));
        assert_eq!(n("-12-"), (LiteralKind::Int, "12".to_string()));
        assert_eq!(n(""), (LiteralKind::Int, "0".to_string()));
        assert_eq!(n("1e3"), (LiteralKind::Float, "1e3".to_string()));
        assert_eq!(n("0-"), (LiteralKind::Int, "0".to_string()));
    }

    #[test]
    fn float_switches_back_to_int() {
        let (kind, text) = normalize_literal(LiteralKind::Float, "42").unwrap();
        assert_eq!(kind, LiteralKind::Int);
        assert_eq!(text, "42");
    }

    #[test]
    fn invalid_numbers_rejected() {
        assert!(normalize_literal(LiteralKind::Int, "12a").is_err());
        assert!(normalize_literal(LiteralKind::Float, "1.2.3").is_err());
    }

    #[test]
    fn char_keeps_last() {
        let (_, text) = normalize_literal(LiteralKind::Char, "ab").unwrap();
        assert_eq!(text, "b");
        assert!(normalize_literal(LiteralKind::Char, "").is_err());
    }

    #[test]
    fn operator_validation() {
        assert!(NodeKind::Operator {
            op: "+".into(),
            unary: false
        }
        .validate()
        .is_ok());
        assert!(NodeKind::Operator {
            op: "+".into(),
            unary: true
        }
        .validate()
        .is_err());
    }
}
