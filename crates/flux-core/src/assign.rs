//! Type identity and assignability.
//!
//! Only as much of the language's assignability rules as connection
//! validation needs. Unresolved types (`None`) are accepted provisionally
//! on either side so a graph can be edited before every type is known.

use crate::type_id::{TypeId, TypeRegistry};
use crate::types::{BasicKind, FluxType};

/// True if `a` and `b` denote the same type.
pub fn identical(reg: &TypeRegistry, a: TypeId, b: TypeId) -> bool {
    identical_at(reg, a, b, 0)
}

fn identical_at(reg: &TypeRegistry, a: TypeId, b: TypeId, depth: usize) -> bool {
    if a == b {
        return true;
    }
    // Named types are unique by id, so anything recursive bottoms out here.
    if depth > reg.len() {
        return false;
    }
    let d = depth + 1;
    match (reg.get(a), reg.get(b)) {
        (Some(FluxType::Pointer { elem: x }), Some(FluxType::Pointer { elem: y }))
        | (Some(FluxType::Slice { elem: x }), Some(FluxType::Slice { elem: y })) => {
            identical_at(reg, *x, *y, d)
        }
        (
            Some(FluxType::Array { elem: x, len: n }),
            Some(FluxType::Array { elem: y, len: m }),
        ) => n == m && identical_at(reg, *x, *y, d),
        (
            Some(FluxType::Map { key: k1, value: v1 }),
            Some(FluxType::Map { key: k2, value: v2 }),
        ) => identical_at(reg, *k1, *k2, d) && identical_at(reg, *v1, *v2, d),
        (Some(FluxType::Struct(s1)), Some(FluxType::Struct(s2))) => {
            s1.fields.len() == s2.fields.len()
                && s1
                    .fields
                    .iter()
                    .zip(s2.fields.iter())
                    .all(|((n1, t1), (n2, t2))| n1 == n2 && identical_at(reg, *t1, *t2, d))
        }
        (Some(FluxType::Signature(s1)), Some(FluxType::Signature(s2))) => {
            s1.variadic == s2.variadic
                && s1.params.len() == s2.params.len()
                && s1.results.len() == s2.results.len()
                && s1
                    .params
                    .iter()
                    .zip(s2.params.iter())
                    .chain(s1.results.iter().zip(s2.results.iter()))
                    .all(|(p, q)| identical_at(reg, p.ty, q.ty, d))
        }
        (Some(FluxType::Interface(i1)), Some(FluxType::Interface(i2))) => {
            i1.methods.len() == i2.methods.len()
                && i1.methods.iter().all(|(name, sig)| {
                    i2.methods
                        .get(name)
                        .is_some_and(|other| identical_at(reg, *sig, *other, d))
                })
        }
        (Some(FluxType::Basic(k1)), Some(FluxType::Basic(k2))) => k1 == k2,
        _ => false,
    }
}

/// True if a value of type `from` may be connected to a port of type `to`.
pub fn assignable(reg: &TypeRegistry, from: Option<TypeId>, to: Option<TypeId>) -> bool {
    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        _ => return true,
    };
    if identical(reg, from, to) {
        return true;
    }
    if reg.is_sequence(from) || reg.is_sequence(to) {
        return false;
    }

    if let Some(FluxType::Basic(kind)) = reg.get(from) {
        if kind.is_untyped() {
            return untyped_assignable(reg, *kind, to);
        }
    }

    let from_u = reg.underlying(from);
    let to_u = reg.underlying(to);
    if (!is_defined(reg, from) || !is_defined(reg, to)) && identical(reg, from_u, to_u) {
        return true;
    }

    reg.interface(to).is_some() && implements(reg, from, to)
}

/// Declared and predeclared types have their own identity.
fn is_defined(reg: &TypeRegistry, id: TypeId) -> bool {
    matches!(reg.get(id), Some(FluxType::Named(_)) | Some(FluxType::Basic(_)))
}

fn untyped_assignable(reg: &TypeRegistry, kind: BasicKind, to: TypeId) -> bool {
    if let Some(iface) = reg.interface(to) {
        return kind != BasicKind::UntypedNil && iface.methods.is_empty()
            || kind == BasicKind::UntypedNil;
    }
    if kind == BasicKind::UntypedNil {
        return matches!(
            reg.get(reg.underlying(to)),
            Some(FluxType::Pointer { .. })
                | Some(FluxType::Slice { .. })
                | Some(FluxType::Map { .. })
                | Some(FluxType::Signature(_))
        );
    }
    let Some(target) = reg.basic(to) else {
        return false;
    };
    match kind {
        BasicKind::UntypedBool => target.is_boolean(),
        BasicKind::UntypedInt | BasicKind::UntypedRune => target.is_numeric(),
        BasicKind::UntypedFloat => target.is_numeric(),
        BasicKind::UntypedString => target.is_string(),
        _ => false,
    }
}

/// True if every method of interface `iface` is in the method set of `ty`
/// with an identical signature.
pub fn implements(reg: &TypeRegistry, ty: TypeId, iface: TypeId) -> bool {
    let Some(def) = reg.interface(iface) else {
        return false;
    };
    if def.methods.is_empty() {
        return true;
    }
    let have = reg.method_set(ty);
    def.methods.iter().all(|(name, sig)| {
        have.iter()
            .any(|(n, s)| n == name && identical(reg, *s, *sig))
    })
}
