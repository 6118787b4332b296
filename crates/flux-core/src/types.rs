//! The flux type system.
//!
//! A Go-like static type model carrying just enough information to validate
//! connections and to regenerate source text: basic and untyped-constant
//! kinds, named types with method sets, pointers, slices, arrays, maps,
//! structs, signatures, interfaces, and the distinguished sequence type
//! carried by sequence ports.
//!
//! All types are addressed through [`TypeId`]. Structs and interfaces use
//! [`IndexMap`] so fields and methods keep declaration order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::type_id::TypeId;

/// The flux type system. Each variant represents a distinct kind of type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FluxType {
    /// Predeclared basic types and untyped constant kinds.
    Basic(BasicKind),

    /// Declared type with identity by (package, name).
    Named(NamedDef),

    /// `*T`
    Pointer { elem: TypeId },

    /// `[]T`
    Slice { elem: TypeId },

    /// `[N]T`
    Array { elem: TypeId, len: u64 },

    /// `map[K]V`
    Map { key: TypeId, value: TypeId },

    /// Struct literal type with ordered fields.
    Struct(StructDef),

    /// Function signature.
    Signature(Signature),

    /// Interface with an ordered method set.
    Interface(InterfaceDef),

    /// Type of sequence ports. Carries ordering only, never data.
    Sequence,
}

/// Basic kinds, including the untyped kinds produced by literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicKind {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    UntypedBool,
    UntypedInt,
    UntypedRune,
    UntypedFloat,
    UntypedString,
    UntypedNil,
}

impl BasicKind {
    /// Source spelling of the kind. Untyped kinds have no spelling and
    /// render as their default type.
    pub fn name(self) -> &'static str {
        match self {
            BasicKind::Bool | BasicKind::UntypedBool => "bool",
            BasicKind::Int | BasicKind::UntypedInt => "int",
            BasicKind::Int8 => "int8",
            BasicKind::Int16 => "int16",
            BasicKind::Int32 => "int32",
            BasicKind::UntypedRune => "rune",
            BasicKind::Int64 => "int64",
            BasicKind::Uint => "uint",
            BasicKind::Uint8 => "uint8",
            BasicKind::Uint16 => "uint16",
            BasicKind::Uint32 => "uint32",
            BasicKind::Uint64 => "uint64",
            BasicKind::Float32 => "float32",
            BasicKind::Float64 | BasicKind::UntypedFloat => "float64",
            BasicKind::String | BasicKind::UntypedString => "string",
            BasicKind::UntypedNil => "nil",
        }
    }

    pub fn is_untyped(self) -> bool {
        matches!(
            self,
            BasicKind::UntypedBool
                | BasicKind::UntypedInt
                | BasicKind::UntypedRune
                | BasicKind::UntypedFloat
                | BasicKind::UntypedString
                | BasicKind::UntypedNil
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BasicKind::Int
                | BasicKind::Int8
                | BasicKind::Int16
                | BasicKind::Int32
                | BasicKind::Int64
                | BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::UntypedInt
                | BasicKind::UntypedRune
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BasicKind::Float32 | BasicKind::Float64 | BasicKind::UntypedFloat
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, BasicKind::Bool | BasicKind::UntypedBool)
    }

    pub fn is_string(self) -> bool {
        matches!(self, BasicKind::String | BasicKind::UntypedString)
    }
}

/// A declared (named) type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedDef {
    /// Type name as declared.
    pub name: String,
    /// Import path of the declaring package. `None` for universe types
    /// such as `error`.
    pub package: Option<String>,
    /// Underlying type. `None` only while the declaration is being resolved.
    pub underlying: Option<TypeId>,
    /// Method name -> signature type.
    pub methods: IndexMap<String, TypeId>,
}

impl NamedDef {
    /// `pkgpath.Name`, or just `Name` for universe types.
    pub fn qualified_name(&self) -> String {
        match &self.package {
            Some(pkg) => format!("{}.{}", pkg, self.name),
            None => self.name.clone(),
        }
    }
}

/// Struct definition with declaration-ordered fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub fields: IndexMap<String, TypeId>,
}

/// A named, typed parameter or result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
}

/// Function signature. The receiver of a method is not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    pub results: Vec<Param>,
    /// The last parameter is `...T` (stored as `[]T`).
    pub variadic: bool,
}

/// Interface definition with declaration-ordered methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub methods: IndexMap<String, TypeId>,
}

/// True if `name` is exported from its package.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_kind_classification() {
        assert!(BasicKind::Int32.is_integer());
        assert!(BasicKind::UntypedRune.is_integer());
        assert!(BasicKind::Float32.is_float());
        assert!(!BasicKind::String.is_numeric());
        assert!(BasicKind::UntypedNil.is_untyped());
        assert!(!BasicKind::Bool.is_untyped());
    }

    #[test]
    fn untyped_kinds_spell_as_default_type() {
        assert_eq!(BasicKind::UntypedInt.name(), "int");
        assert_eq!(BasicKind::UntypedFloat.name(), "float64");
        assert_eq!(BasicKind::UntypedString.name(), "string");
    }

    #[test]
    fn exported_names() {
        assert!(is_exported("Name"));
        assert!(!is_exported("name"));
        assert!(!is_exported(""));
    }

    #[test]
    fn named_qualified_name() {
        let def = NamedDef {
            name: "Reader".into(),
            package: Some("io".into()),
            underlying: None,
            methods: IndexMap::new(),
        };
        assert_eq!(def.qualified_name(), "io.Reader");
    }

    #[test]
    fn serde_roundtrip_struct() {
        let ty = FluxType::Struct(StructDef {
            fields: IndexMap::from([("a".into(), TypeId::INT), ("b".into(), TypeId::STRING)]),
        });
        let json = serde_json::to_string(&ty).unwrap();
        let back: FluxType = serde_json::from_str(&json).unwrap();
        assert_eq!(ty, back);
    }
}
