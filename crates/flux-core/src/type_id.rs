//! TypeId and TypeRegistry for nominal and structural typing.
//!
//! Every type in a function graph has a [`TypeId`] into that graph's
//! [`TypeRegistry`]. Named types are unique per (package, name); pointer,
//! slice, array and map types are interned so that identity of those is
//! plain id equality. The registry pre-registers the universe types on
//! construction.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::resolve::{FieldExpr, MethodExpr, Resolver, SignatureExpr, Symbol, TypeExpr};
use crate::types::{BasicKind, FluxType, InterfaceDef, NamedDef, Param, Signature, StructDef};

/// Unique identifier for a type in the type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Pre-registered TypeId constants for universe types.
impl TypeId {
    pub const BOOL: TypeId = TypeId(0);
    pub const INT: TypeId = TypeId(1);
    pub const INT8: TypeId = TypeId(2);
    pub const INT16: TypeId = TypeId(3);
    pub const INT32: TypeId = TypeId(4);
    pub const INT64: TypeId = TypeId(5);
    pub const UINT: TypeId = TypeId(6);
    pub const UINT8: TypeId = TypeId(7);
    pub const UINT16: TypeId = TypeId(8);
    pub const UINT32: TypeId = TypeId(9);
    pub const UINT64: TypeId = TypeId(10);
    pub const FLOAT32: TypeId = TypeId(11);
    pub const FLOAT64: TypeId = TypeId(12);
    pub const STRING: TypeId = TypeId(13);
    pub const UNTYPED_BOOL: TypeId = TypeId(14);
    pub const UNTYPED_INT: TypeId = TypeId(15);
    pub const UNTYPED_RUNE: TypeId = TypeId(16);
    pub const UNTYPED_FLOAT: TypeId = TypeId(17);
    pub const UNTYPED_STRING: TypeId = TypeId(18);
    pub const UNTYPED_NIL: TypeId = TypeId(19);
    pub const SEQUENCE: TypeId = TypeId(20);
    pub const EMPTY_INTERFACE: TypeId = TypeId(21);
    const ERROR_METHOD: TypeId = TypeId(22);
    const ERROR_INTERFACE: TypeId = TypeId(23);
    pub const ERROR: TypeId = TypeId(24);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CompositeKey {
    Pointer(TypeId),
    Slice(TypeId),
    Array(TypeId, u64),
    Map(TypeId, TypeId),
}

impl CompositeKey {
    fn of(ty: &FluxType) -> Option<CompositeKey> {
        match *ty {
            FluxType::Pointer { elem } => Some(CompositeKey::Pointer(elem)),
            FluxType::Slice { elem } => Some(CompositeKey::Slice(elem)),
            FluxType::Array { elem, len } => Some(CompositeKey::Array(elem, len)),
            FluxType::Map { key, value } => Some(CompositeKey::Map(key, value)),
            _ => None,
        }
    }
}

/// Registry of all types used by one function graph.
///
/// Serializes as the plain ordered list of types; lookup indexes are
/// rebuilt on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FluxType>", into = "Vec<FluxType>")]
pub struct TypeRegistry {
    /// Types indexed by TypeId.0
    types: Vec<FluxType>,
    /// (package, name) -> named type
    named: HashMap<(Option<String>, String), TypeId>,
    /// Interned pointer/slice/array/map types
    composites: HashMap<CompositeKey, TypeId>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Number of universe types pre-registered on construction.
    pub const BUILTIN_COUNT: u32 = 25;

    /// Creates a registry holding only the universe types.
    pub fn new() -> Self {
        let mut registry = TypeRegistry {
            types: Vec::with_capacity(Self::BUILTIN_COUNT as usize),
            named: HashMap::new(),
            composites: HashMap::new(),
        };
        for ty in Self::builtins() {
            registry.push(ty);
        }
        registry
    }

    fn builtins() -> Vec<FluxType> {
        let basics = {
            use BasicKind::*;
            [
                Bool, Int, Int8, Int16, Int32, Int64, Uint, Uint8, Uint16, Uint32, Uint64, Float32,
                Float64, String, UntypedBool, UntypedInt, UntypedRune, UntypedFloat, UntypedString,
                UntypedNil,
            ]
        };
        let mut types: Vec<FluxType> = basics.into_iter().map(FluxType::Basic).collect();
        types.push(FluxType::Sequence);
        types.push(FluxType::Interface(InterfaceDef::default()));
        types.push(FluxType::Signature(Signature {
            params: vec![],
            results: vec![Param {
                name: String::new(),
                ty: TypeId::STRING,
            }],
            variadic: false,
        }));
        types.push(FluxType::Interface(InterfaceDef {
            methods: IndexMap::from([("Error".to_string(), TypeId::ERROR_METHOD)]),
        }));
        types.push(FluxType::Named(NamedDef {
            name: "error".into(),
            package: None,
            underlying: Some(TypeId::ERROR_INTERFACE),
            methods: IndexMap::new(),
        }));
        types
    }

    fn push(&mut self, ty: FluxType) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        if let Some(key) = CompositeKey::of(&ty) {
            self.composites.insert(key, id);
        }
        if let FluxType::Named(def) = &ty {
            self.named
                .insert((def.package.clone(), def.name.clone()), id);
        }
        self.types.push(ty);
        id
    }

    /// Registers a type and returns its [`TypeId`]. Composite and named
    /// types that are already registered return the existing id.
    pub fn register(&mut self, ty: FluxType) -> TypeId {
        if let Some(key) = CompositeKey::of(&ty) {
            if let Some(&id) = self.composites.get(&key) {
                return id;
            }
        }
        if let FluxType::Named(def) = &ty {
            if let Some(&id) = self.named.get(&(def.package.clone(), def.name.clone())) {
                return id;
            }
        }
        self.push(ty)
    }

    pub fn pointer_to(&mut self, elem: TypeId) -> TypeId {
        self.register(FluxType::Pointer { elem })
    }

    pub fn slice_of(&mut self, elem: TypeId) -> TypeId {
        self.register(FluxType::Slice { elem })
    }

    pub fn array_of(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.register(FluxType::Array { elem, len })
    }

    pub fn map_of(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.register(FluxType::Map { key, value })
    }

    /// Declares (or returns) the named type `package.name` with no
    /// underlying type yet. Used to break recursion while resolving.
    pub fn declare_named(&mut self, package: Option<&str>, name: &str) -> TypeId {
        self.register(FluxType::Named(NamedDef {
            name: name.to_string(),
            package: package.map(str::to_string),
            underlying: None,
            methods: IndexMap::new(),
        }))
    }

    /// Sets the underlying type of a named type.
    pub fn set_underlying(&mut self, id: TypeId, underlying: TypeId) -> Result<(), CoreError> {
        match self.types.get_mut(id.0 as usize) {
            Some(FluxType::Named(def)) => {
                def.underlying = Some(underlying);
                Ok(())
            }
            _ => Err(CoreError::TypeNotFound { id }),
        }
    }

    /// Adds a method to a named type's method set.
    pub fn add_method(&mut self, id: TypeId, name: &str, sig: TypeId) -> Result<(), CoreError> {
        match self.types.get_mut(id.0 as usize) {
            Some(FluxType::Named(def)) => {
                def.methods.insert(name.to_string(), sig);
                Ok(())
            }
            _ => Err(CoreError::TypeNotFound { id }),
        }
    }

    /// Looks up a type by its [`TypeId`].
    pub fn get(&self, id: TypeId) -> Option<&FluxType> {
        self.types.get(id.0 as usize)
    }

    pub fn contains(&self, id: TypeId) -> bool {
        (id.0 as usize) < self.types.len()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Looks up a named type by package path and name.
    pub fn lookup_named(&self, package: Option<&str>, name: &str) -> Option<TypeId> {
        self.named
            .get(&(package.map(str::to_string), name.to_string()))
            .copied()
    }

    /// Universe-scope type names.
    pub fn universe(name: &str) -> Option<TypeId> {
        Some(match name {
            "bool" => TypeId::BOOL,
            "int" => TypeId::INT,
            "int8" => TypeId::INT8,
            "int16" => TypeId::INT16,
            "int32" | "rune" => TypeId::INT32,
            "int64" => TypeId::INT64,
            "uint" => TypeId::UINT,
            "uint8" | "byte" => TypeId::UINT8,
            "uint16" => TypeId::UINT16,
            "uint32" => TypeId::UINT32,
            "uint64" => TypeId::UINT64,
            "float32" => TypeId::FLOAT32,
            "float64" => TypeId::FLOAT64,
            "string" => TypeId::STRING,
            "error" => TypeId::ERROR,
            "any" => TypeId::EMPTY_INTERFACE,
            _ => return None,
        })
    }

    // -----------------------------------------------------------------------
    // Structural queries
    // -----------------------------------------------------------------------

    /// Follows named types to their underlying type.
    pub fn underlying(&self, id: TypeId) -> TypeId {
        let mut current = id;
        // Named chains are collapsed at declaration; the bound only guards
        // against a malformed registry.
        for _ in 0..self.types.len() {
            match self.get(current) {
                Some(FluxType::Named(NamedDef {
                    underlying: Some(u),
                    ..
                })) => current = *u,
                _ => break,
            }
        }
        current
    }

    fn underlying_type(&self, id: TypeId) -> Option<&FluxType> {
        self.get(self.underlying(id))
    }

    pub fn basic(&self, id: TypeId) -> Option<BasicKind> {
        match self.underlying_type(id) {
            Some(FluxType::Basic(kind)) => Some(*kind),
            _ => None,
        }
    }

    pub fn named(&self, id: TypeId) -> Option<&NamedDef> {
        match self.get(id) {
            Some(FluxType::Named(def)) => Some(def),
            _ => None,
        }
    }

    pub fn is_untyped(&self, id: TypeId) -> bool {
        matches!(self.get(id), Some(FluxType::Basic(kind)) if kind.is_untyped())
    }

    pub fn is_sequence(&self, id: TypeId) -> bool {
        id == TypeId::SEQUENCE
    }

    /// Pointee of a pointer type (through named types).
    pub fn pointer_elem(&self, id: TypeId) -> Option<TypeId> {
        match self.underlying_type(id) {
            Some(FluxType::Pointer { elem }) => Some(*elem),
            _ => None,
        }
    }

    /// Strips one level of pointer, reporting whether one was stripped.
    pub fn indirect(&self, id: TypeId) -> (TypeId, bool) {
        match self.pointer_elem(id) {
            Some(elem) => (elem, true),
            None => (id, false),
        }
    }

    pub fn slice_elem(&self, id: TypeId) -> Option<TypeId> {
        match self.underlying_type(id) {
            Some(FluxType::Slice { elem }) => Some(*elem),
            _ => None,
        }
    }

    pub fn array_elem(&self, id: TypeId) -> Option<TypeId> {
        match self.underlying_type(id) {
            Some(FluxType::Array { elem, .. }) => Some(*elem),
            _ => None,
        }
    }

    /// Key and value types of a map type.
    pub fn map_types(&self, id: TypeId) -> Option<(TypeId, TypeId)> {
        match self.underlying_type(id) {
            Some(FluxType::Map { key, value }) => Some((*key, *value)),
            _ => None,
        }
    }

    pub fn struct_def(&self, id: TypeId) -> Option<&StructDef> {
        match self.underlying_type(id) {
            Some(FluxType::Struct(def)) => Some(def),
            _ => None,
        }
    }

    pub fn signature(&self, id: TypeId) -> Option<&Signature> {
        match self.underlying_type(id) {
            Some(FluxType::Signature(sig)) => Some(sig),
            _ => None,
        }
    }

    pub fn interface(&self, id: TypeId) -> Option<&InterfaceDef> {
        match self.underlying_type(id) {
            Some(FluxType::Interface(def)) => Some(def),
            _ => None,
        }
    }

    /// Methods callable on a value of type `id`, in declaration order.
    /// A pointer to a named type shares the named type's methods.
    pub fn method_set(&self, id: TypeId) -> Vec<(String, TypeId)> {
        if let Some(def) = self.interface(id) {
            return def
                .methods
                .iter()
                .map(|(name, sig)| (name.clone(), *sig))
                .collect();
        }
        let named = match self.get(id) {
            Some(FluxType::Named(def)) => Some(def),
            Some(FluxType::Pointer { elem }) => self.named(*elem),
            _ => None,
        };
        named
            .map(|def| {
                def.methods
                    .iter()
                    .map(|(name, sig)| (name.clone(), *sig))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The type an untyped constant assumes when it has no context.
    pub fn default_type(&self, id: TypeId) -> TypeId {
        match id {
            TypeId::UNTYPED_BOOL => TypeId::BOOL,
            TypeId::UNTYPED_INT => TypeId::INT,
            TypeId::UNTYPED_RUNE => TypeId::INT32,
            TypeId::UNTYPED_FLOAT => TypeId::FLOAT64,
            TypeId::UNTYPED_STRING => TypeId::STRING,
            other => other,
        }
    }

    /// Import paths of every package a type mentions by name.
    pub fn packages_of(&self, id: TypeId) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_packages(id, &mut out, 0);
        out
    }

    fn collect_packages(&self, id: TypeId, out: &mut BTreeSet<String>, depth: usize) {
        if depth > self.types.len() {
            return;
        }
        match self.get(id) {
            Some(FluxType::Named(def)) => {
                if let Some(pkg) = &def.package {
                    out.insert(pkg.clone());
                }
            }
            Some(FluxType::Pointer { elem })
            | Some(FluxType::Slice { elem })
            | Some(FluxType::Array { elem, .. }) => self.collect_packages(*elem, out, depth + 1),
            Some(FluxType::Map { key, value }) => {
                self.collect_packages(*key, out, depth + 1);
                self.collect_packages(*value, out, depth + 1);
            }
            Some(FluxType::Struct(def)) => {
                for ty in def.fields.values() {
                    self.collect_packages(*ty, out, depth + 1);
                }
            }
            Some(FluxType::Signature(sig)) => {
                for p in sig.params.iter().chain(sig.results.iter()) {
                    self.collect_packages(p.ty, out, depth + 1);
                }
            }
            Some(FluxType::Interface(def)) => {
                for ty in def.methods.values() {
                    self.collect_packages(*ty, out, depth + 1);
                }
            }
            Some(FluxType::Basic(_)) | Some(FluxType::Sequence) | None => {}
        }
    }

    // -----------------------------------------------------------------------
    // Conversion to and from type expressions
    // -----------------------------------------------------------------------

    /// Human-readable rendering with packages shortened to their last path
    /// segment. Used in diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        render_type_expr(&self.to_expr(id), None)
    }

    /// Converts a registered type back into a [`TypeExpr`].
    pub fn to_expr(&self, id: TypeId) -> TypeExpr {
        match self.get(id) {
            None => TypeExpr::name("invalid"),
            Some(FluxType::Basic(kind)) => TypeExpr::name(kind.name()),
            Some(FluxType::Named(def)) => TypeExpr::Name {
                package: def.package.clone(),
                name: def.name.clone(),
            },
            Some(FluxType::Pointer { elem }) => TypeExpr::pointer(self.to_expr(*elem)),
            Some(FluxType::Slice { elem }) => TypeExpr::slice(self.to_expr(*elem)),
            Some(FluxType::Array { elem, len }) => TypeExpr::Array {
                len: *len,
                elem: Box::new(self.to_expr(*elem)),
            },
            Some(FluxType::Map { key, value }) => {
                TypeExpr::map(self.to_expr(*key), self.to_expr(*value))
            }
            Some(FluxType::Struct(def)) => TypeExpr::Struct(
                def.fields
                    .iter()
                    .map(|(name, ty)| FieldExpr::new(name.clone(), self.to_expr(*ty)))
                    .collect(),
            ),
            Some(FluxType::Signature(sig)) => TypeExpr::Func(self.signature_expr(sig)),
            Some(FluxType::Interface(def)) => TypeExpr::Interface(
                def.methods
                    .iter()
                    .map(|(name, sig)| MethodExpr {
                        name: name.clone(),
                        sig: self
                            .signature(*sig)
                            .map(|s| self.signature_expr(s))
                            .unwrap_or_default(),
                    })
                    .collect(),
            ),
            Some(FluxType::Sequence) => TypeExpr::name("seq"),
        }
    }

    pub fn signature_expr(&self, sig: &Signature) -> SignatureExpr {
        SignatureExpr {
            params: sig
                .params
                .iter()
                .map(|p| FieldExpr::new(p.name.clone(), self.to_expr(p.ty)))
                .collect(),
            results: sig
                .results
                .iter()
                .map(|p| FieldExpr::new(p.name.clone(), self.to_expr(p.ty)))
                .collect(),
            variadic: sig.variadic,
        }
    }

    /// Interns a [`TypeExpr`], resolving names through `resolver`.
    pub fn intern_expr(
        &mut self,
        expr: &TypeExpr,
        resolver: &dyn Resolver,
    ) -> Result<TypeId, CoreError> {
        match expr {
            TypeExpr::Name { package, name } => {
                if package.is_none() {
                    if let Some(id) = Self::universe(name) {
                        return Ok(id);
                    }
                }
                let path = package
                    .clone()
                    .unwrap_or_else(|| resolver.current_package().to_string());
                if let Some(id) = self.lookup_named(Some(&path), name) {
                    return Ok(id);
                }
                match resolver.lookup(Some(&path), name) {
                    Some(Symbol::Type {
                        underlying,
                        methods,
                        ..
                    }) => {
                        let id = self.declare_named(Some(&path), name);
                        let u = self.intern_expr(&underlying, resolver)?;
                        let u = self.underlying(u);
                        self.set_underlying(id, u)?;
                        for method in &methods {
                            let sig = self.intern_signature(&method.sig, resolver)?;
                            self.add_method(id, &method.name, sig)?;
                        }
                        Ok(id)
                    }
                    _ => Err(CoreError::UnresolvedSymbol {
                        name: format!("{}.{}", path, name),
                    }),
                }
            }
            TypeExpr::Pointer(elem) => {
                let elem = self.intern_expr(elem, resolver)?;
                Ok(self.pointer_to(elem))
            }
            TypeExpr::Slice(elem) => {
                let elem = self.intern_expr(elem, resolver)?;
                Ok(self.slice_of(elem))
            }
            TypeExpr::Array { len, elem } => {
                let elem = self.intern_expr(elem, resolver)?;
                Ok(self.array_of(elem, *len))
            }
            TypeExpr::Map { key, value } => {
                let key = self.intern_expr(key, resolver)?;
                let value = self.intern_expr(value, resolver)?;
                Ok(self.map_of(key, value))
            }
            TypeExpr::Struct(fields) => {
                let mut def = StructDef::default();
                for field in fields {
                    let ty = self.intern_expr(&field.ty, resolver)?;
                    def.fields.insert(field.name.clone(), ty);
                }
                Ok(self.register(FluxType::Struct(def)))
            }
            TypeExpr::Func(sig) => self.intern_signature(sig, resolver),
            TypeExpr::Interface(methods) => {
                if methods.is_empty() {
                    return Ok(TypeId::EMPTY_INTERFACE);
                }
                let mut def = InterfaceDef::default();
                for method in methods {
                    let sig = self.intern_signature(&method.sig, resolver)?;
                    def.methods.insert(method.name.clone(), sig);
                }
                Ok(self.register(FluxType::Interface(def)))
            }
        }
    }

    /// Interns a signature expression as a `FluxType::Signature`.
    pub fn intern_signature(
        &mut self,
        sig: &SignatureExpr,
        resolver: &dyn Resolver,
    ) -> Result<TypeId, CoreError> {
        if sig.variadic && sig.params.is_empty() {
            return Err(CoreError::UnsupportedBinding {
                reason: "variadic signature without parameters".into(),
            });
        }
        let mut out = Signature {
            variadic: sig.variadic,
            ..Signature::default()
        };
        for p in &sig.params {
            out.params.push(Param {
                name: p.name.clone(),
                ty: self.intern_expr(&p.ty, resolver)?,
            });
        }
        for r in &sig.results {
            out.results.push(Param {
                name: r.name.clone(),
                ty: self.intern_expr(&r.ty, resolver)?,
            });
        }
        Ok(self.register(FluxType::Signature(out)))
    }
}

impl TryFrom<Vec<FluxType>> for TypeRegistry {
    type Error = String;

    fn try_from(types: Vec<FluxType>) -> Result<Self, Self::Error> {
        let builtins = Self::builtins();
        if types.len() < builtins.len() || types[..builtins.len()] != builtins[..] {
            return Err("type table does not start with the universe types".to_string());
        }
        let mut registry = TypeRegistry {
            types: Vec::with_capacity(types.len()),
            named: HashMap::new(),
            composites: HashMap::new(),
        };
        let count = types.len() as u32;
        for ty in types {
            let index = registry.types.len() as u32;
            // Unnamed composites may only refer back, so walking a type
            // always ends; a named type may refer anywhere in the table.
            let refs_ok = match &ty {
                FluxType::Signature(sig) if sig.variadic && sig.params.is_empty() => false,
                FluxType::Named(def) => {
                    def.underlying.map_or(true, |u| u.0 < count)
                        && def.methods.values().all(|m| m.0 < count)
                }
                _ => composite_refs(&ty).iter().all(|r| r.0 < index),
            };
            if !refs_ok {
                return Err(format!(
                    "type {} is malformed or refers to itself or a later type",
                    index
                ));
            }
            registry.push(ty);
        }
        Ok(registry)
    }
}

/// Types referenced directly by an unnamed type.
fn composite_refs(ty: &FluxType) -> Vec<TypeId> {
    match ty {
        FluxType::Pointer { elem } | FluxType::Slice { elem } | FluxType::Array { elem, .. } => {
            vec![*elem]
        }
        FluxType::Map { key, value } => vec![*key, *value],
        FluxType::Struct(def) => def.fields.values().copied().collect(),
        FluxType::Signature(sig) => sig
            .params
            .iter()
            .chain(sig.results.iter())
            .map(|p| p.ty)
            .collect(),
        FluxType::Interface(def) => def.methods.values().copied().collect(),
        FluxType::Basic(_) | FluxType::Named(_) | FluxType::Sequence => Vec::new(),
    }
}

impl From<TypeRegistry> for Vec<FluxType> {
    fn from(registry: TypeRegistry) -> Self {
        registry.types
    }
}

/// Renders a type expression in source syntax. Packages other than
/// `current` are qualified by their last path segment.
pub fn render_type_expr(expr: &TypeExpr, current: Option<&str>) -> String {
    match expr {
        TypeExpr::Name { package, name } => match package {
            Some(pkg) if Some(pkg.as_str()) != current => {
                format!("{}.{}", package_name(pkg), name)
            }
            _ => name.clone(),
        },
        TypeExpr::Pointer(elem) => format!("*{}", render_type_expr(elem, current)),
        TypeExpr::Slice(elem) => format!("[]{}", render_type_expr(elem, current)),
        TypeExpr::Array { len, elem } => format!("[{}]{}", len, render_type_expr(elem, current)),
        TypeExpr::Map { key, value } => format!(
            "map[{}]{}",
            render_type_expr(key, current),
            render_type_expr(value, current)
        ),
        TypeExpr::Struct(fields) => {
            if fields.is_empty() {
                return "struct{}".to_string();
            }
            let fields: Vec<String> = fields
                .iter()
                .map(|f| format!("{} {}", f.name, render_type_expr(&f.ty, current)))
                .collect();
            format!("struct{{ {} }}", fields.join("; "))
        }
        TypeExpr::Func(sig) => format!("func{}", render_signature(sig, current)),
        TypeExpr::Interface(methods) => {
            if methods.is_empty() {
                return "interface{}".to_string();
            }
            let methods: Vec<String> = methods
                .iter()
                .map(|m| format!("{}{}", m.name, render_signature(&m.sig, current)))
                .collect();
            format!("interface{{ {} }}", methods.join("; "))
        }
    }
}

/// Renders `(params) results` for a signature.
pub fn render_signature(sig: &SignatureExpr, current: Option<&str>) -> String {
    let render_list = |list: &[FieldExpr], variadic: bool| -> Vec<String> {
        list.iter()
            .enumerate()
            .map(|(i, f)| {
                let ty = match (&f.ty, variadic && i + 1 == list.len()) {
                    (TypeExpr::Slice(elem), true) => {
                        format!("...{}", render_type_expr(elem, current))
                    }
                    (ty, _) => render_type_expr(ty, current),
                };
                if f.name.is_empty() {
                    ty
                } else {
                    format!("{} {}", f.name, ty)
                }
            })
            .collect()
    };
    let params = render_list(&sig.params, sig.variadic).join(", ");
    let results = render_list(&sig.results, false);
    let named_results = sig.results.iter().any(|r| !r.name.is_empty());
    match results.len() {
        0 => format!("({})", params),
        1 if !named_results => format!("({}) {}", params, results[0]),
        _ => format!("({}) ({})", params, results.join(", ")),
    }
}

/// Source-level package name for an import path.
pub fn package_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::SymbolTable;

    fn resolver() -> SymbolTable {
        SymbolTable::new("example.com/shapes")
            .with(Symbol::Type {
                package: "example.com/shapes".into(),
                name: "Node".into(),
                underlying: TypeExpr::Struct(vec![
                    FieldExpr::new("Value", TypeExpr::name("int")),
                    FieldExpr::new("Next", TypeExpr::pointer(TypeExpr::name("Node"))),
                ]),
                methods: vec![MethodExpr {
                    name: "Len".into(),
                    sig: SignatureExpr {
                        params: vec![],
                        results: vec![FieldExpr::new("", TypeExpr::name("int"))],
                        variadic: false,
                    },
                }],
            })
    }

    #[test]
    fn builtins_preregistered() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.len(), TypeRegistry::BUILTIN_COUNT as usize);
        assert_eq!(reg.get(TypeId::STRING), Some(&FluxType::Basic(BasicKind::String)));
        assert_eq!(reg.get(TypeId::SEQUENCE), Some(&FluxType::Sequence));
        assert!(reg.interface(TypeId::ERROR).is_some());
    }

    #[test]
    fn composites_are_interned() {
        let mut reg = TypeRegistry::new();
        let a = reg.slice_of(TypeId::INT);
        let b = reg.slice_of(TypeId::INT);
        assert_eq!(a, b);
        let m1 = reg.map_of(TypeId::STRING, a);
        let m2 = reg.register(FluxType::Map {
            key: TypeId::STRING,
            value: b,
        });
        assert_eq!(m1, m2);
    }

    #[test]
    fn recursive_named_type_resolves() {
        let mut reg = TypeRegistry::new();
        let node = reg
            .intern_expr(&TypeExpr::name("Node"), &resolver())
            .unwrap();
        let fields = &reg.struct_def(node).unwrap().fields;
        assert_eq!(fields.len(), 2);
        let next = fields["Next"];
        assert_eq!(reg.pointer_elem(next), Some(node));
        assert_eq!(reg.method_set(node).len(), 1);
        assert_eq!(reg.method_set(next).len(), 1);
    }

    #[test]
    fn unknown_name_is_unresolved() {
        let mut reg = TypeRegistry::new();
        let err = reg
            .intern_expr(&TypeExpr::name("Missing"), &resolver())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnresolvedSymbol { .. }));
    }

    #[test]
    fn display_qualifies_foreign_packages() {
        let mut reg = TypeRegistry::new();
        let node = reg
            .intern_expr(&TypeExpr::name("Node"), &resolver())
            .unwrap();
        let ptr = reg.pointer_to(node);
        let m = reg.map_of(TypeId::STRING, ptr);
        assert_eq!(reg.display(m), "map[string]*shapes.Node");
        assert_eq!(
            render_type_expr(&reg.to_expr(m), Some("example.com/shapes")),
            "map[string]*Node"
        );
    }

    #[test]
    fn packages_of_stops_at_named_types() {
        let mut reg = TypeRegistry::new();
        let node = reg
            .intern_expr(&TypeExpr::name("Node"), &resolver())
            .unwrap();
        let s = reg.slice_of(node);
        let pkgs = reg.packages_of(s);
        assert_eq!(pkgs.into_iter().collect::<Vec<_>>(), vec!["example.com/shapes"]);
        assert!(reg.packages_of(TypeId::ERROR).is_empty());
    }

    #[test]
    fn serde_roundtrip_rebuilds_indexes() {
        let mut reg = TypeRegistry::new();
        let node = reg
            .intern_expr(&TypeExpr::name("Node"), &resolver())
            .unwrap();
        let json = serde_json::to_string(&reg).unwrap();
        let mut back: TypeRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), reg.len());
        assert_eq!(back.lookup_named(Some("example.com/shapes"), "Node"), Some(node));
        let before = back.len();
        let ptr = back.pointer_to(node);
        assert_eq!(back.len(), before);
        assert_eq!(back.pointer_elem(ptr), Some(node));
    }

    #[test]
    fn deserialize_rejects_truncated_table() {
        let json = "[]";
        assert!(serde_json::from_str::<TypeRegistry>(json).is_err());
    }

    #[test]
    fn table_rejects_cycles_through_unnamed_types() {
        let mut types: Vec<FluxType> = TypeRegistry::new().into();
        let own = TypeId(types.len() as u32);
        types.push(FluxType::Slice { elem: own });
        assert!(TypeRegistry::try_from(types.clone()).is_err());

        types.pop();
        types.push(FluxType::Map {
            key: TypeId::STRING,
            value: TypeId(own.0 + 1),
        });
        types.push(FluxType::Pointer { elem: own });
        assert!(TypeRegistry::try_from(types).is_err());
    }

    #[test]
    fn variadic_signature_needs_a_parameter() {
        let mut reg = TypeRegistry::new();
        let sig = SignatureExpr {
            params: vec![],
            results: vec![],
            variadic: true,
        };
        let err = reg.intern_signature(&sig, &resolver());
        assert!(matches!(err, Err(CoreError::UnsupportedBinding { .. })));

        let mut types: Vec<FluxType> = TypeRegistry::new().into();
        types.push(FluxType::Signature(Signature {
            params: vec![],
            results: vec![],
            variadic: true,
        }));
        assert!(TypeRegistry::try_from(types).is_err());
    }

    #[test]
    fn signature_rendering() {
        let sig = SignatureExpr {
            params: vec![
                FieldExpr::new("format", TypeExpr::name("string")),
                FieldExpr::new("args", TypeExpr::slice(TypeExpr::name("any"))),
            ],
            results: vec![FieldExpr::new("", TypeExpr::name("error"))],
            variadic: true,
        };
        assert_eq!(
            render_signature(&sig, None),
            "(format string, args ...any) error"
        );
    }
}
