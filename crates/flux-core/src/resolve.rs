//! Read-only resolution context.
//!
//! The Reader and the editing commands never consult global symbol caches.
//! Instead a [`Resolver`] is passed explicitly: it names the current package
//! and answers symbol lookups with [`TypeExpr`] descriptions, which the
//! function's [`TypeRegistry`](crate::type_id::TypeRegistry) interns on demand.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A syntactic type description, as produced by a parser or symbol index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeExpr {
    /// A type name. `package: None` means the universe scope or, failing
    /// that, the current package.
    Name {
        package: Option<String>,
        name: String,
    },
    Pointer(Box<TypeExpr>),
    Slice(Box<TypeExpr>),
    Array { len: u64, elem: Box<TypeExpr> },
    Map { key: Box<TypeExpr>, value: Box<TypeExpr> },
    Struct(Vec<FieldExpr>),
    Func(SignatureExpr),
    Interface(Vec<MethodExpr>),
}

impl TypeExpr {
    /// Unqualified name reference.
    pub fn name(name: impl Into<String>) -> Self {
        TypeExpr::Name {
            package: None,
            name: name.into(),
        }
    }

    /// Package-qualified name reference.
    pub fn qualified(package: impl Into<String>, name: impl Into<String>) -> Self {
        TypeExpr::Name {
            package: Some(package.into()),
            name: name.into(),
        }
    }

    pub fn pointer(elem: TypeExpr) -> Self {
        TypeExpr::Pointer(Box::new(elem))
    }

    pub fn slice(elem: TypeExpr) -> Self {
        TypeExpr::Slice(Box::new(elem))
    }

    pub fn map(key: TypeExpr, value: TypeExpr) -> Self {
        TypeExpr::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }
}

/// A struct field, parameter or result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldExpr {
    pub name: String,
    pub ty: TypeExpr,
}

impl FieldExpr {
    pub fn new(name: impl Into<String>, ty: TypeExpr) -> Self {
        FieldExpr {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureExpr {
    pub params: Vec<FieldExpr>,
    pub results: Vec<FieldExpr>,
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodExpr {
    pub name: String,
    pub sig: SignatureExpr,
}

/// A package-level declaration known to the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symbol {
    Func {
        package: String,
        name: String,
        sig: SignatureExpr,
    },
    Var {
        package: String,
        name: String,
        ty: TypeExpr,
    },
    Const {
        package: String,
        name: String,
        ty: TypeExpr,
    },
    Type {
        package: String,
        name: String,
        underlying: TypeExpr,
        methods: Vec<MethodExpr>,
    },
}

impl Symbol {
    pub fn package(&self) -> &str {
        match self {
            Symbol::Func { package, .. }
            | Symbol::Var { package, .. }
            | Symbol::Const { package, .. }
            | Symbol::Type { package, .. } => package,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Symbol::Func { name, .. }
            | Symbol::Var { name, .. }
            | Symbol::Const { name, .. }
            | Symbol::Type { name, .. } => name,
        }
    }
}

/// Static scope and type information consumed by the Reader.
pub trait Resolver {
    /// Import path of the package the function being edited belongs to.
    fn current_package(&self) -> &str;

    /// Looks up a package-level declaration. `package: None` means the
    /// current package.
    fn lookup(&self, package: Option<&str>, name: &str) -> Option<Symbol>;

    /// Maps a package name used in source (`strings` in `strings.Join`) to
    /// its import path. The default assumes the last path segment.
    fn import_path(&self, package_name: &str) -> Option<String> {
        let _ = package_name;
        None
    }
}

/// In-memory [`Resolver`] over a flat symbol table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    package: String,
    symbols: HashMap<String, Symbol>,
    imports: HashMap<String, String>,
}

impl SymbolTable {
    pub fn new(package: impl Into<String>) -> Self {
        SymbolTable {
            package: package.into(),
            symbols: HashMap::new(),
            imports: HashMap::new(),
        }
    }

    /// Adds a declaration; a later insert with the same package and name
    /// replaces the earlier one.
    pub fn insert(&mut self, symbol: Symbol) {
        let key = Self::key(symbol.package(), symbol.name());
        if symbol.package() != self.package {
            let path = symbol.package().to_string();
            let short = path.rsplit('/').next().unwrap_or(&path).to_string();
            self.imports.entry(short).or_insert(path);
        }
        self.symbols.insert(key, symbol);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, symbol: Symbol) -> Self {
        self.insert(symbol);
        self
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn key(package: &str, name: &str) -> String {
        format!("{}\u{0}{}", package, name)
    }
}

impl Resolver for SymbolTable {
    fn current_package(&self) -> &str {
        &self.package
    }

    fn lookup(&self, package: Option<&str>, name: &str) -> Option<Symbol> {
        let package = package.unwrap_or(&self.package);
        self.symbols.get(&Self::key(package, name)).cloned()
    }

    fn import_path(&self, package_name: &str) -> Option<String> {
        self.imports.get(package_name).cloned()
    }
}
