//! Storage-layer types: function identity and the artifacts kept for it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a stored function by package path and function name.
///
/// Methods are keyed by their bare name; a package cannot declare a
/// function and a method of the same name on different receivers and
/// keep both in one store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionKey {
    pub package: String,
    pub name: String,
}

impl FunctionKey {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        FunctionKey {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}

/// The two artifacts kept per function. The structural form is what gets
/// reloaded; the program text is output only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub structural: String,
    pub source: String,
}
