//! Writer for flux function graphs.
//!
//! Emits the two artifacts kept per function: program text, produced purely
//! as output, and the structural form the reader consumes on the next load.
//!
//! # Modules
//!
//! - [`error`] -- Error types for writer failures
//! - [`schedule`] -- Statement order within a block
//! - [`lower`] -- Graph to statement tree with sequence annotations
//! - [`render`] -- Statement tree to program text

pub mod error;
pub mod lower;
pub mod render;
pub mod schedule;

pub use error::CodegenError;
pub use lower::{lower_function, Lowered};
pub use render::{render_function, render_program};

use flux_core::{FunctionGraph, StructuralForm};
use serde::{Deserialize, Serialize};

/// Options controlling emitted program text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Prefix of synthetic variable names (`v1`, `v2`, ...).
    pub name_prefix: String,

    /// One level of indentation.
    pub indent: String,

    /// Whether sequence annotations are printed as trailing comments.
    pub seq_comments: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            name_prefix: "v".to_string(),
            indent: "\t".to_string(),
            seq_comments: true,
        }
    }
}

/// Both artifacts of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub source: String,
    pub structural: String,
    pub imports: Vec<String>,
}

/// Emits program text and structural form for a function.
pub fn write_function(graph: &FunctionGraph, options: &WriterOptions) -> Result<Written, CodegenError> {
    let lowered = lower_function(graph, options)?;
    let source = render_program(graph.package(), &lowered, options);
    let structural = write_structural(graph)?;
    tracing::debug!(
        function = graph.name(),
        imports = lowered.imports.len(),
        bytes = source.len(),
        "wrote function"
    );
    Ok(Written {
        source,
        structural,
        imports: lowered.imports,
    })
}

/// Encodes the structural form of a function as JSON.
pub fn write_structural(graph: &FunctionGraph) -> Result<String, CodegenError> {
    Ok(StructuralForm::from_graph(graph).to_json()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = WriterOptions::default();
        assert_eq!(options.name_prefix, "v");
        assert_eq!(options.indent, "\t");
        assert!(options.seq_comments);
    }

    #[test]
    fn test_options_fill_missing_fields() {
        let options: WriterOptions = serde_json::from_str(r#"{"indent": "    "}"#).unwrap();
        assert_eq!(options.indent, "    ");
        assert_eq!(options.name_prefix, "v");
    }

    #[test]
    fn test_empty_function_text() {
        let graph = FunctionGraph::new("example.com/app", "Noop");
        let written = write_function(&graph, &WriterOptions::default()).unwrap();
        assert_eq!(written.source, "package app\n\nfunc Noop() {\n\treturn\n}\n");
        assert!(written.structural.contains("\"Noop\""));
    }
}
