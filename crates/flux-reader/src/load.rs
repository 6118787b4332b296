//! Loading with fallback.
//!
//! A function is normally reloaded from its structural form. Whenever that
//! form (or a statement tree being imported) cannot be translated, the
//! function starts over as an empty graph carrying only its signature, and
//! the failure is logged.

use flux_check::validate_graph;
use flux_core::ast::FuncDecl;
use flux_core::{FunctionGraph, Resolver, StructuralForm};

use crate::error::ReadError;
use crate::reader::read_function;

/// Rebuilds a graph from its structural form and validates it.
pub fn read_structural(text: &str) -> Result<FunctionGraph, ReadError> {
    let form = StructuralForm::from_json(text).map_err(|e| ReadError::Load {
        reason: e.to_string(),
    })?;
    let graph = form.into_graph().map_err(|e| ReadError::Load {
        reason: e.to_string(),
    })?;
    let diagnostics = validate_graph(&graph);
    if !diagnostics.is_empty() {
        return Err(ReadError::Invalid { diagnostics });
    }
    Ok(graph)
}

/// A function with its signature ports and an empty body.
///
/// If even the signature cannot be resolved the graph has no parameters
/// or results at all.
pub fn empty_function(decl: &FuncDecl, resolver: &dyn Resolver) -> FunctionGraph {
    let header = FuncDecl {
        body: Vec::new(),
        ..decl.clone()
    };
    match read_function(&header, resolver) {
        Ok(graph) => graph,
        Err(err) => {
            tracing::warn!(function = %decl.name, error = %err, "signature unresolved, starting bare");
            FunctionGraph::new(resolver.current_package(), &decl.name)
        }
    }
}

/// [`read_function`], falling back to [`empty_function`].
pub fn read_or_empty(decl: &FuncDecl, resolver: &dyn Resolver) -> FunctionGraph {
    match read_function(decl, resolver) {
        Ok(graph) => graph,
        Err(err) => {
            tracing::warn!(function = %decl.name, error = %err, "cannot read function, starting empty");
            empty_function(decl, resolver)
        }
    }
}

/// [`read_structural`] on the stored form if there is one, falling back to
/// [`empty_function`] for `decl`.
pub fn load_or_empty(
    structural: Option<&str>,
    decl: &FuncDecl,
    resolver: &dyn Resolver,
) -> FunctionGraph {
    let Some(text) = structural else {
        tracing::info!(function = %decl.name, "no structural form, starting a new function");
        return empty_function(decl, resolver);
    };
    match read_structural(text) {
        Ok(graph) => graph,
        Err(err) => {
            tracing::warn!(function = %decl.name, error = %err, "cannot load structural form, starting empty");
            empty_function(decl, resolver)
        }
    }
}
