//! Whole-graph validation for flux function graphs.
//!
//! Editing operations keep a graph valid one step at a time; this crate
//! re-checks every invariant over a complete graph, typically one decoded
//! from its structural form, and reports all violations at once.

pub mod diagnostics;
pub mod validate;

pub use diagnostics::GraphDiagnostic;
pub use validate::{is_valid, validate_graph};
