//! Reader: builds function graphs from statement trees and from their
//! stored structural form.
//!
//! # Modules
//!
//! - [`reader`] -- statement tree plus resolver to graph
//! - [`load`] -- structural form to graph, and the empty-graph fallbacks
//! - [`error`] -- [`ReadError`]

pub mod error;
pub mod load;
pub mod reader;

pub use error::ReadError;
pub use load::{empty_function, load_or_empty, read_or_empty, read_structural};
pub use reader::read_function;
