pub mod assign;
pub mod ast;
pub mod error;
pub mod graph;
pub mod id;
pub mod kind;
pub mod node;
mod react;
pub mod resolve;
pub mod structural;
pub mod type_id;
pub mod types;

// Re-export commonly used types
pub use error::CoreError;
pub use graph::{FunctionGraph, PackageRefs};
pub use id::{BlockId, ConnectionId, NodeId, PortId};
pub use kind::{BranchKind, Callee, LiteralKind, NodeKind, PortsRole, ValueTarget};
pub use node::{Block, Connection, Direction, Endpoint, GraphEvent, Node, Point, Port};
pub use resolve::{Resolver, Symbol, SymbolTable, TypeExpr};
pub use structural::StructuralForm;
pub use type_id::{TypeId, TypeRegistry};
pub use types::{FluxType, Param, Signature};
