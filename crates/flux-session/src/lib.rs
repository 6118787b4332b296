//! Editing sessions over flux function graphs.
//!
//! An [`EditSession`] is the surface an editing shell talks to: it loads a
//! function from an [`ArtifactStore`](flux_storage::ArtifactStore) (falling
//! back to an empty graph), applies [`Command`]s, drives interactive
//! connection dragging, and saves both artifacts back.
//!
//! # Modules
//!
//! - [`command`] -- Serializable edit commands
//! - [`session`] -- The session itself, focus and notifications
//! - [`error`] -- [`SessionError`]

pub mod command;
pub mod error;
pub mod session;

pub use command::{Applied, Command};
pub use error::SessionError;
pub use session::{EditSession, Focus, Notification};
