//! One function open for editing.
//!
//! [`EditSession`] owns the graph, the store it came from and the resolver
//! used for symbol and type lookups. Edits go through [`EditSession::apply`]
//! or the interactive connection methods; layout changes the shell must
//! redraw are queued as [`Notification`]s.

use flux_codegen::{write_function, WriterOptions};
use flux_core::ast::FuncDecl;
use flux_core::{ConnectionId, FunctionGraph, GraphEvent, NodeId, Point, PortId, Resolver};
use flux_reader::load_or_empty;
use flux_storage::{fingerprint, ArtifactStore, Artifacts, FunctionKey};
use serde::{Deserialize, Serialize};

use crate::command::{Applied, Command};
use crate::error::SessionError;

/// The element the shell has selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Focus {
    Node(NodeId),
    Port(PortId),
    Connection(ConnectionId),
}

/// A change the shell should react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// A graph change that needs a redraw.
    Graph(GraphEvent),
    /// The focused element changed.
    FocusChanged(Option<Focus>),
    /// A save finished; `written` is false when the store already held
    /// identical artifacts.
    Saved { written: bool },
}

#[derive(Debug, Clone, Copy)]
struct PendingConnection {
    connection: ConnectionId,
    prior_focus: Option<Focus>,
}

pub struct EditSession<S, R> {
    store: S,
    resolver: R,
    key: FunctionKey,
    graph: FunctionGraph,
    options: WriterOptions,
    saved: Option<blake3::Hash>,
    focus: Option<Focus>,
    pending: Option<PendingConnection>,
    notifications: Vec<Notification>,
}

impl<S: ArtifactStore, R: Resolver> EditSession<S, R> {
    /// Opens `key` from `store`. A function that was never saved, or whose
    /// structural form cannot be loaded, starts as an empty graph with the
    /// signature of `decl`.
    pub fn open(store: S, key: FunctionKey, decl: &FuncDecl, resolver: R) -> Result<Self, SessionError> {
        let structural = store.load_structural(&key)?;
        let source = store.load_source(&key)?;
        let mut graph = load_or_empty(structural.as_deref(), decl, &resolver);
        graph.drain_events();

        let saved = match (structural, source) {
            (Some(structural), Some(source)) => Some(fingerprint(&Artifacts { structural, source })),
            _ => None,
        };
        tracing::info!(function = %key, nodes = graph.node_count(), "opened function");
        Ok(EditSession {
            store,
            resolver,
            key,
            graph,
            options: WriterOptions::default(),
            saved,
            focus: None,
            pending: None,
            notifications: Vec::new(),
        })
    }

    pub fn with_options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &FunctionGraph {
        &self.graph
    }

    pub fn key(&self) -> &FunctionKey {
        &self.key
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn focus(&self) -> Option<Focus> {
        self.focus
    }

    pub fn set_focus(&mut self, focus: Option<Focus>) {
        if self.focus != focus {
            self.focus = focus;
            self.notifications.push(Notification::FocusChanged(focus));
        }
    }

    /// The connection being dragged, if any.
    pub fn pending_connection(&self) -> Option<ConnectionId> {
        self.pending.map(|p| p.connection)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Applies one edit. On error the graph is unchanged.
    pub fn apply(&mut self, command: Command) -> Result<Applied, SessionError> {
        let tag = command.tag();
        let result = self.dispatch(command);
        match &result {
            Ok(applied) => tracing::debug!(command = tag, ?applied, "applied command"),
            Err(err) => tracing::debug!(command = tag, error = %err, "command rejected"),
        }
        self.collect_events();
        self.drop_stale_focus();
        result
    }

    /// Runs a command as one graph transaction, so types interned for a
    /// rejected command are rolled back with everything else.
    fn dispatch(&mut self, command: Command) -> Result<Applied, SessionError> {
        let resolver = &self.resolver;
        let applied = self.graph.transaction(|g| {
            Ok(match command {
                Command::AddNode { block, kind, at } => {
                    let id = g.add_node(block, kind)?;
                    g.set_position(id, at)?;
                    Applied::Node(id)
                }
                Command::RemoveNode { node } => {
                    g.remove_node(node)?;
                    Applied::Done
                }
                Command::Connect { from, to, feedback } => {
                    let id = if feedback {
                        g.connect_feedback(from, to)?
                    } else {
                        g.connect(from, to)?
                    };
                    Applied::Connection(id)
                }
                Command::Disconnect { connection } => {
                    g.remove_connection(connection)?;
                    Applied::Done
                }
                Command::SetFeedback {
                    connection,
                    feedback,
                } => {
                    g.set_feedback(connection, feedback)?;
                    Applied::Done
                }
                Command::BindType { node, ty } => {
                    let ty = match ty {
                        Some(expr) => Some(g.types.intern_expr(&expr, resolver)?),
                        None => None,
                    };
                    g.set_bound_type(node, ty)?;
                    Applied::Done
                }
                Command::ToggleSet { node } => {
                    g.toggle_set(node)?;
                    Applied::Done
                }
                Command::AddElement { node } => Applied::Port(g.add_element(node)?),
                Command::ToggleSpread { node } => {
                    g.toggle_spread(node)?;
                    Applied::Done
                }
                Command::SetLiteralText { node, text } => {
                    g.set_literal_text(node, &text)?;
                    Applied::Done
                }
                Command::AddParam {
                    ports_node,
                    name,
                    ty,
                } => {
                    let ty = g.types.intern_expr(&ty, resolver)?;
                    Applied::Port(g.add_param(ports_node, &name, ty)?)
                }
                Command::AddResult {
                    ports_node,
                    name,
                    ty,
                } => {
                    let ty = g.types.intern_expr(&ty, resolver)?;
                    Applied::Port(g.add_result(ports_node, &name, ty)?)
                }
                Command::RemovePort { port } => {
                    g.remove_port(port)?;
                    Applied::Done
                }
                Command::SetPosition { node, at } => {
                    g.set_position(node, at)?;
                    Applied::Done
                }
            })
        })?;
        Ok(applied)
    }

    // -----------------------------------------------------------------------
    // Interactive connection
    // -----------------------------------------------------------------------

    /// Starts dragging a new connection out of `port`. The free end dangles
    /// at `at` until [`finish_connection`](Self::finish_connection) or
    /// [`cancel_connection`](Self::cancel_connection).
    pub fn begin_connection(&mut self, port: PortId, at: Point) -> Result<ConnectionId, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::ConnectionInProgress);
        }
        let connection = self.graph.begin_connection(port, at)?;
        self.pending = Some(PendingConnection {
            connection,
            prior_focus: self.focus,
        });
        self.set_focus(Some(Focus::Connection(connection)));
        tracing::debug!(%connection, %port, "connection started");
        Ok(connection)
    }

    /// Moves the dangling end of the connection being dragged.
    pub fn drag(&mut self, at: Point) -> Result<(), SessionError> {
        let pending = self.pending.ok_or(SessionError::NoConnectionInProgress)?;
        self.graph.move_dangling(pending.connection, at)?;
        Ok(())
    }

    /// Drops the dangling end on `port`. If the graph refuses the
    /// connection it is discarded as if cancelled and the error returned.
    pub fn finish_connection(&mut self, port: PortId) -> Result<ConnectionId, SessionError> {
        let pending = self.pending.ok_or(SessionError::NoConnectionInProgress)?;
        match self.graph.complete_connection(pending.connection, port) {
            Ok(()) => {
                self.pending = None;
                self.collect_events();
                tracing::debug!(connection = %pending.connection, %port, "connection finished");
                Ok(pending.connection)
            }
            Err(err) => {
                tracing::debug!(connection = %pending.connection, error = %err, "connection refused");
                self.cancel_connection()?;
                Err(err.into())
            }
        }
    }

    /// Abandons the connection being dragged and gives focus back to
    /// whatever had it before the drag started.
    pub fn cancel_connection(&mut self) -> Result<(), SessionError> {
        let pending = self.pending.take().ok_or(SessionError::NoConnectionInProgress)?;
        self.graph.remove_connection(pending.connection)?;
        self.collect_events();
        self.set_focus(pending.prior_focus);
        self.drop_stale_focus();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Saving
    // -----------------------------------------------------------------------

    /// Both artifacts as they would be saved now.
    pub fn artifacts(&self) -> Result<Artifacts, SessionError> {
        let written = write_function(&self.graph, &self.options)?;
        Ok(Artifacts {
            structural: written.structural,
            source: written.source,
        })
    }

    /// Writes the function and stores both artifacts. A storage failure is
    /// returned and the graph is left as it is.
    pub fn save(&mut self) -> Result<bool, SessionError> {
        let artifacts = self.artifacts()?;
        let written = match self.store.save_function(&self.key, &artifacts) {
            Ok(written) => written,
            Err(err) => {
                tracing::warn!(function = %self.key, error = %err, "save failed");
                return Err(err.into());
            }
        };
        self.saved = Some(fingerprint(&artifacts));
        self.notifications.push(Notification::Saved { written });
        tracing::info!(function = %self.key, written, "saved function");
        Ok(written)
    }

    /// Whether the graph differs from what was last loaded or saved. A
    /// graph that cannot currently be written counts as changed.
    pub fn is_dirty(&self) -> bool {
        match self.artifacts() {
            Ok(artifacts) => self.saved != Some(fingerprint(&artifacts)),
            Err(_) => true,
        }
    }

    /// Returns and clears queued notifications, each reported once, in the
    /// order first seen.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.collect_events();
        let mut out: Vec<Notification> = Vec::with_capacity(self.notifications.len());
        for n in self.notifications.drain(..) {
            if !out.contains(&n) {
                out.push(n);
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn collect_events(&mut self) {
        self.notifications
            .extend(self.graph.drain_events().into_iter().map(Notification::Graph));
    }

    fn drop_stale_focus(&mut self) {
        let alive = match self.focus {
            None => true,
            Some(Focus::Node(id)) => self.graph.get_node(id).is_some(),
            Some(Focus::Port(id)) => self.graph.get_port(id).is_some(),
            Some(Focus::Connection(id)) => self.graph.get_connection(id).is_some(),
        };
        if !alive {
            self.set_focus(None);
        }
    }
}
