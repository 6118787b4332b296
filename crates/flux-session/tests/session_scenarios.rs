//! Editing sessions end to end: commands, interactive connections, saving
//! and reopening.

use flux_core::ast::FuncDecl;
use flux_core::resolve::{FieldExpr, SymbolTable, TypeExpr};
use flux_core::{GraphEvent, NodeId, NodeKind, Point, PortId};
use flux_session::{Applied, Command, EditSession, Focus, Notification, SessionError};
use flux_storage::{ArtifactStore, DirStore, FunctionKey, InMemoryStore, StorageError};

const PKG: &str = "example.com/app";

const ADD_SOURCE: &str = "package app\n\
                          \n\
                          func Add(a int, b int) (sum int) {\n\
                          \tv1 := a + b\n\
                          \tsum = v1\n\
                          \treturn\n\
                          }\n";

fn add_decl() -> FuncDecl {
    FuncDecl {
        name: "Add".into(),
        recv: None,
        params: vec![
            FieldExpr::new("a", TypeExpr::name("int")),
            FieldExpr::new("b", TypeExpr::name("int")),
        ],
        results: vec![FieldExpr::new("sum", TypeExpr::name("int"))],
        variadic: false,
        body: vec![],
    }
}

fn key() -> FunctionKey {
    FunctionKey::new(PKG, "Add")
}

fn open<S: ArtifactStore>(store: S) -> EditSession<S, SymbolTable> {
    EditSession::open(store, key(), &add_decl(), SymbolTable::new(PKG)).unwrap()
}

struct AddPorts {
    a: PortId,
    b: PortId,
    sum: PortId,
    x: PortId,
    y: PortId,
    out: PortId,
}

fn add_operator<S: ArtifactStore>(s: &mut EditSession<S, SymbolTable>) -> (NodeId, AddPorts) {
    let root = s.graph().root_block();
    let applied = s
        .apply(Command::AddNode {
            block: root,
            kind: NodeKind::Operator {
                op: "+".into(),
                unary: false,
            },
            at: Point::new(120.0, 40.0),
        })
        .unwrap();
    let Applied::Node(op) = applied else {
        panic!("expected a node, got {:?}", applied);
    };
    let g = s.graph();
    let params = g.get_node(g.inputs_node()).unwrap().data_outputs().to_vec();
    let sum = g.get_node(g.outputs_node()).unwrap().data_inputs()[0];
    let node = g.get_node(op).unwrap();
    let ports = AddPorts {
        a: params[0],
        b: params[1],
        sum,
        x: node.data_inputs()[0],
        y: node.data_inputs()[1],
        out: node.data_outputs()[0],
    };
    (op, ports)
}

fn connect<S: ArtifactStore>(s: &mut EditSession<S, SymbolTable>, from: PortId, to: PortId) {
    s.apply(Command::Connect {
        from,
        to,
        feedback: false,
    })
    .unwrap();
}

fn build_add<S: ArtifactStore>(s: &mut EditSession<S, SymbolTable>) -> (NodeId, AddPorts) {
    let (op, p) = add_operator(s);
    connect(s, p.a, p.x);
    connect(s, p.b, p.y);
    connect(s, p.out, p.sum);
    (op, p)
}

// ---------------------------------------------------------------------------
// Open and save
// ---------------------------------------------------------------------------

#[test]
fn new_function_starts_from_its_signature() {
    let s = open(InMemoryStore::new());
    let g = s.graph();
    assert_eq!(g.node_count(), 2);
    assert_eq!(g.signature().params.len(), 2);
    assert_eq!(g.signature().results.len(), 1);
    assert!(s.is_dirty());
}

#[test]
fn edits_save_and_reopen_clean() {
    let mut s = open(InMemoryStore::new());
    build_add(&mut s);
    assert!(s.is_dirty());
    assert!(s.save().unwrap());
    assert!(!s.is_dirty());
    assert!(!s.save().unwrap());
    assert_eq!(s.store().load_source(&key()).unwrap().as_deref(), Some(ADD_SOURCE));

    let reopened = open(s.store().clone());
    assert_eq!(reopened.graph().node_count(), 3);
    assert_eq!(reopened.graph().connection_count(), 3);
    assert!(!reopened.is_dirty());
    assert_eq!(reopened.artifacts().unwrap().source, ADD_SOURCE);
}

#[test]
fn unreadable_structural_form_falls_back_to_empty() {
    let mut store = InMemoryStore::new();
    store
        .save_function(
            &key(),
            &flux_storage::Artifacts {
                structural: "{ not json".into(),
                source: "package app\n".into(),
            },
        )
        .unwrap();
    let s = open(store);
    assert_eq!(s.graph().node_count(), 2);
    assert_eq!(s.graph().signature().params.len(), 2);
    assert!(s.is_dirty());
}

#[test]
fn save_failure_is_surfaced_and_graph_kept() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = open(DirStore::new(dir.path()));
    build_add(&mut s);
    // A plain file where the package directory must go.
    std::fs::write(dir.path().join("example.com"), "occupied").unwrap();

    let err = s.save().unwrap_err();
    assert!(matches!(err, SessionError::Storage(StorageError::Io(_))));
    assert_eq!(s.graph().connection_count(), 3);
    assert!(s.is_dirty());
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn rejected_command_leaves_graph_unchanged() {
    let mut s = open(InMemoryStore::new());
    let (_, p) = build_add(&mut s);
    let before = s.artifacts().unwrap();

    // Two outputs cannot be joined.
    let err = s
        .apply(Command::Connect {
            from: p.a,
            to: p.out,
            feedback: false,
        })
        .unwrap_err();
    assert!(matches!(err, SessionError::Rejected(_)));
    assert_eq!(s.artifacts().unwrap(), before);
}

#[test]
fn rejected_type_binding_interns_nothing() {
    let mut s = open(InMemoryStore::new());
    let (op, _) = build_add(&mut s);
    s.save().unwrap();
    let types_before = s.graph().types.len();

    // Operators carry no bound type.
    let err = s
        .apply(Command::BindType {
            node: op,
            ty: Some(TypeExpr::pointer(TypeExpr::slice(TypeExpr::name("string")))),
        })
        .unwrap_err();
    assert!(matches!(err, SessionError::Rejected(_)));
    // Nor can an operator take parameters.
    let err = s
        .apply(Command::AddParam {
            ports_node: op,
            name: "m".into(),
            ty: TypeExpr::map(TypeExpr::name("string"), TypeExpr::name("bool")),
        })
        .unwrap_err();
    assert!(matches!(err, SessionError::Rejected(_)));

    assert_eq!(s.graph().types.len(), types_before);
    assert!(!s.is_dirty());
}

#[test]
fn parameters_and_positions_through_commands() {
    let mut s = open(InMemoryStore::new());
    let inputs = s.graph().inputs_node();
    let applied = s
        .apply(Command::AddParam {
            ports_node: inputs,
            name: "label".into(),
            ty: TypeExpr::name("string"),
        })
        .unwrap();
    assert!(matches!(applied, Applied::Port(_)));
    let params: Vec<String> = s
        .graph()
        .signature()
        .params
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(params, vec!["a", "b", "label"]);

    let (op, _) = add_operator(&mut s);
    s.apply(Command::SetPosition {
        node: op,
        at: Point::new(5.0, 6.0),
    })
    .unwrap();
    assert_eq!(s.graph().get_node(op).unwrap().position, Point::new(5.0, 6.0));

    s.apply(Command::RemoveNode { node: op }).unwrap();
    assert!(s.graph().get_node(op).is_none());
}

#[test]
fn notifications_are_drained_once() {
    let mut s = open(InMemoryStore::new());
    assert!(s.drain_notifications().is_empty());

    let root = s.graph().root_block();
    let (op, _) = add_operator(&mut s);
    let notes = s.drain_notifications();
    assert!(notes.contains(&Notification::Graph(GraphEvent::LayoutInvalidated(op))));
    assert!(notes.contains(&Notification::Graph(GraphEvent::BlockChanged(root))));
    assert!(s.drain_notifications().is_empty());

    s.save().unwrap();
    assert_eq!(s.drain_notifications(), vec![Notification::Saved { written: true }]);
}

// ---------------------------------------------------------------------------
// Interactive connection
// ---------------------------------------------------------------------------

#[test]
fn cancelled_drag_restores_focus() {
    let mut s = open(InMemoryStore::new());
    let (op, p) = add_operator(&mut s);
    s.set_focus(Some(Focus::Node(op)));

    let conn = s.begin_connection(p.a, Point::new(10.0, 10.0)).unwrap();
    assert_eq!(s.focus(), Some(Focus::Connection(conn)));
    assert_eq!(s.pending_connection(), Some(conn));
    s.drag(Point::new(50.0, 20.0)).unwrap();
    assert!(matches!(
        s.begin_connection(p.b, Point::default()),
        Err(SessionError::ConnectionInProgress)
    ));

    s.cancel_connection().unwrap();
    assert_eq!(s.focus(), Some(Focus::Node(op)));
    assert_eq!(s.pending_connection(), None);
    assert_eq!(s.graph().connection_count(), 0);
    assert!(matches!(s.cancel_connection(), Err(SessionError::NoConnectionInProgress)));
}

#[test]
fn finished_drag_connects() {
    let mut s = open(InMemoryStore::new());
    let (_, p) = add_operator(&mut s);

    let conn = s.begin_connection(p.x, Point::default()).unwrap();
    s.drag(Point::new(1.0, 1.0)).unwrap();
    assert_eq!(s.finish_connection(p.a).unwrap(), conn);
    assert_eq!(s.pending_connection(), None);
    assert_eq!(s.graph().input_source(p.x), Some(p.a));
    assert_eq!(s.focus(), Some(Focus::Connection(conn)));
}

#[test]
fn refused_drop_discards_the_drag() {
    let mut s = open(InMemoryStore::new());
    let (_, p) = add_operator(&mut s);
    s.set_focus(Some(Focus::Port(p.y)));

    s.begin_connection(p.a, Point::default()).unwrap();
    // Output onto output.
    let err = s.finish_connection(p.b).unwrap_err();
    assert!(matches!(err, SessionError::Rejected(_)));
    assert_eq!(s.pending_connection(), None);
    assert_eq!(s.graph().connection_count(), 0);
    assert_eq!(s.focus(), Some(Focus::Port(p.y)));
}

#[test]
fn removing_the_focused_node_clears_focus() {
    let mut s = open(InMemoryStore::new());
    let (op, _) = add_operator(&mut s);
    s.set_focus(Some(Focus::Node(op)));
    s.drain_notifications();

    s.apply(Command::RemoveNode { node: op }).unwrap();
    assert_eq!(s.focus(), None);
    assert!(s.drain_notifications().contains(&Notification::FocusChanged(None)));
}
