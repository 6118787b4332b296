//! Reader scenarios: statement trees translated into graphs.

use flux_check::validate_graph;
use flux_core::ast::{Expr, FuncDecl, SeqAnnotation, Stmt, StmtKind};
use flux_core::kind::{Callee, NodeKind, ValueTarget};
use flux_core::resolve::{FieldExpr, MethodExpr, SignatureExpr, Symbol, SymbolTable, TypeExpr};
use flux_core::{FunctionGraph, NodeId, StructuralForm, TypeId};
use flux_reader::{load_or_empty, read_function, read_or_empty, read_structural, ReadError};

const PKG: &str = "example.com/app";

fn int() -> TypeExpr {
    TypeExpr::name("int")
}

fn field(name: &str, ty: TypeExpr) -> FieldExpr {
    FieldExpr::new(name, ty)
}

fn resolver() -> SymbolTable {
    SymbolTable::new(PKG)
        .with(Symbol::Func {
            package: PKG.into(),
            name: "Print".into(),
            sig: SignatureExpr {
                params: vec![field("s", TypeExpr::name("string"))],
                results: vec![],
                variadic: false,
            },
        })
        .with(Symbol::Func {
            package: "strings".into(),
            name: "ToUpper".into(),
            sig: SignatureExpr {
                params: vec![field("s", TypeExpr::name("string"))],
                results: vec![field("", TypeExpr::name("string"))],
                variadic: false,
            },
        })
        .with(Symbol::Type {
            package: PKG.into(),
            name: "Point".into(),
            underlying: TypeExpr::Struct(vec![field("X", int()), field("Y", int())]),
            methods: vec![],
        })
        .with(Symbol::Type {
            package: PKG.into(),
            name: "Counter".into(),
            underlying: int(),
            methods: vec![MethodExpr {
                name: "Add".into(),
                sig: SignatureExpr {
                    params: vec![field("n", int())],
                    results: vec![field("", int())],
                    variadic: false,
                },
            }],
        })
}

fn func(name: &str, params: Vec<FieldExpr>, results: Vec<FieldExpr>, body: Vec<Stmt>) -> FuncDecl {
    FuncDecl {
        name: name.into(),
        recv: None,
        params,
        results,
        variadic: false,
        body,
    }
}

fn define(name: &str, value: Expr) -> Stmt {
    Stmt::new(StmtKind::Define {
        names: vec![name.into()],
        value,
    })
}

fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::new(StmtKind::Assign {
        targets: vec![Expr::ident(target)],
        values: vec![value],
    })
}

fn ret() -> Stmt {
    Stmt::new(StmtKind::Return)
}

fn nodes_of<'g>(g: &'g FunctionGraph, tag: &str) -> Vec<(NodeId, &'g flux_core::Node)> {
    g.nodes().filter(|(_, n)| n.kind.tag() == tag).collect()
}

fn feedback_count(g: &FunctionGraph) -> usize {
    g.connections().filter(|(_, c)| c.feedback).count()
}

// ---------------------------------------------------------------------------
// Data flow
// ---------------------------------------------------------------------------

#[test]
fn operator_feeds_named_result() {
    let decl = func(
        "Add",
        vec![field("a", int()), field("b", int())],
        vec![field("sum", int())],
        vec![
            define("s", Expr::binary("+", Expr::ident("a"), Expr::ident("b"))),
            assign("sum", Expr::ident("s")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();

    assert_eq!(g.node_count(), 3);
    assert_eq!(g.connection_count(), 3);
    let ops = nodes_of(&g, "operator");
    assert_eq!(ops.len(), 1);
    let out = ops[0].1.outputs[0];
    assert_eq!(g.get_port(out).unwrap().ty, Some(TypeId::INT));
    let result = g.get_node(g.outputs_node()).unwrap().inputs[0];
    assert_eq!(g.input_source(result), Some(out));
    assert!(validate_graph(&g).is_empty());
}

#[test]
fn reassigning_a_read_binding_becomes_feedback() {
    // acc := start; for _, x := range xs { next := acc + x; acc = next }
    let decl = func(
        "Sum",
        vec![field("xs", TypeExpr::slice(int())), field("start", int())],
        vec![field("total", int())],
        vec![
            define("acc", Expr::ident("start")),
            Stmt::new(StmtKind::Range {
                key: "_".into(),
                value: Some("x".into()),
                x: Expr::ident("xs"),
                body: vec![
                    define("next", Expr::binary("+", Expr::ident("acc"), Expr::ident("x"))),
                    assign("acc", Expr::ident("next")),
                ],
            }),
            assign("total", Expr::ident("acc")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();

    assert_eq!(feedback_count(&g), 1);
    let (op_id, op) = nodes_of(&g, "operator")[0];
    let (_, fb) = g.connections().find(|(_, c)| c.feedback).unwrap();
    assert_eq!(fb.source_port(), Some(op.outputs[0]));
    assert_eq!(fb.destination_port(), Some(op.inputs[0]));
    assert_eq!(g.get_node(op_id).unwrap().block, fb.block);
    // xs -> loop, start -> acc + x, elem -> acc + x, feedback, start -> total
    assert_eq!(g.connection_count(), 5);
    assert!(validate_graph(&g).is_empty());
}

#[test]
fn range_over_map_binds_key_and_value() {
    let decl = func(
        "Keys",
        vec![field("m", TypeExpr::map(TypeExpr::name("string"), int()))],
        vec![],
        vec![Stmt::new(StmtKind::Range {
            key: "k".into(),
            value: Some("v".into()),
            x: Expr::ident("m"),
            body: vec![Stmt::new(StmtKind::Expr(Expr::call(
                Expr::ident("Print"),
                vec![Expr::ident("k")],
            )))],
        })],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    let (_, lp) = nodes_of(&g, "loop")[0];
    let inputs = g.get_node(lp.inner[0]).unwrap();
    let names: Vec<&str> = inputs
        .outputs
        .iter()
        .map(|p| g.get_port(*p).unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["key", "value"]);
    let (_, call) = nodes_of(&g, "call")[0];
    assert_eq!(g.input_source(call.data_inputs()[0]), Some(inputs.outputs[0]));
}

#[test]
fn composite_fields_and_field_read() {
    let point = || TypeExpr::name("Point");
    let decl = func(
        "Shift",
        vec![field("x", int()), field("p", point())],
        vec![field("y", int())],
        vec![
            define(
                "q",
                Expr::Composite {
                    ty: point(),
                    fields: vec![("X".into(), Expr::ident("x")), ("Y".into(), Expr::int("1"))],
                },
            ),
            define("py", Expr::selector(Expr::ident("p"), "Y")),
            assign("y", Expr::ident("py")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();

    let (_, comp) = nodes_of(&g, "composite")[0];
    assert_eq!(comp.inputs.len(), 2);
    assert!(g.input_source(comp.inputs[0]).is_some());
    assert!(g.input_source(comp.inputs[1]).is_none(), "constant operands stay unconnected");

    let (_, value) = nodes_of(&g, "value")[0];
    assert_eq!(
        value.kind,
        NodeKind::Value {
            target: ValueTarget::Field { name: "Y".into() },
            set: false
        }
    );
    let out = *value.data_outputs().first().unwrap();
    assert_eq!(g.get_port(out).unwrap().ty, Some(TypeId::INT));
}

#[test]
fn method_call_connects_receiver() {
    let decl = func(
        "Bump",
        vec![field("c", TypeExpr::name("Counter")), field("n", int())],
        vec![field("r", int())],
        vec![
            define(
                "v",
                Expr::call(Expr::selector(Expr::ident("c"), "Add"), vec![Expr::ident("n")]),
            ),
            assign("r", Expr::ident("v")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    let (_, call) = nodes_of(&g, "call")[0];
    assert!(matches!(
        &call.kind,
        NodeKind::Call {
            callee: Callee::Method { name, .. },
            ..
        } if name == "Add"
    ));
    let params = g.get_node(g.inputs_node()).unwrap().outputs.clone();
    assert_eq!(g.input_source(call.data_inputs()[0]), Some(params[0]));
    assert_eq!(g.input_source(call.data_inputs()[1]), Some(params[1]));
}

#[test]
fn qualified_call_counts_package_reference() {
    let decl = func(
        "Shout",
        vec![field("s", TypeExpr::name("string"))],
        vec![field("r", TypeExpr::name("string"))],
        vec![
            define(
                "u",
                Expr::call(Expr::selector(Expr::ident("strings"), "ToUpper"), vec![Expr::ident("s")]),
            ),
            assign("r", Expr::ident("u")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    assert_eq!(g.package_refs().count("strings"), 1);
    let (_, call) = nodes_of(&g, "call")[0];
    assert!(matches!(
        &call.kind,
        NodeKind::Call {
            callee: Callee::Func { package, .. },
            ..
        } if package == "strings"
    ));
}

#[test]
fn call_with_type_name_is_a_conversion() {
    let decl = func(
        "Widen",
        vec![field("n", int())],
        vec![field("f", TypeExpr::name("float64"))],
        vec![
            define("w", Expr::call(Expr::ident("float64"), vec![Expr::ident("n")])),
            assign("f", Expr::ident("w")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    let (_, conv) = nodes_of(&g, "convert")[0];
    assert_eq!(conv.kind, NodeKind::Convert { ty: Some(TypeId::FLOAT64) });
}

#[test]
fn append_elements_and_comma_ok_index() {
    let decl = func(
        "Grow",
        vec![
            field("xs", TypeExpr::slice(int())),
            field("a", int()),
            field("m", TypeExpr::map(TypeExpr::name("string"), int())),
            field("k", TypeExpr::name("string")),
        ],
        vec![],
        vec![
            define(
                "ys",
                Expr::call(
                    Expr::ident("append"),
                    vec![Expr::ident("xs"), Expr::ident("a"), Expr::int("2")],
                ),
            ),
            Stmt::new(StmtKind::Define {
                names: vec!["v".into(), "ok".into()],
                value: Expr::Index {
                    x: Box::new(Expr::ident("m")),
                    key: Box::new(Expr::ident("k")),
                },
            }),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();

    let (_, app) = nodes_of(&g, "append")[0];
    assert_eq!(app.data_inputs().len(), 3);
    let (_, index) = nodes_of(&g, "index")[0];
    let outs: Vec<&str> = index
        .data_outputs()
        .iter()
        .map(|p| g.get_port(*p).unwrap().name.as_str())
        .collect();
    assert_eq!(outs, vec!["value", "ok"]);
}

#[test]
fn func_literal_and_value_call() {
    let decl = func(
        "Apply",
        vec![field("x", int())],
        vec![field("r", int())],
        vec![
            define(
                "f",
                Expr::FuncLit {
                    params: vec![field("a", int())],
                    results: vec![field("b", int())],
                    body: vec![assign("b", Expr::ident("a")), ret()],
                },
            ),
            define("y", Expr::call(Expr::ident("f"), vec![Expr::ident("x")])),
            assign("r", Expr::ident("y")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();

    let (_, lit) = nodes_of(&g, "func-literal")[0];
    let sig_ty = g.get_port(lit.outputs[0]).unwrap().ty.unwrap();
    let sig = g.types.signature(sig_ty).unwrap();
    assert_eq!(sig.params.len(), 1);
    assert_eq!(sig.results.len(), 1);
    let inner_in = g.get_node(lit.inner[0]).unwrap().outputs[0];
    let inner_out = g.get_node(lit.inner[1]).unwrap().inputs[0];
    assert_eq!(g.input_source(inner_out), Some(inner_in));

    let (_, call) = nodes_of(&g, "call")[0];
    assert_eq!(call.data_inputs().len(), 2);
    assert_eq!(call.data_outputs().len(), 1);
    assert!(validate_graph(&g).is_empty());
}

// ---------------------------------------------------------------------------
// Sequence and scope
// ---------------------------------------------------------------------------

#[test]
fn sequence_annotations_become_sequence_edges() {
    let print = || Stmt::new(StmtKind::Expr(Expr::call(Expr::ident("Print"), vec![Expr::ident("s")])));
    let decl = func(
        "Twice",
        vec![field("s", TypeExpr::name("string"))],
        vec![],
        vec![
            print().with_seq(SeqAnnotation {
                after: vec![],
                id: Some(1),
            }),
            print().with_seq(SeqAnnotation {
                after: vec![1],
                id: None,
            }),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    let calls = nodes_of(&g, "call");
    assert_eq!(calls.len(), 2);
    let first_out = calls[0].1.seq_output().unwrap();
    let second_in = calls[1].1.seq_input().unwrap();
    assert_eq!(g.input_source(second_in), Some(first_out));
    assert_eq!(g.connection_count(), 3);
}

#[test]
fn operands_from_outer_blocks_connect_in_the_outer_block() {
    let decl = func(
        "Maybe",
        vec![field("c", TypeExpr::name("bool")), field("s", TypeExpr::name("string"))],
        vec![],
        vec![Stmt::new(StmtKind::If {
            cond: Expr::ident("c"),
            then: vec![Stmt::new(StmtKind::Expr(Expr::call(
                Expr::ident("Print"),
                vec![Expr::ident("s")],
            )))],
            els: vec![],
        })],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    let (_, call) = nodes_of(&g, "call")[0];
    let (_, iff) = nodes_of(&g, "if")[0];
    assert_eq!(call.block, iff.blocks[0]);
    let conn = g.input_connection(call.data_inputs()[0]).unwrap();
    assert_eq!(g.get_connection(conn).unwrap().block, g.root_block());
}

#[test]
fn inner_definitions_do_not_escape_their_block() {
    let decl = func(
        "Leak",
        vec![field("c", TypeExpr::name("bool")), field("s", TypeExpr::name("string"))],
        vec![],
        vec![
            Stmt::new(StmtKind::If {
                cond: Expr::ident("c"),
                then: vec![define("t", Expr::ident("s"))],
                els: vec![],
            }),
            Stmt::new(StmtKind::Expr(Expr::call(Expr::ident("Print"), vec![Expr::ident("t")]))),
        ],
    );
    let err = read_function(&decl, &resolver()).unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedSyntax { .. }), "{err}");
}

#[test]
fn assignment_on_both_branches_is_unsupported() {
    // var x string; if c { x = a } else { x = b }; Print(x)
    let string = || TypeExpr::name("string");
    let decl = func(
        "Choose",
        vec![
            field("c", TypeExpr::name("bool")),
            field("a", string()),
            field("b", string()),
        ],
        vec![],
        vec![
            Stmt::new(StmtKind::VarDecl {
                name: "x".into(),
                ty: string(),
            }),
            Stmt::new(StmtKind::If {
                cond: Expr::ident("c"),
                then: vec![assign("x", Expr::ident("a"))],
                els: vec![assign("x", Expr::ident("b"))],
            }),
            Stmt::new(StmtKind::Expr(Expr::call(Expr::ident("Print"), vec![Expr::ident("x")]))),
        ],
    );
    let err = read_function(&decl, &resolver()).unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedSyntax { .. }), "{err}");
}

#[test]
fn overwrite_before_any_read_replaces_the_producer() {
    // x := a; x = b; Print(x)
    let decl = func(
        "Last",
        vec![field("a", TypeExpr::name("string")), field("b", TypeExpr::name("string"))],
        vec![],
        vec![
            define("x", Expr::ident("a")),
            assign("x", Expr::ident("b")),
            Stmt::new(StmtKind::Expr(Expr::call(Expr::ident("Print"), vec![Expr::ident("x")]))),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    let params = g.get_node(g.inputs_node()).unwrap().outputs.clone();
    let (_, call) = nodes_of(&g, "call")[0];
    assert_eq!(g.connection_count(), 1);
    assert_eq!(g.input_source(call.data_inputs()[0]), Some(params[1]));
}

#[test]
fn every_reader_inside_the_loop_is_fed_back() {
    // acc := start; Print(acc); for _, x := range xs { Print(acc); next := acc + x; acc = next }
    let decl = func(
        "Trace",
        vec![field("xs", TypeExpr::slice(int())), field("start", int())],
        vec![],
        vec![
            define("acc", Expr::ident("start")),
            Stmt::new(StmtKind::Expr(Expr::call(
                Expr::ident("Show"),
                vec![Expr::ident("acc")],
            ))),
            Stmt::new(StmtKind::Range {
                key: "_".into(),
                value: Some("x".into()),
                x: Expr::ident("xs"),
                body: vec![
                    Stmt::new(StmtKind::Expr(Expr::call(
                        Expr::ident("Show"),
                        vec![Expr::ident("acc")],
                    ))),
                    define("next", Expr::binary("+", Expr::ident("acc"), Expr::ident("x"))),
                    assign("acc", Expr::ident("next")),
                ],
            }),
        ],
    );
    let resolver = resolver().with(Symbol::Func {
        package: PKG.into(),
        name: "Show".into(),
        sig: SignatureExpr {
            params: vec![field("n", int())],
            results: vec![],
            variadic: false,
        },
    });
    let g = read_function(&decl, &resolver).unwrap();

    // The call before the loop reads the initial value only.
    assert_eq!(feedback_count(&g), 2);
    let root = g.root_block();
    for (_, c) in g.connections().filter(|(_, c)| c.feedback) {
        assert_ne!(c.block, root);
    }
    assert!(validate_graph(&g).is_empty());
}

// ---------------------------------------------------------------------------
// Failures and fallback
// ---------------------------------------------------------------------------

#[test]
fn early_return_is_unsupported() {
    let decl = func("Early", vec![], vec![], vec![ret(), ret()]);
    let err = read_function(&decl, &resolver()).unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedSyntax { .. }));
}

#[test]
fn unknown_sequence_id_is_unsupported() {
    let decl = func(
        "Orphan",
        vec![field("s", TypeExpr::name("string"))],
        vec![],
        vec![Stmt::new(StmtKind::Expr(Expr::call(Expr::ident("Print"), vec![Expr::ident("s")])))
            .with_seq(SeqAnnotation {
                after: vec![7],
                id: None,
            })],
    );
    assert!(matches!(
        read_function(&decl, &resolver()),
        Err(ReadError::UnsupportedSyntax { .. })
    ));
}

#[test]
fn type_mismatch_is_rejected_and_falls_back_to_signature() {
    let decl = func(
        "Bad",
        vec![field("n", int())],
        vec![],
        vec![Stmt::new(StmtKind::Expr(Expr::call(Expr::ident("Print"), vec![Expr::ident("n")])))],
    );
    let err = read_function(&decl, &resolver()).unwrap_err();
    assert!(matches!(err, ReadError::Rejected(_)));

    let g = read_or_empty(&decl, &resolver());
    assert_eq!(g.node_count(), 2);
    assert_eq!(g.connection_count(), 0);
    assert_eq!(g.get_node(g.inputs_node()).unwrap().outputs.len(), 1);
}

#[test]
fn structural_form_reloads_and_garbage_falls_back() {
    let decl = func(
        "Add",
        vec![field("a", int()), field("b", int())],
        vec![field("sum", int())],
        vec![
            define("s", Expr::binary("+", Expr::ident("a"), Expr::ident("b"))),
            assign("sum", Expr::ident("s")),
            ret(),
        ],
    );
    let g = read_function(&decl, &resolver()).unwrap();
    let json = StructuralForm::from_graph(&g).to_json().unwrap();
    let back = read_structural(&json).unwrap();
    assert_eq!(back.node_count(), g.node_count());
    assert_eq!(back.connection_count(), g.connection_count());

    let err = read_structural("{ not json").unwrap_err();
    assert!(err.is_load_failure());

    let fallback = load_or_empty(Some("{ not json"), &decl, &resolver());
    assert_eq!(fallback.node_count(), 2);
    assert_eq!(fallback.get_node(fallback.outputs_node()).unwrap().inputs.len(), 1);

    let fresh = load_or_empty(None, &decl, &resolver());
    assert_eq!(fresh.connection_count(), 0);
}
