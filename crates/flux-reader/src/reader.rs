//! Statement tree to graph translation.
//!
//! The reader walks one [`FuncDecl`] block by block, creating a node per
//! node-producing expression and wiring its inputs from the identifier
//! bindings in scope. Two maps are kept during the walk:
//!
//! - identifier bindings: the output port currently producing a name's
//!   value. `:=` installs a new binding. `=` to a binding that has been read
//!   inside the assigning block becomes a feedback connection into those
//!   readers; otherwise it gives the binding its producer. A binding can
//!   have only one producer, so a value assigned on more than one path is
//!   unsupported.
//! - sequence ids: the node that produced each `id` of a statement's
//!   sequence annotation, so later statements can follow it.
//!
//! Bindings are shared between a block and the blocks nested in it; a
//! nested block sees and updates its parent's bindings but its own
//! definitions vanish when it ends.

use std::collections::HashMap;

use flux_core::ast::{Expr, FuncDecl, SeqAnnotation, Stmt, StmtKind};
use flux_core::kind::{Callee, LiteralKind, NodeKind, ValueTarget};
use flux_core::resolve::{FieldExpr, Resolver, Symbol, TypeExpr};
use flux_core::{
    BlockId, CoreError, FunctionGraph, NodeId, Param, PortId, Signature, TypeId, TypeRegistry,
};

use crate::error::ReadError;

/// The producer of one identifier's value.
#[derive(Debug, Clone)]
struct Binding {
    srcs: Vec<PortId>,
    /// Type from a `var` declaration, used while there is no producer.
    declared: Option<TypeId>,
    /// Inputs that read the binding, in reading order.
    readers: Vec<PortId>,
    /// Block the binding was installed in.
    block: BlockId,
}

/// Translates a function's statement tree into a [`FunctionGraph`].
///
/// The translation is all or nothing: any unsupported construct or
/// rejected edit aborts it.
pub fn read_function(decl: &FuncDecl, resolver: &dyn Resolver) -> Result<FunctionGraph, ReadError> {
    let mut reader = Reader::new(resolver, &decl.name);
    reader.function(decl)?;
    let mut graph = reader.graph;
    graph.drain_events();
    tracing::debug!(
        function = %decl.name,
        nodes = graph.node_count(),
        connections = graph.connection_count(),
        "read function"
    );
    Ok(graph)
}

struct Reader<'r> {
    resolver: &'r dyn Resolver,
    graph: FunctionGraph,
    bindings: Vec<Binding>,
    scope: HashMap<String, usize>,
    seq_nodes: HashMap<u32, NodeId>,
    /// Block whose statements are being read.
    current: BlockId,
}

impl<'r> Reader<'r> {
    fn new(resolver: &'r dyn Resolver, name: &str) -> Self {
        let graph = FunctionGraph::with_types(resolver.current_package(), name, TypeRegistry::new());
        let current = graph.root_block();
        Reader {
            resolver,
            graph,
            bindings: Vec::new(),
            scope: HashMap::new(),
            seq_nodes: HashMap::new(),
            current,
        }
    }

    // -----------------------------------------------------------------------
    // Functions and blocks
    // -----------------------------------------------------------------------

    fn function(&mut self, decl: &FuncDecl) -> Result<(), ReadError> {
        let receiver = match &decl.recv {
            Some(field) => Some(self.param(field)?),
            None => None,
        };
        let sig = Signature {
            params: self.params(&decl.params)?,
            results: self.params(&decl.results)?,
            variadic: decl.variadic,
        };
        self.graph.set_signature(receiver, &sig)?;

        let inputs = self.graph.inputs_node();
        let params = self.outputs_of(inputs);
        for (field, port) in decl.recv.iter().chain(decl.params.iter()).zip(params) {
            self.bind(&field.name, port);
        }
        for result in &sig.results {
            self.declare(&result.name, Some(result.ty))?;
        }

        let body = strip_return(&decl.body)?;
        let root = self.graph.root_block();
        self.block(root, body)?;

        let outputs = self.graph.outputs_node();
        let ports = self.inputs_of(outputs);
        for (result, port) in sig.results.iter().zip(ports) {
            self.connect(&Expr::Ident(result.name.clone()), port)?;
        }
        Ok(())
    }

    fn param(&mut self, field: &FieldExpr) -> Result<Param, ReadError> {
        Ok(Param {
            name: field.name.clone(),
            ty: self.intern(&field.ty)?,
        })
    }

    fn params(&mut self, fields: &[FieldExpr]) -> Result<Vec<Param>, ReadError> {
        fields.iter().map(|f| self.param(f)).collect()
    }

    fn block(&mut self, block: BlockId, stmts: &[Stmt]) -> Result<(), ReadError> {
        let saved = self.scope.clone();
        let outer = std::mem::replace(&mut self.current, block);
        for stmt in stmts {
            let node = self.stmt(block, stmt)?;
            if let Some(seq) = &stmt.seq {
                self.seq(node, seq)?;
            }
        }
        self.current = outer;
        self.scope = saved;
        Ok(())
    }

    /// Translates one statement. Returns the node its sequence annotation
    /// attaches to, if it produced one.
    fn stmt(&mut self, block: BlockId, stmt: &Stmt) -> Result<Option<NodeId>, ReadError> {
        match &stmt.kind {
            StmtKind::Define { names, value } => self.define(block, names, value),
            StmtKind::Assign { targets, values } => self.assign(block, targets, values),
            StmtKind::VarDecl { name, ty } => {
                let ty = self.intern(ty)?;
                self.declare(name, Some(ty))?;
                Ok(None)
            }
            StmtKind::ConstDecl { name, value } => match value {
                Expr::BasicLit { .. } | Expr::Ident(_) | Expr::Selector { .. } => {
                    self.define(block, std::slice::from_ref(name), value)
                }
                other => Err(ReadError::unsupported(format!(
                    "constant initialised by {}",
                    construct(other)
                ))),
            },
            StmtKind::Expr(e @ Expr::Call { .. }) => self.call(block, e).map(Some),
            StmtKind::Expr(other) => Err(ReadError::unsupported(format!(
                "{} used as a statement",
                construct(other)
            ))),
            StmtKind::If { cond, then, els } => {
                let n = self.add(block, NodeKind::If)?;
                let port = self.input(n, 0)?;
                self.connect(cond, port)?;
                let blocks = self.nested_blocks(n)?;
                self.block(blocks[0], then)?;
                self.block(blocks[1], els)?;
                Ok(Some(n))
            }
            StmtKind::For { index, bound, body } => {
                let n = self.add(block, NodeKind::Loop)?;
                if let Some(bound) = bound {
                    let port = self.input(n, 0)?;
                    self.connect(bound, port)?;
                }
                self.loop_body(n, &[index.as_str()], body)?;
                Ok(Some(n))
            }
            StmtKind::Range {
                key,
                value,
                x,
                body,
            } => {
                let n = self.add(block, NodeKind::Loop)?;
                let port = self.input(n, 0)?;
                self.connect(x, port)?;
                let mut names = vec![key.as_str()];
                names.extend(value.as_deref());
                self.loop_body(n, &names, body)?;
                Ok(Some(n))
            }
            StmtKind::Branch(kind) => self.add(block, NodeKind::Branch { kind: *kind }).map(Some),
            StmtKind::Return => Err(ReadError::unsupported("return before the end of the function")),
        }
    }

    /// Binds the per-iteration names of a loop and reads its body.
    fn loop_body(&mut self, n: NodeId, names: &[&str], body: &[Stmt]) -> Result<(), ReadError> {
        let saved = self.scope.clone();
        let inner = self
            .graph
            .get_node(n)
            .and_then(|node| node.inner.first().copied())
            .ok_or_else(|| inconsistent(format!("loop {} has no inputs node", n)))?;
        let ports = self.outputs_of(inner);
        if names.len() > ports.len() {
            return Err(ReadError::unsupported(format!(
                "loop binds {} names but yields {} values",
                names.len(),
                ports.len()
            )));
        }
        let blocks = self.nested_blocks(n)?;
        let outer = std::mem::replace(&mut self.current, blocks[0]);
        for (name, port) in names.iter().zip(ports) {
            self.bind(name, port);
        }
        self.current = outer;
        self.block(blocks[0], body)?;
        self.scope = saved;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Definitions and assignments
    // -----------------------------------------------------------------------

    fn define(
        &mut self,
        block: BlockId,
        names: &[String],
        value: &Expr,
    ) -> Result<Option<NodeId>, ReadError> {
        if let Expr::Ident(name) = value {
            if let Some(index) = self.scope.get(name).copied() {
                // `a := b` aliases b's producers.
                let [target] = names else {
                    return Err(ReadError::unsupported("multiple names defined from one identifier"));
                };
                let alias = Binding {
                    readers: Vec::new(),
                    block: self.current,
                    ..self.bindings[index].clone()
                };
                self.install(target, alias);
                return Ok(None);
            }
        }
        let n = self.expr(block, value)?;
        let outputs = self.data_outputs(n);
        if names.len() > outputs.len() {
            return Err(ReadError::unsupported(format!(
                "{} names defined from {} values",
                names.len(),
                outputs.len()
            )));
        }
        for (name, port) in names.iter().zip(outputs) {
            self.bind(name, port);
        }
        Ok(Some(n))
    }

    fn assign(
        &mut self,
        block: BlockId,
        targets: &[Expr],
        values: &[Expr],
    ) -> Result<Option<NodeId>, ReadError> {
        let Some(first) = targets.first() else {
            return Err(ReadError::unsupported("assignment without targets"));
        };
        if let Expr::Index { x, key } = first {
            let [value] = values else {
                return Err(ReadError::unsupported("indexed assignment of several values"));
            };
            if targets.len() != 1 {
                return Err(ReadError::unsupported("indexed assignment to several targets"));
            }
            let n = self.add(block, NodeKind::Index { set: true })?;
            for (i, operand) in [x.as_ref(), key.as_ref(), value].into_iter().enumerate() {
                let port = self.input(n, i)?;
                self.connect(operand, port)?;
            }
            return Ok(Some(n));
        }
        if targets.iter().all(|t| self.is_local_target(t)) {
            return self.rebind(block, targets, values);
        }
        let ([target], [value]) = (targets, values) else {
            return Err(ReadError::unsupported("assignment to several non-local targets"));
        };
        let n = self.value_node(block, target, true)?;
        let port = self
            .data_inputs(n)
            .last()
            .copied()
            .ok_or_else(|| inconsistent(format!("value node {} has no input", n)))?;
        self.connect(value, port)?;
        Ok(Some(n))
    }

    /// `=` where every target is a local binding or `_`.
    fn rebind(
        &mut self,
        block: BlockId,
        targets: &[Expr],
        values: &[Expr],
    ) -> Result<Option<NodeId>, ReadError> {
        let plain = values.len() == targets.len()
            && values
                .iter()
                .all(|v| v.as_ident().is_some_and(|n| self.scope.contains_key(n)));
        if plain {
            for (target, value) in targets.iter().zip(values) {
                let src = value
                    .as_ident()
                    .and_then(|n| self.scope.get(n))
                    .and_then(|i| self.bindings[*i].srcs.first().copied());
                if let Some(src) = src {
                    self.reassign(block, target, src)?;
                }
            }
            return Ok(None);
        }
        let [value] = values else {
            return Err(ReadError::unsupported("assignment of several computed values"));
        };
        let n = self.expr(block, value)?;
        let outputs = self.data_outputs(n);
        if targets.len() > outputs.len() {
            return Err(ReadError::unsupported(format!(
                "{} targets assigned from {} values",
                targets.len(),
                outputs.len()
            )));
        }
        for (target, port) in targets.iter().zip(outputs) {
            self.reassign(block, target, port)?;
        }
        Ok(Some(n))
    }

    /// Assigns `src` to `target` from `block`. Readers of the binding
    /// inside `block` receive it as feedback; a binding nobody has read yet
    /// takes it as its producer.
    fn reassign(&mut self, block: BlockId, target: &Expr, src: PortId) -> Result<(), ReadError> {
        let Some(name) = target.as_ident() else {
            return Err(ReadError::unsupported(construct(target)));
        };
        if name == "_" {
            return Ok(());
        }
        let index = self.binding(name)?;
        let binding = &self.bindings[index];
        let fed: Vec<PortId> = binding
            .readers
            .iter()
            .copied()
            .filter(|p| {
                self.port_block(*p)
                    .is_some_and(|b| self.graph.encloses(block, b))
            })
            .collect();
        if !fed.is_empty() {
            for dst in fed {
                self.graph.connect_feedback(src, dst)?;
            }
        } else if binding.readers.is_empty() && (binding.srcs.is_empty() || binding.block == block) {
            self.bindings[index].srcs = vec![src];
        } else {
            return Err(ReadError::unsupported(format!(
                "'{}' assigned on more than one path",
                name
            )));
        }
        Ok(())
    }

    fn is_local_target(&self, target: &Expr) -> bool {
        target
            .as_ident()
            .is_some_and(|n| n == "_" || self.scope.contains_key(n))
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Creates the node for a node-producing expression.
    fn expr(&mut self, block: BlockId, e: &Expr) -> Result<NodeId, ReadError> {
        match e {
            Expr::Ident(_) | Expr::Selector { .. } | Expr::Star(_) => self.value_node(block, e, false),
            Expr::AddrOf(inner) => match inner.as_ref() {
                Expr::Composite { ty, fields } => self.composite(block, ty, fields, true),
                other => Err(ReadError::unsupported(format!("address of {}", construct(other)))),
            },
            Expr::Unary { op, x } => {
                let n = self.add(
                    block,
                    NodeKind::Operator {
                        op: op.clone(),
                        unary: true,
                    },
                )?;
                let port = self.input(n, 0)?;
                self.connect(x, port)?;
                Ok(n)
            }
            Expr::Binary { op, x, y } => {
                let n = self.add(
                    block,
                    NodeKind::Operator {
                        op: op.clone(),
                        unary: false,
                    },
                )?;
                for (i, operand) in [x, y].into_iter().enumerate() {
                    let port = self.input(n, i)?;
                    self.connect(operand, port)?;
                }
                Ok(n)
            }
            Expr::Call { .. } => self.call(block, e),
            Expr::Convert { ty, x } => {
                let ty = self.intern(ty)?;
                self.convert(block, ty, x)
            }
            Expr::Make { ty, args } => {
                let ty = self.intern(ty)?;
                let n = self.add(block, NodeKind::Make { ty: Some(ty) })?;
                for (i, arg) in args.iter().enumerate() {
                    let port = self.input(n, i)?;
                    self.connect(arg, port)?;
                }
                Ok(n)
            }
            Expr::Composite { ty, fields } => self.composite(block, ty, fields, false),
            Expr::Index { x, key } => {
                let n = self.add(block, NodeKind::Index { set: false })?;
                for (i, operand) in [x, key].into_iter().enumerate() {
                    let port = self.input(n, i)?;
                    self.connect(operand, port)?;
                }
                Ok(n)
            }
            Expr::TypeAssert { x, ty } => {
                let ty = self.intern(ty)?;
                let n = self.add(block, NodeKind::TypeAssert { ty: Some(ty) })?;
                let port = self.input(n, 0)?;
                self.connect(x, port)?;
                Ok(n)
            }
            Expr::FuncLit {
                params,
                results,
                body,
            } => self.func_literal(block, params, results, body),
            Expr::BasicLit { kind, text } => self.add(
                block,
                NodeKind::Literal {
                    kind: *kind,
                    text: text.clone(),
                },
            ),
            Expr::Zero(_) | Expr::Nil => Err(ReadError::unsupported(format!(
                "{} outside an operand",
                construct(e)
            ))),
        }
    }

    /// Value node reading (or, with `set`, writing) a package-level
    /// declaration, a field or method of a local, or a pointer target.
    fn value_node(&mut self, block: BlockId, e: &Expr, set: bool) -> Result<NodeId, ReadError> {
        let (target, object) = match e {
            Expr::Ident(name) => (self.package_value(None, name)?, None),
            Expr::Selector { x, name } => match self.package_of(x) {
                Some(path) => (self.package_value(Some(&path), name)?, None),
                None => (self.member(x, name)?, Some(x.as_ref())),
            },
            Expr::Star(x) => (ValueTarget::Indirect, Some(x.as_ref())),
            other => return Err(ReadError::unsupported(construct(other))),
        };
        if set && !target.addressable() {
            return Err(ReadError::unsupported("assignment to a constant or function"));
        }
        let n = self.add(block, NodeKind::Value { target, set })?;
        if let Some(x) = object {
            let port = self.input(n, 0)?;
            self.connect(x, port)?;
        }
        Ok(n)
    }

    fn call(&mut self, block: BlockId, e: &Expr) -> Result<NodeId, ReadError> {
        let Expr::Call { fun, args, spread } = e else {
            return Err(ReadError::unsupported(construct(e)));
        };
        if let Some(name) = fun.as_ident().filter(|n| !self.scope.contains_key(*n)) {
            match name {
                "append" => return self.append(block, args, *spread),
                "len" | "delete" => {
                    let kind = if name == "len" {
                        NodeKind::Len
                    } else {
                        NodeKind::Delete
                    };
                    let n = self.add(block, kind)?;
                    for (i, arg) in args.iter().enumerate() {
                        let port = self.input(n, i)?;
                        self.connect(arg, port)?;
                    }
                    return Ok(n);
                }
                _ => {}
            }
        }
        if let Some(ty) = self.type_operand(fun)? {
            let [x] = args.as_slice() else {
                return Err(ReadError::unsupported("conversion of several values"));
            };
            return self.convert(block, ty, x);
        }

        let (callee, lead) = match fun.as_ref() {
            Expr::Ident(name) if self.scope.contains_key(name) => (Callee::Value, Some(fun.as_ref())),
            Expr::Ident(name) => (self.package_func(None, name)?, None),
            Expr::Selector { x, name } => match self.package_of(x) {
                Some(path) => (self.package_func(Some(&path), name)?, None),
                None => (self.method_callee(x, name)?, Some(x.as_ref())),
            },
            other => {
                return Err(ReadError::unsupported(format!("call of {}", construct(other))))
            }
        };
        let n = self.add(
            block,
            NodeKind::Call {
                callee,
                spread: *spread,
            },
        )?;
        for (i, operand) in lead.into_iter().chain(args.iter()).enumerate() {
            // Inputs are re-read every time: connecting a function value
            // creates the argument ports.
            let port = match self.data_inputs(n).get(i) {
                Some(p) => *p,
                None => self.graph.add_element(n)?,
            };
            self.connect(operand, port)?;
        }
        Ok(n)
    }

    fn append(&mut self, block: BlockId, args: &[Expr], spread: bool) -> Result<NodeId, ReadError> {
        let Some((slice, rest)) = args.split_first() else {
            return Err(ReadError::unsupported("append without a slice"));
        };
        let n = self.add(block, NodeKind::Append { spread })?;
        let port = self.input(n, 0)?;
        self.connect(slice, port)?;
        if spread {
            let [tail] = rest else {
                return Err(ReadError::unsupported("spread append of several values"));
            };
            let port = self.input(n, 1)?;
            self.connect(tail, port)?;
        } else {
            for elem in rest {
                let port = self.graph.add_element(n)?;
                self.connect(elem, port)?;
            }
        }
        Ok(n)
    }

    fn convert(&mut self, block: BlockId, ty: TypeId, x: &Expr) -> Result<NodeId, ReadError> {
        let n = self.add(block, NodeKind::Convert { ty: Some(ty) })?;
        let port = self.input(n, 0)?;
        self.connect(x, port)?;
        Ok(n)
    }

    fn composite(
        &mut self,
        block: BlockId,
        ty: &TypeExpr,
        fields: &[(String, Expr)],
        addr: bool,
    ) -> Result<NodeId, ReadError> {
        let ty = self.intern(ty)?;
        let n = self.add(block, NodeKind::Composite { ty: Some(ty), addr })?;
        for (field, value) in fields {
            let port = self.inputs_of(n).into_iter().find(|p| {
                self.graph
                    .get_port(*p)
                    .is_some_and(|port| port.name == *field)
            });
            let Some(port) = port else {
                return Err(ReadError::unsupported(format!("no settable field '{}'", field)));
            };
            self.connect(value, port)?;
        }
        Ok(n)
    }

    fn func_literal(
        &mut self,
        block: BlockId,
        params: &[FieldExpr],
        results: &[FieldExpr],
        body: &[Stmt],
    ) -> Result<NodeId, ReadError> {
        let n = self.add(block, NodeKind::FuncLiteral)?;
        let (inputs, outputs) = match self.graph.get_node(n).map(|node| node.inner.as_slice()) {
            Some([inputs, outputs]) => (*inputs, *outputs),
            _ => return Err(inconsistent(format!("function literal {} lacks ports nodes", n))),
        };
        let saved = self.scope.clone();
        for p in params {
            let ty = self.intern(&p.ty)?;
            let port = self.graph.add_param(inputs, &p.name, ty)?;
            self.bind(&p.name, port);
        }
        let mut result_ports = Vec::with_capacity(results.len());
        for r in results {
            let ty = self.intern(&r.ty)?;
            let port = self.graph.add_result(outputs, &r.name, ty)?;
            self.declare(&r.name, Some(ty))?;
            result_ports.push((r.name.clone(), port));
        }
        let body = strip_return(body)?;
        let blocks = self.nested_blocks(n)?;
        self.block(blocks[0], body)?;
        for (name, port) in result_ports {
            self.connect(&Expr::Ident(name), port)?;
        }
        self.scope = saved;
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Sequence annotations
    // -----------------------------------------------------------------------

    fn seq(&mut self, node: Option<NodeId>, seq: &SeqAnnotation) -> Result<(), ReadError> {
        let Some(n) = node else {
            return Err(ReadError::unsupported("sequence annotation on a statement without a node"));
        };
        let (seq_in, seq_out) = self
            .graph
            .get_node(n)
            .map(|node| (node.seq_input(), node.seq_output()))
            .unwrap_or_default();
        for id in &seq.after {
            let prev_out = self
                .seq_nodes
                .get(id)
                .and_then(|prev| self.graph.get_node(*prev))
                .and_then(|prev| prev.seq_output())
                .ok_or_else(|| ReadError::unsupported(format!("unknown sequence id {}", id)))?;
            let input = seq_in.ok_or_else(|| {
                ReadError::unsupported(format!("sequence edge into node {} without a sequence input", n))
            })?;
            self.graph.connect(prev_out, input)?;
        }
        if let Some(id) = seq.id {
            if seq_out.is_none() {
                return Err(ReadError::unsupported(format!(
                    "sequence id {} on node {} without a sequence output",
                    id, n
                )));
            }
            self.seq_nodes.insert(id, n);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bindings
    // -----------------------------------------------------------------------

    fn bind(&mut self, name: &str, port: PortId) {
        self.install(
            name,
            Binding {
                srcs: vec![port],
                declared: None,
                readers: Vec::new(),
                block: self.current,
            },
        );
    }

    fn declare(&mut self, name: &str, ty: Option<TypeId>) -> Result<(), ReadError> {
        if name.is_empty() {
            return Err(ReadError::unsupported("unnamed result"));
        }
        self.install(
            name,
            Binding {
                srcs: Vec::new(),
                declared: ty,
                readers: Vec::new(),
                block: self.current,
            },
        );
        Ok(())
    }

    fn install(&mut self, name: &str, binding: Binding) {
        if name.is_empty() || name == "_" {
            return;
        }
        self.bindings.push(binding);
        self.scope.insert(name.to_string(), self.bindings.len() - 1);
    }

    fn binding(&self, name: &str) -> Result<usize, ReadError> {
        self.scope
            .get(name)
            .copied()
            .ok_or_else(|| ReadError::unsupported(format!("unbound identifier '{}'", name)))
    }

    fn binding_type(&self, index: usize) -> Option<TypeId> {
        let b = &self.bindings[index];
        b.srcs
            .first()
            .and_then(|p| self.graph.get_port(*p))
            .and_then(|p| p.ty)
            .or(b.declared)
    }

    /// Connects the producer of `operand`, if any, to `dst`. Constant
    /// operands leave the input unconnected.
    fn connect(&mut self, operand: &Expr, dst: PortId) -> Result<(), ReadError> {
        if operand.is_constant() {
            return Ok(());
        }
        let Some(name) = operand.as_ident() else {
            return Err(ReadError::unsupported(format!(
                "{} used as an operand",
                construct(operand)
            )));
        };
        let index = self.binding(name)?;
        for src in self.bindings[index].srcs.clone() {
            self.graph.connect(src, dst)?;
        }
        self.bindings[index].readers.push(dst);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    fn intern(&mut self, ty: &TypeExpr) -> Result<TypeId, ReadError> {
        Ok(self.graph.types.intern_expr(ty, self.resolver)?)
    }

    /// Import path named by `x` when it is a package name rather than a
    /// local binding.
    fn package_of(&self, x: &Expr) -> Option<String> {
        let name = x.as_ident()?;
        if self.scope.contains_key(name) {
            return None;
        }
        self.resolver.import_path(name)
    }

    fn lookup(&self, package: Option<&str>, name: &str) -> Result<Symbol, ReadError> {
        self.resolver.lookup(package, name).ok_or_else(|| {
            ReadError::Rejected(CoreError::UnresolvedSymbol {
                name: match package {
                    Some(p) => format!("{}.{}", p, name),
                    None => name.to_string(),
                },
            })
        })
    }

    fn package_value(&mut self, package: Option<&str>, name: &str) -> Result<ValueTarget, ReadError> {
        match self.lookup(package, name)? {
            Symbol::Var { package, name, ty } => Ok(ValueTarget::Var {
                ty: self.intern(&ty)?,
                package,
                name,
            }),
            Symbol::Const { package, name, ty } => Ok(ValueTarget::Const {
                ty: self.intern(&ty)?,
                package,
                name,
            }),
            Symbol::Func { package, name, sig } => Ok(ValueTarget::Func {
                sig: self.graph.types.intern_signature(&sig, self.resolver)?,
                package,
                name,
            }),
            Symbol::Type { name, .. } => {
                Err(ReadError::unsupported(format!("type '{}' used as a value", name)))
            }
        }
    }

    fn package_func(&mut self, package: Option<&str>, name: &str) -> Result<Callee, ReadError> {
        match self.lookup(package, name)? {
            Symbol::Func { package, name, sig } => Ok(Callee::Func {
                sig: self.graph.types.intern_signature(&sig, self.resolver)?,
                package,
                name,
            }),
            other => Err(ReadError::unsupported(format!("call of non-function '{}'", other.name()))),
        }
    }

    /// The type named by a call's function expression, if it names one.
    fn type_operand(&mut self, fun: &Expr) -> Result<Option<TypeId>, ReadError> {
        let expr = match fun {
            Expr::Ident(name) if !self.scope.contains_key(name) => {
                if let Some(id) = TypeRegistry::universe(name) {
                    return Ok(Some(id));
                }
                match self.resolver.lookup(None, name) {
                    Some(Symbol::Type { .. }) => TypeExpr::name(name.clone()),
                    _ => return Ok(None),
                }
            }
            Expr::Selector { x, name } => match self.package_of(x) {
                Some(path) => match self.resolver.lookup(Some(&path), name) {
                    Some(Symbol::Type { .. }) => TypeExpr::qualified(path, name.clone()),
                    _ => return Ok(None),
                },
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        self.intern(&expr).map(Some)
    }

    /// Field or method of the local binding `x`.
    fn member(&self, x: &Expr, name: &str) -> Result<ValueTarget, ReadError> {
        let ty = self.member_owner(x)?;
        if self.graph.types.method_set(ty).iter().any(|(m, _)| m == name) {
            return Ok(ValueTarget::Method {
                name: name.to_string(),
            });
        }
        let (base, _) = self.graph.types.indirect(ty);
        if self
            .graph
            .types
            .struct_def(base)
            .is_some_and(|s| s.fields.contains_key(name))
        {
            return Ok(ValueTarget::Field {
                name: name.to_string(),
            });
        }
        Err(CoreError::UnresolvedSymbol {
            name: format!("{}.{}", self.graph.types.display(ty), name),
        }
        .into())
    }

    fn method_callee(&self, x: &Expr, name: &str) -> Result<Callee, ReadError> {
        let ty = self.member_owner(x)?;
        self.graph
            .types
            .method_set(ty)
            .into_iter()
            .find(|(m, _)| m == name)
            .map(|(name, sig)| Callee::Method { name, sig })
            .ok_or_else(|| {
                CoreError::UnresolvedSymbol {
                    name: format!("{}.{}", self.graph.types.display(ty), name),
                }
                .into()
            })
    }

    /// Type of the local binding a selector reaches through.
    fn member_owner(&self, x: &Expr) -> Result<TypeId, ReadError> {
        let Some(name) = x.as_ident() else {
            return Err(ReadError::unsupported(format!("selector on {}", construct(x))));
        };
        let index = self.binding(name)?;
        self.binding_type(index)
            .ok_or_else(|| ReadError::unsupported(format!("selector on untyped '{}'", name)))
    }

    // -----------------------------------------------------------------------
    // Graph helpers
    // -----------------------------------------------------------------------

    fn add(&mut self, block: BlockId, kind: NodeKind) -> Result<NodeId, ReadError> {
        Ok(self.graph.add_node(block, kind)?)
    }

    fn input(&self, n: NodeId, index: usize) -> Result<PortId, ReadError> {
        let node = self
            .graph
            .get_node(n)
            .ok_or(CoreError::NodeNotFound { id: n })?;
        node.data_inputs().get(index).copied().ok_or_else(|| {
            ReadError::unsupported(format!("{} has no operand {}", node.kind.tag(), index + 1))
        })
    }

    fn inputs_of(&self, n: NodeId) -> Vec<PortId> {
        self.graph.get_node(n).map(|n| n.inputs.clone()).unwrap_or_default()
    }

    fn outputs_of(&self, n: NodeId) -> Vec<PortId> {
        self.graph.get_node(n).map(|n| n.outputs.clone()).unwrap_or_default()
    }

    fn port_block(&self, port: PortId) -> Option<BlockId> {
        self.graph
            .get_port(port)
            .and_then(|p| self.graph.get_node(p.node))
            .map(|n| n.block)
    }

    fn data_inputs(&self, n: NodeId) -> Vec<PortId> {
        self.graph
            .get_node(n)
            .map(|n| n.data_inputs().to_vec())
            .unwrap_or_default()
    }

    fn data_outputs(&self, n: NodeId) -> Vec<PortId> {
        self.graph
            .get_node(n)
            .map(|n| n.data_outputs().to_vec())
            .unwrap_or_default()
    }

    /// Nested blocks of an If (two) or Loop/FuncLiteral (one, padded).
    fn nested_blocks(&self, n: NodeId) -> Result<[BlockId; 2], ReadError> {
        let blocks = self
            .graph
            .get_node(n)
            .map(|node| node.blocks.to_vec())
            .unwrap_or_default();
        match blocks.as_slice() {
            [a, b] => Ok([*a, *b]),
            [a] => Ok([*a, *a]),
            _ => Err(inconsistent(format!("node {} owns no block", n))),
        }
    }
}

/// The body without its final bare `return`; any other `return` is
/// rejected when the body is read.
fn strip_return(body: &[Stmt]) -> Result<&[Stmt], ReadError> {
    match body.split_last() {
        Some((last, rest)) if last.kind == StmtKind::Return => {
            if last.seq.is_some() {
                return Err(ReadError::unsupported("sequence annotation on return"));
            }
            Ok(rest)
        }
        _ => Ok(body),
    }
}

fn inconsistent(reason: String) -> ReadError {
    ReadError::Rejected(CoreError::GraphInconsistency { reason })
}

/// Short name of an expression form, for error messages.
fn construct(e: &Expr) -> &'static str {
    match e {
        Expr::Ident(_) => "identifier",
        Expr::Selector { .. } => "selector",
        Expr::Star(_) => "pointer indirection",
        Expr::AddrOf(_) => "address-of",
        Expr::Unary { .. } => "unary operator",
        Expr::Binary { .. } => "binary operator",
        Expr::Call { .. } => "call",
        Expr::Convert { .. } => "conversion",
        Expr::Make { .. } => "make",
        Expr::Composite { .. } => "composite literal",
        Expr::Index { .. } => "index expression",
        Expr::TypeAssert { .. } => "type assertion",
        Expr::FuncLit { .. } => "function literal",
        Expr::BasicLit {
            kind: LiteralKind::String,
            ..
        } => "string literal",
        Expr::BasicLit { .. } => "literal",
        Expr::Zero(_) => "zero value",
        Expr::Nil => "nil",
    }
}
