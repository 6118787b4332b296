//! Graph to statement tree.
//!
//! Lowering runs in two passes. The planning pass names every connected
//! output and declares ahead of time the values that are read outside the
//! block of their producer. A feedback connection reassigns the variable
//! its input regularly reads, at the end of the connection's block, so the
//! variable is declared where both its readers and that reassignment can
//! see it. The emission pass then walks the blocks in schedule order and
//! produces one statement per node.
//!
//! The tree produced here reads back into an equivalent graph: operands are
//! identifiers or constants, a reassignment after a read becomes feedback,
//! and statements carry sequence annotations for their sequence edges.

use std::collections::{HashMap, HashSet};

use flux_core::ast::{Expr, FuncDecl, SeqAnnotation, Stmt, StmtKind};
use flux_core::kind::{Callee, LiteralKind, NodeKind, PortsRole, ValueTarget};
use flux_core::resolve::{FieldExpr, TypeExpr};
use flux_core::type_id::package_name;
use flux_core::types::FluxType;
use flux_core::{BlockId, FunctionGraph, Node, NodeId, PortId, TypeId};

use crate::error::CodegenError;
use crate::schedule::schedule_block;
use crate::WriterOptions;

/// A lowered function and the import paths its text needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Lowered {
    pub decl: FuncDecl,
    /// Sorted import paths of every package the function references.
    pub imports: Vec<String>,
}

/// Lowers a function graph to a statement tree.
pub fn lower_function(graph: &FunctionGraph, options: &WriterOptions) -> Result<Lowered, CodegenError> {
    let mut lowerer = Lowerer::new(graph, options);
    lowerer.plan()?;
    let decl = lowerer.function()?;
    let imports = graph
        .package_refs()
        .paths()
        .filter(|p| *p != graph.package())
        .map(str::to_string)
        .collect();
    Ok(Lowered { decl, imports })
}

struct Lowerer<'g> {
    graph: &'g FunctionGraph,
    options: &'g WriterOptions,
    /// Name each connected output is read through.
    names: HashMap<PortId, String>,
    /// Names introduced by a parameter list or a loop clause.
    bound: HashMap<PortId, String>,
    /// Result names, keyed by the inputs of an outputs node.
    results: HashMap<PortId, String>,
    /// Variable read by an input that has a feedback connection but no
    /// regular source.
    carried: HashMap<PortId, String>,
    /// Nodes whose outputs are declared ahead and assigned with `=`.
    hoisted: HashSet<NodeId>,
    decls: HashMap<BlockId, Vec<Stmt>>,
    prologue: HashMap<BlockId, Vec<Stmt>>,
    epilogue: HashMap<BlockId, Vec<Stmt>>,
    reserved: HashSet<String>,
    next_name: u32,
    seq_ids: HashMap<NodeId, u32>,
    next_seq: u32,
}

impl<'g> Lowerer<'g> {
    fn new(graph: &'g FunctionGraph, options: &'g WriterOptions) -> Self {
        Lowerer {
            graph,
            options,
            names: HashMap::new(),
            bound: HashMap::new(),
            results: HashMap::new(),
            carried: HashMap::new(),
            hoisted: HashSet::new(),
            decls: HashMap::new(),
            prologue: HashMap::new(),
            epilogue: HashMap::new(),
            reserved: HashSet::new(),
            next_name: 0,
            seq_ids: HashMap::new(),
            next_seq: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    fn plan(&mut self) -> Result<(), CodegenError> {
        let graph = self.graph;

        // Parameter and result names are taken; synthetic names avoid them
        for (_, node) in graph.nodes() {
            let ports = match node.kind {
                NodeKind::Ports {
                    role: PortsRole::Inputs,
                } => &node.outputs,
                NodeKind::Ports {
                    role: PortsRole::Outputs,
                } => &node.inputs,
                _ => continue,
            };
            for p in ports {
                if let Some(port) = graph.get_port(*p) {
                    if !port.name.is_empty() && port.name != "_" {
                        self.reserved.insert(port.name.clone());
                    }
                }
            }
        }

        for (_, node) in graph.nodes() {
            match node.kind {
                NodeKind::Ports {
                    role: PortsRole::Inputs,
                } => {
                    for p in &node.outputs {
                        let name = self.declared_name(*p);
                        self.bound.insert(*p, name.clone());
                        self.names.insert(*p, name);
                    }
                }
                NodeKind::Ports {
                    role: PortsRole::Outputs,
                } => {
                    for p in &node.inputs {
                        let name = self.declared_name(*p);
                        self.results.insert(*p, name);
                    }
                }
                NodeKind::Ports {
                    role: PortsRole::LoopInputs,
                } => {
                    // A counted loop always needs its index variable.
                    let counted = node.outputs.len() == 1;
                    for p in &node.outputs {
                        if counted || self.is_connected(*p) {
                            let name = self.fresh();
                            self.bound.insert(*p, name.clone());
                            self.names.insert(*p, name);
                        }
                    }
                }
                _ => {
                    for p in node.data_outputs() {
                        if self.is_connected(*p) {
                            let name = self.fresh();
                            self.names.insert(*p, name);
                        }
                    }
                }
            }
        }

        for (id, node) in graph.nodes() {
            match node.kind {
                NodeKind::Ports {
                    role: PortsRole::Outputs,
                } => {}
                NodeKind::Ports { .. } => {
                    // A binding read outside its body is copied into a
                    // variable declared where all its readers can see it.
                    for p in &node.outputs {
                        let scope = self.scope_of(*p, node.block);
                        if scope == node.block {
                            continue;
                        }
                        let Some(binding) = self.bound.get(p).cloned() else {
                            continue;
                        };
                        let name = self.fresh();
                        self.declare(scope, &name, port_type(graph, *p))?;
                        self.prologue
                            .entry(node.block)
                            .or_default()
                            .push(assign(&name, Expr::Ident(binding)));
                        self.names.insert(*p, name);
                    }
                }
                _ => {
                    let scopes: Vec<(PortId, BlockId)> = node
                        .data_outputs()
                        .iter()
                        .filter(|p| self.names.contains_key(*p))
                        .map(|p| (*p, self.scope_of(*p, node.block)))
                        .collect();
                    if scopes.iter().all(|(_, s)| *s == node.block) {
                        continue;
                    }
                    self.hoisted.insert(id);
                    for (p, scope) in scopes {
                        let Some(name) = self.names.get(&p).cloned() else {
                            continue;
                        };
                        self.declare(scope, &name, port_type(graph, p))?;
                    }
                }
            }
        }

        for (id, conn) in graph.connections() {
            if !conn.feedback {
                continue;
            }
            let (Some(next), Some(dst)) = (conn.source_port(), conn.destination_port()) else {
                continue;
            };
            let value = self.names.get(&next).cloned().ok_or_else(|| {
                CodegenError::InvalidGraph(format!("feedback connection {} has an unnamed source", id))
            })?;
            let target = match graph.input_source(dst) {
                Some(src) => self.names.get(&src).cloned().ok_or_else(|| {
                    CodegenError::InvalidGraph(format!("input fed back by {} reads an unnamed value", id))
                })?,
                None => {
                    let ty = port_type(graph, dst).or_else(|| port_type(graph, next));
                    self.carried_var(dst, conn.block, ty)?
                }
            };
            // Several readers fed back from one value share one assignment.
            let stmt = assign(&target, Expr::Ident(value));
            let epilogue = self.epilogue.entry(conn.block).or_default();
            if !epilogue.contains(&stmt) {
                epilogue.push(stmt);
            }
        }
        Ok(())
    }

    /// The variable standing in for the missing source of `dst`, declared
    /// one block out from the reassignment so it survives iterations.
    fn carried_var(
        &mut self,
        dst: PortId,
        block: BlockId,
        ty: Option<TypeId>,
    ) -> Result<String, CodegenError> {
        if let Some(name) = self.carried.get(&dst) {
            return Ok(name.clone());
        }
        let scope = self.graph.outer(block).unwrap_or(block);
        let name = self.fresh();
        self.declare(scope, &name, ty)?;
        self.carried.insert(dst, name.clone());
        Ok(name)
    }

    fn fresh(&mut self) -> String {
        loop {
            self.next_name += 1;
            let name = format!("{}{}", self.options.name_prefix, self.next_name);
            if !self.reserved.contains(&name) {
                return name;
            }
        }
    }

    fn declared_name(&mut self, port: PortId) -> String {
        match self.graph.get_port(port).map(|p| p.name.as_str()) {
            Some("") | Some("_") | None => self.fresh(),
            Some(name) => name.to_string(),
        }
    }

    fn is_connected(&self, port: PortId) -> bool {
        self.graph.get_port(port).is_some_and(|p| {
            p.conns.iter().any(|c| {
                self.graph
                    .get_connection(*c)
                    .is_some_and(|conn| !conn.is_dangling())
            })
        })
    }

    /// The outermost block any connection of `port` lives in. An output
    /// whose readers are fed back into must also be visible in the blocks
    /// of those feedback connections.
    fn scope_of(&self, port: PortId, home: BlockId) -> BlockId {
        let graph = self.graph;
        let Some(p) = graph.get_port(port) else {
            return home;
        };
        let mut scope = home;
        for conn in p
            .conns
            .iter()
            .filter_map(|c| graph.get_connection(*c))
            .filter(|c| !c.is_dangling())
        {
            scope = graph.lca(scope, conn.block);
            if conn.feedback {
                continue;
            }
            let Some(dst) = conn.destination_port().and_then(|d| graph.get_port(d)) else {
                continue;
            };
            for fb in dst.conns.iter().filter_map(|c| graph.get_connection(*c)) {
                if fb.feedback && !fb.is_dangling() {
                    scope = graph.lca(scope, fb.block);
                }
            }
        }
        scope
    }

    fn declare(&mut self, block: BlockId, name: &str, ty: Option<TypeId>) -> Result<(), CodegenError> {
        let ty = ty.ok_or_else(|| {
            CodegenError::UnresolvedType(format!("variable {} declared ahead has no type", name))
        })?;
        let ty = self.graph.types.default_type(ty);
        self.decls.entry(block).or_default().push(Stmt::new(StmtKind::VarDecl {
            name: name.to_string(),
            ty: self.graph.types.to_expr(ty),
        }));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    fn function(&mut self) -> Result<FuncDecl, CodegenError> {
        let graph = self.graph;
        let inputs = require_node(graph, graph.inputs_node())?;
        let outputs = require_node(graph, graph.outputs_node())?;

        let mut params = self.fields(&inputs.outputs, &self.bound)?;
        let recv = if graph.has_receiver() && !params.is_empty() {
            Some(params.remove(0))
        } else {
            None
        };
        let results = self.fields(&outputs.inputs, &self.results)?;

        let mut body = self.block(graph.root_block())?;
        body.extend(self.result_assignments(outputs));
        body.push(Stmt::new(StmtKind::Return));

        Ok(FuncDecl {
            name: graph.name().to_string(),
            recv,
            params,
            results,
            variadic: false,
            body,
        })
    }

    fn fields(
        &self,
        ports: &[PortId],
        names: &HashMap<PortId, String>,
    ) -> Result<Vec<FieldExpr>, CodegenError> {
        ports
            .iter()
            .map(|p| {
                let name = names.get(p).cloned().unwrap_or_else(|| "_".to_string());
                let ty = port_type(self.graph, *p)
                    .ok_or_else(|| CodegenError::UnresolvedType(format!("parameter {}", name)))?;
                Ok(FieldExpr::new(name, self.graph.types.to_expr(ty)))
            })
            .collect()
    }

    /// `result = value` for every fed input of an outputs node.
    fn result_assignments(&self, outputs: &Node) -> Vec<Stmt> {
        outputs
            .inputs
            .iter()
            .filter(|p| self.is_fed(**p))
            .filter_map(|p| {
                let name = self.results.get(p)?;
                Some(assign(name, self.operand(*p)))
            })
            .collect()
    }

    fn block(&mut self, block: BlockId) -> Result<Vec<Stmt>, CodegenError> {
        let mut out = self.decls.remove(&block).unwrap_or_default();
        out.extend(self.prologue.remove(&block).unwrap_or_default());
        for n in schedule_block(self.graph, block)? {
            self.statement(n, &mut out)?;
        }
        out.extend(self.epilogue.remove(&block).unwrap_or_default());
        Ok(out)
    }

    fn statement(&mut self, n: NodeId, out: &mut Vec<Stmt>) -> Result<(), CodegenError> {
        let graph = self.graph;
        let node = require_node(graph, n)?;

        let seq = self.seq_annotation(n, node)?;
        if let Some(kind) = self.stmt_kind(n, node)? {
            out.push(Stmt::new(kind).with_seq(seq));
        }
        Ok(())
    }

    fn seq_annotation(&mut self, n: NodeId, node: &Node) -> Result<SeqAnnotation, CodegenError> {
        let mut seq = SeqAnnotation::default();
        if let Some(src) = node.seq_input().and_then(|p| self.graph.input_source(p)) {
            let prev = self
                .graph
                .get_port(src)
                .and_then(|p| self.seq_ids.get(&p.node))
                .copied()
                .ok_or_else(|| {
                    CodegenError::InvalidGraph(format!(
                        "sequence predecessor of node {} is not emitted before it",
                        n
                    ))
                })?;
            seq.after.push(prev);
        }
        if node.seq_output().is_some_and(|p| self.is_connected(p)) {
            self.next_seq += 1;
            self.seq_ids.insert(n, self.next_seq);
            seq.id = Some(self.next_seq);
        }
        Ok(seq)
    }

    fn stmt_kind(&mut self, n: NodeId, node: &'g Node) -> Result<Option<StmtKind>, CodegenError> {
        let graph = self.graph;
        let ins = node.data_inputs();
        let kind = match &node.kind {
            NodeKind::Ports { .. } => return Ok(None),
            NodeKind::Call { callee, spread } => {
                let (fun, args) = match callee {
                    Callee::Func { package, name, .. } => (self.qualified(package, name), ins),
                    Callee::Method { name, .. } => (
                        Expr::selector(self.input(ins, 0), name.clone()),
                        ins.get(1..).unwrap_or_default(),
                    ),
                    Callee::Value => (self.input(ins, 0), ins.get(1..).unwrap_or_default()),
                };
                let call = Expr::Call {
                    fun: Box::new(fun),
                    args: self.operands(args),
                    spread: *spread,
                };
                if node.data_outputs().iter().any(|p| self.names.contains_key(p)) {
                    self.define(n, node, call, false)
                } else {
                    StmtKind::Expr(call)
                }
            }
            NodeKind::Value { target, set } => {
                let access = match target {
                    ValueTarget::Var { package, name, .. }
                    | ValueTarget::Const { package, name, .. }
                    | ValueTarget::Func { package, name, .. } => self.qualified(package, name),
                    ValueTarget::Field { name } | ValueTarget::Method { name } => {
                        Expr::selector(self.input(ins, 0), name.clone())
                    }
                    ValueTarget::Indirect => Expr::Star(Box::new(self.input(ins, 0))),
                };
                if *set {
                    let value = ins.last().map_or(Expr::Nil, |p| self.operand(*p));
                    StmtKind::Assign {
                        targets: vec![access],
                        values: vec![value],
                    }
                } else {
                    self.define(n, node, access, false)
                }
            }
            NodeKind::Composite { ty, addr } => {
                let ty = self.bound_type(n, *ty)?;
                let fields = ins
                    .iter()
                    .filter(|p| self.is_fed(**p))
                    .filter_map(|p| {
                        let port = graph.get_port(*p)?;
                        Some((port.name.clone(), self.operand(*p)))
                    })
                    .collect();
                let literal = Expr::Composite { ty, fields };
                let value = if *addr {
                    Expr::AddrOf(Box::new(literal))
                } else {
                    literal
                };
                self.define(n, node, value, false)
            }
            NodeKind::Convert { ty } => {
                let value = Expr::Convert {
                    ty: self.bound_type(n, *ty)?,
                    x: Box::new(self.input(ins, 0)),
                };
                self.define(n, node, value, false)
            }
            NodeKind::Make { ty } => {
                let value = Expr::Make {
                    ty: self.bound_type(n, *ty)?,
                    args: self.operands(ins),
                };
                self.define(n, node, value, false)
            }
            NodeKind::Append { spread } => {
                let value = Expr::Call {
                    fun: Box::new(Expr::ident("append")),
                    args: self.operands(ins),
                    spread: *spread,
                };
                self.define(n, node, value, false)
            }
            NodeKind::Len => {
                let value = Expr::call(Expr::ident("len"), vec![self.input(ins, 0)]);
                self.define(n, node, value, false)
            }
            NodeKind::Delete => StmtKind::Expr(Expr::call(Expr::ident("delete"), self.operands(ins))),
            NodeKind::Operator { op, unary } => {
                // An unconnected operand takes its zero from the other one.
                let ty = ins.iter().find_map(|p| port_type(graph, *p));
                let operand = |i: usize| match ins.get(i) {
                    Some(p) if self.is_fed(*p) => self.operand(*p),
                    _ => self.zero(ty),
                };
                let value = if *unary {
                    Expr::Unary {
                        op: op.clone(),
                        x: Box::new(operand(0)),
                    }
                } else {
                    Expr::binary(op, operand(0), operand(1))
                };
                self.define(n, node, value, false)
            }
            NodeKind::TypeAssert { ty } => {
                let value = Expr::TypeAssert {
                    x: Box::new(self.input(ins, 0)),
                    ty: self.bound_type(n, *ty)?,
                };
                self.define(n, node, value, true)
            }
            NodeKind::Index { set } => {
                let target = Expr::Index {
                    x: Box::new(self.input(ins, 0)),
                    key: Box::new(self.input(ins, 1)),
                };
                if *set {
                    StmtKind::Assign {
                        targets: vec![target],
                        values: vec![self.input(ins, 2)],
                    }
                } else {
                    self.define(n, node, target, true)
                }
            }
            NodeKind::If => {
                let cond = self.input(ins, 0);
                let [then, els] = match node.blocks.as_slice() {
                    [then, els] => [*then, *els],
                    _ => return Err(malformed(n, "an if without two blocks")),
                };
                StmtKind::If {
                    cond,
                    then: self.block(then)?,
                    els: self.block(els)?,
                }
            }
            NodeKind::Loop => {
                let body = node
                    .blocks
                    .first()
                    .copied()
                    .ok_or_else(|| malformed(n, "a loop without a body"))?;
                let inner = node
                    .inner
                    .first()
                    .and_then(|i| graph.get_node(*i))
                    .ok_or_else(|| malformed(n, "a loop without an inputs node"))?;
                let binding = |i: usize| inner.outputs.get(i).and_then(|p| self.bound.get(p)).cloned();
                if inner.outputs.len() <= 1 {
                    let index = binding(0).unwrap_or_else(|| "_".to_string());
                    let bound = ins
                        .first()
                        .filter(|p| self.is_fed(**p))
                        .map(|p| self.operand(*p));
                    StmtKind::For {
                        index,
                        bound,
                        body: self.block(body)?,
                    }
                } else {
                    let key = binding(0).unwrap_or_else(|| "_".to_string());
                    let value = binding(1);
                    StmtKind::Range {
                        key,
                        value,
                        x: self.input(ins, 0),
                        body: self.block(body)?,
                    }
                }
            }
            NodeKind::Branch { kind } => StmtKind::Branch(*kind),
            NodeKind::Literal { kind, text } => {
                let value = Expr::BasicLit {
                    kind: *kind,
                    text: text.clone(),
                };
                let name = node
                    .outputs
                    .first()
                    .and_then(|p| self.names.get(p))
                    .cloned()
                    .unwrap_or_else(|| "_".to_string());
                if self.hoisted.contains(&n) {
                    assign(&name, value).kind
                } else {
                    StmtKind::ConstDecl { name, value }
                }
            }
            NodeKind::FuncLiteral => {
                let (inputs, outputs) = match node.inner.as_slice() {
                    [inputs, outputs] => (require_node(graph, *inputs)?, require_node(graph, *outputs)?),
                    _ => return Err(malformed(n, "a function literal without ports nodes")),
                };
                let body_block = node
                    .blocks
                    .first()
                    .copied()
                    .ok_or_else(|| malformed(n, "a function literal without a body"))?;
                let params = self.fields(&inputs.outputs, &self.bound)?;
                let results = self.fields(&outputs.inputs, &self.results)?;
                let mut body = self.block(body_block)?;
                body.extend(self.result_assignments(outputs));
                body.push(Stmt::new(StmtKind::Return));
                let value = Expr::FuncLit {
                    params,
                    results,
                    body,
                };
                self.define(n, node, value, false)
            }
        };
        Ok(Some(kind))
    }

    /// Binds a node's outputs to `value`: `:=` normally, `=` when the
    /// outputs were declared ahead or none of them is read. Comma-ok forms
    /// drop trailing discards.
    fn define(&self, n: NodeId, node: &Node, value: Expr, comma_ok: bool) -> StmtKind {
        let mut names: Vec<String> = node
            .data_outputs()
            .iter()
            .map(|p| self.names.get(p).cloned().unwrap_or_else(|| "_".to_string()))
            .collect();
        if comma_ok {
            while names.len() > 1 && names.last().is_some_and(|s| s == "_") {
                names.pop();
            }
        }
        if self.hoisted.contains(&n) || names.iter().all(|s| s == "_") {
            StmtKind::Assign {
                targets: names.into_iter().map(Expr::Ident).collect(),
                values: vec![value],
            }
        } else {
            StmtKind::Define { names, value }
        }
    }

    // -----------------------------------------------------------------------
    // Operands
    // -----------------------------------------------------------------------

    fn is_fed(&self, port: PortId) -> bool {
        self.carried.contains_key(&port) || self.graph.input_source(port).is_some()
    }

    /// The variable an input reads, or the zero value of its type when it
    /// is unconnected.
    fn operand(&self, port: PortId) -> Expr {
        if let Some(var) = self.carried.get(&port) {
            return Expr::Ident(var.clone());
        }
        match self.graph.input_source(port).and_then(|s| self.names.get(&s)) {
            Some(name) => Expr::Ident(name.clone()),
            None => self.zero(port_type(self.graph, port)),
        }
    }

    fn input(&self, ins: &[PortId], index: usize) -> Expr {
        ins.get(index).map_or(Expr::Nil, |p| self.operand(*p))
    }

    fn operands(&self, ins: &[PortId]) -> Vec<Expr> {
        ins.iter().map(|p| self.operand(*p)).collect()
    }

    fn zero(&self, ty: Option<TypeId>) -> Expr {
        let Some(ty) = ty else {
            return Expr::Nil;
        };
        let types = &self.graph.types;
        if let Some(kind) = types.basic(ty) {
            return if kind.is_boolean() {
                Expr::ident("false")
            } else if kind.is_string() {
                Expr::BasicLit {
                    kind: LiteralKind::String,
                    text: String::new(),
                }
            } else if kind.is_numeric() {
                Expr::int("0")
            } else {
                Expr::Nil
            };
        }
        match types.get(types.underlying(ty)) {
            Some(
                FluxType::Pointer { .. }
                | FluxType::Slice { .. }
                | FluxType::Map { .. }
                | FluxType::Signature(_)
                | FluxType::Interface(_),
            ) => Expr::Nil,
            _ => Expr::Zero(types.to_expr(ty)),
        }
    }

    /// A package-level name, qualified unless it belongs to this package.
    fn qualified(&self, package: &str, name: &str) -> Expr {
        if package.is_empty() || package == self.graph.package() {
            Expr::ident(name)
        } else {
            Expr::selector(Expr::ident(package_name(package)), name)
        }
    }

    fn bound_type(&self, n: NodeId, ty: Option<TypeId>) -> Result<TypeExpr, CodegenError> {
        ty.map(|t| self.graph.types.to_expr(t))
            .ok_or_else(|| CodegenError::UnresolvedType(format!("node {} has no bound type", n)))
    }
}

fn assign(name: &str, value: Expr) -> Stmt {
    Stmt::new(StmtKind::Assign {
        targets: vec![Expr::ident(name)],
        values: vec![value],
    })
}

fn port_type(graph: &FunctionGraph, port: PortId) -> Option<TypeId> {
    graph.get_port(port).and_then(|p| p.ty)
}

fn require_node(graph: &FunctionGraph, id: NodeId) -> Result<&Node, CodegenError> {
    graph
        .get_node(id)
        .ok_or_else(|| CodegenError::InvalidGraph(format!("unknown node {}", id)))
}

fn malformed(n: NodeId, what: &str) -> CodegenError {
    CodegenError::InvalidGraph(format!("node {} is {}", n, what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::{Param, Signature};

    fn options() -> WriterOptions {
        WriterOptions::default()
    }

    fn int_fn() -> FunctionGraph {
        let mut g = FunctionGraph::new("example.com/app", "Double");
        g.set_signature(
            None,
            &Signature {
                params: vec![Param {
                    name: "n".into(),
                    ty: TypeId::INT,
                }],
                results: vec![Param {
                    name: "r".into(),
                    ty: TypeId::INT,
                }],
                variadic: false,
            },
        )
        .unwrap();
        g
    }

    #[test]
    fn test_empty_function_returns_bare() {
        let g = int_fn();
        let lowered = lower_function(&g, &options()).unwrap();
        assert_eq!(lowered.decl.params, vec![FieldExpr::new("n", TypeExpr::name("int"))]);
        assert_eq!(lowered.decl.results, vec![FieldExpr::new("r", TypeExpr::name("int"))]);
        assert_eq!(lowered.decl.body, vec![Stmt::new(StmtKind::Return)]);
        assert!(lowered.imports.is_empty());
    }

    #[test]
    fn test_operator_is_named_and_assigned_to_result() {
        let mut g = int_fn();
        let root = g.root_block();
        let add = g
            .add_node(
                root,
                NodeKind::Operator {
                    op: "+".into(),
                    unary: false,
                },
            )
            .unwrap();
        let n = g.get_node(g.inputs_node()).unwrap().outputs[0];
        let r = g.get_node(g.outputs_node()).unwrap().inputs[0];
        let (x, y, out) = {
            let node = g.get_node(add).unwrap();
            (node.inputs[0], node.inputs[1], node.outputs[0])
        };
        g.connect(n, x).unwrap();
        g.connect(n, y).unwrap();
        g.connect(out, r).unwrap();

        let body = lower_function(&g, &options()).unwrap().decl.body;
        assert_eq!(
            body,
            vec![
                Stmt::new(StmtKind::Define {
                    names: vec!["v1".into()],
                    value: Expr::binary("+", Expr::ident("n"), Expr::ident("n")),
                }),
                assign("r", Expr::ident("v1")),
                Stmt::new(StmtKind::Return),
            ]
        );
    }

    #[test]
    fn test_unconnected_inputs_print_zero_values() {
        let mut g = int_fn();
        let root = g.root_block();
        let add = g
            .add_node(
                root,
                NodeKind::Operator {
                    op: "<".into(),
                    unary: false,
                },
            )
            .unwrap();
        let n = g.get_node(g.inputs_node()).unwrap().outputs[0];
        let x = g.get_node(add).unwrap().inputs[0];
        g.connect(n, x).unwrap();

        let body = lower_function(&g, &options()).unwrap().decl.body;
        assert_eq!(
            body[0],
            Stmt::new(StmtKind::Assign {
                targets: vec![Expr::ident("_")],
                values: vec![Expr::binary("<", Expr::ident("n"), Expr::int("0"))],
            })
        );
    }

    #[test]
    fn test_prefix_is_configurable_and_avoids_parameter_names() {
        let mut g = FunctionGraph::new("example.com/app", "F");
        g.set_signature(
            None,
            &Signature {
                params: vec![Param {
                    name: "t1".into(),
                    ty: TypeId::STRING,
                }],
                results: vec![],
                variadic: false,
            },
        )
        .unwrap();
        let root = g.root_block();
        let len = g.add_node(root, NodeKind::Len).unwrap();
        let neg = g
            .add_node(
                root,
                NodeKind::Operator {
                    op: "-".into(),
                    unary: true,
                },
            )
            .unwrap();
        let p = g.get_node(g.inputs_node()).unwrap().outputs[0];
        let x = g.get_node(len).unwrap().data_inputs()[0];
        let out = g.get_node(len).unwrap().data_outputs()[0];
        let y = g.get_node(neg).unwrap().inputs[0];
        g.connect(p, x).unwrap();
        g.connect(out, y).unwrap();

        let options = WriterOptions {
            name_prefix: "t".into(),
            ..WriterOptions::default()
        };
        let body = lower_function(&g, &options).unwrap().decl.body;
        assert_eq!(
            body[0].kind,
            StmtKind::Define {
                names: vec!["t2".into()],
                value: Expr::call(Expr::ident("len"), vec![Expr::ident("t1")]),
            }
        );
    }

    #[test]
    fn test_unbound_composite_is_unresolved() {
        let mut g = int_fn();
        let root = g.root_block();
        g.add_node(root, NodeKind::Composite { ty: None, addr: false })
            .unwrap();
        let err = lower_function(&g, &options()).unwrap_err();
        assert!(matches!(err, CodegenError::UnresolvedType(_)));
    }
}
