//! Per-variant port shapes and reactions to connection changes.
//!
//! Every node variant declares its initial ports ([`FunctionGraph::init_ports`])
//! and how derived port types follow the types arriving at its inputs
//! ([`FunctionGraph::react`]). A change is propagated downstream until no
//! output type changes any more. Reactions never toggle modes; they only
//! re-derive types and the port sets that depend on them.
//!
//! The binding operations in this module (bound types, read/write mode,
//! append elements, literal text, parameter editing) are all
//! transactional: a rejected binding leaves the node as it was.

use std::collections::VecDeque;

use crate::assign::assignable;
use crate::error::CoreError;
use crate::graph::FunctionGraph;
use crate::id::{ConnectionId, NodeId, PortId};
use crate::kind::{is_comparison, is_logical, normalize_literal, Callee, NodeKind, PortsRole, ValueTarget};
use crate::node::{Direction, GraphEvent};
use crate::type_id::TypeId;
use crate::types::{is_exported, FluxType, Param, Signature};

type PortSpec = (String, Option<TypeId>);

fn spec(name: &str, ty: Option<TypeId>) -> PortSpec {
    (name.to_string(), ty)
}

impl FunctionGraph {
    // -----------------------------------------------------------------------
    // Initial shapes
    // -----------------------------------------------------------------------

    /// Creates the initial ports of a freshly allocated node.
    pub(crate) fn init_ports(&mut self, id: NodeId) {
        let Some(kind) = self.nodes.get(&id).map(|n| n.kind.clone()) else {
            return;
        };
        if kind.has_seq_input() {
            self.new_port(id, Direction::Input, "", Some(TypeId::SEQUENCE));
        }
        if kind.has_seq_output() {
            self.new_port(id, Direction::Output, "", Some(TypeId::SEQUENCE));
        }
        match &kind {
            NodeKind::Call { callee, spread } => {
                match callee {
                    Callee::Method { .. } => {
                        self.new_port(id, Direction::Input, "recv", None);
                    }
                    Callee::Value => {
                        self.new_port(id, Direction::Input, "fn", None);
                    }
                    Callee::Func { .. } => {}
                }
                if let Some(sig) = self.callee_signature(callee) {
                    for (name, ty) in self.call_params(&sig, *spread) {
                        self.new_port(id, Direction::Input, &name, ty);
                    }
                    for r in &sig.results {
                        self.new_port(id, Direction::Output, &r.name, Some(r.ty));
                    }
                }
            }
            NodeKind::Value { target, set } => {
                if target.has_object() {
                    self.new_port(id, Direction::Input, "x", None);
                }
                let ty = match target {
                    ValueTarget::Var { ty, .. } | ValueTarget::Const { ty, .. } => Some(*ty),
                    ValueTarget::Func { sig, .. } => Some(*sig),
                    _ => None,
                };
                let name = value_port_name(target);
                let direction = if *set {
                    Direction::Input
                } else {
                    Direction::Output
                };
                self.new_port(id, direction, name, ty);
            }
            NodeKind::Composite { .. } | NodeKind::Make { .. } => {
                // A fresh node has no connections to conflict with.
                let _ = self.shape_bound(id);
            }
            NodeKind::Convert { ty } => {
                self.new_port(id, Direction::Input, "x", None);
                self.new_port(id, Direction::Output, "", *ty);
            }
            NodeKind::Append { spread } => {
                self.new_port(id, Direction::Input, "slice", None);
                if *spread {
                    self.new_port(id, Direction::Input, "rest", None);
                }
                self.new_port(id, Direction::Output, "", None);
            }
            NodeKind::Len => {
                self.new_port(id, Direction::Input, "x", None);
                self.new_port(id, Direction::Output, "", Some(TypeId::INT));
            }
            NodeKind::Delete => {
                self.new_port(id, Direction::Input, "map", None);
                self.new_port(id, Direction::Input, "key", None);
            }
            NodeKind::Operator { op, unary } => {
                self.new_port(id, Direction::Input, "x", None);
                if !*unary {
                    self.new_port(id, Direction::Input, "y", None);
                }
                let ty = (is_comparison(op) || is_logical(op)).then_some(TypeId::BOOL);
                self.new_port(id, Direction::Output, "", ty);
            }
            NodeKind::TypeAssert { ty } => {
                self.new_port(id, Direction::Input, "x", None);
                self.new_port(id, Direction::Output, "value", *ty);
                self.new_port(id, Direction::Output, "ok", Some(TypeId::BOOL));
            }
            NodeKind::Index { set } => {
                self.new_port(id, Direction::Input, "x", None);
                self.new_port(id, Direction::Input, "key", None);
                if *set {
                    self.new_port(id, Direction::Input, "value", None);
                } else {
                    self.new_port(id, Direction::Output, "value", None);
                }
            }
            NodeKind::If => {
                self.new_port(id, Direction::Input, "cond", Some(TypeId::BOOL));
            }
            NodeKind::Loop => {
                self.new_port(id, Direction::Input, "x", None);
                if let Some(inner) = self.nodes.get(&id).and_then(|n| n.inner.first().copied()) {
                    self.new_port(inner, Direction::Output, "i", Some(TypeId::INT));
                }
            }
            NodeKind::Literal { kind, .. } => {
                self.new_port(id, Direction::Output, "", Some(kind.type_id()));
            }
            NodeKind::FuncLiteral => {
                let sig = self.types.register(FluxType::Signature(Signature::default()));
                self.new_port(id, Direction::Output, "", Some(sig));
            }
            NodeKind::Branch { .. } | NodeKind::Ports { .. } => {}
        }
    }

    fn callee_signature(&self, callee: &Callee) -> Option<Signature> {
        match callee {
            Callee::Func { sig, .. } | Callee::Method { sig, .. } => {
                self.types.signature(*sig).cloned()
            }
            Callee::Value => None,
        }
    }

    /// Argument ports for a signature. The variadic parameter is one slice
    /// port when spread, otherwise it has no port until elements are added.
    fn call_params(&self, sig: &Signature, spread: bool) -> Vec<PortSpec> {
        let fixed = if sig.variadic {
            sig.params.len().saturating_sub(1)
        } else {
            sig.params.len()
        };
        let mut out: Vec<PortSpec> = sig.params[..fixed]
            .iter()
            .map(|p| spec(&p.name, Some(p.ty)))
            .collect();
        if sig.variadic && spread {
            if let Some(last) = sig.params.last() {
                out.push(spec(&last.name, Some(last.ty)));
            }
        }
        out
    }

    /// Input and output ports of Composite and Make, derived from the bound
    /// type. Composite ports are discarded and recreated.
    fn shape_bound(&mut self, id: NodeId) -> Result<Vec<NodeId>, CoreError> {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(Vec::new());
        };
        let kind = node.kind.clone();
        let inputs = node.inputs.clone();
        let outputs = node.outputs.clone();
        let mut neighbours = Vec::new();
        match kind {
            NodeKind::Composite { ty, addr } => {
                for p in inputs {
                    neighbours.extend(self.drop_port(p));
                }
                if let Some(ty) = ty {
                    for (name, field_ty) in self.accessible_fields(ty) {
                        self.new_port(id, Direction::Input, &name, Some(field_ty));
                    }
                }
                let out_ty = match (ty, addr) {
                    (Some(t), true) => Some(self.types.pointer_to(t)),
                    (t, _) => t,
                };
                match outputs.first() {
                    Some(p) => {
                        self.set_port_type(*p, out_ty);
                    }
                    None => {
                        self.new_port(id, Direction::Output, "", out_ty);
                    }
                }
            }
            NodeKind::Make { ty } => {
                let mut specs = Vec::new();
                if let Some(t) = ty {
                    specs.push(spec("len", Some(TypeId::INT)));
                    if self.types.slice_elem(t).is_some() {
                        specs.push(spec("cap", Some(TypeId::INT)));
                    }
                }
                neighbours.extend(self.reshape(id, Direction::Input, 0, &specs)?);
                match outputs.first() {
                    Some(p) => {
                        self.set_port_type(*p, ty);
                    }
                    None => {
                        self.new_port(id, Direction::Output, "", ty);
                    }
                }
            }
            _ => {}
        }
        Ok(neighbours)
    }

    /// Fields of a struct type settable from this function's package.
    fn accessible_fields(&self, ty: TypeId) -> Vec<(String, TypeId)> {
        let foreign = self
            .types
            .named(ty)
            .and_then(|n| n.package.as_deref())
            .is_some_and(|p| p != self.package());
        self.types
            .struct_def(ty)
            .map(|def| {
                def.fields
                    .iter()
                    .filter(|(name, _)| !foreign || is_exported(name))
                    .map(|(name, t)| (name.clone(), *t))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Brings the ports from `start` onwards of one side of a node in line
    /// with `specs`, reusing existing ports by position.
    fn reshape(
        &mut self,
        id: NodeId,
        direction: Direction,
        start: usize,
        specs: &[PortSpec],
    ) -> Result<Vec<NodeId>, CoreError> {
        let existing: Vec<PortId> = match self.nodes.get(&id) {
            Some(n) => match direction {
                Direction::Input => n.inputs.get(start..).unwrap_or_default().to_vec(),
                Direction::Output => n.outputs.get(start..).unwrap_or_default().to_vec(),
            },
            None => return Ok(Vec::new()),
        };
        let mut neighbours = Vec::new();
        for (i, (name, ty)) in specs.iter().enumerate() {
            match existing.get(i) {
                Some(p) => {
                    if let Some(port) = self.ports.get_mut(p) {
                        if port.name != *name {
                            port.name = name.clone();
                            self.events.insert(GraphEvent::LayoutInvalidated(id));
                        }
                    }
                    self.set_port_type(*p, *ty);
                    if direction == Direction::Input {
                        self.check_incoming(*p)?;
                    }
                }
                None => {
                    self.new_port(id, direction, name, *ty);
                }
            }
        }
        for p in existing.iter().skip(specs.len()) {
            neighbours.extend(self.drop_port(*p));
        }
        Ok(neighbours)
    }

    /// Fails if a connection into `port` no longer type checks.
    fn check_incoming(&self, port: PortId) -> Result<(), CoreError> {
        let Some(p) = self.ports.get(&port) else {
            return Ok(());
        };
        let follows = self.input_follows_source(port);
        for c in &p.conns {
            let Some(conn) = self.conns.get(c) else {
                continue;
            };
            if follows && !conn.feedback {
                continue;
            }
            let src_ty = conn
                .source_port()
                .and_then(|s| self.ports.get(&s))
                .and_then(|s| s.ty);
            if !assignable(&self.types, src_ty, p.ty) {
                return Err(self.mismatch(src_ty, p.ty));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reactions
    // -----------------------------------------------------------------------

    /// Connections of `id` changed: re-derive its port types and propagate
    /// to every node whose inputs follow a changed output.
    pub(crate) fn connections_changed(&mut self, id: NodeId) -> Result<(), CoreError> {
        self.propagate(VecDeque::from([id]))
    }

    fn propagate(&mut self, mut queue: VecDeque<NodeId>) -> Result<(), CoreError> {
        let mut budget = (self.nodes.len() + 1) * 8;
        while let Some(n) = queue.pop_front() {
            if !self.nodes.contains_key(&n) {
                continue;
            }
            if budget == 0 {
                return Err(CoreError::GraphInconsistency {
                    reason: "type propagation did not settle".into(),
                });
            }
            budget -= 1;
            let before = self.output_types(n);
            let neighbours = self.react(n)?;
            queue.extend(neighbours);
            for (port, ty) in before {
                let now = self.ports.get(&port).and_then(|p| p.ty);
                if self.ports.contains_key(&port) && now != ty {
                    queue.extend(self.flow_out(port)?);
                }
            }
        }
        Ok(())
    }

    /// Output port types of a node and of its inner ports nodes.
    fn output_types(&self, id: NodeId) -> Vec<(PortId, Option<TypeId>)> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        std::iter::once(id)
            .chain(node.inner.iter().copied())
            .filter_map(|n| self.nodes.get(&n))
            .flat_map(|n| n.outputs.iter())
            .map(|p| (*p, self.ports.get(p).and_then(|p| p.ty)))
            .collect()
    }

    /// Checks the connections leaving an output whose type changed and
    /// returns the nodes that must re-derive their types.
    fn flow_out(&self, port: PortId) -> Result<Vec<NodeId>, CoreError> {
        let Some(p) = self.ports.get(&port) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for c in &p.conns {
            let Some(conn) = self.conns.get(c) else {
                continue;
            };
            let Some(dst) = conn.destination_port() else {
                continue;
            };
            let Some(dp) = self.ports.get(&dst) else {
                continue;
            };
            if !conn.feedback && self.input_follows_source(dst) {
                self.accepts(dst, p.ty)?;
                out.push(dp.node);
            } else if !assignable(&self.types, p.ty, dp.ty) {
                return Err(self.mismatch(p.ty, dp.ty));
            }
        }
        Ok(out)
    }

    /// Re-derives the port types of one node. Returns nodes that lost
    /// connections because ports were removed.
    fn react(&mut self, id: NodeId) -> Result<Vec<NodeId>, CoreError> {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(Vec::new());
        };
        let kind = node.kind.clone();
        let data_in: Vec<PortId> = node.data_inputs().to_vec();
        let data_out: Vec<PortId> = node.data_outputs().to_vec();
        let seq_in = usize::from(kind.has_seq_input());
        let seq_out = usize::from(kind.has_seq_output());
        let inner: Vec<NodeId> = node.inner.to_vec();

        // Follow-source inputs take the type of their source first.
        for (i, p) in data_in.iter().enumerate() {
            if kind.follows_source(i) {
                let t = self.input_source_type(*p);
                self.set_port_type(*p, t);
            }
        }
        let first = data_in.first().and_then(|p| self.ports.get(p)).and_then(|p| p.ty);
        let mut neighbours = Vec::new();

        match &kind {
            NodeKind::Call {
                callee: Callee::Value,
                spread,
            } => {
                let sig = first.and_then(|t| self.types.signature(t).cloned());
                let (params, results) = match &sig {
                    Some(sig) => (
                        self.call_params(sig, *spread),
                        sig.results
                            .iter()
                            .map(|r| spec(&r.name, Some(r.ty)))
                            .collect(),
                    ),
                    None => (Vec::new(), Vec::new()),
                };
                let keep_elements = sig.as_ref().is_some_and(|s| s.variadic && !*spread);
                if keep_elements {
                    let elem = sig
                        .as_ref()
                        .and_then(|s| s.params.last())
                        .and_then(|p| self.types.slice_elem(p.ty));
                    for p in data_in.iter().skip(1 + params.len()) {
                        self.set_port_type(*p, elem);
                        self.check_incoming(*p)?;
                    }
                    for (p, (name, ty)) in data_in.iter().skip(1).zip(params.iter()) {
                        if let Some(port) = self.ports.get_mut(p) {
                            port.name = name.clone();
                        }
                        self.set_port_type(*p, *ty);
                        self.check_incoming(*p)?;
                    }
                    for (name, ty) in params.iter().skip(data_in.len().saturating_sub(1)) {
                        self.new_port(id, Direction::Input, name, *ty);
                    }
                } else {
                    neighbours.extend(self.reshape(id, Direction::Input, seq_in + 1, &params)?);
                }
                neighbours.extend(self.reshape(id, Direction::Output, seq_out, &results)?);
            }
            NodeKind::Value { target, set } if target.has_object() => {
                let value_ty = first.and_then(|t| self.value_type(target, t));
                let port = if *set {
                    data_in.get(1).copied()
                } else {
                    data_out.first().copied()
                };
                if let Some(p) = port {
                    self.set_port_type(p, value_ty);
                    if *set {
                        self.check_incoming(p)?;
                    }
                }
            }
            NodeKind::Append { spread } => {
                if first.is_none() {
                    for p in data_in.iter().skip(1) {
                        if !*spread {
                            neighbours.extend(self.drop_port(*p));
                        } else {
                            self.set_port_type(*p, None);
                        }
                    }
                } else if *spread {
                    if let Some(p) = data_in.get(1) {
                        self.set_port_type(*p, first);
                        self.check_incoming(*p)?;
                    }
                } else {
                    let elem = first.and_then(|t| self.types.slice_elem(t));
                    for p in data_in.iter().skip(1) {
                        self.set_port_type(*p, elem);
                        self.check_incoming(*p)?;
                    }
                }
                if let Some(out) = data_out.first() {
                    self.set_port_type(*out, first);
                }
            }
            NodeKind::Delete => {
                let key = first.and_then(|t| self.types.map_types(t)).map(|(k, _)| k);
                if let Some(p) = data_in.get(1) {
                    self.set_port_type(*p, key);
                    self.check_incoming(*p)?;
                }
            }
            NodeKind::Operator { op, .. } => {
                if !is_comparison(op) && !is_logical(op) {
                    let typed = data_in
                        .iter()
                        .filter_map(|p| self.ports.get(p).and_then(|p| p.ty))
                        .find(|t| !self.types.is_untyped(*t))
                        .or(first);
                    if let Some(out) = data_out.first() {
                        self.set_port_type(*out, typed);
                    }
                }
            }
            NodeKind::Index { set } => {
                let shape = first.and_then(|t| self.index_shape(t));
                let (key, elem, is_map) = match shape {
                    Some((k, e, m)) => (Some(k), Some(e), m),
                    None => (None, None, false),
                };
                if let Some(p) = data_in.get(1) {
                    self.set_port_type(*p, key);
                    self.check_incoming(*p)?;
                }
                if *set {
                    if let Some(p) = data_in.get(2) {
                        self.set_port_type(*p, elem);
                        self.check_incoming(*p)?;
                    }
                } else {
                    let mut outs = vec![spec("value", elem)];
                    if is_map {
                        outs.push(spec("ok", Some(TypeId::BOOL)));
                    }
                    neighbours.extend(self.reshape(id, Direction::Output, seq_out, &outs)?);
                }
            }
            NodeKind::Loop => {
                let specs = self.loop_bindings(first);
                if let Some(inputs) = inner.first() {
                    neighbours.extend(self.reshape(*inputs, Direction::Output, 0, &specs)?);
                }
            }
            NodeKind::FuncLiteral => {
                let params = inner
                    .first()
                    .map(|n| self.port_params(*n, Direction::Output))
                    .unwrap_or_default();
                let results = inner
                    .get(1)
                    .map(|n| self.port_params(*n, Direction::Input))
                    .unwrap_or_default();
                let sig = Signature {
                    params,
                    results,
                    variadic: false,
                };
                if let Some(out) = data_out.first() {
                    let current = self.ports.get(out).and_then(|p| p.ty);
                    if current.and_then(|t| self.types.signature(t)) != Some(&sig) {
                        let ty = self.types.register(FluxType::Signature(sig));
                        self.set_port_type(*out, Some(ty));
                    }
                }
            }
            _ => {}
        }
        Ok(neighbours)
    }

    /// Type of the value port of a field, method or indirect value node.
    fn value_type(&self, target: &ValueTarget, object: TypeId) -> Option<TypeId> {
        match target {
            ValueTarget::Field { name } => {
                let (base, _) = self.types.indirect(object);
                self.types.struct_def(base)?.fields.get(name).copied()
            }
            ValueTarget::Method { name } => self
                .types
                .method_set(object)
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, sig)| sig),
            ValueTarget::Indirect => self.types.pointer_elem(object),
            _ => None,
        }
    }

    /// (key, element, is_map) for an indexable type.
    fn index_shape(&self, ty: TypeId) -> Option<(TypeId, TypeId, bool)> {
        if let Some((k, v)) = self.types.map_types(ty) {
            return Some((k, v, true));
        }
        if let Some(e) = self.types.slice_elem(ty).or_else(|| self.types.array_elem(ty)) {
            return Some((TypeId::INT, e, false));
        }
        if let Some(e) = self
            .types
            .pointer_elem(ty)
            .and_then(|p| self.types.array_elem(p))
        {
            return Some((TypeId::INT, e, false));
        }
        if self.types.basic(ty).is_some_and(|k| k.is_string()) {
            return Some((TypeId::INT, TypeId::UINT8, false));
        }
        None
    }

    /// Per-iteration bindings exposed by a loop over a value of type `ty`.
    fn loop_bindings(&self, ty: Option<TypeId>) -> Vec<PortSpec> {
        let Some(ty) = ty else {
            return vec![spec("i", Some(TypeId::INT))];
        };
        if let Some((k, v)) = self.types.map_types(ty) {
            return vec![spec("key", Some(k)), spec("value", Some(v))];
        }
        if self.types.basic(ty).is_some_and(|k| k.is_string()) {
            return vec![spec("i", Some(TypeId::INT)), spec("c", Some(TypeId::INT32))];
        }
        match self.index_shape(ty) {
            Some((_, elem, _)) => vec![spec("i", Some(TypeId::INT)), spec("elem", Some(elem))],
            None => vec![spec("i", Some(self.types.default_type(ty)))],
        }
    }

    // -----------------------------------------------------------------------
    // Acceptance
    // -----------------------------------------------------------------------

    /// Whether a follow-source input may take a value of type `ty`.
    pub(crate) fn accepts(&self, dst: PortId, ty: Option<TypeId>) -> Result<(), CoreError> {
        let Some(ty) = ty else {
            return Ok(());
        };
        let port = self.require_port(dst)?;
        let node = self.require_node(port.node)?;
        let index = node.data_inputs().iter().position(|p| *p == dst);
        let reg = &self.types;
        let basic = reg.basic(ty);
        let pointer_to_array = reg
            .pointer_elem(ty)
            .is_some_and(|e| reg.array_elem(e).is_some());
        let ok = match &node.kind {
            NodeKind::Call {
                callee: Callee::Value,
                ..
            } => reg.signature(ty).is_some(),
            NodeKind::Call {
                callee: Callee::Method { name, .. },
                ..
            }
            | NodeKind::Value {
                target: ValueTarget::Method { name },
                ..
            } => reg.method_set(ty).iter().any(|(n, _)| n == name),
            NodeKind::Value {
                target: ValueTarget::Field { name },
                ..
            } => reg
                .struct_def(reg.indirect(ty).0)
                .is_some_and(|s| s.fields.contains_key(name)),
            NodeKind::Value {
                target: ValueTarget::Indirect,
                ..
            } => reg.pointer_elem(ty).is_some(),
            NodeKind::Append { .. } => reg.slice_elem(ty).is_some(),
            NodeKind::Len => {
                basic.is_some_and(|k| k.is_string())
                    || reg.slice_elem(ty).is_some()
                    || reg.array_elem(ty).is_some()
                    || reg.map_types(ty).is_some()
                    || pointer_to_array
            }
            NodeKind::Delete => reg.map_types(ty).is_some(),
            NodeKind::TypeAssert { .. } => reg.interface(ty).is_some(),
            NodeKind::Index { set } => match self.index_shape(ty) {
                Some(_) => !(*set && basic.is_some_and(|k| k.is_string())),
                None => false,
            },
            NodeKind::Loop => {
                basic.is_some_and(|k| k.is_integer()) || self.index_shape(ty).is_some()
            }
            NodeKind::Operator { op, unary } => {
                let operand_ok = match op.as_str() {
                    "&&" | "||" | "!" => basic.is_some_and(|k| k.is_boolean()),
                    "==" | "!=" => true,
                    "<" | "<=" | ">" | ">=" => {
                        basic.is_some_and(|k| k.is_numeric() || k.is_string())
                    }
                    "+" => basic.is_some_and(|k| k.is_numeric() || k.is_string()),
                    "-" | "*" | "/" => basic.is_some_and(|k| k.is_numeric()),
                    _ => basic.is_some_and(|k| k.is_integer()),
                };
                let shift = matches!(op.as_str(), "<<" | ">>");
                let other = if *unary || shift {
                    None
                } else {
                    index
                        .map(|i| 1 - i.min(1))
                        .and_then(|j| node.data_inputs().get(j))
                        .and_then(|p| self.input_source_type(*p))
                };
                let compatible = other.map_or(true, |o| {
                    assignable(reg, Some(ty), Some(o)) || assignable(reg, Some(o), Some(ty))
                });
                operand_ok && compatible
            }
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::UnsupportedBinding {
                reason: format!("{} cannot take a value of type {}", node.kind.tag(), reg.display(ty)),
            })
        }
    }

    /// Validates a type bound to Composite, Convert, Make or TypeAssert.
    pub(crate) fn check_bound_type(&self, kind: &NodeKind, ty: TypeId) -> Result<(), CoreError> {
        if !self.types.contains(ty) {
            return Err(CoreError::TypeNotFound { id: ty });
        }
        let ok = match kind {
            NodeKind::Make { .. } => {
                self.types.slice_elem(ty).is_some() || self.types.map_types(ty).is_some()
            }
            NodeKind::Composite { .. } => {
                self.types.struct_def(ty).is_some()
                    || self.types.slice_elem(ty).is_some()
                    || self.types.array_elem(ty).is_some()
                    || self.types.map_types(ty).is_some()
            }
            NodeKind::Convert { .. } | NodeKind::TypeAssert { .. } => !self.types.is_sequence(ty),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::UnsupportedBinding {
                reason: format!("{} cannot be bound to {}", kind.tag(), self.types.display(ty)),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Binding operations
    // -----------------------------------------------------------------------

    /// Binds (or clears) the type of a Composite, Convert, Make or
    /// TypeAssert node.
    pub fn set_bound_type(&mut self, id: NodeId, ty: Option<TypeId>) -> Result<(), CoreError> {
        let kind = self.require_node(id)?.kind.clone();
        let new_kind = match kind {
            NodeKind::Composite { addr, .. } => NodeKind::Composite { ty, addr },
            NodeKind::Convert { .. } => NodeKind::Convert { ty },
            NodeKind::Make { .. } => NodeKind::Make { ty },
            NodeKind::TypeAssert { .. } => NodeKind::TypeAssert { ty },
            other => {
                return Err(CoreError::UnsupportedBinding {
                    reason: format!("{} has no bound type", other.tag()),
                })
            }
        };
        if let Some(t) = ty {
            self.check_bound_type(&new_kind, t)?;
        }
        self.transaction(|g| {
            let before_pkgs = g.node_packages(id);
            let before = g.output_types(id);
            if let Some(n) = g.nodes.get_mut(&id) {
                n.kind = new_kind.clone();
            }
            let mut queue: VecDeque<NodeId> = VecDeque::new();
            match new_kind {
                NodeKind::Composite { .. } | NodeKind::Make { .. } => {
                    queue.extend(g.shape_bound(id)?);
                }
                NodeKind::Convert { ty } => {
                    if let Some(p) = g.require_node(id)?.data_outputs().first().copied() {
                        g.set_port_type(p, ty);
                    }
                }
                NodeKind::TypeAssert { ty } => {
                    if let Some(p) = g.require_node(id)?.data_outputs().first().copied() {
                        g.set_port_type(p, ty);
                    }
                }
                _ => {}
            }
            let after_pkgs = g.node_packages(id);
            g.update_pkg_refs(&before_pkgs, &after_pkgs);
            for (port, old) in before {
                let now = g.ports.get(&port).and_then(|p| p.ty);
                if now != old {
                    queue.extend(g.flow_out(port)?);
                }
            }
            g.propagate(queue)?;
            tracing::debug!(node = %id, "rebound type");
            Ok(())
        })
    }

    /// Swaps a Value or Index node between read and write mode. Never
    /// happens implicitly.
    pub fn toggle_set(&mut self, id: NodeId) -> Result<(), CoreError> {
        let node = self.require_node(id)?;
        let (set, name) = match &node.kind {
            NodeKind::Value { target, set } if target.addressable() => {
                (*set, value_port_name(target).to_string())
            }
            NodeKind::Index { set } => {
                let container = node
                    .data_inputs()
                    .first()
                    .and_then(|p| self.ports.get(p))
                    .and_then(|p| p.ty);
                if !*set && container.is_some_and(|t| self.types.basic(t).is_some_and(|k| k.is_string())) {
                    return Err(CoreError::UnsupportedBinding {
                        reason: "strings cannot be indexed for writing".into(),
                    });
                }
                (*set, "value".to_string())
            }
            other => {
                return Err(CoreError::UnsupportedBinding {
                    reason: format!("{} has no write mode", other.tag()),
                })
            }
        };
        let value_in = node.data_inputs().last().copied();
        let value_outs: Vec<PortId> = node.data_outputs().to_vec();
        let has_object = match &node.kind {
            NodeKind::Value { target, .. } => target.has_object(),
            _ => true,
        };
        let fixed_ty = match &node.kind {
            NodeKind::Value {
                target: ValueTarget::Var { ty, .. },
                ..
            } => Some(*ty),
            _ => None,
        };
        self.transaction(|g| {
            let mut queue = VecDeque::from([id]);
            if set {
                // The written value is the last data input after the object
                // (and key, for Index).
                let min_inputs = match g.require_node(id)?.kind {
                    NodeKind::Index { .. } => 2,
                    _ => usize::from(has_object),
                };
                if g.require_node(id)?.data_inputs().len() > min_inputs {
                    if let Some(p) = value_in {
                        queue.extend(g.drop_port(p));
                    }
                }
                g.new_port(id, Direction::Output, &name, fixed_ty);
            } else {
                for p in value_outs {
                    queue.extend(g.drop_port(p));
                }
                g.new_port(id, Direction::Input, &name, fixed_ty);
            }
            if let Some(n) = g.nodes.get_mut(&id) {
                match &mut n.kind {
                    NodeKind::Value { set, .. } | NodeKind::Index { set } => *set = !*set,
                    _ => {}
                }
            }
            g.propagate(queue)?;
            tracing::debug!(node = %id, set = !set, "toggled write mode");
            Ok(())
        })
    }

    /// Element type accepted by a new element port, for Append and
    /// non-spread variadic calls.
    fn element_type(&self, id: NodeId) -> Result<Option<TypeId>, CoreError> {
        let node = self.require_node(id)?;
        match &node.kind {
            NodeKind::Append { spread: false } => {
                let slice = node
                    .data_inputs()
                    .first()
                    .and_then(|p| self.ports.get(p))
                    .and_then(|p| p.ty);
                match slice.and_then(|t| self.types.slice_elem(t)) {
                    Some(elem) => Ok(Some(elem)),
                    None => Err(CoreError::UnsupportedBinding {
                        reason: "append has no slice to append to".into(),
                    }),
                }
            }
            NodeKind::Call { spread: false, .. } => {
                let sig = self.call_signature(id);
                match sig.filter(|s| s.variadic) {
                    Some(s) => Ok(s.params.last().and_then(|p| self.types.slice_elem(p.ty))),
                    None => Err(CoreError::UnsupportedBinding {
                        reason: "call is not variadic".into(),
                    }),
                }
            }
            other => Err(CoreError::UnsupportedBinding {
                reason: format!("{} takes no elements", other.tag()),
            }),
        }
    }

    /// The signature a call node currently calls.
    pub fn call_signature(&self, id: NodeId) -> Option<Signature> {
        let node = self.nodes.get(&id)?;
        match &node.kind {
            NodeKind::Call {
                callee: Callee::Value,
                ..
            } => {
                let f = node.data_inputs().first()?;
                let ty = self.ports.get(f)?.ty?;
                self.types.signature(ty).cloned()
            }
            NodeKind::Call { callee, .. } => self.callee_signature(callee),
            _ => None,
        }
    }

    /// Adds one element input to an Append or variadic Call node.
    pub fn add_element(&mut self, id: NodeId) -> Result<PortId, CoreError> {
        let elem = self.element_type(id)?;
        let name = match &self.require_node(id)?.kind {
            NodeKind::Call { .. } => self
                .call_signature(id)
                .and_then(|s| s.params.last().map(|p| p.name.clone()))
                .unwrap_or_default(),
            _ => String::new(),
        };
        let port = self.new_port(id, Direction::Input, &name, elem);
        tracing::debug!(node = %id, port = %port, "added element input");
        Ok(port)
    }

    /// Adds an element input and connects `source` to it.
    pub fn connect_element(&mut self, id: NodeId, source: PortId) -> Result<ConnectionId, CoreError> {
        self.transaction(|g| {
            let port = g.add_element(id)?;
            g.connect(source, port)
        })
    }

    /// Whether `port` is an element input of an Append or variadic Call.
    pub fn is_element_port(&self, port: PortId) -> bool {
        let Some(p) = self.ports.get(&port) else {
            return false;
        };
        let Some(node) = self.nodes.get(&p.node) else {
            return false;
        };
        let Some(index) = node.data_inputs().iter().position(|x| *x == port) else {
            return false;
        };
        match &node.kind {
            NodeKind::Append { spread: false } => index >= 1,
            NodeKind::Call { spread: false, callee } => {
                let Some(sig) = self.call_signature(p.node).filter(|s| s.variadic) else {
                    return false;
                };
                let offset = usize::from(!matches!(callee, Callee::Func { .. }));
                index >= offset + sig.params.len().saturating_sub(1)
            }
            _ => false,
        }
    }

    /// Switches an Append or variadic Call between element inputs and a
    /// single spread input.
    pub fn toggle_spread(&mut self, id: NodeId) -> Result<(), CoreError> {
        let node = self.require_node(id)?;
        let (spread, first_extra, spread_ty) = match &node.kind {
            NodeKind::Append { spread } => {
                let slice = node
                    .data_inputs()
                    .first()
                    .and_then(|p| self.ports.get(p))
                    .and_then(|p| p.ty);
                if slice.is_none() {
                    return Err(CoreError::UnsupportedBinding {
                        reason: "append has no slice to spread".into(),
                    });
                }
                (*spread, 1, slice)
            }
            NodeKind::Call { spread, callee } => {
                let Some(sig) = self.call_signature(id).filter(|s| s.variadic) else {
                    return Err(CoreError::UnsupportedBinding {
                        reason: "call is not variadic".into(),
                    });
                };
                let offset = usize::from(!matches!(callee, Callee::Func { .. }));
                (
                    *spread,
                    offset + sig.params.len().saturating_sub(1),
                    sig.params.last().map(|p| p.ty),
                )
            }
            other => {
                return Err(CoreError::UnsupportedBinding {
                    reason: format!("{} cannot spread", other.tag()),
                })
            }
        };
        let extras: Vec<PortId> = node.data_inputs().iter().skip(first_extra).copied().collect();
        let name = match &node.kind {
            NodeKind::Append { .. } => "rest".to_string(),
            _ => self
                .call_signature(id)
                .and_then(|s| s.params.last().map(|p| p.name.clone()))
                .unwrap_or_default(),
        };
        self.transaction(|g| {
            let mut queue = VecDeque::from([id]);
            for p in extras {
                queue.extend(g.drop_port(p));
            }
            if !spread {
                g.new_port(id, Direction::Input, &name, spread_ty);
            }
            if let Some(n) = g.nodes.get_mut(&id) {
                match &mut n.kind {
                    NodeKind::Append { spread } | NodeKind::Call { spread, .. } => {
                        *spread = !*spread
                    }
                    _ => {}
                }
            }
            g.propagate(queue)
        })
    }

    /// Removes a user-removable port: Append or variadic elements,
    /// Composite fields, and parameters or results of a ports node.
    pub fn remove_port(&mut self, port: PortId) -> Result<(), CoreError> {
        let p = self.require_port(port)?;
        let node_id = p.node;
        let node = self.require_node(node_id)?;
        let removable = match &node.kind {
            NodeKind::Composite { .. } => true,
            NodeKind::Ports {
                role: PortsRole::Inputs,
            } => !(node_id == self.inputs_node() && self.has_receiver() && node.outputs.first() == Some(&port)),
            NodeKind::Ports {
                role: PortsRole::Outputs,
            } => true,
            _ => self.is_element_port(port),
        };
        if !removable {
            return Err(CoreError::UnsupportedBinding {
                reason: format!("port {} of {} cannot be removed", port, node.kind.tag()),
            });
        }
        self.transaction(|g| {
            let before = g.node_packages(node_id);
            let mut queue: VecDeque<NodeId> = g.drop_port(port).into();
            let after = g.node_packages(node_id);
            g.update_pkg_refs(&before, &after);
            queue.extend(g.ports_owner(node_id));
            g.propagate(queue)?;
            tracing::debug!(node = %node_id, port = %port, "removed port");
            Ok(())
        })
    }

    /// The FuncLiteral whose signature a ports node defines.
    fn ports_owner(&self, ports_node: NodeId) -> Option<NodeId> {
        let block = self.nodes.get(&ports_node)?.block;
        let owner = self.blocks.get(&block)?.owner?;
        matches!(self.nodes.get(&owner)?.kind, NodeKind::FuncLiteral).then_some(owner)
    }

    /// Replaces the text of a literal node after normalizing it; the
    /// literal may switch between int and float.
    pub fn set_literal_text(&mut self, id: NodeId, text: &str) -> Result<(), CoreError> {
        let kind = match &self.require_node(id)?.kind {
            NodeKind::Literal { kind, .. } => *kind,
            other => {
                return Err(CoreError::UnsupportedBinding {
                    reason: format!("{} has no literal text", other.tag()),
                })
            }
        };
        let (kind, text) = normalize_literal(kind, text)?;
        self.transaction(|g| {
            let out = g.require_node(id)?.outputs.first().copied();
            if let Some(n) = g.nodes.get_mut(&id) {
                n.kind = NodeKind::Literal {
                    kind,
                    text: text.clone(),
                };
            }
            g.events.insert(GraphEvent::LayoutInvalidated(id));
            if let Some(p) = out {
                if g.set_port_type(p, Some(kind.type_id())) {
                    let queue: VecDeque<NodeId> = g.flow_out(p)?.into();
                    g.propagate(queue)?;
                }
            }
            Ok(())
        })
    }

    /// Adds a parameter to a function or function-literal inputs node.
    pub fn add_param(&mut self, ports_node: NodeId, name: &str, ty: TypeId) -> Result<PortId, CoreError> {
        self.add_boundary_port(ports_node, PortsRole::Inputs, name, ty)
    }

    /// Adds a result to a function or function-literal outputs node.
    pub fn add_result(&mut self, ports_node: NodeId, name: &str, ty: TypeId) -> Result<PortId, CoreError> {
        self.add_boundary_port(ports_node, PortsRole::Outputs, name, ty)
    }

    fn add_boundary_port(
        &mut self,
        ports_node: NodeId,
        role: PortsRole,
        name: &str,
        ty: TypeId,
    ) -> Result<PortId, CoreError> {
        match self.require_node(ports_node)?.kind {
            NodeKind::Ports { role: r } if r == role => {}
            _ => {
                return Err(CoreError::UnsupportedBinding {
                    reason: format!("node {} does not hold {:?} ports", ports_node, role),
                })
            }
        }
        if !self.types.contains(ty) {
            return Err(CoreError::TypeNotFound { id: ty });
        }
        self.transaction(|g| {
            let before = g.node_packages(ports_node);
            let direction = match role {
                PortsRole::Outputs => Direction::Input,
                _ => Direction::Output,
            };
            let port = g.new_port(ports_node, direction, name, Some(ty));
            let after = g.node_packages(ports_node);
            g.update_pkg_refs(&before, &after);
            if let Some(owner) = g.ports_owner(ports_node) {
                g.connections_changed(owner)?;
            }
            Ok(port)
        })
    }

    /// Installs receiver, parameter and result ports on the function's
    /// ports nodes, replacing any present.
    pub fn set_signature(&mut self, receiver: Option<Param>, sig: &Signature) -> Result<(), CoreError> {
        self.transaction(|g| {
            let inputs = g.inputs_node();
            let outputs = g.outputs_node();
            for n in [inputs, outputs] {
                let before = g.node_packages(n);
                let ports: Vec<PortId> = g
                    .nodes
                    .get(&n)
                    .map(|n| n.inputs.iter().chain(n.outputs.iter()).copied().collect())
                    .unwrap_or_default();
                let mut queue = VecDeque::new();
                for p in ports {
                    queue.extend(g.drop_port(p));
                }
                g.propagate(queue)?;
                g.update_pkg_refs(&before, &Default::default());
            }
            g.set_receiver(receiver.is_some());
            let before = g.node_packages(inputs);
            for p in receiver.iter().chain(sig.params.iter()) {
                g.new_port(inputs, Direction::Output, &p.name, Some(p.ty));
            }
            let after = g.node_packages(inputs);
            g.update_pkg_refs(&before, &after);
            let before = g.node_packages(outputs);
            for r in &sig.results {
                g.new_port(outputs, Direction::Input, &r.name, Some(r.ty));
            }
            let after = g.node_packages(outputs);
            g.update_pkg_refs(&before, &after);
            Ok(())
        })
    }
}

fn value_port_name(target: &ValueTarget) -> &str {
    match target {
        ValueTarget::Var { name, .. }
        | ValueTarget::Const { name, .. }
        | ValueTarget::Func { name, .. }
        | ValueTarget::Field { name }
        | ValueTarget::Method { name } => name,
        ValueTarget::Indirect => "value",
    }
}
