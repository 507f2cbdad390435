//! Processor graph execution.
//!
//! Nodes live in an arena keyed by [`NodeId`]; edges live in the
//! [`Graph`] and never own processors. Render order is fixed by
//! [`Graph::compile`] and only recomputed when the topology changes.

use std::collections::{HashMap, HashSet};

use gpgpu_core::{EngineError, PixelFormat, Size2d};
use gpgpu_graph::{EdgeKind, Graph, NodeId, Plan};

use crate::gpu::{Gpu, TextureId};
use crate::proc::{GpuCtx, Processor, ResultTarget};

/// What happened to each node during one [`Pipeline::process`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Rendered nodes, in render order.
    pub rendered: Vec<NodeId>,
    /// Nodes skipped because an input slot had nothing to bind this frame.
    pub pending: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Configured {
    size: Size2d,
    external: Option<PixelFormat>,
}

#[derive(Debug, Default)]
pub struct Pipeline {
    graph: Graph,
    nodes: HashMap<NodeId, Box<dyn Processor>>,
    plan: Option<Plan>,
    root: Option<NodeId>,
    sources: Vec<NodeId>,
    configured: Option<Configured>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node<P: Processor>(&mut self, proc: P) -> NodeId {
        self.add_boxed(Box::new(proc))
    }

    pub fn add_boxed(&mut self, proc: Box<dyn Processor>) -> NodeId {
        let id = self.graph.add_node(proc.name());
        self.nodes.insert(id, proc);
        self.invalidate();
        id
    }

    /// Feed the output of `from` into input `slot` of `to`.
    pub fn add(&mut self, from: NodeId, to: NodeId, slot: u32) -> Result<(), EngineError> {
        self.graph.connect(from, to, slot)?;
        self.invalidate();
        Ok(())
    }

    /// Feed the output `from` produced `age` frames ago into `slot` of `to`.
    ///
    /// `from` must keep history (a FIFO node) with `1 <= age < capacity`.
    pub fn add_delayed(
        &mut self,
        from: NodeId,
        to: NodeId,
        slot: u32,
        age: u32,
    ) -> Result<(), EngineError> {
        self.check_history(from, age)?;
        self.graph.connect_delayed(from, to, slot, age)?;
        self.invalidate();
        Ok(())
    }

    fn check_history(&self, from: NodeId, age: u32) -> Result<(), EngineError> {
        let node = self
            .nodes
            .get(&from)
            .ok_or_else(|| EngineError::graph(format!("delayed edge from unknown node {}", from.0)))?;
        let cap = node.history_capacity();
        if cap == 0 {
            return Err(EngineError::graph(format!(
                "delayed edge from {} which keeps no history",
                node.name()
            )));
        }
        if age == 0 || age as usize >= cap {
            return Err(EngineError::graph(format!(
                "delay age {age} outside 1..{cap} for {}",
                node.name()
            )));
        }
        Ok(())
    }

    /// Designate the entry point. The root also receives external frames.
    pub fn set_root(&mut self, id: NodeId) -> Result<(), EngineError> {
        if !self.nodes.contains_key(&id) {
            return Err(EngineError::graph(format!("set_root: unknown node {}", id.0)));
        }
        self.sources.retain(|&s| s != id);
        self.sources.insert(0, id);
        self.root = Some(id);
        self.invalidate();
        Ok(())
    }

    /// Additional node fed with the frame input (besides the root).
    pub fn add_source(&mut self, id: NodeId) -> Result<(), EngineError> {
        if !self.nodes.contains_key(&id) {
            return Err(EngineError::graph(format!("add_source: unknown node {}", id.0)));
        }
        if !self.sources.contains(&id) {
            self.sources.push(id);
            self.invalidate();
        }
        Ok(())
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn is_prepared(&self) -> bool {
        self.configured.is_some()
    }

    pub fn frame_size(&self) -> Option<Size2d> {
        self.configured.map(|c| c.size)
    }

    fn invalidate(&mut self) {
        self.plan = None;
        self.configured = None;
    }

    /// Fix the render order and validate delayed edges.
    pub fn compile(&mut self) -> Result<&Plan, EngineError> {
        if self.root.is_none() {
            return Err(EngineError::graph("compile: no root node set"));
        }
        let plan = self.graph.compile()?;
        for e in plan.delayed_edges() {
            if let EdgeKind::Delayed { age } = e.kind {
                self.check_history(e.from, age)?;
            }
        }
        tracing::debug!(order = ?plan.order, "pipeline compiled");
        Ok(self.plan.insert(plan))
    }

    /// (Re)initialize every node for frames of `size`.
    ///
    /// With `external` set, source nodes allocate an upload texture of that
    /// format and take their slot-0 input from it; otherwise the caller passes
    /// an input texture to [`Pipeline::process`]. Node sizes propagate along
    /// the first direct input edge of each node.
    pub fn prepare(
        &mut self,
        ctx: &GpuCtx<'_>,
        size: Size2d,
        external: Option<PixelFormat>,
    ) -> Result<(), EngineError> {
        if size.is_empty() {
            return Err(EngineError::precondition("prepare with zero frame size"));
        }
        if self.plan.is_none() {
            self.compile()?;
        }
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::graph("pipeline not compiled"))?;

        self.configured = None;
        for (position, &id) in plan.order.iter().enumerate() {
            let in_size = plan
                .inputs_of(id)
                .filter(|e| e.is_direct())
                .min_by_key(|e| e.slot)
                .and_then(|e| self.nodes.get(&e.from))
                .map(|n| n.output_size())
                .unwrap_or(size);
            let is_source = self.sources.contains(&id);
            let node = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| EngineError::graph(format!("node {} missing from arena", id.0)))?;
            let ext = match (is_source, external) {
                (true, Some(fmt)) => {
                    node.set_external_input_format(fmt);
                    true
                }
                _ => false,
            };
            if node.state() == crate::proc::ProcState::Uninitialized {
                node.init(ctx, in_size, position, ext)?;
            } else {
                node.reinit(ctx, in_size, ext)?;
            }
        }
        self.configured = Some(Configured { size, external });
        tracing::info!(
            w = size.width,
            h = size.height,
            nodes = plan.order.len(),
            external = ?external,
            "pipeline prepared"
        );
        Ok(())
    }

    /// Upload a host frame into every source node's transfer.
    pub fn upload(&mut self, ctx: &GpuCtx<'_>, data: &[u8]) -> Result<(), EngineError> {
        match self.configured {
            Some(Configured {
                external: Some(_), ..
            }) => {}
            _ => {
                return Err(EngineError::precondition(
                    "upload on a pipeline not prepared for external input",
                ))
            }
        }
        for id in &self.sources {
            if let Some(node) = self.nodes.get_mut(id) {
                node.set_external_input_data(ctx, data)?;
            }
        }
        Ok(())
    }

    /// Render one frame in plan order.
    ///
    /// `input` is bound to slot 0 of every source node; pass `None` when the
    /// sources were prepared for external input and fed with [`Pipeline::upload`].
    /// The first failing node aborts the frame.
    pub fn process(
        &mut self,
        ctx: &GpuCtx<'_>,
        input: Option<TextureId>,
    ) -> Result<FrameStats, EngineError> {
        let configured = self
            .configured
            .ok_or_else(|| EngineError::precondition("process before prepare"))?;
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::precondition("process before compile"))?;
        if input.is_none() && configured.external.is_none() {
            return Err(EngineError::precondition(
                "process without input texture on a pipeline without external input",
            ));
        }

        // history as it was before this frame renders anything
        let mut delayed: HashMap<(NodeId, u32), TextureId> = HashMap::new();
        for e in plan.delayed_edges() {
            if let EdgeKind::Delayed { age } = e.kind {
                let tex = self
                    .nodes
                    .get(&e.from)
                    .and_then(|n| n.history_texture(age as usize - 1));
                if let Some(t) = tex {
                    delayed.insert((e.to, e.slot), t);
                }
            }
        }

        let mut stats = FrameStats::default();
        let mut rendered: HashSet<NodeId> = HashSet::new();

        for (position, &id) in plan.order.iter().enumerate() {
            let mut bindings: Vec<(usize, TextureId)> = Vec::new();
            let mut bound: HashSet<usize> = HashSet::new();

            if self.sources.contains(&id) {
                if let Some(tex) = input {
                    bindings.push((0, tex));
                }
                bound.insert(0);
            }
            for e in plan.inputs_of(id) {
                let tex = match e.kind {
                    EdgeKind::Direct if rendered.contains(&e.from) => {
                        self.nodes.get(&e.from).and_then(|n| n.output_texture())
                    }
                    EdgeKind::Direct => None,
                    EdgeKind::Delayed { .. } => delayed.get(&(id, e.slot)).copied(),
                };
                if let Some(t) = tex {
                    bindings.push((e.slot as usize, t));
                    bound.insert(e.slot as usize);
                }
            }

            let node = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| EngineError::graph(format!("node {} missing from arena", id.0)))?;
            let missing: Vec<usize> = (0..node.input_slots()).filter(|s| !bound.contains(s)).collect();
            if !missing.is_empty() {
                tracing::debug!(proc = node.name(), ?missing, "node pending: unbound input slots");
                stats.pending.push(id);
                continue;
            }
            for (slot, tex) in bindings {
                node.use_texture(slot, tex)?;
            }
            node.render(ctx, position)?;
            rendered.insert(id);
            stats.rendered.push(id);
        }

        if !stats.pending.is_empty() {
            tracing::warn!(pending = stats.pending.len(), "frame rendered with pending nodes");
        }
        Ok(stats)
    }

    pub fn node(&self, id: NodeId) -> Option<&dyn Processor> {
        self.nodes.get(&id).map(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut (dyn Processor + 'static)> {
        self.nodes.get_mut(&id).map(|n| n.as_mut())
    }

    /// Downcast a node to its concrete processor type.
    pub fn node_as<T: Processor>(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(&id)?.as_any().downcast_ref::<T>()
    }

    pub fn node_as_mut<T: Processor>(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(&id)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn output_texture(&self, id: NodeId) -> Option<TextureId> {
        self.nodes.get(&id)?.output_texture()
    }

    pub fn result_data(
        &mut self,
        ctx: &GpuCtx<'_>,
        id: NodeId,
        target: ResultTarget<'_>,
        slot: usize,
    ) -> Result<(), EngineError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| EngineError::graph(format!("result_data: unknown node {}", id.0)))?;
        node.result_data(ctx, target, slot)
    }

    /// Release every node's GPU resources. The graph is kept; the next
    /// [`Pipeline::prepare`] reinitializes from scratch.
    pub fn release(&mut self, gpu: &dyn Gpu) {
        for node in self.nodes.values_mut() {
            node.release(gpu);
        }
        self.configured = None;
        tracing::debug!(nodes = self.nodes.len(), "pipeline released");
    }
}
