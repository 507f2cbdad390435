#![forbid(unsafe_code)]

//! Processor graph model.
//!
//! This crate is **contract-only**: no GPU handles, no processors. Nodes are
//! arena entries addressed by [`NodeId`]; edges store only the downstream node
//! and its input slot, so feedback through delay nodes never creates ownership
//! cycles.
//!
//! `compile()` assigns the fixed render order once. Runtimes render in
//! [`Plan::order`] every frame and never re-sort.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

use gpgpu_core::EngineError;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// How an edge delivers its texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Current-frame output of the upstream node.
    Direct,
    /// Output of the upstream node `age` frames ago (upstream must keep history).
    Delayed { age: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    /// Input slot on `to` (0 = primary input, 1.. for binary/ternary operators).
    pub slot: u32,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn is_direct(&self) -> bool {
        self.kind == EdgeKind::Direct
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Human-friendly label for logs.
    pub label: String,
}

#[derive(Debug, Default)]
pub struct Graph {
    next_node: u32,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn add_node(&mut self, label: impl Into<String>) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                label: label.into(),
            },
        );
        id
    }

    /// Edges feeding `id`, ordered by slot.
    pub fn inputs(&self, id: NodeId) -> Vec<Edge> {
        let mut v: Vec<Edge> = self.edges.iter().filter(|e| e.to == id).copied().collect();
        v.sort_by_key(|e| e.slot);
        v
    }

    /// Edges leaving `id`, in insertion order.
    pub fn outputs(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Connect the current-frame output of `from` to input `slot` of `to`.
    ///
    /// Repeated calls with the same `from` fan out; several upstream nodes
    /// targeting different slots of one node fan in.
    pub fn connect(&mut self, from: NodeId, to: NodeId, slot: u32) -> Result<(), EngineError> {
        self.check_endpoints(from, to, slot)?;
        if from == to {
            return Err(EngineError::graph("connect: self-loop requires a delayed edge"));
        }
        if self.reaches(to, from) {
            return Err(EngineError::graph(format!(
                "connect: edge {} -> {} would create a cycle",
                from.0, to.0
            )));
        }
        self.edges.push(Edge {
            from,
            to,
            slot,
            kind: EdgeKind::Direct,
        });
        Ok(())
    }

    /// Connect the output of `from` as it was `age` frames ago.
    ///
    /// Delayed edges are back-edges: they do not constrain render order and
    /// are ignored by cycle detection.
    pub fn connect_delayed(
        &mut self,
        from: NodeId,
        to: NodeId,
        slot: u32,
        age: u32,
    ) -> Result<(), EngineError> {
        self.check_endpoints(from, to, slot)?;
        if age == 0 {
            return Err(EngineError::graph("connect_delayed: age must be >= 1"));
        }
        self.edges.push(Edge {
            from,
            to,
            slot,
            kind: EdgeKind::Delayed { age },
        });
        Ok(())
    }

    fn check_endpoints(&self, from: NodeId, to: NodeId, slot: u32) -> Result<(), EngineError> {
        if !self.contains(from) || !self.contains(to) {
            return Err(EngineError::graph("connect: node not found"));
        }
        // one driver per input slot
        if self.edges.iter().any(|e| e.to == to && e.slot == slot) {
            return Err(EngineError::graph(format!(
                "connect: slot {slot} of node {} already connected",
                to.0
            )));
        }
        Ok(())
    }

    /// True if `target` is reachable from `start` over direct edges.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if n == target {
                return true;
            }
            if !seen.insert(n) {
                continue;
            }
            stack.extend(
                self.edges
                    .iter()
                    .filter(|e| e.is_direct() && e.from == n)
                    .map(|e| e.to),
            );
        }
        false
    }

    /// Assign a fixed topological order over direct edges.
    ///
    /// Ties are broken by ascending `NodeId`, so the same graph always yields
    /// the same plan.
    pub fn compile(&self) -> Result<Plan, EngineError> {
        let mut indegree: HashMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        for e in self.edges.iter().filter(|e| e.is_direct()) {
            *indegree.entry(e.to).or_default() += 1;
        }

        let mut ready: BTreeSet<NodeId> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(&n) = ready.iter().next() {
            ready.remove(&n);
            order.push(n);
            for e in self.edges.iter().filter(|e| e.is_direct() && e.from == n) {
                if let Some(d) = indegree.get_mut(&e.to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(e.to);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(EngineError::graph("compile: graph contains a cycle"));
        }

        Ok(Plan {
            order,
            edges: self.edges.clone(),
        })
    }
}

/// Compiled render order plus connectivity.
#[derive(Debug, Clone)]
pub struct Plan {
    pub order: Vec<NodeId>,
    pub edges: Vec<Edge>,
}

impl Plan {
    /// The node's "order" index.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|&n| n == id)
    }

    pub fn inputs_of(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn outputs_of(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn delayed_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| !e.is_direct())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_simple_chain() {
        let mut g = Graph::new();
        let src = g.add_node("source");
        let pass = g.add_node("gain");
        let out = g.add_node("display");

        g.connect(src, pass, 0).unwrap();
        g.connect(pass, out, 0).unwrap();

        let plan = g.compile().unwrap();
        assert_eq!(plan.order, vec![src, pass, out]);
        assert_eq!(plan.edges.len(), 2);
    }

    #[test]
    fn fan_out_and_fan_in() {
        let mut g = Graph::new();
        let blend = g.add_node("blend");
        let src = g.add_node("source");
        let a = g.add_node("gain a");
        let b = g.add_node("gain b");

        g.connect(src, a, 0).unwrap();
        g.connect(src, b, 0).unwrap();
        g.connect(a, blend, 0).unwrap();
        g.connect(b, blend, 1).unwrap();

        let plan = g.compile().unwrap();
        let pos = |id| plan.position(id).unwrap();
        assert!(pos(src) < pos(a));
        assert!(pos(src) < pos(b));
        assert!(pos(a) < pos(blend));
        assert!(pos(b) < pos(blend));

        let slots: Vec<u32> = g.inputs(blend).iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn rejects_cycles_and_double_drivers() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        let c = g.add_node("c");
        g.connect(a, b, 0).unwrap();
        g.connect(b, c, 0).unwrap();

        assert!(matches!(g.connect(c, a, 0), Err(EngineError::Graph(_))));
        assert!(g.connect(a, a, 1).is_err());
        assert!(g.connect(a, c, 0).is_err(), "slot 0 of c already driven");
        g.connect(a, c, 1).unwrap();
    }

    #[test]
    fn delayed_back_edge_is_not_a_cycle() {
        let mut g = Graph::new();
        let src = g.add_node("source");
        let fifo = g.add_node("fifo");
        let diff = g.add_node("diff");
        g.connect(src, fifo, 0).unwrap();
        g.connect(src, diff, 0).unwrap();
        g.connect_delayed(fifo, diff, 1, 1).unwrap();
        g.connect_delayed(diff, src, 1, 1).unwrap();

        let plan = g.compile().unwrap();
        assert_eq!(plan.order.len(), 3);
        assert_eq!(plan.delayed_edges().count(), 2);
        assert!(g.connect_delayed(fifo, diff, 2, 0).is_err());
    }

    #[test]
    fn compile_is_deterministic() {
        let mut g = Graph::new();
        let ids: Vec<NodeId> = (0..6).map(|i| g.add_node(format!("n{i}"))).collect();
        g.connect(ids[5], ids[0], 0).unwrap();
        g.connect(ids[3], ids[1], 0).unwrap();
        g.connect(ids[4], ids[2], 0).unwrap();

        let p1 = g.compile().unwrap();
        let p2 = g.compile().unwrap();
        assert_eq!(p1.order, p2.order);
        assert_eq!(p1.order[0], ids[3], "lowest ready id first");
    }
}
