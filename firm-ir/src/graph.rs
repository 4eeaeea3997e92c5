//! The IR graph & node store (spec §4.D).

use std::collections::HashMap;

use bitflags::bitflags;
use firm_asm::OpKind;
use firm_tr::{EntityId, TypeId};
use firm_types::Mode;

use crate::error::IrError;
use crate::node::{Attrs, Node, NodeId};

/// Fixed positional layout of the graph's 10-input Anchor pseudo-node
/// (spec GLOSSARY "Anchor").
pub mod anchor_slot {
    pub const START: usize = 0;
    pub const END: usize = 1;
    pub const START_BLOCK: usize = 2;
    pub const END_BLOCK: usize = 3;
    pub const BAD: usize = 4;
    pub const NO_MEM: usize = 5;
    pub const INITIAL_MEM: usize = 6;
    pub const FRAME: usize = 7;
    pub const TLS: usize = 8;
    pub const ARGS: usize = 9;
    pub const COUNT: usize = 10;
}

bitflags! {
    /// Graph state bits (spec §3 "IR Graph", §5 "Resource reservation").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IrgState: u32 {
        /// Nodes may float to any dominating block (as opposed to
        /// `PINNED`, where every node stays exactly where it was built).
        /// `optimize_node` flips a graph to `FLOATS` when an equivalence
        /// rewrite crosses a block boundary (spec §4.F step 3).
        const FLOATS         = 1 << 0;
        const PINNED         = 1 << 1;
        const OUT_EDGES      = 1 << 2;
        const DOMINANCE      = 1 << 3;
        const LOOPINFO       = 1 << 4;
        const EXEC_FREQ      = 1 << 5;
        const CONSISTENT     = 1 << 6;
    }
}

bitflags! {
    /// Resources a pass must reserve before touching thread-local node
    /// fields (spec §5 "Resource reservation").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReservedResources: u32 {
        const VISITED  = 1 << 0;
        const LINK     = 1 << 1;
        const PHI_LIST = 1 << 2;
    }
}

/// Per-block state the constructive SSA builder (spec §4.E) needs: the
/// "current value" table (`graph_arr`) and the pending-φ list for
/// not-yet-matured blocks.
#[derive(Debug, Default)]
pub struct BlockState {
    pub matured: bool,
    /// `graph_arr[pos]`: the value most recently `set_value`d at this
    /// local slot, for this block.
    pub values: HashMap<usize, NodeId>,
    /// φ₀ placeholders created while this block was still immature,
    /// awaiting `mature_immBlock` to fill in their arguments.
    pub pending_phis: Vec<(usize, NodeId, Mode)>,
}

/// Hook a front-end can supply for reads of locals that were never
/// `set_value`d in the start block (spec §4.E step 2, §6 `init`
/// `initialize_local_func`).
pub type InitLocalFn = Box<dyn Fn(usize, Mode) -> NodeId>;

pub struct IrGraph {
    pub(crate) nodes: Vec<Node>,
    pub anchor: NodeId,
    pub entity: EntityId,
    pub frame_type: TypeId,
    pub n_loc: usize,
    pub current_block: Option<NodeId>,
    pub(crate) blocks: HashMap<NodeId, BlockState>,
    pub(crate) visited: u64,
    pub(crate) uses: HashMap<NodeId, Vec<(NodeId, usize)>>,
    pub state: IrgState,
    pub(crate) reserved: ReservedResources,
    pub init_local: Option<InitLocalFn>,
}

impl IrGraph {
    /// `new_ir_graph` (spec §6): allocates Start/End blocks, the Anchor,
    /// and `n_local_slots` worth of SSA value-table headroom.
    pub fn new(entity: EntityId, frame_type: TypeId, n_local_slots: usize) -> Self {
        let mut g = IrGraph {
            nodes: Vec::new(),
            anchor: NodeId(0),
            entity,
            frame_type,
            n_loc: n_local_slots,
            current_block: None,
            blocks: HashMap::new(),
            visited: 0,
            uses: HashMap::new(),
            state: IrgState::PINNED,
            reserved: ReservedResources::empty(),
            init_local: None,
        };

        let start_block = g.alloc_node(OpKind::Block, firm_types::mode::mode_BB, None, vec![], Attrs::None);
        let end_block = g.alloc_node(OpKind::Block, firm_types::mode::mode_BB, None, vec![], Attrs::None);
        g.blocks.insert(start_block, BlockState { matured: true, ..Default::default() });
        let start = g.alloc_node(OpKind::Start, firm_types::mode::mode_T, Some(start_block), vec![], Attrs::None);
        let end = g.alloc_node(OpKind::End, firm_types::mode::mode_T, Some(end_block), vec![], Attrs::None);
        let bad = g.alloc_node(OpKind::Bad, firm_types::mode::mode_BAD, None, vec![], Attrs::None);
        let no_mem = g.alloc_node(OpKind::NoMem, firm_types::mode::mode_M, None, vec![], Attrs::None);
        let initial_mem = g.alloc_node(OpKind::Proj, firm_types::mode::mode_M, Some(start_block), vec![start], Attrs::Proj { index: 0, pn_cmp: None });
        let frame = g.alloc_node(OpKind::Proj, firm_types::mode::mode_P, Some(start_block), vec![start], Attrs::Proj { index: 1, pn_cmp: None });
        let tls = g.alloc_node(OpKind::Proj, firm_types::mode::mode_P, Some(start_block), vec![start], Attrs::Proj { index: 2, pn_cmp: None });
        let args = g.alloc_node(OpKind::Proj, firm_types::mode::mode_T, Some(start_block), vec![start], Attrs::Proj { index: 3, pn_cmp: None });

        let mut anchor_ins = vec![NodeId(0); anchor_slot::COUNT];
        anchor_ins[anchor_slot::START] = start;
        anchor_ins[anchor_slot::END] = end;
        anchor_ins[anchor_slot::START_BLOCK] = start_block;
        anchor_ins[anchor_slot::END_BLOCK] = end_block;
        anchor_ins[anchor_slot::BAD] = bad;
        anchor_ins[anchor_slot::NO_MEM] = no_mem;
        anchor_ins[anchor_slot::INITIAL_MEM] = initial_mem;
        anchor_ins[anchor_slot::FRAME] = frame;
        anchor_ins[anchor_slot::TLS] = tls;
        anchor_ins[anchor_slot::ARGS] = args;
        let anchor = g.alloc_node(OpKind::Anchor, firm_types::mode::mode_ANY, None, anchor_ins, Attrs::None);
        g.anchor = anchor;
        g.current_block = Some(start_block);
        g
    }

    fn alloc_node(
        &mut self,
        op: OpKind,
        mode: Mode,
        block: Option<NodeId>,
        ins: Vec<NodeId>,
        attrs: Attrs,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for (i, pred) in ins.iter().enumerate() {
            self.uses.entry(*pred).or_default().push((id, i));
        }
        self.nodes.push(Node {
            op,
            mode,
            block,
            ins,
            attrs,
            visited: 0,
            link: None,
        });
        id
    }

    /// `obstack`-backed allocation of a new node, used by every node
    /// constructor in [`crate::builder`] and [`crate::opt`].
    pub fn new_node(
        &mut self,
        op: OpKind,
        mode: Mode,
        block: NodeId,
        ins: Vec<NodeId>,
        attrs: Attrs,
    ) -> NodeId {
        self.alloc_node(op, mode, Some(block), ins, attrs)
    }

    /// Allocates a fresh, predecessor-less `Block` node (`new_immBlock`,
    /// spec §4.E). Predecessors are added one at a time with
    /// [`Self::push_in`] as the front-end discovers incoming edges; the
    /// block starts out immature (see [`BlockState::matured`]).
    pub fn new_block(&mut self) -> NodeId {
        self.alloc_node(OpKind::Block, firm_types::mode::mode_BB, None, vec![], Attrs::None)
    }

    /// Appends `pred` to `user`'s input list, recording the out-edge.
    /// Unlike [`Self::set_in`] this grows the list rather than overwriting
    /// an existing slot — used for incrementally-built `Block`/`Phi` nodes
    /// whose final arity isn't known at allocation time.
    pub fn push_in(&mut self, user: NodeId, pred: NodeId) -> usize {
        let idx = self.nodes[user.index()].ins.len();
        self.nodes[user.index()].ins.push(pred);
        self.uses.entry(pred).or_default().push((user, idx));
        idx
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Size of the node arena. A [`local_optimize_graph`](crate::opt::local::local_optimize_graph)
    /// pass re-reads this each sweep since `transform_node` rules can grow it.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn anchor_slot(&self, slot: usize) -> NodeId {
        self.nodes[self.anchor.index()].ins[slot]
    }

    pub fn start(&self) -> NodeId {
        self.anchor_slot(anchor_slot::START)
    }
    pub fn end(&self) -> NodeId {
        self.anchor_slot(anchor_slot::END)
    }
    pub fn start_block(&self) -> NodeId {
        self.anchor_slot(anchor_slot::START_BLOCK)
    }
    pub fn end_block(&self) -> NodeId {
        self.anchor_slot(anchor_slot::END_BLOCK)
    }
    pub fn bad(&self) -> NodeId {
        self.anchor_slot(anchor_slot::BAD)
    }
    pub fn no_mem(&self) -> NodeId {
        self.anchor_slot(anchor_slot::NO_MEM)
    }
    pub fn initial_mem(&self) -> NodeId {
        self.anchor_slot(anchor_slot::INITIAL_MEM)
    }
    pub fn frame(&self) -> NodeId {
        self.anchor_slot(anchor_slot::FRAME)
    }
    pub fn tls(&self) -> NodeId {
        self.anchor_slot(anchor_slot::TLS)
    }
    pub fn args(&self) -> NodeId {
        self.anchor_slot(anchor_slot::ARGS)
    }

    pub fn set_cur_block(&mut self, block: NodeId) {
        debug_assert!(self.node(block).is_block());
        self.current_block = Some(block);
    }

    pub fn get_cur_block(&self) -> NodeId {
        self.current_block.expect("no current block set")
    }

    // --- resource reservation (spec §5) ---

    pub fn reserve_resources(&mut self, mask: ReservedResources) {
        assert!(
            !self.reserved.intersects(mask),
            "resource(s) {:?} already reserved",
            self.reserved & mask
        );
        self.reserved |= mask;
    }

    pub fn free_resources(&mut self, mask: ReservedResources) {
        self.reserved.remove(mask);
    }

    /// Bumps the visited stamp; a walk then marks nodes by setting
    /// `node.visited = graph.visited` and checks `node.visited >=
    /// graph.visited` to detect a repeat (spec §5 "Ordering").
    pub fn bump_visited(&mut self) -> u64 {
        self.visited += 1;
        self.visited
    }

    pub fn visited(&self) -> u64 {
        self.visited
    }

    // --- def-use out-edges ---

    pub fn uses_of(&self, id: NodeId) -> &[(NodeId, usize)] {
        self.uses.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rewrites input `idx` of `user` from whatever it currently is to
    /// `new_pred`, keeping the out-edge index consistent.
    pub fn set_in(&mut self, user: NodeId, idx: usize, new_pred: NodeId) {
        let old_pred = self.nodes[user.index()].ins[idx];
        if old_pred == new_pred {
            return;
        }
        if let Some(list) = self.uses.get_mut(&old_pred) {
            list.retain(|(u, i)| !(*u == user && *i == idx));
        }
        self.nodes[user.index()].ins[idx] = new_pred;
        self.uses.entry(new_pred).or_default().push((user, idx));
    }

    /// Replaces `user`'s whole `ins` list at once, fixing up out-edges for
    /// every removed and added predecessor. Unlike [`Self::set_in`] (one
    /// slot) or [`Self::push_in`] (grow by one), this is for rewrites that
    /// change arity, e.g. pruning dead keepalive edges off `End`.
    pub fn set_ins(&mut self, user: NodeId, ins: Vec<NodeId>) {
        let old_ins = std::mem::take(&mut self.nodes[user.index()].ins);
        for (i, pred) in old_ins.iter().enumerate() {
            if let Some(list) = self.uses.get_mut(pred) {
                list.retain(|(u, idx)| !(*u == user && *idx == i));
            }
        }
        for (i, pred) in ins.iter().enumerate() {
            self.uses.entry(*pred).or_default().push((user, i));
        }
        self.nodes[user.index()].ins = ins;
    }

    /// `exchange`: redirects every recorded user of `old` to `new`. Used by
    /// the `Id`-node elision, φ simplification, and `optimize_node`'s CSE
    /// replacement (spec §4.E "φ simplification law", §4.F step 7).
    pub fn exchange(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let users = self.uses.get(&old).cloned().unwrap_or_default();
        for (user, idx) in users {
            self.set_in(user, idx, new);
        }
        if self.current_block == Some(old) {
            self.current_block = Some(new);
        }
        for state in self.blocks.values_mut() {
            for v in state.values.values_mut() {
                if *v == old {
                    *v = new;
                }
            }
        }
    }

    pub fn block_state(&self, block: NodeId) -> Option<&BlockState> {
        self.blocks.get(&block)
    }

    pub fn block_state_mut(&mut self, block: NodeId) -> &mut BlockState {
        self.blocks.entry(block).or_default()
    }

    pub fn is_matured(&self, block: NodeId) -> bool {
        self.blocks.get(&block).map(|b| b.matured).unwrap_or(false)
    }

    pub fn preds_of_block(&self, block: NodeId) -> &[NodeId] {
        &self.node(block).ins
    }

    /// The block a control-flow predecessor node (e.g. a `Jmp`, or a
    /// `Cond` `Proj`) executes in — i.e. the predecessor block itself.
    pub fn block_of(&self, cf_node: NodeId) -> NodeId {
        self.node(cf_node)
            .block
            .expect("control-flow node has no owning block")
    }

    /// Every non-`Block` node must name a `Block` predecessor (spec §8
    /// invariant 1); every matured `Block`'s arity must match each of its
    /// `Phi`s' arity (invariant 2).
    pub fn verify(&self) -> Result<(), IrError> {
        for (i, n) in self.nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            if n.op == OpKind::Block || n.op == OpKind::Anchor || n.op == OpKind::Bad
                || n.op == OpKind::NoMem
            {
                continue;
            }
            if n.block.is_none() {
                return Err(IrError::MissingBlock(id));
            }
        }
        for (block, state) in &self.blocks {
            if !state.matured {
                continue;
            }
            let arity = self.node(*block).ins.len();
            for (i, n) in self.nodes.iter().enumerate() {
                if n.op == OpKind::Phi && n.block == Some(*block) && n.ins.len() != arity {
                    return Err(IrError::PhiArityMismatch {
                        phi: NodeId(i as u32),
                        block: *block,
                        expected: arity,
                        found: n.ins.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// `create_irg_copy`: clones every anchor-reachable node, allocating
    /// copies with null predecessors first, then rewiring predecessors
    /// from the `link` field, then rebuilding the anchor (spec §4.D).
    /// This is the basis of dead-node elimination and of inlining.
    pub fn copy(&self) -> IrGraph {
        let mut reachable = Vec::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.anchor];
        while let Some(id) = stack.pop() {
            if seen[id.index()] {
                continue;
            }
            seen[id.index()] = true;
            reachable.push(id);
            let n = self.node(id);
            stack.extend(n.ins.iter().copied());
            if let Some(b) = n.block {
                stack.push(b);
            }
        }

        // Pass 1: allocate copies with empty `ins`, recording old -> new in
        // `link`.
        let mut new = IrGraph {
            nodes: Vec::with_capacity(reachable.len()),
            anchor: NodeId(0),
            entity: self.entity,
            frame_type: self.frame_type,
            n_loc: self.n_loc,
            current_block: None,
            blocks: HashMap::new(),
            visited: 0,
            uses: HashMap::new(),
            state: self.state,
            reserved: ReservedResources::empty(),
            init_local: None,
        };
        let mut link = vec![None; self.nodes.len()];
        for &old_id in &reachable {
            let old = self.node(old_id);
            let new_id = NodeId(new.nodes.len() as u32);
            new.nodes.push(Node {
                op: old.op,
                mode: old.mode,
                block: None,
                ins: Vec::new(),
                attrs: old.attrs.clone(),
                visited: 0,
                link: None,
            });
            link[old_id.index()] = Some(new_id);
        }

        // Pass 2: wire predecessors and blocks using the link map.
        for &old_id in &reachable {
            let old = self.node(old_id);
            let new_id = link[old_id.index()].unwrap();
            let new_ins: Vec<NodeId> = old
                .ins
                .iter()
                .map(|p| link[p.index()].unwrap())
                .collect();
            let new_block = old.block.map(|b| link[b.index()].unwrap());
            for (i, p) in new_ins.iter().enumerate() {
                new.uses.entry(*p).or_default().push((new_id, i));
            }
            let n = &mut new.nodes[new_id.index()];
            n.ins = new_ins;
            n.block = new_block;
        }

        // Pass 3: rebuild the anchor.
        new.anchor = link[self.anchor.index()].unwrap();
        new.current_block = self.current_block.map(|b| link[b.index()].unwrap());
        for (old_block, state) in &self.blocks {
            if let Some(new_block) = link[old_block.index()] {
                let new_values = state
                    .values
                    .iter()
                    .map(|(pos, v)| (*pos, link[v.index()].unwrap()))
                    .collect();
                new.blocks.insert(
                    new_block,
                    BlockState {
                        matured: state.matured,
                        values: new_values,
                        pending_phis: Vec::new(),
                    },
                );
            }
        }
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firm_tr::Program;

    fn test_graph() -> (Program, IrGraph) {
        let mut prog = Program::new();
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let frame_type = prog.glob_type;
        let g = IrGraph::new(entity, frame_type, 4);
        (prog, g)
    }

    #[test]
    fn anchor_exposes_all_ten_slots() {
        let (_p, g) = test_graph();
        assert_eq!(g.node(g.start()).op, OpKind::Start);
        assert_eq!(g.node(g.end()).op, OpKind::End);
        assert_eq!(g.node(g.start_block()).op, OpKind::Block);
        assert_eq!(g.node(g.end_block()).op, OpKind::Block);
        assert_eq!(g.node(g.bad()).op, OpKind::Bad);
        assert_eq!(g.node(g.no_mem()).op, OpKind::NoMem);
        assert_eq!(g.node(g.initial_mem()).mode, firm_types::mode::mode_M);
        assert_eq!(g.node(g.frame()).mode, firm_types::mode::mode_P);
        assert_eq!(g.node(g.tls()).mode, firm_types::mode::mode_P);
        assert_eq!(g.node(g.args()).mode, firm_types::mode::mode_T);
    }

    #[test]
    fn verify_passes_on_fresh_graph() {
        let (_p, g) = test_graph();
        g.verify().unwrap();
    }

    #[test]
    fn reserve_twice_panics() {
        let (_p, mut g) = test_graph();
        g.reserve_resources(ReservedResources::VISITED);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            g.reserve_resources(ReservedResources::VISITED);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn copy_produces_isomorphic_anchor() {
        let (_p, g) = test_graph();
        let copy = g.copy();
        assert_eq!(g.node(g.start()).op, copy.node(copy.start()).op);
        assert_eq!(g.node(g.start_block()).op, copy.node(copy.start_block()).op);
        assert_eq!(copy.nodes.len(), g.nodes.len());
    }

    #[test]
    fn exchange_rewrites_all_users() {
        let (_p, mut g) = test_graph();
        let bad = g.bad();
        let block = g.start_block();
        let c1 = g.new_node(OpKind::Const, firm_types::mode::mode_Is, block, vec![], Attrs::None);
        let add = g.new_node(OpKind::Add, firm_types::mode::mode_Is, block, vec![c1, bad], Attrs::None);
        g.exchange(bad, c1);
        assert_eq!(g.node(add).ins[1], c1);
    }
}
