//! Peephole optimization framework (spec §4.I).
//!
//! Register allocation and instruction scheduling are out of scope (spec
//! §1 Non-goals); this module consumes an already-scheduled,
//! already-allocated block through the [`RegisterAssignment`] trait a
//! target backend supplies, and walks the schedule in reverse tracking
//! which node currently occupies every physical register.

use firm_asm::OpKind;

use crate::graph::IrGraph;
use crate::node::{Attrs, NodeId};

pub type RegClass = usize;
pub type RegIdx = usize;

/// What a target backend exposes about its register file and the
/// allocation already performed (spec §6 `arch_irn_ops::classify`).
pub trait RegisterAssignment {
    fn num_classes(&self) -> usize;
    fn class_size(&self, class: RegClass) -> usize;
    /// The `(class, register)` a node's result occupies. `None` for nodes
    /// that produce no register-held value (`Store`, control-flow).
    fn assigned_register(&self, node: NodeId) -> Option<(RegClass, RegIdx)>;
    /// Registers the allocator never committed to; `register_values` is
    /// only updated for non-virtual registers (spec §4.I "Clear defs").
    fn is_virtual(&self, class: RegClass, reg: RegIdx) -> bool;
}

/// `register_values[class][reg]`: the node currently providing the value
/// held in each physical register, live across one reverse block walk.
pub struct PeepholeState {
    register_values: Vec<Vec<Option<NodeId>>>,
}

impl PeepholeState {
    pub fn new(regs: &dyn RegisterAssignment) -> Self {
        let register_values = (0..regs.num_classes())
            .map(|c| vec![None; regs.class_size(c)])
            .collect();
        PeepholeState { register_values }
    }

    /// Seeds `register_values` from the block's live-out set.
    pub fn init_live_out(&mut self, live_out: &[(RegClass, RegIdx, NodeId)]) {
        for &(class, reg, node) in live_out {
            self.register_values[class][reg] = Some(node);
        }
    }

    fn clear(&mut self, class: RegClass, reg: RegIdx) {
        self.register_values[class][reg] = None;
    }

    fn set(&mut self, class: RegClass, reg: RegIdx, node: NodeId) {
        self.register_values[class][reg] = Some(node);
    }

    pub fn value_in(&self, class: RegClass, reg: RegIdx) -> Option<NodeId> {
        self.register_values[class][reg]
    }
}

/// A target's peephole rewrite for one opcode (spec §4.I "if `n`'s opcode
/// has a registered peephole function, call it"). Returns the replacement
/// if it fired.
pub type PeepholeFn = fn(&mut IrGraph, NodeId) -> Option<NodeId>;

/// Opcode-keyed peephole dispatch a target registers.
pub trait PeepholeTarget {
    fn peephole_for(&self, op: OpKind) -> Option<PeepholeFn>;
}

/// Reroutes a barrier node's `Proj`s to its own operands (index-for-index)
/// and splices it out of the schedule, without touching liveness (spec
/// §4.I "the framework also kills barrier nodes").
pub fn kill_barriers(graph: &mut IrGraph, schedule: &mut Vec<NodeId>) {
    let barriers: Vec<NodeId> = schedule
        .iter()
        .copied()
        .filter(|&n| graph.node(n).op == OpKind::Barrier)
        .collect();
    for barrier in barriers {
        let projs: Vec<NodeId> = graph
            .uses_of(barrier)
            .iter()
            .map(|(user, _)| *user)
            .filter(|&u| matches!(graph.node(u).attrs, Attrs::Proj { .. }))
            .collect();
        for proj in projs {
            let Attrs::Proj { index, .. } = graph.node(proj).attrs else { unreachable!() };
            let source = graph.node(barrier).ins[index as usize];
            graph.exchange(proj, source);
        }
        schedule.retain(|&n| n != barrier);
    }
}

/// `be_peephole_exchange`: redirects every user of `old` to `new` then
/// rewrites any `register_values` slot still pointing at `old`, so the
/// walk's bookkeeping doesn't go stale. Exchanges are only legal when both
/// nodes get the same register assignment; that precondition is the
/// registered [`PeepholeFn`]'s responsibility, not this framework's.
pub fn be_peephole_exchange(graph: &mut IrGraph, state: &mut PeepholeState, old: NodeId, new: NodeId) {
    graph.exchange(old, new);
    for class in &mut state.register_values {
        for slot in class.iter_mut() {
            if *slot == Some(old) {
                *slot = Some(new);
            }
        }
    }
}

fn data_projs_of(graph: &IrGraph, tuple: NodeId) -> Vec<NodeId> {
    graph
        .uses_of(tuple)
        .iter()
        .map(|(user, _)| *user)
        .filter(|&u| matches!(graph.node(u).attrs, Attrs::Proj { .. }))
        .collect()
}

/// Walks `schedule` (forward emission order) in reverse, maintaining
/// `register_values` and invoking `target`'s registered peephole function
/// per instruction (spec §4.I steps 1-3). `live_out` seeds the block's
/// exit register state; `regs` supplies the assignment the allocator
/// already committed to. Barrier nodes are killed first.
#[tracing::instrument(skip(graph, regs, target, schedule, live_out))]
pub fn peephole_optimize_block(
    graph: &mut IrGraph,
    regs: &dyn RegisterAssignment,
    target: &dyn PeepholeTarget,
    schedule: &mut Vec<NodeId>,
    live_out: &[(RegClass, RegIdx, NodeId)],
) {
    kill_barriers(graph, schedule);

    let mut state = PeepholeState::new(regs);
    state.init_live_out(live_out);

    let mut i = schedule.len();
    while i > 0 {
        i -= 1;
        let n = schedule[i];

        if graph.node(n).op.is_mode_t() {
            for proj in data_projs_of(graph, n) {
                if let Some((class, reg)) = regs.assigned_register(proj) {
                    if !regs.is_virtual(class, reg) {
                        state.clear(class, reg);
                    }
                }
            }
        } else if let Some((class, reg)) = regs.assigned_register(n) {
            if !regs.is_virtual(class, reg) {
                state.clear(class, reg);
            }
        }

        let preds = graph.node(n).ins.clone();
        for pred in preds {
            if let Some((class, reg)) = regs.assigned_register(pred) {
                if !regs.is_virtual(class, reg) {
                    state.set(class, reg, pred);
                }
            }
        }

        if let Some(peephole) = target.peephole_for(graph.node(n).op) {
            if let Some(replacement) = peephole(graph, n) {
                tracing::trace!(?n, ?replacement, "peephole rewrite fired");
                be_peephole_exchange(graph, &mut state, n, replacement);
                schedule[i] = replacement;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firm_tr::Program;
    use firm_types::mode;

    fn fresh() -> (Program, IrGraph) {
        let mut prog = Program::new();
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let g = IrGraph::new(entity, prog.glob_type, 0);
        (prog, g)
    }

    struct NoRegs;
    impl RegisterAssignment for NoRegs {
        fn num_classes(&self) -> usize { 1 }
        fn class_size(&self, _class: RegClass) -> usize { 4 }
        fn assigned_register(&self, _node: NodeId) -> Option<(RegClass, RegIdx)> { None }
        fn is_virtual(&self, _class: RegClass, _reg: RegIdx) -> bool { false }
    }

    struct NoPeepholes;
    impl PeepholeTarget for NoPeepholes {
        fn peephole_for(&self, _op: OpKind) -> Option<PeepholeFn> { None }
    }

    #[test]
    fn kill_barriers_reroutes_projs_to_operands() {
        let (_p, mut g) = fresh();
        let block = g.start_block();
        let a = g.new_node(OpKind::Const, mode::mode_Is, block, vec![], Attrs::None);
        let b = g.new_node(OpKind::Const, mode::mode_Is, block, vec![], Attrs::None);
        let barrier = g.new_node(OpKind::Barrier, mode::mode_T, block, vec![a, b], Attrs::None);
        let p0 = g.new_node(OpKind::Proj, mode::mode_Is, block, vec![barrier], Attrs::Proj { index: 0, pn_cmp: None });
        let p1 = g.new_node(OpKind::Proj, mode::mode_Is, block, vec![barrier], Attrs::Proj { index: 1, pn_cmp: None });
        let user = g.new_node(OpKind::Add, mode::mode_Is, block, vec![p0, p1], Attrs::None);

        let mut schedule = vec![a, b, barrier, p0, p1, user];
        kill_barriers(&mut g, &mut schedule);

        assert!(!schedule.contains(&barrier));
        assert_eq!(g.node(user).ins[0], a);
        assert_eq!(g.node(user).ins[1], b);
    }

    #[test]
    fn peephole_optimize_block_runs_without_registered_rewrites() {
        let (_p, mut g) = fresh();
        let block = g.start_block();
        let a = g.new_node(OpKind::Const, mode::mode_Is, block, vec![], Attrs::None);
        let b = g.new_node(OpKind::Const, mode::mode_Is, block, vec![], Attrs::None);
        let add = g.new_node(OpKind::Add, mode::mode_Is, block, vec![a, b], Attrs::None);
        let mut schedule = vec![a, b, add];

        peephole_optimize_block(&mut g, &NoRegs, &NoPeepholes, &mut schedule, &[]);

        assert_eq!(schedule, vec![a, b, add]);
    }

    #[test]
    fn be_peephole_exchange_rewrites_register_values() {
        let (_p, mut g) = fresh();
        let block = g.start_block();
        let a = g.new_node(OpKind::Const, mode::mode_Is, block, vec![], Attrs::None);
        let b = g.new_node(OpKind::Const, mode::mode_Is, block, vec![], Attrs::None);
        let regs = NoRegs;
        let mut state = PeepholeState::new(&regs);
        state.set(0, 0, a);

        be_peephole_exchange(&mut g, &mut state, a, b);

        assert_eq!(state.value_in(0, 0), Some(b));
    }
}
