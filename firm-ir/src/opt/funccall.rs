//! Call purity propagation (spec §4.G supplement, grounded in
//! `original_source/ir/opt/funccall.c`): a `Call` to an entity marked
//! `AdditionalProperties::PURE` touches no memory the rest of the graph can
//! observe, so its memory input can be forwarded straight to its memory
//! output, letting the load/store optimizer see through it as if it were an
//! ordinary value-producing node.

use firm_asm::OpKind;
use firm_tr::{AdditionalProperties, EntityId, Program};

use crate::graph::IrGraph;
use crate::node::{Attrs, NodeId};

fn mem_out_proj(graph: &IrGraph, call: NodeId) -> Option<NodeId> {
    graph
        .uses_of(call)
        .iter()
        .map(|(user, _)| *user)
        .find(|&u| matches!(&graph.node(u).attrs, Attrs::Proj { index: 0, .. }))
}

/// Whether `callee`'s statically-known properties mark it pure: it neither
/// reads nor writes memory beyond its arguments, and always terminates
/// (`additional_properties`'s two-level entity/type lookup, spec §4.C).
pub fn entity_is_pure(prog: &Program, callee: EntityId) -> bool {
    prog.entities
        .additional_properties(&prog.types, callee)
        .contains(AdditionalProperties::PURE)
}

/// Rewrites every `Call` in the graph whose callee is pure so its memory
/// output is short-circuited to its memory input, same as a non-memory
/// value node (spec §4.G "call purity propagation"). Indirect calls
/// (`callee: None`) are conservatively left alone.
#[tracing::instrument(skip(graph, prog))]
pub fn propagate_call_purity(graph: &mut IrGraph, prog: &Program) {
    let calls: Vec<NodeId> = (0..graph.node_count())
        .map(NodeId::from_index)
        .filter(|&n| graph.node(n).op == OpKind::Call)
        .collect();

    for call in calls {
        let Attrs::Call { callee: Some(entity) } = graph.node(call).attrs else {
            continue;
        };
        if !entity_is_pure(prog, entity) {
            continue;
        }
        let mem_in = graph.node(call).ins[0];
        if let Some(mem_out) = mem_out_proj(graph, call) {
            tracing::trace!(?call, "short-circuiting pure call's memory output");
            graph.exchange(mem_out, mem_in);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firm_tr::Program;

    fn fresh() -> (Program, IrGraph) {
        let mut prog = Program::new();
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let g = IrGraph::new(entity, prog.glob_type, 0);
        (prog, g)
    }

    fn pure_method(prog: &mut Program) -> EntityId {
        let ty = prog.glob_type;
        let e = prog.new_entity(prog.glob_type, "pure_fn", ty);
        prog.entities.set_own_properties(e, AdditionalProperties::PURE);
        e
    }

    #[test]
    fn pure_call_short_circuits_memory() {
        let (mut prog, mut g) = fresh();
        let callee = pure_method(&mut prog);
        let mem0 = g.initial_mem();
        let target = g.new_SymConst_addr(callee, firm_types::mode::mode_P);
        let call = g.new_Call(mem0, Some(callee), target, vec![]);
        let mem_out = g.new_Proj(call, 0, firm_types::mode::mode_M);

        propagate_call_purity(&mut g, &prog);

        assert_eq!(g.uses_of(mem_out).len(), 0, "mem_out should have been bypassed");
    }

    #[test]
    fn impure_call_is_left_alone() {
        let (prog, mut g) = fresh();
        let callee = prog.new_entity(prog.glob_type, "impure_fn", prog.glob_type);
        let mem0 = g.initial_mem();
        let target = g.new_SymConst_addr(callee, firm_types::mode::mode_P);
        let call = g.new_Call(mem0, Some(callee), target, vec![]);
        let mem_out = g.new_Proj(call, 0, firm_types::mode::mode_M);

        propagate_call_purity(&mut g, &prog);

        assert_eq!(g.uses_of(mem_out).len(), 0, "no further user was ever added");
        assert_eq!(g.node(mem_out).ins[0], call, "mem_out should still read from the call");
    }
}
