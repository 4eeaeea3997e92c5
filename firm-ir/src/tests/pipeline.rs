//! Scenario tests that run a graph through several passes in sequence,
//! the way a real caller would, rather than unit-testing one pass in
//! isolation (teacher: `fuel-vm/src/tests/*` run a whole script rather
//! than one opcode handler at a time).

use firm_asm::OpKind;
use firm_tr::Program;
use firm_types::{mode, tarval};

use crate::graph::IrGraph;
use crate::lower::lower_graph;
use crate::node::Attrs;
use crate::opt::ldst::{optimize_load_store, ConservativeAliasOracle};
use crate::opt::local::local_optimize_graph;

fn fresh() -> (Program, IrGraph) {
    let mut prog = Program::new();
    let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
    let g = IrGraph::new(entity, prog.glob_type, 4);
    (prog, g)
}

/// `(2 + 3) * 4` built as three separate nodes should collapse to a single
/// `Const` once `local_optimize_graph` actually wires its rewrites back
/// into the graph (the full-sweep driver, not `optimize_node` called
/// directly on one node as the unit tests in `opt::local` do).
#[test]
fn full_sweep_folds_a_constant_expression_chain() {
    let (prog, mut g) = fresh();
    let two = g.new_Const(tarval::new_tarval_from_long(2, mode::mode_Is));
    let three = g.new_Const(tarval::new_tarval_from_long(3, mode::mode_Is));
    let four = g.new_Const(tarval::new_tarval_from_long(4, mode::mode_Is));
    let sum = g.new_Add(two, three, mode::mode_Is);
    let product = g.new_Mul(sum, four, mode::mode_Is);

    // A Return so `product` has a real user to observe the rewrite through.
    let mem = g.initial_mem();
    let ret = g.new_Return(mem, vec![product]);

    local_optimize_graph(&mut g, &prog);

    let folded = g.node(ret).ins[1];
    assert_eq!(g.node(folded).op, OpKind::Const);
    let Attrs::Const(tv) = &g.node(folded).attrs else {
        panic!("expected Return's operand to have been rewritten to a folded Const");
    };
    assert_eq!(*tv, tarval::new_tarval_from_long(20, mode::mode_Is));
}

/// An if/else join over a local, where the two arms disagree, should leave
/// a genuine (non-collapsed) `Phi` feeding the merge block's use of that
/// local, and the whole graph should still verify.
#[test]
fn diverging_if_else_join_keeps_a_real_phi_and_verifies() {
    let (prog, mut g) = fresh();
    let entry = g.get_cur_block();
    let cond = g.new_Const(mode::mode_b.null());
    let branch = g.new_Cond(cond);
    let to_then = g.new_Proj(branch, 0, mode::mode_X);
    let to_else = g.new_Proj(branch, 1, mode::mode_X);

    let then_block = g.new_immBlock();
    let else_block = g.new_immBlock();
    let join = g.new_immBlock();
    g.add_immBlock_pred(then_block, to_then);
    g.add_immBlock_pred(else_block, to_else);
    g.mature_immBlock(entry);

    g.set_cur_block(then_block);
    let one = g.new_Const(tarval::new_tarval_from_long(1, mode::mode_Is));
    g.set_value(0, one);
    let jmp1 = g.new_Jmp();
    g.mature_immBlock(then_block);

    g.set_cur_block(else_block);
    let two = g.new_Const(tarval::new_tarval_from_long(2, mode::mode_Is));
    g.set_value(0, two);
    let jmp2 = g.new_Jmp();
    g.mature_immBlock(else_block);

    g.add_immBlock_pred(join, jmp1);
    g.add_immBlock_pred(join, jmp2);
    g.mature_immBlock(join);

    g.set_cur_block(join);
    let merged = g.get_value(0, mode::mode_Is);
    let mem = g.initial_mem();
    g.new_Return(mem, vec![merged]);

    assert_eq!(g.node(merged).op, OpKind::Phi, "arms disagree, phi must survive");
    assert_eq!(g.node(merged).ins, vec![one, two]);

    local_optimize_graph(&mut g, &prog);
    g.verify().expect("graph with a live phi across a real join should verify");
}

/// A struct-field store followed by a load of the same field, lowered
/// first (so the `Sel` becomes plain address arithmetic) and then run
/// through alias-aware load/store optimization, should forward the
/// stored value without ever reaching memory again.
#[test]
fn lowering_then_load_store_optimization_forwards_a_stored_field() {
    let mut prog = Program::new();
    let field = prog.new_entity(prog.tls_type, "x", prog.glob_type);
    prog.entities.set_offset_bits(field, 0);
    let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
    let mut g = IrGraph::new(entity, prog.glob_type, 0);

    let base = g.new_SymConst_addr(field, mode::mode_P);
    let sel_for_store = g.new_Sel(base, field, mode::mode_P);
    let value = g.new_Const(tarval::new_tarval_from_long(42, mode::mode_Is));
    let mem0 = g.initial_mem();
    let store = g.new_Store(mem0, sel_for_store, value, false);
    let mem1 = g.new_Proj(store, 0, mode::mode_M);

    let sel_for_load = g.new_Sel(base, field, mode::mode_P);
    let load = g.new_Load(mem1, sel_for_load, false);
    let load_result = g.new_Proj(load, 1, mode::mode_Is);
    let user = g.new_Conv(load_result, mode::mode_Lu);

    lower_graph(&mut g, &prog);
    optimize_load_store(&mut g, &ConservativeAliasOracle);

    assert_eq!(g.node(user).ins[0], value, "load should have been forwarded to the stored constant");
}
