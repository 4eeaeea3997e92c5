//! Constructive SSA builder (spec §4.E).
//!
//! Implements the on-the-fly φ-insertion algorithm: a front-end never
//! computes dominance or places φs itself. It opens blocks with
//! [`IrGraph::new_immBlock`], wires each predecessor edge in as it's
//! discovered with [`IrGraph::add_immBlock_pred`], reads/writes locals with
//! [`IrGraph::get_value`]/[`IrGraph::set_value`], and closes a block with
//! [`IrGraph::mature_immBlock`] once every predecessor is known. φ
//! placeholders (`φ₀`) stand in for reads through not-yet-matured blocks and
//! loop back-edges; [`IrGraph::try_remove_unnecessary_phi`] collapses the
//! ones that turn out to have only one distinct operand.

use firm_asm::OpKind;
use firm_tr::EntityId;
use firm_types::{Mode, Tarval};

use crate::graph::IrGraph;
use crate::node::{Attrs, NodeId};

/// Reserved local-slot key for the memory chain, kept out of the
/// caller-visible `0..n_loc` numbering so `get_store`/`set_store` can't
/// collide with a real local (spec §4.E "the store is read/written through
/// the same value-table mechanism as ordinary locals").
const STORE_SLOT: usize = usize::MAX;

impl IrGraph {
    pub fn new_immBlock(&mut self) -> NodeId {
        self.new_block()
    }

    pub fn add_immBlock_pred(&mut self, block: NodeId, cf_pred: NodeId) {
        debug_assert!(self.node(block).is_block());
        debug_assert!(!self.is_matured(block), "block already matured");
        self.push_in(block, cf_pred);
    }

    /// Closes `block` off: its predecessor list is now final, so every φ₀
    /// placeholder created while it was open gets its real arguments filled
    /// in (spec §4.E "mature_immBlock").
    pub fn mature_immBlock(&mut self, block: NodeId) {
        let pending = std::mem::take(&mut self.block_state_mut(block).pending_phis);
        self.block_state_mut(block).matured = true;
        for (pos, phi, mode) in pending {
            self.set_phi_arguments(phi, block, pos, mode);
            let replacement = self.try_remove_unnecessary_phi(phi);
            self.block_state_mut(block).values.insert(pos, replacement);
        }
    }

    pub fn set_value(&mut self, pos: usize, value: NodeId) {
        let block = self.get_cur_block();
        self.block_state_mut(block).values.insert(pos, value);
    }

    pub fn get_value(&mut self, pos: usize, mode: Mode) -> NodeId {
        let block = self.get_cur_block();
        self.get_r_value_internal(block, pos, mode)
    }

    pub fn set_store(&mut self, value: NodeId) {
        self.set_value(STORE_SLOT, value);
    }

    pub fn get_store(&mut self) -> NodeId {
        self.get_value(STORE_SLOT, firm_types::mode::mode_M)
    }

    /// The recursive heart of the algorithm (Braun et al.'s
    /// `readVariableRecursive`, spec §4.E `get_r_value_internal`):
    /// - already resolved in this block -> return it.
    /// - block still immature -> allocate a φ₀ placeholder, remember it so
    ///   `mature_immBlock` can fill it in later, and return the placeholder.
    /// - exactly one predecessor -> recurse into it directly, no φ needed.
    /// - matured with several predecessors -> allocate a real φ placeholder
    ///   *before* recursing (breaks cycles through loop back-edges), fill in
    ///   its arguments, then try to simplify it away.
    fn get_r_value_internal(&mut self, block: NodeId, pos: usize, mode: Mode) -> NodeId {
        if let Some(v) = self.block_state(block).and_then(|s| s.values.get(&pos)) {
            return *v;
        }
        if !self.is_matured(block) {
            let phi = self.new_node(OpKind::Phi, mode, block, vec![], Attrs::None);
            self.block_state_mut(block).values.insert(pos, phi);
            self.block_state_mut(block).pending_phis.push((pos, phi, mode));
            return phi;
        }
        let preds = self.preds_of_block(block).to_vec();
        let value = if preds.is_empty() {
            self.initial_value(pos, mode)
        } else if preds.len() == 1 {
            let pred_block = self.block_of(preds[0]);
            self.get_r_value_internal(pred_block, pos, mode)
        } else {
            let phi = self.new_node(OpKind::Phi, mode, block, vec![], Attrs::None);
            self.block_state_mut(block).values.insert(pos, phi);
            self.set_phi_arguments(phi, block, pos, mode);
            self.try_remove_unnecessary_phi(phi)
        };
        self.block_state_mut(block).values.insert(pos, value);
        value
    }

    /// A local read reaching the start block with no prior `set_value`: the
    /// memory chain defaults to `initial_mem`; an ordinary local falls back
    /// to the front-end's [`crate::graph::InitLocalFn`] hook (e.g.
    /// parameter `i` -> `Proj(Args, i)`). A front-end that never registered
    /// a hook gets `Unknown(mode)` instead of a read through garbage (spec
    /// §4.E step 2 "synthesize Unknown(mode)").
    fn initial_value(&mut self, pos: usize, mode: Mode) -> NodeId {
        if pos == STORE_SLOT {
            return self.initial_mem();
        }
        let Some(hook) = self.init_local.take() else {
            let block = self.get_cur_block();
            return self.new_node(OpKind::Unknown, mode, block, vec![], Attrs::None);
        };
        let value = hook(pos, mode);
        self.init_local = Some(hook);
        value
    }

    fn set_phi_arguments(&mut self, phi: NodeId, block: NodeId, pos: usize, mode: Mode) {
        let preds = self.preds_of_block(block).to_vec();
        for cf in preds {
            let pred_block = self.block_of(cf);
            let value = self.get_r_value_internal(pred_block, pos, mode);
            self.push_in(phi, value);
        }
    }

    /// Collapses a φ whose operands (ignoring self-references) are all the
    /// same node down to that node, rewriting every user via
    /// [`IrGraph::exchange`] (spec §4.E "φ-simplification law"). A φ with
    /// no operands at all (an unreachable block) collapses to `Bad`.
    pub fn try_remove_unnecessary_phi(&mut self, phi: NodeId) -> NodeId {
        let ins = self.node(phi).ins.clone();
        let mut same: Option<NodeId> = None;
        for op in ins {
            if op == phi || Some(op) == same {
                continue;
            }
            if same.is_some() {
                return phi;
            }
            same = Some(op);
        }
        let replacement = same.unwrap_or_else(|| self.bad());
        self.exchange(phi, replacement);
        replacement
    }

    // --- node constructors (spec §3 "canonical opcodes") ---

    pub fn new_Const(&mut self, tv: Tarval) -> NodeId {
        let block = self.get_cur_block();
        let mode = tv.mode();
        self.new_node(OpKind::Const, mode, block, vec![], Attrs::Const(tv))
    }

    pub fn new_SymConst_addr(&mut self, entity: EntityId, mode: Mode) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(
            OpKind::SymConst,
            mode,
            block,
            vec![],
            Attrs::SymConst {
                kind: firm_asm::SymConstKind::Addr,
                entity: Some(entity),
                ty: None,
            },
        )
    }

    pub fn new_Phi(&mut self, ins: Vec<NodeId>, mode: Mode) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(OpKind::Phi, mode, block, ins, Attrs::None)
    }

    pub fn new_Jmp(&mut self) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(OpKind::Jmp, firm_types::mode::mode_X, block, vec![], Attrs::None)
    }

    pub fn new_Cond(&mut self, selector: NodeId) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(OpKind::Cond, firm_types::mode::mode_T, block, vec![selector], Attrs::None)
    }

    pub fn new_Return(&mut self, mem: NodeId, results: Vec<NodeId>) -> NodeId {
        let block = self.get_cur_block();
        let mut ins = vec![mem];
        ins.extend(results);
        self.new_node(OpKind::Return, firm_types::mode::mode_X, block, ins, Attrs::None)
    }

    pub fn new_Proj(&mut self, tuple: NodeId, index: u32, mode: Mode) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(
            OpKind::Proj,
            mode,
            block,
            vec![tuple],
            Attrs::Proj { index, pn_cmp: None },
        )
    }

    pub fn new_Proj_cmp(&mut self, cmp: NodeId, pn_cmp: firm_asm::PnCmp) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(
            OpKind::Proj,
            firm_types::mode::mode_b,
            block,
            vec![cmp],
            Attrs::Proj { index: 0, pn_cmp: Some(pn_cmp) },
        )
    }

    pub fn new_Cmp(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(OpKind::Cmp, firm_types::mode::mode_T, block, vec![a, b], Attrs::None)
    }

    /// Builds a `Load` returning a `mode_T` tuple of `(M, res)`; the caller
    /// projects the result out with `new_Proj(load, 1, result_mode)`.
    pub fn new_Load(&mut self, mem: NodeId, addr: NodeId, volatile: bool) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(
            OpKind::Load,
            firm_types::mode::mode_T,
            block,
            vec![mem, addr],
            Attrs::Load { volatile },
        )
    }

    pub fn new_Store(&mut self, mem: NodeId, addr: NodeId, value: NodeId, volatile: bool) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(
            OpKind::Store,
            firm_types::mode::mode_T,
            block,
            vec![mem, addr, value],
            Attrs::Store { volatile },
        )
    }

    pub fn new_Call(&mut self, mem: NodeId, callee: Option<EntityId>, target: NodeId, args: Vec<NodeId>) -> NodeId {
        let block = self.get_cur_block();
        let mut ins = vec![mem, target];
        ins.extend(args);
        self.new_node(OpKind::Call, firm_types::mode::mode_T, block, ins, Attrs::Call { callee })
    }

    pub fn new_Alloc(&mut self, mem: NodeId, ty: firm_tr::TypeId) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(OpKind::Alloc, firm_types::mode::mode_T, block, vec![mem], Attrs::Alloc { ty })
    }

    pub fn new_Sel(&mut self, base: NodeId, entity: EntityId, mode: Mode) -> NodeId {
        let block = self.get_cur_block();
        self.new_node(OpKind::Sel, mode, block, vec![base], Attrs::Sel { entity })
    }

    /// `Sel` into an array-typed entity: `indices` carries one value operand
    /// per dimension, in declaration order (spec §4.H "Base + index *
    /// sizeof(element), plus a recursive formula for multi-dimensional
    /// arrays"). [`crate::lower::lower_graph`] reads the dimension count off
    /// `indices.len()` to pick the array-indexing expansion over the plain
    /// struct-member one.
    pub fn new_Sel_array(&mut self, base: NodeId, entity: EntityId, indices: Vec<NodeId>, mode: Mode) -> NodeId {
        let block = self.get_cur_block();
        let mut ins = vec![base];
        ins.extend(indices);
        self.new_node(OpKind::Sel, mode, block, ins, Attrs::Sel { entity })
    }
}

macro_rules! binop_ctor {
    ($name:ident, $op:expr) => {
        impl IrGraph {
            pub fn $name(&mut self, a: NodeId, b: NodeId, mode: Mode) -> NodeId {
                let block = self.get_cur_block();
                self.new_node($op, mode, block, vec![a, b], Attrs::None)
            }
        }
    };
}

binop_ctor!(new_Add, OpKind::Add);
binop_ctor!(new_Sub, OpKind::Sub);
binop_ctor!(new_Mul, OpKind::Mul);
binop_ctor!(new_And, OpKind::And);
binop_ctor!(new_Or, OpKind::Or);
binop_ctor!(new_Eor, OpKind::Eor);

macro_rules! unop_ctor {
    ($name:ident, $op:expr) => {
        impl IrGraph {
            pub fn $name(&mut self, a: NodeId, mode: Mode) -> NodeId {
                let block = self.get_cur_block();
                self.new_node($op, mode, block, vec![a], Attrs::None)
            }
        }
    };
}

unop_ctor!(new_Minus, OpKind::Minus);
unop_ctor!(new_Not, OpKind::Not);
unop_ctor!(new_Abs, OpKind::Abs);
unop_ctor!(new_Conv, OpKind::Conv);

#[cfg(test)]
mod tests {
    use super::*;
    use firm_tr::Program;

    fn fresh() -> (Program, IrGraph) {
        let mut prog = Program::new();
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let g = IrGraph::new(entity, prog.glob_type, 4);
        (prog, g)
    }

    #[test]
    fn straight_line_set_get_round_trips() {
        let (_p, mut g) = fresh();
        let c = g.new_Const(firm_types::mode::mode_Is.one());
        g.set_value(0, c);
        let v = g.get_value(0, firm_types::mode::mode_Is);
        assert_eq!(v, c);
    }

    #[test]
    fn diamond_join_collapses_to_single_phi_operand() {
        // if (cond) { x = 1 } else { x = 1 }; use(x) -- both arms agree, so
        // the join's phi should simplify away to the one shared constant.
        let (_p, mut g) = fresh();
        let entry = g.get_cur_block();
        let one = g.new_Const(firm_types::mode::mode_Is.one());

        let then_block = g.new_immBlock();
        let else_block = g.new_immBlock();
        let join = g.new_immBlock();

        g.set_cur_block(entry);
        let cond = g.new_Const(firm_types::mode::mode_b.null());
        let branch = g.new_Cond(cond);
        let to_then = g.new_Proj(branch, 0, firm_types::mode::mode_X);
        let to_else = g.new_Proj(branch, 1, firm_types::mode::mode_X);
        g.add_immBlock_pred(then_block, to_then);
        g.add_immBlock_pred(else_block, to_else);
        g.mature_immBlock(entry);

        g.set_cur_block(then_block);
        g.set_value(0, one);
        let jmp1 = g.new_Jmp();
        g.mature_immBlock(then_block);

        g.set_cur_block(else_block);
        g.set_value(0, one);
        let jmp2 = g.new_Jmp();
        g.mature_immBlock(else_block);

        g.add_immBlock_pred(join, jmp1);
        g.add_immBlock_pred(join, jmp2);
        g.mature_immBlock(join);

        g.set_cur_block(join);
        let result = g.get_value(0, firm_types::mode::mode_Is);
        assert_eq!(result, one, "both arms agree, phi should simplify to the shared constant");
    }

    #[test]
    fn loop_back_edge_resolves_through_phi_placeholder() {
        // A self-looping block reading a local it also writes: the read
        // inside the loop must get a real (non-trivial) phi since the
        // loop-carried value differs from the entry value.
        let (_p, mut g) = fresh();
        let entry = g.get_cur_block();
        let init = g.new_Const(firm_types::mode::mode_Is.null());
        g.set_value(0, init);
        let to_loop = g.new_Jmp();

        let loop_block = g.new_immBlock();
        g.add_immBlock_pred(loop_block, to_loop);
        g.set_cur_block(loop_block);
        let x = g.get_value(0, firm_types::mode::mode_Is);
        let one = g.new_Const(firm_types::mode::mode_Is.one());
        let next = g.new_Add(x, one, firm_types::mode::mode_Is);
        g.set_value(0, next);
        let back_edge = g.new_Jmp();
        g.add_immBlock_pred(loop_block, back_edge);
        g.mature_immBlock(loop_block);

        let phi = g.get_value(0, firm_types::mode::mode_Is);
        assert_eq!(g.node(phi).op, OpKind::Phi);
        assert_eq!(g.node(phi).ins.len(), 2);
        let _ = entry;
    }
}
