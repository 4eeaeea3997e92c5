//! `Sel`/`SymConst` lowering to address arithmetic, and bitfield read/write
//! expansion (spec §4.H). Runs once, after high-level optimization has
//! settled, and walks the whole node arena rather than a single memory
//! chain since a `Sel` can be rooted anywhere a pointer value is computed.

use firm_asm::{OpKind, SymConstKind};
use firm_tr::{EntityId, Program, TypeId, TypeKind};
use firm_types::{mode, tarval, Mode};

use crate::graph::IrGraph;
use crate::node::{Attrs, NodeId};

fn entity_byte_offset(prog: &Program, entity: EntityId) -> i64 {
    prog.entities.offset_bits(entity) / 8
}

/// A `Load`/`Store` through this entity can't be satisfied by a plain
/// byte-addressed access: its storage doesn't start on a byte boundary, or
/// its width isn't a whole number of bytes (spec §4.H "Bitfield access").
fn is_bitfield(prog: &Program, entity: EntityId) -> bool {
    let ty = prog.entities.ty(entity);
    prog.entities.offset_bits(entity) % 8 != 0 || prog.types.size_bits(ty) % 8 != 0
}

fn is_method_member(prog: &Program, entity: EntityId) -> bool {
    let ty = prog.types.skip_tid(prog.entities.ty(entity));
    matches!(prog.types.kind(ty), TypeKind::Method { .. })
}

fn const_node(graph: &mut IrGraph, block: NodeId, mode: Mode, value: i128) -> NodeId {
    let tv = tarval::new_tarval_from_long(value, mode);
    graph.new_node(OpKind::Const, mode, block, vec![], Attrs::Const(tv))
}

fn add_offset(graph: &mut IrGraph, block: NodeId, base: NodeId, offset: i64, mode: Mode) -> NodeId {
    if offset == 0 {
        return base;
    }
    let c = const_node(graph, block, mode, offset as i128);
    graph.new_node(OpKind::Add, mode, block, vec![base, c], Attrs::None)
}

fn find_proj(graph: &IrGraph, tuple: NodeId, index: u32) -> Option<NodeId> {
    graph
        .uses_of(tuple)
        .iter()
        .map(|(user, _)| *user)
        .find(|&u| matches!(&graph.node(u).attrs, Attrs::Proj { index: i, .. } if *i == index))
}

/// Replaces `Sel` whose single user is a `Call`'s target operand with an
/// explicit vtable load, wiring that load onto the `Call`'s own memory
/// input (spec §4.H "method members of a class: `Load(Base + offset)`").
/// Returns `false` when the shape doesn't match, leaving the caller to fall
/// back to the plain address-arithmetic replacement.
fn lower_method_sel(graph: &mut IrGraph, prog: &Program, sel: NodeId, entity: EntityId) -> bool {
    let users = graph.uses_of(sel);
    if users.len() != 1 {
        return false;
    }
    let (call, idx) = users[0];
    if idx != 1 || graph.node(call).op != OpKind::Call {
        return false;
    }

    let base = graph.node(sel).ins[0];
    let block = graph.node(sel).block.expect("Sel always has a block");
    let addr_mode = graph.node(sel).mode;
    let addr = add_offset(graph, block, base, entity_byte_offset(prog, entity), addr_mode);

    let call_mem = graph.node(call).ins[0];
    let load = graph.new_node(OpKind::Load, mode::mode_T, block, vec![call_mem, addr], Attrs::Load { volatile: false });
    let load_mem = graph.new_node(OpKind::Proj, mode::mode_M, block, vec![load], Attrs::Proj { index: 0, pn_cmp: None });
    let fn_ptr = graph.new_node(OpKind::Proj, addr_mode, block, vec![load], Attrs::Proj { index: 1, pn_cmp: None });

    graph.set_in(call, 0, load_mem);
    graph.set_in(call, 1, fn_ptr);
    true
}

/// `Sel` into an array-typed entity: folds `indices` (one value operand per
/// dimension, `sel`'s inputs past the base) into `base + entity offset +
/// sum(index_i * stride_i)` (spec §4.H). Returns `None` when `sel` carries
/// no index operands or `entity`'s type isn't an array, leaving the caller
/// to fall through to the plain struct-member/global lowering.
fn lower_array_sel(graph: &mut IrGraph, prog: &Program, sel: NodeId, entity: EntityId) -> Option<NodeId> {
    let ins = graph.node(sel).ins.clone();
    if ins.len() < 2 {
        return None;
    }
    let array_ty = prog.entities.ty(entity);
    let (element, dims) = match prog.types.kind(array_ty) {
        TypeKind::Array { element, dims } => (*element, dims.clone()),
        _ => return None,
    };
    let indices = &ins[1..];
    if indices.len() != dims.len() {
        return None;
    }

    let element_size = prog.types.size_bits(element) / 8;
    let mut strides = vec![0u64; dims.len()];
    let mut running = element_size;
    for i in (0..dims.len()).rev() {
        strides[i] = running;
        running *= dims[i].count.unwrap_or(1);
    }

    let base = ins[0];
    let block = graph.node(sel).block.expect("Sel always has a block");
    let addr_mode = graph.node(sel).mode;
    let base_addr = add_offset(graph, block, base, entity_byte_offset(prog, entity), addr_mode);

    let mut offset: Option<NodeId> = None;
    for (dim, &idx) in indices.iter().enumerate() {
        let idx_mode = graph.node(idx).mode;
        let rel = if dims[dim].lower_bound == 0 {
            idx
        } else {
            let lb = const_node(graph, block, idx_mode, dims[dim].lower_bound as i128);
            graph.new_node(OpKind::Sub, idx_mode, block, vec![idx, lb], Attrs::None)
        };
        let stride = const_node(graph, block, idx_mode, strides[dim] as i128);
        let term = graph.new_node(OpKind::Mul, idx_mode, block, vec![rel, stride], Attrs::None);
        offset = Some(match offset {
            None => term,
            Some(acc) => graph.new_node(OpKind::Add, idx_mode, block, vec![acc, term], Attrs::None),
        });
    }
    let mut offset = offset.expect("at least one dimension checked above");
    let offset_mode = graph.node(offset).mode;
    if offset_mode != addr_mode {
        offset = graph.new_node(OpKind::Conv, addr_mode, block, vec![offset], Attrs::None);
    }
    Some(graph.new_node(OpKind::Add, addr_mode, block, vec![base_addr, offset], Attrs::None))
}

/// Replaces one `Sel` with the address it computes (spec §4.H): the
/// array-indexing formula above for array-typed members, a bare `SymConst`
/// for entities owned by the global type, `Base + offset` for
/// struct/union/class data members, or (handled by [`lower_method_sel`]
/// before this runs) a dispatch-table load for class method members.
fn lower_sel(graph: &mut IrGraph, prog: &Program, sel: NodeId) {
    let Attrs::Sel { entity } = graph.node(sel).attrs else {
        return;
    };
    if let Some(replacement) = lower_array_sel(graph, prog, sel, entity) {
        graph.exchange(sel, replacement);
        return;
    }
    if is_method_member(prog, entity) && lower_method_sel(graph, prog, sel, entity) {
        return;
    }

    let mode = graph.node(sel).mode;
    let block = graph.node(sel).block.expect("Sel always has a block");
    let owner = prog.entities.owner(entity);
    let replacement = if prog.types.skip_tid(owner) == prog.types.skip_tid(prog.glob_type) {
        graph.new_node(
            OpKind::SymConst,
            mode,
            block,
            vec![],
            Attrs::SymConst { kind: SymConstKind::Addr, entity: Some(entity), ty: None },
        )
    } else {
        let base = graph.node(sel).ins[0];
        add_offset(graph, block, base, entity_byte_offset(prog, entity), mode)
    };
    graph.exchange(sel, replacement);
}

/// Constant-folds the `type_size`/`type_align`/`ofs_ent` kinds of
/// `SymConst` using the now-fixed layout (spec §4.H). `Addr` stays a
/// symbolic relocation (its value is only known to the linker) and
/// `enum_const`/`Label` aren't resolvable from the node's own attributes,
/// so both are left untouched.
fn lower_symconst(graph: &mut IrGraph, prog: &Program, node: NodeId) {
    let Attrs::SymConst { kind, entity, ty } = graph.node(node).attrs.clone() else {
        return;
    };
    let mode = graph.node(node).mode;
    let value: i128 = match kind {
        SymConstKind::TypeSize => {
            let t: TypeId = ty.expect("type_size SymConst carries a type");
            (prog.types.size_bits(t) / 8) as i128
        }
        SymConstKind::TypeAlign => {
            let t: TypeId = ty.expect("type_align SymConst carries a type");
            (prog.types.align_bits(t) / 8) as i128
        }
        SymConstKind::OfsEnt => {
            let e = entity.expect("ofs_ent SymConst carries an entity");
            entity_byte_offset(prog, e) as i128
        }
        SymConstKind::Addr | SymConstKind::EnumConst | SymConstKind::Label => return,
    };
    let block = graph.node(node).block.expect("SymConst always has a block");
    let replacement = const_node(graph, block, mode, value);
    graph.exchange(node, replacement);
}

/// Expands a bitfield-entity `Load` into `Load` of the surrounding
/// word plus `Shr`/`And` (unsigned) or `Shl`/`Shrs` (signed) to extract the
/// field (spec §4.H "Bitfield access"). Only fires when `load`'s address
/// is still a `Sel` of a bitfield entity; returns `false` otherwise.
fn lower_bitfield_load(graph: &mut IrGraph, prog: &Program, load: NodeId) -> bool {
    let addr = graph.node(load).ins[1];
    let Attrs::Sel { entity } = graph.node(addr).attrs else {
        return false;
    };
    if !is_bitfield(prog, entity) {
        return false;
    }
    let Some(result_proj) = find_proj(graph, load, 1) else {
        return false;
    };

    let block = graph.node(load).block.expect("Load always has a block");
    let mem = graph.node(load).ins[0];
    let base = graph.node(addr).ins[0];
    let addr_mode = graph.node(addr).mode;
    let field_mode = graph.node(result_proj).mode;
    let volatile = matches!(graph.node(load).attrs, Attrs::Load { volatile: true });

    let abs_bits = prog.entities.offset_bits(entity) as u64;
    let width = prog.types.size_bits(prog.entities.ty(entity));
    let word_bits: u64 = 32;
    let word_mode = mode::mode_Iu;
    let word_byte_offset = (abs_bits / word_bits * word_bits / 8) as i64;
    let bit_in_word = abs_bits % word_bits;

    let word_addr = add_offset(graph, block, base, word_byte_offset, addr_mode);
    let word_load = graph.new_node(OpKind::Load, mode::mode_T, block, vec![mem, word_addr], Attrs::Load { volatile });
    let mem_out = graph.new_node(OpKind::Proj, mode::mode_M, block, vec![word_load], Attrs::Proj { index: 0, pn_cmp: None });
    let raw = graph.new_node(OpKind::Proj, word_mode, block, vec![word_load], Attrs::Proj { index: 1, pn_cmp: None });

    let extracted = if field_mode.is_signed() {
        let left = (word_bits - width - bit_in_word) as i128;
        let right = (word_bits - width) as i128;
        let left_c = const_node(graph, block, word_mode, left);
        let shl = graph.new_node(OpKind::Shl, word_mode, block, vec![raw, left_c], Attrs::None);
        let right_c = const_node(graph, block, word_mode, right);
        graph.new_node(OpKind::Shrs, word_mode, block, vec![shl, right_c], Attrs::None)
    } else {
        let shift_c = const_node(graph, block, word_mode, bit_in_word as i128);
        let shr = graph.new_node(OpKind::Shr, word_mode, block, vec![raw, shift_c], Attrs::None);
        let mask = (1i128 << width) - 1;
        let mask_c = const_node(graph, block, word_mode, mask);
        graph.new_node(OpKind::And, word_mode, block, vec![shr, mask_c], Attrs::None)
    };

    let value = if field_mode == word_mode {
        extracted
    } else {
        graph.new_node(OpKind::Conv, field_mode, block, vec![extracted], Attrs::None)
    };

    if let Some(old_mem_out) = find_proj(graph, load, 0) {
        graph.exchange(old_mem_out, mem_out);
    }
    graph.exchange(result_proj, value);
    true
}

/// Expands a bitfield-entity `Store` into `Load`-`And`-`Or`-`Store` with a
/// precomputed mask (spec §4.H). Same preconditions as
/// [`lower_bitfield_load`].
fn lower_bitfield_store(graph: &mut IrGraph, prog: &Program, store: NodeId) -> bool {
    let addr = graph.node(store).ins[1];
    let Attrs::Sel { entity } = graph.node(addr).attrs else {
        return false;
    };
    if !is_bitfield(prog, entity) {
        return false;
    }

    let block = graph.node(store).block.expect("Store always has a block");
    let mem = graph.node(store).ins[0];
    let base = graph.node(addr).ins[0];
    let addr_mode = graph.node(addr).mode;
    let value = graph.node(store).ins[2];
    let field_mode = graph.node(value).mode;
    let volatile = matches!(graph.node(store).attrs, Attrs::Store { volatile: true });

    let abs_bits = prog.entities.offset_bits(entity) as u64;
    let width = prog.types.size_bits(prog.entities.ty(entity));
    let word_bits: u64 = 32;
    let word_mode = mode::mode_Iu;
    let word_byte_offset = (abs_bits / word_bits * word_bits / 8) as i64;
    let bit_in_word = abs_bits % word_bits;
    let mask: i128 = ((1i128 << width) - 1) << bit_in_word;
    let all_ones: i128 = (1i128 << word_bits) - 1;

    let word_addr = add_offset(graph, block, base, word_byte_offset, addr_mode);
    let raw_load = graph.new_node(OpKind::Load, mode::mode_T, block, vec![mem, word_addr], Attrs::Load { volatile: false });
    let raw_mem = graph.new_node(OpKind::Proj, mode::mode_M, block, vec![raw_load], Attrs::Proj { index: 0, pn_cmp: None });
    let raw = graph.new_node(OpKind::Proj, word_mode, block, vec![raw_load], Attrs::Proj { index: 1, pn_cmp: None });

    let clear_mask_c = const_node(graph, block, word_mode, all_ones & !mask);
    let cleared = graph.new_node(OpKind::And, word_mode, block, vec![raw, clear_mask_c], Attrs::None);

    let value_word = if field_mode == word_mode {
        value
    } else {
        graph.new_node(OpKind::Conv, word_mode, block, vec![value], Attrs::None)
    };
    let field_mask_c = const_node(graph, block, word_mode, (1i128 << width) - 1);
    let value_masked = graph.new_node(OpKind::And, word_mode, block, vec![value_word, field_mask_c], Attrs::None);
    let shift_c = const_node(graph, block, word_mode, bit_in_word as i128);
    let shifted = graph.new_node(OpKind::Shl, word_mode, block, vec![value_masked, shift_c], Attrs::None);
    let merged = graph.new_node(OpKind::Or, word_mode, block, vec![cleared, shifted], Attrs::None);

    let word_store = graph.new_node(OpKind::Store, mode::mode_T, block, vec![raw_mem, word_addr, merged], Attrs::Store { volatile });
    let new_mem_out = graph.new_node(OpKind::Proj, mode::mode_M, block, vec![word_store], Attrs::Proj { index: 0, pn_cmp: None });

    if let Some(old_mem_out) = find_proj(graph, store, 0) {
        graph.exchange(old_mem_out, new_mem_out);
    }
    true
}

/// Runs the whole lowering pass over `graph` (spec §4.H): bitfield
/// expansion first (it still needs the `Sel` it consumes intact), then
/// generic `Sel` and `SymConst` resolution over whatever is left.
#[tracing::instrument(skip(graph, prog))]
pub fn lower_graph(graph: &mut IrGraph, prog: &Program) {
    let loads: Vec<NodeId> = (0..graph.node_count())
        .map(NodeId::from_index)
        .filter(|&n| graph.node(n).op == OpKind::Load)
        .collect();
    let mut bitfield_loads = 0u32;
    for load in loads {
        if lower_bitfield_load(graph, prog, load) {
            bitfield_loads += 1;
        }
    }

    let stores: Vec<NodeId> = (0..graph.node_count())
        .map(NodeId::from_index)
        .filter(|&n| graph.node(n).op == OpKind::Store)
        .collect();
    let mut bitfield_stores = 0u32;
    for store in stores {
        if lower_bitfield_store(graph, prog, store) {
            bitfield_stores += 1;
        }
    }

    let sels: Vec<NodeId> = (0..graph.node_count())
        .map(NodeId::from_index)
        .filter(|&n| graph.node(n).op == OpKind::Sel)
        .collect();
    for sel in sels {
        lower_sel(graph, prog, sel);
    }

    let symconsts: Vec<NodeId> = (0..graph.node_count())
        .map(NodeId::from_index)
        .filter(|&n| graph.node(n).op == OpKind::SymConst)
        .collect();
    for node in symconsts {
        lower_symconst(graph, prog, node);
    }

    tracing::debug!(bitfield_loads, bitfield_stores, "lower_graph finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (Program, IrGraph) {
        let mut prog = Program::new();
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let g = IrGraph::new(entity, prog.glob_type, 0);
        (prog, g)
    }

    #[test]
    fn struct_member_sel_becomes_base_plus_offset() {
        let (mut prog, mut g) = fresh();
        let field = prog.new_entity(prog.tls_type, "x", prog.glob_type);
        prog.entities.set_offset_bits(field, 32); // byte 4, a plain data member

        let base = g.new_SymConst_addr(field, firm_types::mode::mode_P);
        let sel = g.new_Sel(base, field, firm_types::mode::mode_P);
        let user = g.new_Load(g.initial_mem(), sel, false);

        lower_graph(&mut g, &prog);

        assert_eq!(g.uses_of(sel).len(), 0, "sel should have been exchanged away");
        let replacement = g.node(user).ins[1];
        assert_eq!(g.node(replacement).op, OpKind::Add);
        assert_eq!(g.node(replacement).ins[0], base);
        let offset_node = g.node(replacement).ins[1];
        assert_eq!(g.node(offset_node).op, OpKind::Const);
        let Attrs::Const(tv) = &g.node(offset_node).attrs else {
            panic!("expected a folded offset constant");
        };
        assert_eq!(*tv, tarval::new_tarval_from_long(4, firm_types::mode::mode_P));
    }

    #[test]
    fn array_sel_computes_base_plus_index_times_element_size() {
        let (mut prog, mut g) = fresh();
        prog.types.set_size_and_align(prog.glob_type, 32, 32); // stand-in 4-byte element type
        let arr_ty = prog.types.new_array("ints", prog.glob_type, vec![firm_tr::ArrayDim { lower_bound: 0, count: Some(10) }]);
        let field = prog.new_entity(prog.tls_type, "xs", arr_ty);
        prog.entities.set_offset_bits(field, 0);

        let base = g.new_SymConst_addr(field, firm_types::mode::mode_P);
        let idx = g.new_node(OpKind::Start, firm_types::mode::mode_Is, g.get_cur_block(), vec![], Attrs::None);
        let sel = g.new_Sel_array(base, field, vec![idx], firm_types::mode::mode_P);
        let user = g.new_Load(g.initial_mem(), sel, false);

        lower_graph(&mut g, &prog);

        assert_eq!(g.uses_of(sel).len(), 0, "array sel should have been exchanged away");
        let replacement = g.node(user).ins[1];
        assert_eq!(g.node(replacement).op, OpKind::Add, "array Sel lowers to base + offset");
        assert_eq!(g.node(replacement).ins[0], base, "entity sits at offset 0, base needs no adjustment");

        let offset = g.node(replacement).ins[1];
        assert_eq!(g.node(offset).op, OpKind::Conv, "index arithmetic happens in the index's own mode, then converts to the pointer mode");
        let mul = g.node(offset).ins[0];
        assert_eq!(g.node(mul).op, OpKind::Mul, "index * element stride, no Sub since lower_bound is 0");
        assert_eq!(g.node(mul).ins[0], idx);
        let stride = g.node(mul).ins[1];
        assert_eq!(g.node(stride).op, OpKind::Const);
        let Attrs::Const(tv) = &g.node(stride).attrs else {
            panic!("expected a folded stride constant");
        };
        assert_eq!(*tv, tarval::new_tarval_from_long(4, firm_types::mode::mode_Is));
    }

    #[test]
    fn global_entity_sel_becomes_symconst() {
        let (mut prog, mut g) = fresh();
        let global = prog.new_entity(prog.glob_type, "g", prog.glob_type);
        let base = g.new_SymConst_addr(global, firm_types::mode::mode_P);
        let sel = g.new_Sel(base, global, firm_types::mode::mode_P);
        let user = g.new_Load(g.initial_mem(), sel, false);

        lower_graph(&mut g, &prog);

        let replacement = g.node(user).ins[1];
        assert_eq!(g.node(replacement).op, OpKind::SymConst);
        assert!(matches!(
            &g.node(replacement).attrs,
            Attrs::SymConst { kind: SymConstKind::Addr, entity: Some(e), .. } if *e == global
        ));
    }

    #[test]
    fn type_size_symconst_folds_to_a_constant() {
        let (mut prog, mut g) = fresh();
        prog.types.set_size_and_align(prog.glob_type, 64, 32);
        let sc = g.new_node(
            OpKind::SymConst,
            firm_types::mode::mode_Iu,
            g.get_cur_block(),
            vec![],
            Attrs::SymConst { kind: SymConstKind::TypeSize, entity: None, ty: Some(prog.glob_type) },
        );
        let user = g.new_Load(g.initial_mem(), sc, false);

        lower_graph(&mut g, &prog);

        let replacement = g.node(user).ins[1];
        assert_eq!(g.node(replacement).op, OpKind::Const);
        let Attrs::Const(tv) = &g.node(replacement).attrs else {
            panic!("expected a folded constant");
        };
        assert_eq!(*tv, tarval::new_tarval_from_long(8, firm_types::mode::mode_Iu));
    }

    #[test]
    fn ofs_ent_symconst_folds_to_entity_byte_offset() {
        let (mut prog, mut g) = fresh();
        let field = prog.new_entity(prog.tls_type, "x", prog.glob_type);
        prog.entities.set_offset_bits(field, 24);
        let sc = g.new_node(
            OpKind::SymConst,
            firm_types::mode::mode_Iu,
            g.get_cur_block(),
            vec![],
            Attrs::SymConst { kind: SymConstKind::OfsEnt, entity: Some(field), ty: None },
        );
        let user = g.new_Load(g.initial_mem(), sc, false);

        lower_graph(&mut g, &prog);

        let replacement = g.node(user).ins[1];
        assert_eq!(g.node(replacement).op, OpKind::Const);
        let Attrs::Const(tv) = &g.node(replacement).attrs else {
            panic!("expected a folded constant");
        };
        assert_eq!(*tv, tarval::new_tarval_from_long(3, firm_types::mode::mode_Iu));
    }

    #[test]
    fn unsigned_bitfield_load_expands_to_shift_and_mask() {
        let (mut prog, mut g) = fresh();
        let field = prog.new_entity(prog.tls_type, "flag", prog.glob_type);
        prog.entities.set_offset_bits(field, 3); // bit 3, not byte-aligned
        prog.types.set_size_and_align(prog.entities.ty(field), 1, 1);

        let base = g.new_SymConst_addr(field, firm_types::mode::mode_P);
        let sel = g.new_Sel(base, field, firm_types::mode::mode_P);
        let load = g.new_Load(g.initial_mem(), sel, false);
        let result = g.new_Proj(load, 1, firm_types::mode::mode_Bu);
        let consumer = g.new_node(OpKind::Conv, firm_types::mode::mode_Iu, g.get_cur_block(), vec![result], Attrs::None);

        lower_graph(&mut g, &prog);

        assert_eq!(g.uses_of(result).len(), 0, "old result Proj should be bypassed");
        let conv = g.node(consumer).ins[0];
        assert_eq!(g.node(conv).op, OpKind::Conv, "Bu result needed a Conv back up from the Iu word");
        let masked = g.node(conv).ins[0];
        assert_eq!(g.node(masked).op, OpKind::And, "unsigned extraction masks after shifting");
        let shifted = g.node(masked).ins[0];
        assert_eq!(g.node(shifted).op, OpKind::Shr);
        let raw = g.node(shifted).ins[0];
        assert!(matches!(&g.node(raw).attrs, Attrs::Proj { index: 1, .. }));
        let word_load = g.node(raw).ins[0];
        assert_eq!(g.node(word_load).op, OpKind::Load);
        assert_eq!(g.node(word_load).ins[1], base, "the field sits in the word starting right at base");
    }

    #[test]
    fn bitfield_store_expands_to_load_and_or_store() {
        let (mut prog, mut g) = fresh();
        let field = prog.new_entity(prog.tls_type, "flag", prog.glob_type);
        prog.entities.set_offset_bits(field, 1);
        prog.types.set_size_and_align(prog.entities.ty(field), 1, 1);

        let base = g.new_SymConst_addr(field, firm_types::mode::mode_P);
        let sel = g.new_Sel(base, field, firm_types::mode::mode_P);
        let one = g.new_Const(firm_types::mode::mode_Bu.one());
        let store = g.new_Store(g.initial_mem(), sel, one, false);
        let mem_out = g.new_Proj(store, 0, firm_types::mode::mode_M);
        let next_load = g.new_Load(mem_out, base, false);

        lower_graph(&mut g, &prog);

        assert_eq!(g.uses_of(mem_out).len(), 0, "old mem-out Proj should be bypassed");
        let new_mem = g.node(next_load).ins[0];
        assert!(matches!(&g.node(new_mem).attrs, Attrs::Proj { index: 0, .. }));
        let new_store = g.node(new_mem).ins[0];
        assert_eq!(g.node(new_store).op, OpKind::Store);
        let merged = g.node(new_store).ins[2];
        assert_eq!(g.node(merged).op, OpKind::Or, "merge cleared bits with the shifted-in value");
        assert_eq!(g.node(g.node(merged).ins[0]).op, OpKind::And, "mask out the field's old bits");
        assert_eq!(g.node(g.node(merged).ins[1]).op, OpKind::Shl, "shift the new value into position");
    }
}
