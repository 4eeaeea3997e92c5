//! The local optimizer: three cooperating per-opcode stages plus the
//! `optimize_node` driver and hash-consed CSE (spec §4.F).
//!
//! Each opcode is represented by a zero-sized marker type implementing
//! [`ComputedValue`], [`EquivalentNode`], and [`TransformNode`] — the
//! "tagged variants replace opcode dispatch" / "three traits per opcode
//! variant" design notes (spec §9). Opcodes with no rule at all derive the
//! empty-default trio with [`firm_derive::NoOptStage`]; [`stage_for`] is the
//! opcode-keyed lookup table the design note calls for.

use std::collections::HashMap;

use firm_asm::{OpKind, PnCmp};
use firm_tr::Program;
use firm_types::tarval;
use firm_types::{Mode, Tarval};

use crate::graph::{IrgState, IrGraph};
use crate::node::{Attrs, Node, NodeId};

pub trait ComputedValue {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, prog: &Program) -> Option<Tarval>;
}

pub trait EquivalentNode {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId>;
}

pub trait TransformNode {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId>;
}

trait OptStage: ComputedValue + EquivalentNode + TransformNode + Sync {}
impl<T: ComputedValue + EquivalentNode + TransformNode + Sync> OptStage for T {}

/// Opcodes whose three stages are all empty defaults.
#[derive(firm_derive::NoOptStage)]
struct NoOpt;

macro_rules! no_rule {
    ($ty:ident) => {
        impl ComputedValue for $ty {
            fn computed_value(&self, _node: NodeId, _graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
                None
            }
        }
        impl EquivalentNode for $ty {
            fn equivalent_node(&self, _node: NodeId, _graph: &IrGraph) -> Option<NodeId> {
                None
            }
        }
        impl TransformNode for $ty {
            fn transform_node(&self, _node: NodeId, _graph: &mut IrGraph) -> Option<NodeId> {
                None
            }
        }
    };
}

macro_rules! no_rule_equiv {
    ($ty:ident) => {
        impl EquivalentNode for $ty {
            fn equivalent_node(&self, _node: NodeId, _graph: &IrGraph) -> Option<NodeId> {
                None
            }
        }
    };
}

macro_rules! no_rule_transform {
    ($ty:ident) => {
        impl TransformNode for $ty {
            fn transform_node(&self, _node: NodeId, _graph: &mut IrGraph) -> Option<NodeId> {
                None
            }
        }
    };
}

macro_rules! no_computed_value {
    ($ty:ident) => {
        impl ComputedValue for $ty {
            fn computed_value(&self, _node: NodeId, _graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
                None
            }
        }
    };
}

fn const_of(graph: &IrGraph, id: NodeId) -> Option<Tarval> {
    match &graph.node(id).attrs {
        Attrs::Const(tv) => Some(tv.clone()),
        _ => None,
    }
}

fn is_const_with(graph: &IrGraph, id: NodeId, pred: impl Fn(&Tarval) -> bool) -> bool {
    const_of(graph, id).is_some_and(|tv| pred(&tv))
}

fn binop_ins(node: &Node) -> (NodeId, NodeId) {
    (node.ins[0], node.ins[1])
}

struct AddStage;
impl ComputedValue for AddStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let (a, b) = binop_ins(graph.node(node));
        Some(tarval::tarval_add(&const_of(graph, a)?, &const_of(graph, b)?))
    }
}
impl EquivalentNode for AddStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        // a + 0 = a (canonicalization already put any constant on the right).
        if is_const_with(graph, b, |tv| tv.is_null()) {
            return Some(a);
        }
        // (a - x) + x = a
        let an = graph.node(a);
        if an.op == OpKind::Sub && an.ins[1] == b {
            return Some(an.ins[0]);
        }
        let bn = graph.node(b);
        if bn.op == OpKind::Sub && bn.ins[1] == a {
            return Some(bn.ins[0]);
        }
        None
    }
}
impl TransformNode for AddStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        let mode = graph.node(node).mode;
        let block = graph.node(node).block.unwrap();
        // Add(a, a) => Mul(a, 2)
        if a == b {
            let two = graph.new_Const(tarval::new_tarval_from_long(2, mode));
            return Some(graph.new_node(OpKind::Mul, mode, block, vec![a, two], Attrs::None));
        }
        // Add(a, -b) => Sub(a, b)
        if graph.node(b).op == OpKind::Minus {
            let inner = graph.node(b).ins[0];
            return Some(graph.new_node(OpKind::Sub, mode, block, vec![a, inner], Attrs::None));
        }
        if graph.node(a).op == OpKind::Minus {
            let inner = graph.node(a).ins[0];
            return Some(graph.new_node(OpKind::Sub, mode, block, vec![b, inner], Attrs::None));
        }
        None
    }
}

struct SubStage;
impl ComputedValue for SubStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let (a, b) = binop_ins(graph.node(node));
        if a == b && graph.node(node).mode.is_int() {
            return Some(graph.node(node).mode.null());
        }
        Some(tarval::tarval_sub(&const_of(graph, a)?, &const_of(graph, b)?))
    }
}
impl EquivalentNode for SubStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        if is_const_with(graph, b, |tv| tv.is_null()) {
            return Some(a);
        }
        None
    }
}
impl TransformNode for SubStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        let mode = graph.node(node).mode;
        let block = graph.node(node).block.unwrap();
        // Sub(0, a) => Neg(a)
        if is_const_with(graph, a, |tv| tv.is_null()) {
            return Some(graph.new_node(OpKind::Minus, mode, block, vec![b], Attrs::None));
        }
        None
    }
}

struct MulStage;
impl ComputedValue for MulStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let (a, b) = binop_ins(graph.node(node));
        let mode = graph.node(node).mode;
        if is_const_with(graph, a, |tv| tv.is_null()) || is_const_with(graph, b, |tv| tv.is_null())
        {
            return Some(mode.null());
        }
        Some(tarval::tarval_mul(&const_of(graph, a)?, &const_of(graph, b)?))
    }
}
impl EquivalentNode for MulStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        if is_const_with(graph, b, |tv| tv == &tv.mode().one()) {
            return Some(a);
        }
        None
    }
}
impl TransformNode for MulStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        let mode = graph.node(node).mode;
        let block = graph.node(node).block.unwrap();
        if is_const_with(graph, b, |tv| tv == &tv.mode().minus_one()) {
            return Some(graph.new_node(OpKind::Minus, mode, block, vec![a], Attrs::None));
        }
        None
    }
}

struct AndStage;
impl ComputedValue for AndStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let (a, b) = binop_ins(graph.node(node));
        let mode = graph.node(node).mode;
        if is_const_with(graph, a, |tv| tv.is_null()) || is_const_with(graph, b, |tv| tv.is_null())
        {
            return Some(mode.null());
        }
        Some(tarval::tarval_and(&const_of(graph, a)?, &const_of(graph, b)?))
    }
}
impl EquivalentNode for AndStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        if a == b {
            return Some(a);
        }
        None
    }
}
no_rule_transform!(AndStage);

struct OrStage;
impl ComputedValue for OrStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let (a, b) = binop_ins(graph.node(node));
        let mode = graph.node(node).mode;
        if is_const_with(graph, a, |tv| tv.is_all_one()) || is_const_with(graph, b, |tv| tv.is_all_one())
        {
            return Some(mode.all_one());
        }
        Some(tarval::tarval_or(&const_of(graph, a)?, &const_of(graph, b)?))
    }
}
impl EquivalentNode for OrStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        if a == b {
            return Some(a);
        }
        None
    }
}
impl TransformNode for OrStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        // Or(Shl(x, c1), Shr(x, c2)) => Rot(x, c1) when c1 + c2 == width
        // (scenario 5, spec §8).
        let (a, b) = binop_ins(graph.node(node));
        let mode = graph.node(node).mode;
        let block = graph.node(node).block.unwrap();
        let width = mode.size_bits();
        let an = graph.node(a).clone();
        let bn = graph.node(b).clone();
        let rot = |x: NodeId, shift: NodeId, graph: &mut IrGraph| {
            graph.new_node(OpKind::Rot, mode, block, vec![x, shift], Attrs::None)
        };
        if an.op == OpKind::Shl && bn.op == OpKind::Shr && an.ins[0] == bn.ins[0] {
            if let (Some(c1), Some(c2)) = (const_of(graph, an.ins[1]), const_of(graph, bn.ins[1])) {
                if let (Some(c1), Some(c2)) = (tarval::get_tarval_long(&c1), tarval::get_tarval_long(&c2)) {
                    if c1 + c2 == width as i64 {
                        return Some(rot(an.ins[0], an.ins[1], graph));
                    }
                }
            }
        }
        if bn.op == OpKind::Shl && an.op == OpKind::Shr && bn.ins[0] == an.ins[0] {
            if let (Some(c1), Some(c2)) = (const_of(graph, bn.ins[1]), const_of(graph, an.ins[1])) {
                if let (Some(c1), Some(c2)) = (tarval::get_tarval_long(&c1), tarval::get_tarval_long(&c2)) {
                    if c1 + c2 == width as i64 {
                        return Some(rot(bn.ins[0], bn.ins[1], graph));
                    }
                }
            }
        }
        None
    }
}

struct EorStage;
impl ComputedValue for EorStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let (a, b) = binop_ins(graph.node(node));
        Some(tarval::tarval_eor(&const_of(graph, a)?, &const_of(graph, b)?))
    }
}
no_rule_equiv!(EorStage);
impl TransformNode for EorStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        // Eor(Proj(Cmp), true) => Proj(Cmp, negated pn_Cmp)
        let (a, b) = binop_ins(graph.node(node));
        let block = graph.node(node).block.unwrap();
        if is_const_with(graph, b, |tv| tv.as_bool() == Some(true)) {
            if let Some(neg) = negate_cmp_proj(graph, a, block) {
                return Some(neg);
            }
        }
        if is_const_with(graph, a, |tv| tv.as_bool() == Some(true)) {
            if let Some(neg) = negate_cmp_proj(graph, b, block) {
                return Some(neg);
            }
        }
        None
    }
}

fn negate_cmp_proj(graph: &mut IrGraph, proj: NodeId, block: NodeId) -> Option<NodeId> {
    let (tuple, pnc) = match &graph.node(proj).attrs {
        Attrs::Proj { pn_cmp: Some(pnc), .. } => (graph.node(proj).ins[0], *pnc),
        _ => return None,
    };
    Some(graph.new_node(
        OpKind::Proj,
        firm_types::mode::mode_b,
        block,
        vec![tuple],
        Attrs::Proj { index: 0, pn_cmp: Some(pnc.negate()) },
    ))
}

struct NotStage;
impl ComputedValue for NotStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let a = graph.node(node).ins[0];
        Some(tarval::tarval_not(&const_of(graph, a)?))
    }
}
impl EquivalentNode for NotStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let a = graph.node(node).ins[0];
        let an = graph.node(a);
        if an.op == OpKind::Not {
            return Some(an.ins[0]);
        }
        None
    }
}
impl TransformNode for NotStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let a = graph.node(node).ins[0];
        let block = graph.node(node).block.unwrap();
        negate_cmp_proj(graph, a, block)
    }
}

struct MinusStage;
impl ComputedValue for MinusStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let a = graph.node(node).ins[0];
        Some(tarval::tarval_neg(&const_of(graph, a)?))
    }
}
impl EquivalentNode for MinusStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let a = graph.node(node).ins[0];
        let an = graph.node(a);
        if an.op == OpKind::Minus {
            return Some(an.ins[0]);
        }
        None
    }
}
no_rule_transform!(MinusStage);

/// `(x >> c1) >> c2 => x >> (c1 + c2)` when the combined shift stays inside
/// the mode's width (spec §4.F "shift-by-shift reassociation"). Only
/// reassociates with an *identical* shift opcode: `Shr`/`Shrs` carry
/// different semantics (logical vs. arithmetic) and mixing them would change
/// the result.
fn reassociate_same_shift(graph: &mut IrGraph, node: NodeId, op: OpKind) -> Option<NodeId> {
    let (a, c2) = binop_ins(graph.node(node));
    let an = graph.node(a);
    if an.op != op {
        return None;
    }
    let (x, c1) = binop_ins(an);
    let v1 = const_of(graph, c1)?;
    let v2 = const_of(graph, c2)?;
    let mode = graph.node(node).mode;
    let block = graph.node(node).block.unwrap();
    let sum = tarval::tarval_add(&v1, &v2);
    let sum_long = tarval::get_tarval_long(&sum)?;
    if sum_long < 0 || sum_long as u64 >= mode.size_bits() as u64 {
        return None;
    }
    let new_c = graph.new_Const(sum);
    Some(graph.new_node(op, mode, block, vec![x, new_c], Attrs::None))
}

macro_rules! shift_stage {
    ($ty:ident, $fn:path, $op:expr) => {
        struct $ty;
        impl ComputedValue for $ty {
            fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
                let (a, b) = binop_ins(graph.node(node));
                let shift = tarval::get_tarval_long(&const_of(graph, b)?)?;
                Some($fn(&const_of(graph, a)?, shift as u32))
            }
        }
        no_rule_equiv!($ty);
        impl TransformNode for $ty {
            fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
                reassociate_same_shift(graph, node, $op)
            }
        }
    };
}

shift_stage!(ShlStage, tarval::tarval_shl, OpKind::Shl);
shift_stage!(ShrStage, tarval::tarval_shr, OpKind::Shr);
shift_stage!(ShrsStage, tarval::tarval_shrs, OpKind::Shrs);

struct ProjStage;
impl ComputedValue for ProjStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let n = graph.node(node);
        let Attrs::Proj { pn_cmp, .. } = &n.attrs else {
            return None;
        };
        let tuple = n.ins[0];
        let tn = graph.node(tuple);
        if tn.op != OpKind::Cmp {
            return None;
        }
        let pnc = (*pn_cmp)?;
        let (a, b) = binop_ins(tn);
        let (ta, tb) = (const_of(graph, a)?, const_of(graph, b)?);
        let cmp = tarval::tarval_cmp(&ta, &tb);
        let result = bound_shortcut(pnc, &ta, &tb).or_else(|| pnc.evaluate(cmp))?;
        Some(tarval::tarval_bool(result))
    }
}
no_rule_equiv!(ProjStage);
impl TransformNode for ProjStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        // x < C => x <= C - 1 (spec §4.F "strict-to-non-strict Cmp
        // canonicalization"), guarded against underflow at the mode's
        // minimum so the rewrite never changes the set of values it admits.
        let n = graph.node(node);
        let Attrs::Proj { index, pn_cmp: Some(pnc) } = n.attrs else {
            return None;
        };
        if pnc != PnCmp::LT {
            return None;
        }
        let tuple = n.ins[0];
        if graph.node(tuple).op != OpKind::Cmp {
            return None;
        }
        let (a, b) = binop_ins(graph.node(tuple));
        let c = const_of(graph, b)?;
        if !c.mode().is_int() || c == c.mode().min() {
            return None;
        }
        let dec = tarval::tarval_sub(&c, &tarval::new_tarval_from_long(1, c.mode()));
        let block = graph.node(tuple).block.unwrap();
        let new_const = graph.new_Const(dec);
        let new_cmp = graph.new_node(OpKind::Cmp, firm_types::mode::mode_T, block, vec![a, new_const], Attrs::None);
        Some(graph.new_node(
            OpKind::Proj,
            firm_types::mode::mode_b,
            block,
            vec![new_cmp],
            Attrs::Proj { index, pn_cmp: Some(PnCmp::LE) },
        ))
    }
}

/// `x >= MIN => true`, `x <= MAX => true` and their complements: folds that
/// hold regardless of `x`'s actual value (spec §4.F item 1 "MIN/MAX-bound
/// folding table").
fn bound_shortcut(pnc: PnCmp, _a: &Tarval, b: &Tarval) -> Option<bool> {
    if b.mode().is_int() {
        if pnc == PnCmp::GE && b == &b.mode().min() {
            return Some(true);
        }
        if pnc == PnCmp::LE && b == &b.mode().max() {
            return Some(true);
        }
    }
    None
}

/// The `Cmp` node itself: normalizes a constant left operand to the right,
/// mirroring every dependent `Proj`'s `pn_Cmp` so the relation it reports
/// stays correct (spec §4.F "Cmp normalization: constant operand to the
/// right").
struct CmpStage;
no_computed_value!(CmpStage);
no_rule_equiv!(CmpStage);
impl TransformNode for CmpStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let (a, b) = binop_ins(graph.node(node));
        if const_of(graph, a).is_none() || const_of(graph, b).is_some() {
            return None;
        }
        graph.set_in(node, 0, b);
        graph.set_in(node, 1, a);
        let users: Vec<NodeId> = graph.uses_of(node).iter().map(|(u, _)| *u).collect();
        for proj in users {
            if let Attrs::Proj { index, pn_cmp: Some(pnc) } = graph.node(proj).attrs {
                graph.node_mut(proj).attrs = Attrs::Proj { index, pn_cmp: Some(pnc.swap()) };
            }
        }
        None
    }
}

/// `Cast` doesn't change a value's bit pattern, only how later nodes
/// interpret it, so a constant's tarval folds straight through (spec §4.F
/// `computed_value`).
struct CastStage;
impl ComputedValue for CastStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        let a = graph.node(node).ins[0];
        const_of(graph, a)
    }
}
no_rule_equiv!(CastStage);
no_rule_transform!(CastStage);

/// `SymConst(type_size | type_align | ofs_ent)` folds to its tarval
/// immediately once the type/entity's layout is fixed (spec §4.F
/// "Const/SymConst size return their tarval immediately under
/// computed_value"). `Addr`/`EnumConst`/`Label` aren't resolvable this way
/// (the first is a link-time relocation, the other two need more than this
/// node's own attributes) and are left for [`crate::lower::lower_graph`], or
/// genuinely open per the design ledger.
struct SymConstStage;
impl ComputedValue for SymConstStage {
    fn computed_value(&self, node: NodeId, graph: &IrGraph, prog: &Program) -> Option<Tarval> {
        let Attrs::SymConst { kind, entity, ty } = graph.node(node).attrs.clone() else {
            return None;
        };
        let mode = graph.node(node).mode;
        let value: i128 = match kind {
            firm_asm::SymConstKind::TypeSize => {
                let t = ty?;
                if prog.types.layout_state(t) != firm_tr::LayoutState::Fixed {
                    return None;
                }
                (prog.types.size_bits(t) / 8) as i128
            }
            firm_asm::SymConstKind::TypeAlign => {
                let t = ty?;
                if prog.types.layout_state(t) != firm_tr::LayoutState::Fixed {
                    return None;
                }
                (prog.types.align_bits(t) / 8) as i128
            }
            firm_asm::SymConstKind::OfsEnt => {
                let e = entity?;
                let owner = prog.entities.owner(e);
                if prog.types.layout_state(owner) != firm_tr::LayoutState::Fixed {
                    return None;
                }
                (prog.entities.offset_bits(e) / 8) as i128
            }
            firm_asm::SymConstKind::Addr | firm_asm::SymConstKind::EnumConst | firm_asm::SymConstKind::Label => {
                return None;
            }
        };
        Some(tarval::new_tarval_from_long(value, mode))
    }
}
no_rule_equiv!(SymConstStage);
no_rule_transform!(SymConstStage);

/// `Mux(sel, false_val, true_val)`: a branchless select. Collapses when both
/// arms agree, when the selector is a known constant, or swaps arms under a
/// `Not` selector (spec §4.F `transform_node` "Mux-collapsing").
struct MuxStage;
no_computed_value!(MuxStage);
impl EquivalentNode for MuxStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let n = graph.node(node);
        let (sel, f, t) = (n.ins[0], n.ins[1], n.ins[2]);
        if f == t {
            return Some(f);
        }
        if let Some(b) = const_of(graph, sel).and_then(|tv| tv.as_bool()) {
            return Some(if b { t } else { f });
        }
        None
    }
}
impl TransformNode for MuxStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let n = graph.node(node);
        let (sel, f, t) = (n.ins[0], n.ins[1], n.ins[2]);
        let mode = n.mode;
        let block = n.block.unwrap();
        if graph.node(sel).op == OpKind::Not {
            let inner = graph.node(sel).ins[0];
            return Some(graph.new_node(OpKind::Mux, mode, block, vec![inner, t, f], Attrs::None));
        }
        None
    }
}

/// `Cond`'s own folding: once its selector is a known boolean constant, the
/// untaken arm's `Proj` becomes `Bad` and the taken arm's becomes a plain
/// `Jmp` (spec §4.F "Cond-with-constant-selector folding"). The rewrite
/// targets `Cond`'s `Proj` users directly via `exchange` rather than
/// returning a replacement for `Cond` itself, since `Cond` has no single
/// value to replace it with.
struct CondStage;
no_computed_value!(CondStage);
no_rule_equiv!(CondStage);
impl TransformNode for CondStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let sel = graph.node(node).ins[0];
        let b = const_of(graph, sel)?.as_bool()?;
        let taken_index = if b { 0u32 } else { 1u32 };
        let users: Vec<NodeId> = graph.uses_of(node).iter().map(|(u, _)| *u).collect();
        for proj in users {
            let Attrs::Proj { index, pn_cmp: None } = graph.node(proj).attrs else {
                continue;
            };
            let block = graph.node(proj).block.unwrap();
            if index == taken_index {
                let jmp = graph.new_node(OpKind::Jmp, firm_types::mode::mode_X, block, vec![], Attrs::None);
                graph.exchange(proj, jmp);
            } else {
                graph.exchange(proj, graph.bad());
            }
        }
        None
    }
}

/// Drops `Bad` keepalive edges out of `End`'s input list (spec §4.F
/// "End keepalive-Bad replacement"): a dead subgraph kept alive only by a
/// now-`Bad` edge no longer needs to be kept alive at all.
struct EndStage;
no_computed_value!(EndStage);
no_rule_equiv!(EndStage);
impl TransformNode for EndStage {
    fn transform_node(&self, node: NodeId, graph: &mut IrGraph) -> Option<NodeId> {
        let ins = graph.node(node).ins.clone();
        if !ins.iter().any(|&p| graph.node(p).op == OpKind::Bad) {
            return None;
        }
        let kept: Vec<NodeId> = ins.into_iter().filter(|&p| graph.node(p).op != OpKind::Bad).collect();
        graph.set_ins(node, kept);
        None
    }
}

struct PhiStage;
no_rule_transform!(PhiStage);
impl ComputedValue for PhiStage {
    fn computed_value(&self, _node: NodeId, _graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        None
    }
}
impl EquivalentNode for PhiStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let ins = &graph.node(node).ins;
        let mut same = None;
        for &op in ins {
            if op == node || Some(op) == same {
                continue;
            }
            if same.is_some() {
                return None;
            }
            same = Some(op);
        }
        same
    }
}

struct BlockStage;
no_rule_transform!(BlockStage);
impl ComputedValue for BlockStage {
    fn computed_value(&self, _node: NodeId, _graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        None
    }
}
impl EquivalentNode for BlockStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let ins = &graph.node(node).ins;
        // Block straightening: a single-Jmp predecessor whose own block
        // differs collapses this block into that one.
        if ins.len() == 1 && graph.node(ins[0]).op == OpKind::Jmp {
            let source = graph.block_of(ins[0]);
            if source != node {
                return Some(source);
            }
        }
        // Dead-block detection: every predecessor is Bad.
        if !ins.is_empty()
            && node != graph.start_block()
            && node != graph.end_block()
            && ins.iter().all(|&p| graph.node(p).op == OpKind::Bad)
        {
            return Some(graph.bad());
        }
        None
    }
}

struct ConfirmStage;
no_rule_transform!(ConfirmStage);
impl ComputedValue for ConfirmStage {
    fn computed_value(&self, _node: NodeId, _graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        None
    }
}
impl EquivalentNode for ConfirmStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        let n = graph.node(node);
        let Attrs::Confirm { pn_cmp } = n.attrs else {
            return None;
        };
        if pn_cmp != PnCmp::EQ {
            return None;
        }
        let bound = n.ins[1];
        if const_of(graph, bound).is_some() {
            return Some(bound);
        }
        None
    }
}

struct IdStage;
no_rule_transform!(IdStage);
impl ComputedValue for IdStage {
    fn computed_value(&self, _node: NodeId, _graph: &IrGraph, _prog: &Program) -> Option<Tarval> {
        None
    }
}
impl EquivalentNode for IdStage {
    fn equivalent_node(&self, node: NodeId, graph: &IrGraph) -> Option<NodeId> {
        Some(graph.node(node).ins[0])
    }
}

no_rule!(NoOpt);

/// The opcode-keyed dispatch table the "tagged variants replace opcode
/// dispatch" design note calls for (spec §9). Marker types are
/// zero-sized, so every arm just borrows a `'static` unit value.
fn stage_for(op: OpKind) -> &'static dyn OptStage {
    match op {
        OpKind::Add => &AddStage,
        OpKind::Sub => &SubStage,
        OpKind::Mul => &MulStage,
        OpKind::And => &AndStage,
        OpKind::Or => &OrStage,
        OpKind::Eor => &EorStage,
        OpKind::Not => &NotStage,
        OpKind::Minus => &MinusStage,
        OpKind::Shl => &ShlStage,
        OpKind::Shr => &ShrStage,
        OpKind::Shrs => &ShrsStage,
        OpKind::Cmp => &CmpStage,
        OpKind::Cast => &CastStage,
        OpKind::SymConst => &SymConstStage,
        OpKind::Mux => &MuxStage,
        OpKind::Cond => &CondStage,
        OpKind::End => &EndStage,
        OpKind::Proj => &ProjStage,
        OpKind::Phi => &PhiStage,
        OpKind::Block => &BlockStage,
        OpKind::Confirm => &ConfirmStage,
        OpKind::Id => &IdStage,
        _ => &NoOpt,
    }
}

/// Hash-consing table for hash-consed CSE (spec §4.F "CSE hash"), carried
/// across one `local_optimize_graph` pass. `Const` hashes on `(tarval,
/// mode)`, `SymConst` on `(kind, entity/ty, mode)` — both fall out of
/// keying on the full [`Attrs`] value along with opcode/mode/operands.
/// Volatile `Load`/`Store` never participate (spec: "Volatile loads and
/// stores never CSE").
#[derive(Default)]
pub struct CseTable {
    table: HashMap<(OpKind, Mode, Vec<NodeId>, Attrs), NodeId>,
}

impl CseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn eligible(attrs: &Attrs) -> bool {
        !matches!(
            attrs,
            Attrs::Load { volatile: true } | Attrs::Store { volatile: true }
        )
    }

    fn lookup_or_insert(&mut self, graph: &IrGraph, id: NodeId) -> NodeId {
        let n = graph.node(id);
        if !Self::eligible(&n.attrs) {
            return id;
        }
        let key = (n.op, n.mode, n.ins.clone(), n.attrs.clone());
        if let Some(&existing) = self.table.get(&key) {
            if existing != id {
                return existing;
            }
        }
        self.table.insert(key, id);
        id
    }
}

fn normalize_commutative(graph: &mut IrGraph, n: NodeId) {
    if !graph.node(n).is_commutative_binop() {
        return;
    }
    let (a, b) = binop_ins(graph.node(n));
    if const_of(graph, a).is_some() && const_of(graph, b).is_none() {
        graph.set_in(n, 0, b);
        graph.set_in(n, 1, a);
    }
}

fn gigo(graph: &IrGraph, n: NodeId) -> bool {
    let node = graph.node(n);
    if node.op.keeps_bad_inputs() {
        return false;
    }
    node.ins.iter().any(|&p| graph.node(p).op == OpKind::Bad)
}

/// `optimize_node`: the seven-step driver (spec §4.F).
pub fn optimize_node(graph: &mut IrGraph, prog: &Program, cse: &mut CseTable, n: NodeId) -> NodeId {
    let op = graph.node(n).op;

    // 1. constant folding
    if op != OpKind::Const && !op.is_mode_t() {
        if let Some(tv) = stage_for(op).computed_value(n, graph, prog) {
            let block = graph.node(n).block.unwrap_or_else(|| graph.start_block());
            let fresh = graph.new_node(OpKind::Const, tv.mode(), block, vec![], Attrs::Const(tv));
            return cse.lookup_or_insert(graph, fresh);
        }
    }

    // 2. canonicalize commutative operand order
    normalize_commutative(graph, n);

    // 3. equivalent_node
    if let Some(repl) = stage_for(op).equivalent_node(n, graph) {
        if graph.node(repl).block != graph.node(n).block {
            graph.state.remove(IrgState::PINNED);
            graph.state.insert(IrgState::FLOATS);
        }
        return cse.lookup_or_insert(graph, repl);
    }

    // 4./5. transform_node: opcode-local predecessor cleanup and rewrites
    // that don't fold to a single known value or a pre-existing node (Cmp
    // normalization, Mux/Cond collapsing, End keepalive pruning, shift
    // reassociation, and the rest of the per-stage rules above).
    let n = stage_for(op).transform_node(n, graph).unwrap_or(n);

    // 6. GIGO
    if gigo(graph, n) {
        return graph.bad();
    }

    // 7. CSE
    cse.lookup_or_insert(graph, n)
}

/// `local_optimize_graph`: repeatedly runs `optimize_node` over every node
/// reachable from the anchor until a fixed point (no further rewrite
/// changes any node), walking in reverse so a rewrite of a predecessor is
/// visible to its consumers within the same pass.
#[tracing::instrument(skip(graph, prog))]
pub fn local_optimize_graph(graph: &mut IrGraph, prog: &Program) {
    let mut cse = CseTable::new();
    let mut sweep = 0u32;
    loop {
        sweep += 1;
        let ids: Vec<NodeId> = (0..graph.node_count()).map(NodeId::from_index).collect();
        let mut changed = false;
        for id in ids.into_iter().rev() {
            if id.index() >= graph.node_count() {
                continue; // nodes created by transform_node extend the arena
            }
            let before = id;
            let after = optimize_node(graph, prog, &mut cse, id);
            if after != before {
                graph.exchange(before, after);
                tracing::trace!(?before, ?after, "optimize_node rewrote a node");
                changed = true;
            }
        }
        if !changed {
            tracing::debug!(sweep, "local_optimize_graph reached a fixed point");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use firm_tr::Program;

    fn fresh() -> (Program, IrGraph) {
        let mut prog = Program::new();
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let g = IrGraph::new(entity, prog.glob_type, 4);
        (prog, g)
    }

    #[rstest::rstest]
    #[case(OpKind::Add, 3, 4, 7)]
    #[case(OpKind::Sub, 10, 4, 6)]
    #[case(OpKind::Mul, 3, 4, 12)]
    #[case(OpKind::And, 0b1100, 0b1010, 0b1000)]
    #[case(OpKind::Or, 0b1100, 0b1010, 0b1110)]
    #[case(OpKind::Eor, 0b1100, 0b1010, 0b0110)]
    fn scenario_1_binop_const_const_folds(#[case] op: OpKind, #[case] a: i128, #[case] b: i128, #[case] expected: i64) {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let ca = g.new_Const(tarval::new_tarval_from_long(a, firm_types::mode::mode_Is));
        let cb = g.new_Const(tarval::new_tarval_from_long(b, firm_types::mode::mode_Is));
        let node = g.new_node(op, firm_types::mode::mode_Is, block, vec![ca, cb], Attrs::None);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, node);
        assert_eq!(const_of(&g, result).and_then(|tv| tarval::get_tarval_long(&tv)), Some(expected));
    }

    #[test]
    fn scenario_2_sub_x_x_is_zero() {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let x = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Is, block, vec![], Attrs::None);
        let sub = g.new_Sub(x, x, firm_types::mode::mode_Is);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, sub);
        assert_eq!(const_of(&g, result).and_then(|tv| tarval::get_tarval_long(&tv)), Some(0));
    }

    #[test]
    fn scenario_3_and_with_zero() {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let x = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Is, block, vec![], Attrs::None);
        let zero = g.new_Const(firm_types::mode::mode_Is.null());
        let and = g.new_And(x, zero, firm_types::mode::mode_Is);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, and);
        assert_eq!(const_of(&g, result).and_then(|tv| tarval::get_tarval_long(&tv)), Some(0));
    }

    #[test]
    fn scenario_4_cmp_eq_self() {
        let (p, mut g) = fresh();
        let five_a = g.new_Const(tarval::new_tarval_from_long(5, firm_types::mode::mode_Is));
        let five_b = g.new_Const(tarval::new_tarval_from_long(5, firm_types::mode::mode_Is));
        let cmp = g.new_Cmp(five_a, five_b);
        let proj = g.new_Proj_cmp(cmp, PnCmp::EQ);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, proj);
        assert_eq!(const_of(&g, result).and_then(|tv| tv.as_bool()), Some(true));
    }

    #[test]
    fn scenario_5_or_shift_fusion_to_rot() {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let x = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Iu, block, vec![], Attrs::None);
        let c5 = g.new_Const(tarval::new_tarval_from_long(5, firm_types::mode::mode_Iu));
        let c27 = g.new_Const(tarval::new_tarval_from_long(27, firm_types::mode::mode_Iu));
        let shl = g.new_node(OpKind::Shl, firm_types::mode::mode_Iu, block, vec![x, c5], Attrs::None);
        let shr = g.new_node(OpKind::Shr, firm_types::mode::mode_Iu, block, vec![x, c27], Attrs::None);
        let or = g.new_Or(shl, shr, firm_types::mode::mode_Iu);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, or);
        assert_eq!(g.node(result).op, OpKind::Rot);
        assert_eq!(g.node(result).ins[0], x);
    }

    #[test]
    fn identity_add_zero_collapses() {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let x = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Is, block, vec![], Attrs::None);
        let zero = g.new_Const(firm_types::mode::mode_Is.null());
        let add = g.new_Add(x, zero, firm_types::mode::mode_Is);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, add);
        assert_eq!(result, x);
    }

    #[test]
    fn dead_input_becomes_bad() {
        let (p, mut g) = fresh();
        let bad = g.bad();
        let block = g.get_cur_block();
        let x = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Is, block, vec![], Attrs::None);
        let add = g.new_Add(x, bad, firm_types::mode::mode_Is);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, add);
        assert_eq!(result, g.bad());
    }

    #[test]
    fn cse_dedups_identical_consts() {
        let (p, mut g) = fresh();
        let a = g.new_Const(tarval::new_tarval_from_long(9, firm_types::mode::mode_Is));
        let b = g.new_Const(tarval::new_tarval_from_long(9, firm_types::mode::mode_Is));
        let mut cse = CseTable::new();
        let ra = optimize_node(&mut g, &p, &mut cse, a);
        let rb = optimize_node(&mut g, &p, &mut cse, b);
        assert_eq!(ra, rb);
    }

    #[test]
    fn shift_by_shift_reassociates() {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let x = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Iu, block, vec![], Attrs::None);
        let c3 = g.new_Const(tarval::new_tarval_from_long(3, firm_types::mode::mode_Iu));
        let c4 = g.new_Const(tarval::new_tarval_from_long(4, firm_types::mode::mode_Iu));
        let inner = g.new_node(OpKind::Shr, firm_types::mode::mode_Iu, block, vec![x, c3], Attrs::None);
        let outer = g.new_node(OpKind::Shr, firm_types::mode::mode_Iu, block, vec![inner, c4], Attrs::None);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, outer);
        assert_eq!(g.node(result).op, OpKind::Shr);
        assert_eq!(g.node(result).ins[0], x);
        let shift = g.node(result).ins[1];
        assert_eq!(const_of(&g, shift).and_then(|tv| tarval::get_tarval_long(&tv)), Some(7));
    }

    #[test]
    fn cmp_normalization_swaps_constant_to_the_right() {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let x = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Is, block, vec![], Attrs::None);
        let five = g.new_Const(tarval::new_tarval_from_long(5, firm_types::mode::mode_Is));
        let cmp = g.new_Cmp(five, x);
        let proj = g.new_Proj_cmp(cmp, PnCmp::LT);
        let mut cse = CseTable::new();
        optimize_node(&mut g, &p, &mut cse, cmp);
        assert_eq!(g.node(cmp).ins[0], x, "constant operand should have moved to the right");
        assert_eq!(g.node(cmp).ins[1], five);
        let Attrs::Proj { pn_cmp: Some(pnc), .. } = g.node(proj).attrs else {
            panic!("expected a pn_cmp-carrying proj");
        };
        assert_eq!(pnc, PnCmp::GT, "5 < x becomes x > 5 once operands swap");
    }

    #[test]
    fn mux_with_equal_arms_collapses() {
        let (p, mut g) = fresh();
        let block = g.get_cur_block();
        let sel = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_b, block, vec![], Attrs::None);
        let v = g.new_Const(tarval::new_tarval_from_long(1, firm_types::mode::mode_Is));
        let mux = g.new_node(OpKind::Mux, firm_types::mode::mode_Is, block, vec![sel, v, v], Attrs::None);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, mux);
        assert_eq!(result, v);
    }

    #[test]
    fn mux_with_constant_selector_picks_an_arm() {
        let (p, mut g) = fresh();
        let sel = g.new_Const(firm_types::mode::mode_b.one());
        let f = g.new_Const(tarval::new_tarval_from_long(1, firm_types::mode::mode_Is));
        let t = g.new_Const(tarval::new_tarval_from_long(2, firm_types::mode::mode_Is));
        let block = g.get_cur_block();
        let mux = g.new_node(OpKind::Mux, firm_types::mode::mode_Is, block, vec![sel, f, t], Attrs::None);
        let mut cse = CseTable::new();
        let result = optimize_node(&mut g, &p, &mut cse, mux);
        assert_eq!(result, t);
    }

    #[test]
    fn end_keepalive_drops_bad_edges() {
        let (p, mut g) = fresh();
        let end = g.end();
        let bad = g.bad();
        let block = g.get_cur_block();
        let alive = g.new_node(firm_asm::OpKind::Start, firm_types::mode::mode_Is, block, vec![], Attrs::None);
        g.push_in(end, bad);
        g.push_in(end, alive);
        let mut cse = CseTable::new();
        optimize_node(&mut g, &p, &mut cse, end);
        assert_eq!(g.node(end).ins, vec![alive], "Bad keepalive edges should have been pruned");
    }
}
