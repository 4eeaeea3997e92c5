//! IR node representation (spec §3 "IR Node", §4.D).

use firm_asm::{OpKind, PnCmp, SymConstKind};
use firm_tr::{EntityId, TypeId};
use firm_types::{Mode, Tarval};

/// Index into a graph's node arena. Nodes are never individually freed
/// (spec §3 "Lifecycles"); dead-node elimination copies the reachable set
/// to a fresh graph instead (see [`crate::graph::IrGraph::copy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(i: usize) -> Self {
        NodeId(i as u32)
    }
}

/// Opcode-specific attributes. Kept as one flat enum (rather than libfirm's
/// C union) since Rust's tagged unions already cost nothing extra here —
/// this is the "tagged variants replace opcode dispatch" design note
/// (spec §9).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attrs {
    None,
    Const(Tarval),
    SymConst {
        kind: SymConstKind,
        entity: Option<EntityId>,
        ty: Option<TypeId>,
    },
    /// A `Proj`'s tuple index, plus the compare bits if this Proj sits
    /// directly off a `Cmp`.
    Proj { index: u32, pn_cmp: Option<PnCmp> },
    Sel { entity: EntityId },
    Alloc { ty: TypeId },
    Confirm { pn_cmp: PnCmp },
    Load { volatile: bool },
    Store { volatile: bool },
    Call { callee: Option<EntityId> },
    CopyB { ty: TypeId },
}

/// One node in the graph. Predecessors are split into the *block* it
/// executes in (spec invariant: "every non-Block node has a Block
/// predecessor at position -1") and its data/control operand list; keeping
/// them as separate fields instead of literally packing the block at index
/// `-1` reads far more naturally in Rust while preserving the same
/// invariant (checked by [`crate::graph::IrGraph::verify`]).
#[derive(Debug, Clone)]
pub struct Node {
    pub op: OpKind,
    pub mode: Mode,
    /// `None` only for `Block` (whose own predecessors live in `ins`, the
    /// control-flow edges into it) and for the graph's pseudo-nodes
    /// (`Anchor`, `Bad`, `Unknown`, `NoMem`) which float outside any block.
    pub block: Option<NodeId>,
    pub ins: Vec<NodeId>,
    pub attrs: Attrs,
    /// Monotonically-increasing visited stamp (spec §5 "Ordering"): a
    /// walk compares this against the graph's current `visited` counter
    /// instead of using a separate visited-set.
    pub visited: u64,
    /// Scratch slot available to whichever pass currently holds the
    /// graph's `link` resource (spec §5 "Resource reservation"); used by
    /// `create_irg_copy` to remember a node's clone.
    pub link: Option<NodeId>,
}

impl Node {
    pub fn is_block(&self) -> bool {
        self.op == OpKind::Block
    }

    pub fn is_commutative_binop(&self) -> bool {
        self.op.is_commutative() && self.ins.len() == 2
    }
}
