//! Opcode / node-kind catalogue.
//!
//! This crate carries no graph logic — it is the "instruction set" the IR
//! is built from, analogous to how `fuel-asm` only describes the FuelVM's
//! instruction encoding without executing anything. The `firm-ir` crate is
//! what walks graphs built out of [`OpKind`].

use bitflags::bitflags;
use strum::{Display, EnumCount, EnumIter};

pub mod pn_cmp;
pub use pn_cmp::PnCmp;

/// The canonical opcode tag (spec §3 "IR Node", the list of canonical
/// opcodes). Node-specific attributes (the tarval of a `Const`, the
/// `SymConstKind` of a `SymConst`, the compare bits of a `Cmp`'s `Proj`,
/// …) live in `firm_ir::node::Attrs`, not here — this enum is only the
/// discriminant used for dispatch tables and CSE hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[non_exhaustive]
pub enum OpKind {
    Start,
    End,
    Block,
    Jmp,
    Cond,
    Return,
    Const,
    SymConst,
    Phi,
    Proj,
    Tuple,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    DivMod,
    Quot,
    And,
    Or,
    Eor,
    Not,
    Shl,
    Shr,
    Shrs,
    Rot,
    Minus,
    Abs,
    Conv,
    Cast,
    Cmp,
    Mux,
    Psi,
    Load,
    Store,
    Sync,
    Sel,
    Call,
    Alloc,
    Free,
    Anchor,
    Bad,
    Unknown,
    NoMem,
    Id,
    Confirm,
    Bound,
    CopyB,
    Asm,
    /// Register-allocation hinting node (spec §4.I "the framework also
    /// kills barrier nodes"); never reaches emission.
    Barrier,
}

bitflags! {
    /// Static properties of an opcode that the optimizer and CSE hash need
    /// before looking at any particular node's attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u16 {
        /// Operand order doesn't matter; `optimize_node` canonicalizes it
        /// (constant/larger-address operand to the right) so CSE can rely
        /// on a single canonical shape (spec §3 invariants, §4.F step 2).
        const COMMUTATIVE   = 1 << 0;
        /// Result type is `mode_T`; consumed only through `Proj`.
        const MODE_T         = 1 << 1;
        /// Never subject to the dead-input GIGO rule of `optimize_node`
        /// step 6 (`Block`, `Phi`, `Tuple`, `End`).
        const KEEP_ON_BAD    = 1 << 2;
        /// Carries a `mode_M` predecessor (spec §3, "memory-carrying
        /// nodes").
        const USES_MEMORY    = 1 << 3;
        /// Node is fragile: may except, contributes a memory edge to SCC
        /// walks in the load/store optimizer (spec §4.G phase 2).
        const FRAGILE        = 1 << 4;
        /// CSE never merges two syntactically-equal instances (volatile
        /// load/store, spec §4.F "CSE hash").
        const NO_CSE         = 1 << 5;
        /// A control-flow operator: produces `mode_X` Projs.
        const CFOP           = 1 << 6;
    }
}

impl OpKind {
    pub fn flags(self) -> OpFlags {
        use OpFlags as F;
        match self {
            OpKind::Add | OpKind::Mul | OpKind::And | OpKind::Or | OpKind::Eor => {
                F::COMMUTATIVE
            }
            OpKind::Sub
            | OpKind::Div
            | OpKind::Mod
            | OpKind::Shl
            | OpKind::Shr
            | OpKind::Shrs
            | OpKind::Rot
            | OpKind::Minus
            | OpKind::Abs
            | OpKind::Not
            | OpKind::Conv
            | OpKind::Cast
            | OpKind::Cmp => F::empty(),
            OpKind::DivMod | OpKind::Call | OpKind::Alloc | OpKind::CopyB | OpKind::Asm => {
                F::MODE_T | F::USES_MEMORY | F::FRAGILE
            }
            OpKind::Div | OpKind::Mod | OpKind::Quot => F::MODE_T | F::USES_MEMORY | F::FRAGILE,
            OpKind::Load | OpKind::Store => F::MODE_T | F::USES_MEMORY | F::FRAGILE,
            OpKind::Free => F::USES_MEMORY,
            OpKind::Sync => F::USES_MEMORY,
            OpKind::Start | OpKind::Cond | OpKind::Return => F::MODE_T | F::CFOP,
            OpKind::Block | OpKind::Phi | OpKind::Tuple | OpKind::End => F::KEEP_ON_BAD,
            OpKind::Jmp => F::CFOP,
            _ => F::empty(),
        }
    }

    pub fn is_commutative(self) -> bool {
        self.flags().contains(OpFlags::COMMUTATIVE)
    }

    pub fn is_mode_t(self) -> bool {
        self.flags().contains(OpFlags::MODE_T)
    }

    pub fn keeps_bad_inputs(self) -> bool {
        self.flags().contains(OpFlags::KEEP_ON_BAD)
    }

    pub fn uses_memory(self) -> bool {
        self.flags().contains(OpFlags::USES_MEMORY)
    }

    pub fn is_fragile(self) -> bool {
        self.flags().contains(OpFlags::FRAGILE)
    }
}

/// What a `SymConst` denotes (spec §3 "Type", §4.H "Lowering").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymConstKind {
    /// Address of a global entity.
    Addr,
    /// `sizeof` of a type, in bytes.
    TypeSize,
    /// `alignof` of a type, in bytes.
    TypeAlign,
    /// Byte offset of an entity within its owner.
    OfsEnt,
    /// The integer value of an enumeration constant.
    EnumConst,
    /// A code label (used by `ASM`).
    Label,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(OpKind::Add, true)]
    #[case(OpKind::Mul, true)]
    #[case(OpKind::And, true)]
    #[case(OpKind::Or, true)]
    #[case(OpKind::Eor, true)]
    #[case(OpKind::Sub, false)]
    #[case(OpKind::Div, false)]
    #[case(OpKind::Cmp, false)]
    fn commutative_ops_match_known_examples(#[case] op: OpKind, #[case] commutative: bool) {
        assert_eq!(op.is_commutative(), commutative, "{op:?}");
    }

    #[test]
    fn mode_t_ops_cover_tuple_producers() {
        assert!(OpKind::Call.is_mode_t());
        assert!(OpKind::Load.is_mode_t());
        assert!(OpKind::Cond.is_mode_t());
    }

    #[test]
    fn block_phi_tuple_end_keep_bad_inputs() {
        for k in [OpKind::Block, OpKind::Phi, OpKind::Tuple, OpKind::End] {
            assert!(k.keeps_bad_inputs(), "{k:?} should survive Bad inputs");
        }
        assert!(!OpKind::Add.keeps_bad_inputs());
    }
}
