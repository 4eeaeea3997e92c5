//! Recoverable construction-time errors (spec §7 "Error Handling Design").
//!
//! Invariant violations the spec calls fail-fast (a malformed SSA builder
//! call, a mode mismatch the front-end should never produce) stay as
//! `panic!`/`debug_assert!` at their call site — they indicate a bug in the
//! caller, not a condition a well-formed program can hit. `IrError` is only
//! for the handful of checks whose failure is a legitimate, reportable
//! outcome: graph verification and target-specific asm constraint parsing.

use firm_tr::error::LayoutError;

use crate::node::NodeId;

/// Returned by [`crate::graph::IrGraph::verify`] and the `asm` constraint
/// parser (teacher: `fuel-vm/src/error.rs`'s `InterpreterError`, which
/// likewise separates a handful of reportable outcomes from the panics
/// everything else funnels through).
#[derive(Debug, derive_more::Display)]
pub enum IrError {
    /// A non-`Block`/`Anchor`/`Bad`/`NoMem` node has no block predecessor
    /// (spec §8 invariant 1).
    #[display(fmt = "node {_0:?} has no block")]
    MissingBlock(NodeId),
    /// A matured block's `Phi` doesn't carry one input per predecessor
    /// (spec §8 invariant 2).
    #[display(
        fmt = "phi {phi:?} has arity {found} but block {block:?} has arity {expected}"
    )]
    PhiArityMismatch {
        phi: NodeId,
        block: NodeId,
        expected: usize,
        found: usize,
    },
    /// Layout fixing failed while lowering touched a type (spec §4.C,
    /// propagated from `firm-tr`).
    #[display(fmt = "layout error: {_0}")]
    Layout(LayoutError),
    /// The target's asm constraint parser rejected a string (spec §7
    /// "Malformed asm constraints" -> `ASM_CONSTRAINT_FLAG_INVALID`).
    #[display(fmt = "invalid asm constraint {_0:?}")]
    InvalidAsmConstraint(String),
}

impl std::error::Error for IrError {}

impl From<LayoutError> for IrError {
    fn from(e: LayoutError) -> Self {
        IrError::Layout(e)
    }
}
