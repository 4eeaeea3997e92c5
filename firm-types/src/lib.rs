//! Mode registry and tarval arithmetic engine.
//!
//! This crate is the leaf of the workspace: [`mode`] defines the
//! process-global, immutable-after-init set of machine/semantic modes, and
//! [`tarval`] is the interned-constant arithmetic engine (integer
//! two's-complement and IEEE-754 float) every constant-folding pass in
//! `firm-ir` funnels through.

pub mod mode;
pub mod tarval;

pub use mode::Mode;
pub use tarval::Tarval;

/// Tears down the tarval intern table. Part of the process-wide `finish()`
/// sequence (spec §6); modes themselves are never freed since they are
/// immutable registry entries good for the process lifetime.
pub fn finish() {
    tarval::finish_tarval();
}
