//! Optimization passes operating on an [`crate::graph::IrGraph`] (spec §4.F, §4.G).

pub mod local;
pub mod ldst;
pub mod funccall;
