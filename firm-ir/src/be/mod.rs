//! Backend-facing modules: the peephole framework (spec §4.I) and legalization,
//! illustrated on SPARC (spec §4.J).

pub mod peephole;
pub mod sparc;
