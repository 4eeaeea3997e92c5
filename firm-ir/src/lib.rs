//! Graph-based SSA intermediate representation: constructive builder,
//! local and load/store optimizers, lowering, and a backend peephole
//! framework.
//!
//! Layered bottom-up, mirroring the workspace split of `firm-types`
//! (modes, tarvals) -> `firm-tr` (types, entities) -> here (graph, passes):
//!
//! - [`node`] / [`graph`]: the node arena and its always-on def-use edges.
//! - [`builder`]: the constructive SSA front-end (`new_ir_graph`,
//!   `set_value`/`get_value`, `mature_immBlock`).
//! - [`opt`]: `local_optimize_graph`, `optimize_load_store`,
//!   `propagate_call_purity`.
//! - [`lower`]: `Sel`/`SymConst` resolution and bitfield expansion.
//! - [`be`]: the peephole framework and SPARC legalization.
//! - [`init`]: process lifecycle (`init`/`finish`, `new_ir_graph`).
//! - [`error`]: recoverable construction-time errors.

pub mod be;
pub mod builder;
pub mod error;
pub mod graph;
pub mod init;
pub mod lower;
pub mod node;
pub mod opt;

#[cfg(test)]
mod tests;

pub use error::IrError;
pub use graph::{BlockState, IrGraph, IrgState, ReservedResources};
pub use init::{init, new_ir_graph, finish, InitParams};
pub use node::{Attrs, Node, NodeId};
