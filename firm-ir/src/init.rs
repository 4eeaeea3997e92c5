//! Process lifecycle (spec §6): `init`/`finish`, sequencing modes → tarvals
//! → types → program object, mirroring `original_source/ir/common/firm.c`'s
//! `ir_init`/`ir_finish` ordering. There is no global mutable `irp` here —
//! `init` hands the constructed [`Program`] back to the caller instead of
//! stashing it behind a static, so ownership (and teardown order) stays
//! explicit the way the rest of this crate avoids hidden mutable globals.

use std::rc::Rc;

use firm_tr::{EntityId, Program, TypeId};
use firm_types::Mode;

use crate::graph::IrGraph;
use crate::node::NodeId;

/// Shareable form of [`crate::graph::InitLocalFn`]: the default every graph
/// `new_ir_graph` creates picks up unless it installs its own hook.
pub type LocalInitFn = Rc<dyn Fn(usize, Mode) -> NodeId>;

/// Options accepted by [`init`] (spec §6 "Initialization").
#[derive(Clone, Default)]
pub struct InitParams {
    /// Version field for forward-compatible option growth; not otherwise
    /// interpreted.
    pub size: u32,
    /// Gates the statistics hook registry. No statistics hooks are
    /// implemented (out of scope per spec §1); kept so callers porting
    /// `firm_init` option structs still compile.
    pub enable_statistics: bool,
    /// Default `initialize_local_func`, applied by [`new_ir_graph`] to
    /// every graph that doesn't set its own `init_local`.
    pub initialize_local_func: Option<LocalInitFn>,
}

/// Builds the mode registry, tarval engine, and type module in that order
/// (backend setup, §4.J, is the caller's responsibility and must happen
/// before the first [`new_ir_graph`] call, same ordering constraint as
/// `ir_init`), then returns the one empty program object (`glob_type`,
/// `tls_type` already registered).
pub fn init(_params: &InitParams) -> Program {
    // Force the mode registry's lazy `OnceLock` before anything that might
    // intern a tarval against it.
    let _ = firm_types::mode::mode_Is.size_bits();
    let _ = firm_types::tarval::tarval_bad();
    tracing::debug!("modes and tarval engine ready, constructing program object");
    Program::new()
}

/// `new_ir_graph` (§6 front-end API surface), threading the process-wide
/// `initialize_local_func` default through to the new graph.
pub fn new_ir_graph(
    params: &InitParams,
    entity: EntityId,
    frame_type: TypeId,
    n_local_slots: usize,
) -> IrGraph {
    let mut g = IrGraph::new(entity, frame_type, n_local_slots);
    if let Some(default) = &params.initialize_local_func {
        let default = Rc::clone(default);
        g.init_local = Some(Box::new(move |pos, mode| default(pos, mode)));
    }
    g
}

/// Tears down graphs in reverse creation order, then the program's entities
/// and types (dropped with it), then the tarval intern table, matching
/// `ir_finish`'s ordering. Modes and the ident pool are process-lifetime
/// registries and are never freed (spec §3 "Lifecycles").
pub fn finish(program: Program, graphs: Vec<IrGraph>) {
    tracing::debug!(graph_count = graphs.len(), "tearing down graphs in reverse order");
    for g in graphs.into_iter().rev() {
        drop(g);
    }
    drop(program);
    firm_types::finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_registers_glob_and_tls_types() {
        let params = InitParams::default();
        let prog = init(&params);
        assert_eq!(prog.types.name(prog.glob_type), "$glob");
        assert_eq!(prog.types.name(prog.tls_type), "$tls");
    }

    #[test]
    fn new_ir_graph_applies_default_local_init() {
        let mut params = InitParams::default();
        let calls = Rc::new(std::cell::RefCell::new(Vec::new()));
        let calls_clone = Rc::clone(&calls);
        params.initialize_local_func = Some(Rc::new(move |pos, mode| {
            calls_clone.borrow_mut().push((pos, mode));
            NodeId::from_index(0)
        }));

        let mut prog = init(&params);
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let mut g = new_ir_graph(&params, entity, prog.glob_type, 1);
        let start = g.start_block();
        g.set_cur_block(start);
        let v = g.get_value(0, firm_types::mode::mode_Is);

        assert_eq!(v, NodeId::from_index(0));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn finish_tears_down_without_panicking() {
        let params = InitParams::default();
        let mut prog = init(&params);
        let entity = prog.new_entity(prog.glob_type, "f", prog.glob_type);
        let g = new_ir_graph(&params, entity, prog.glob_type, 0);
        finish(prog, vec![g]);
    }
}
