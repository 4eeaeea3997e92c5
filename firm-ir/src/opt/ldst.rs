//! Alias-aware load/store optimization (spec §4.G).
//!
//! Walks each memory chain (the thread of `mem_in`/`mem_out` edges through
//! `Load`/`Store`/`Sync`/`Phi(mode_M)` nodes) once per graph and applies:
//! redundant-load elimination (RAR), store-to-load forwarding (RAW),
//! dead-store elimination (WAW), store-before-load reordering safety (WAR),
//! and loop-invariant load motion out of a strongly-connected region via
//! Tarjan's algorithm.

use std::collections::{HashMap, HashSet};

use firm_asm::OpKind;
use firm_tr::EntityId;
use itertools::Itertools;

use crate::graph::IrGraph;
use crate::node::{Attrs, NodeId};

/// What an alias oracle can say about two addresses (spec §4.G "alias
/// relation"). A real backend plugs in points-to or type-based alias
/// analysis here; [`ConservativeAliasOracle`] is the fallback this crate
/// ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasRelation {
    /// The two accesses provably touch disjoint memory.
    NoAlias,
    /// The two accesses provably touch the same address.
    MustAlias,
    /// Unknown; assume they may overlap.
    MayAlias,
}

pub trait AliasOracle {
    fn get_alias_relation(&self, graph: &IrGraph, addr_a: NodeId, addr_b: NodeId) -> AliasRelation;
}

/// The oracle used when nothing more precise is wired in: same `Sel`
/// entity or identical address node is a `MustAlias`, anything else is a
/// conservative `MayAlias` (spec §4.G "conservative fallback").
pub struct ConservativeAliasOracle;

impl AliasOracle for ConservativeAliasOracle {
    fn get_alias_relation(&self, graph: &IrGraph, addr_a: NodeId, addr_b: NodeId) -> AliasRelation {
        if addr_a == addr_b {
            return AliasRelation::MustAlias;
        }
        let entity_of = |id: NodeId| match &graph.node(id).attrs {
            Attrs::Sel { entity } => Some(*entity),
            _ => None,
        };
        match (entity_of(addr_a), entity_of(addr_b)) {
            (Some(ea), Some(eb)) if ea == eb => AliasRelation::MustAlias,
            (Some(ea), Some(eb)) if ea != eb => AliasRelation::NoAlias,
            _ => AliasRelation::MayAlias,
        }
    }
}

fn mem_in(graph: &IrGraph, mem_node: NodeId) -> NodeId {
    graph.node(mem_node).ins[0]
}

/// `Load`/`Store` both return a `mode_T` tuple whose `Proj 0` is the
/// outgoing memory; find it among this node's recorded uses.
fn mem_out_proj(graph: &IrGraph, mem_node: NodeId) -> Option<NodeId> {
    graph
        .uses_of(mem_node)
        .iter()
        .map(|(user, _)| *user)
        .find(|&u| matches!(&graph.node(u).attrs, Attrs::Proj { index: 0, .. }))
}

fn result_proj(graph: &IrGraph, load: NodeId) -> Option<NodeId> {
    graph
        .uses_of(load)
        .iter()
        .map(|(user, _)| *user)
        .find(|&u| matches!(&graph.node(u).attrs, Attrs::Proj { index: 1, .. }))
}

/// Replaces every use of a redundant `Load`'s result with `value`, and
/// splices its memory tuple out of the chain (`Id`-node elision via
/// `exchange`, spec §4.G "redundant load elimination").
fn eliminate_load(graph: &mut IrGraph, load: NodeId, value: NodeId) {
    let mem_before = mem_in(graph, load);
    if let Some(res) = result_proj(graph, load) {
        graph.exchange(res, value);
    }
    if let Some(mem_after) = mem_out_proj(graph, load) {
        graph.exchange(mem_after, mem_before);
    }
}

fn eliminate_store(graph: &mut IrGraph, store: NodeId) {
    let mem_before = mem_in(graph, store);
    if let Some(mem_after) = mem_out_proj(graph, store) {
        graph.exchange(mem_after, mem_before);
    }
}

#[derive(Clone)]
struct KnownStore {
    addr: NodeId,
    value: NodeId,
    store: NodeId,
}

/// Per-branch knowledge carried along one arm of the worklist (spec §4.G
/// "a later access can be resolved against it"). Cloned at every fork so
/// sibling branches of a `Cond` or memory `Phi` don't see each other's
/// stores.
#[derive(Clone, Default)]
struct ChainState {
    known: Vec<KnownStore>,
    known_load: Vec<(NodeId, NodeId)>, // (addr, result)
}

/// One pass over every memory chain reachable from `start` (walking
/// `mem_in` edges backward is awkward across `Phi`/`Sync` joins, so instead
/// this walks forward along recorded `Proj 0` uses).
///
/// A node can have more than one memory successor — a `Store`'s mem-out may
/// feed both sides of a diverging chain, and a memory `Phi` is itself
/// visited from each of its predecessors independently — so the walk keeps
/// an explicit worklist of `(node, state)` pairs rather than a single
/// cursor, cloning `state` at every fork.
pub fn optimize_load_store_chain(graph: &mut IrGraph, oracle: &dyn AliasOracle, start: NodeId) {
    let mut worklist: Vec<(NodeId, ChainState)> = vec![(start, ChainState::default())];
    let mut visited: HashSet<NodeId> = HashSet::new();

    while let Some((mut cur, mut state)) = worklist.pop() {
        loop {
            if !visited.insert(cur) {
                break;
            }
            // Both `eliminate_load` branches below splice `cur` itself out
            // of the chain, which leaves its mem-out `Proj` orphaned: it's
            // still present as a node, pointing at `cur`, but the
            // `exchange` inside `eliminate_load` has already rerouted
            // everyone who used to consume it. So the *next* hop (advancing
            // off that orphaned `Proj`) would find no successor and the
            // walk would stop early, even though the chain continues beyond
            // it. Each elimination branch computes where the walk would
            // resume, past both `cur` and its soon-to-be-orphaned `Proj`,
            // while that information still exists.
            let mut resume: Option<Vec<NodeId>> = None;
            match graph.node(cur).op {
                OpKind::Load => {
                    let Attrs::Load { volatile } = graph.node(cur).attrs else { unreachable!() };
                    let addr = graph.node(cur).ins[1];
                    if !volatile {
                        // RAW: a prior store to a must-aliasing address
                        // forwards its value directly, skipping the load.
                        if let Some(ks) = state
                            .known
                            .iter()
                            .rev()
                            .find(|ks| oracle.get_alias_relation(graph, ks.addr, addr) == AliasRelation::MustAlias)
                        {
                            let value = ks.value;
                            let targets = resume_targets(graph, cur);
                            eliminate_load(graph, cur, value);
                            resume = Some(targets);
                        } else if let Some(&(_, prior_result)) = state
                            .known_load
                            .iter()
                            .rev()
                            .find(|(a, _)| oracle.get_alias_relation(graph, *a, addr) == AliasRelation::MustAlias)
                        {
                            // RAR: an earlier load from the same address, no
                            // intervening store could have clobbered it.
                            let targets = resume_targets(graph, cur);
                            eliminate_load(graph, cur, prior_result);
                            resume = Some(targets);
                        } else if let Some(result) = result_proj(graph, cur) {
                            state.known_load.push((addr, result));
                        }
                    }
                    // A volatile load, or one that survived, still
                    // invalidates nothing: loads don't write memory.
                }
                OpKind::Store => {
                    let Attrs::Store { volatile } = graph.node(cur).attrs else { unreachable!() };
                    let addr = graph.node(cur).ins[1];
                    let value = graph.node(cur).ins[2];
                    if !volatile {
                        // WAW: an immediately-preceding store to the same
                        // address (with no intervening read that escaped,
                        // which the RAR/RAW lookups above already accounted
                        // for) is dead.
                        if let Some(pos) = state
                            .known
                            .iter()
                            .rposition(|ks| oracle.get_alias_relation(graph, ks.addr, addr) == AliasRelation::MustAlias)
                        {
                            if !state
                                .known_load
                                .iter()
                                .any(|(a, _)| oracle.get_alias_relation(graph, *a, addr) != AliasRelation::NoAlias)
                            {
                                let dead = state.known[pos].store;
                                eliminate_store(graph, dead);
                            }
                        }
                        // Any load whose address may alias this store's
                        // address is no longer trustworthy.
                        state.known_load.retain(|(a, _)| oracle.get_alias_relation(graph, *a, addr) == AliasRelation::NoAlias);
                        state.known.push(KnownStore { addr, value, store: cur });
                    } else {
                        state.known.clear();
                        state.known_load.clear();
                    }
                }
                OpKind::Sync => {
                    // A memory merge point: conservatively forget everything
                    // we've tracked rather than reason about set intersection.
                    state.known.clear();
                    state.known_load.clear();
                }
                OpKind::Phi if graph.node(cur).mode == firm_types::mode::mode_M => {
                    // A memory phi joins chains from distinct predecessors;
                    // nothing known on either arm can be trusted past it.
                    // (A phi whose inputs are all the same store is instead
                    // a job for `hoist_memory_phi_stores`, not this walk.)
                    state.known.clear();
                    state.known_load.clear();
                }
                _ => {}
            }

            let nexts = resume.unwrap_or_else(|| match mem_out_proj(graph, cur) {
                Some(proj) => vec![proj],
                None => memory_successors(graph, cur),
            });

            match nexts.split_first() {
                None => break,
                Some((&first, rest)) => {
                    for &n in rest {
                        worklist.push((n, state.clone()));
                    }
                    cur = first;
                }
            }
        }
    }
}

/// Where the walk continues once `node` (a `Load` or `Store` about to be
/// eliminated) is spliced out: its recorded mem-out successors if it has
/// one (it's about to), otherwise whatever directly consumes `node` itself.
fn resume_targets(graph: &IrGraph, node: NodeId) -> Vec<NodeId> {
    match mem_out_proj(graph, node) {
        Some(proj) => memory_successors(graph, proj),
        None => memory_successors(graph, node),
    }
}

/// Every node downstream of a memory value that itself carries the chain
/// forward: the other memory-consuming ops, or a memory `Phi` at a join
/// (spec §4.G "walks each predecessor's incoming memory").
fn memory_successors(graph: &IrGraph, mem_node: NodeId) -> Vec<NodeId> {
    graph
        .uses_of(mem_node)
        .iter()
        .map(|(user, _)| *user)
        .filter(|&u| {
            matches!(graph.node(u).op, OpKind::Load | OpKind::Store | OpKind::Sync | OpKind::Return | OpKind::End)
                || (graph.node(u).op == OpKind::Phi && graph.node(u).mode == firm_types::mode::mode_M)
        })
        .unique()
        .collect()
}

/// Runs [`optimize_load_store_chain`] starting from the graph's
/// `initial_mem`, the one entry point every memory chain in a
/// single-function graph originates from, then hoists any memory phi whose
/// inputs all store the same value identity.
#[tracing::instrument(skip(graph, oracle))]
pub fn optimize_load_store(graph: &mut IrGraph, oracle: &dyn AliasOracle) {
    let initial = graph.initial_mem();
    optimize_load_store_chain(graph, oracle, initial);
    hoist_memory_phi_stores(graph, oracle);
    tracing::debug!("optimize_load_store chain walk complete");
}

/// Rewrites a memory `Phi` whose every input is the mem-out `Proj` of a
/// non-volatile `Store` to the same (by alias oracle) address and mode into
/// a single `Store` fed by a value `Phi` over what each arm stored (spec
/// §4.G "rewrite a memory phi whose every input is a Store-Proj of the same
/// address/mode into a single post-dominated Store"). The new `Store` lands
/// in the phi's own (join) block, which post-dominates every arm that used
/// to store individually.
pub fn hoist_memory_phi_stores(graph: &mut IrGraph, oracle: &dyn AliasOracle) {
    let candidates: Vec<NodeId> = (0..graph.node_count())
        .map(NodeId::from_index)
        .filter(|&n| graph.node(n).op == OpKind::Phi && graph.node(n).mode == firm_types::mode::mode_M)
        .collect();

    for phi in candidates {
        let Some(uniform) = uniform_store_inputs(graph, oracle, phi) else { continue };
        let UniformStores { addr, store_mode, stores } = uniform;
        let block = graph.node(phi).block.expect("Phi always has a block");

        let mem_ins: Vec<NodeId> = stores.iter().map(|&s| mem_in(graph, s)).collect();
        let value_ins: Vec<NodeId> = stores.iter().map(|&s| graph.node(s).ins[2]).collect();
        let value_mode = graph.node(value_ins[0]).mode;

        let mem_phi = graph.new_node(OpKind::Phi, firm_types::mode::mode_M, block, mem_ins, Attrs::None);
        let value_phi = graph.new_node(OpKind::Phi, value_mode, block, value_ins, Attrs::None);
        let store = graph.new_node(OpKind::Store, store_mode, block, vec![mem_phi, addr, value_phi], Attrs::Store { volatile: false });
        let store_mem = graph.new_node(OpKind::Proj, firm_types::mode::mode_M, block, vec![store], Attrs::Proj { index: 0, pn_cmp: None });

        graph.exchange(phi, store_mem);
        for &s in &stores {
            eliminate_store(graph, s);
        }
    }
}

struct UniformStores {
    addr: NodeId,
    store_mode: firm_types::Mode,
    stores: Vec<NodeId>,
}

/// Checks that every input of a memory `Phi` is a distinct non-volatile
/// `Store`'s mem-out `Proj`, all writing to the same address identity.
fn uniform_store_inputs(graph: &IrGraph, oracle: &dyn AliasOracle, phi: NodeId) -> Option<UniformStores> {
    let ins = graph.node(phi).ins.clone();
    if ins.len() < 2 {
        return None;
    }
    let mut stores = Vec::with_capacity(ins.len());
    let mut addr = None;
    for &input in &ins {
        if !matches!(&graph.node(input).attrs, Attrs::Proj { index: 0, .. }) {
            return None;
        }
        let store = graph.node(input).ins[0];
        if !matches!(graph.node(store).attrs, Attrs::Store { volatile: false }) {
            return None;
        }
        let store_addr = graph.node(store).ins[1];
        match addr {
            None => addr = Some(store_addr),
            Some(a) if oracle.get_alias_relation(graph, a, store_addr) == AliasRelation::MustAlias => {}
            Some(_) => return None,
        }
        stores.push(store);
    }
    let store_mode = graph.node(stores[0]).mode;
    if stores.iter().any(|&s| graph.node(s).mode != store_mode) {
        return None;
    }
    Some(UniformStores { addr: addr.unwrap(), store_mode, stores })
}

// --- loop-invariant load motion (spec §4.G phase 2: SCC-based hoisting) ---

/// Tarjan's SCC algorithm over the control-flow graph induced by `Block`
/// predecessors, used to find loop bodies (spec §4.G "loop-invariant load
/// motion"): any SCC with more than one block, or a single self-looping
/// block, is a loop.
struct Tarjan<'g> {
    graph: &'g IrGraph,
    index_counter: usize,
    index: HashMap<NodeId, usize>,
    lowlink: HashMap<NodeId, usize>,
    on_stack: HashSet<NodeId>,
    stack: Vec<NodeId>,
    sccs: Vec<Vec<NodeId>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g IrGraph) -> Self {
        Tarjan {
            graph,
            index_counter: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            on_stack: HashSet::new(),
            stack: Vec::new(),
            sccs: Vec::new(),
        }
    }

    /// A block's CF successors are found by walking *out* from its
    /// terminator (`Jmp`, or `Cond`'s `Proj`s) to whichever downstream
    /// `Block` records that terminator as a predecessor in its `ins` —
    /// `Jmp`/`Cond` don't appear in `ins`, only in the owning block's
    /// `block` field, so this can't be read off `uses_of(block)` directly.
    fn successors(&self, block: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for n in nodes_in_block(self.graph, block) {
            match self.graph.node(n).op {
                OpKind::Jmp => {
                    for &(user, _) in self.graph.uses_of(n) {
                        if self.graph.node(user).op == OpKind::Block {
                            out.push(user);
                        }
                    }
                }
                OpKind::Cond => {
                    for &(proj, _) in self.graph.uses_of(n) {
                        if self.graph.node(proj).op != OpKind::Proj {
                            continue;
                        }
                        for &(user, _) in self.graph.uses_of(proj) {
                            if self.graph.node(user).op == OpKind::Block {
                                out.push(user);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        // A block with two `Cond` arms landing on the same successor (an
        // empty-bodied if) would otherwise visit it twice.
        out.into_iter().unique().collect()
    }

    fn strongconnect(&mut self, v: NodeId) {
        self.index.insert(v, self.index_counter);
        self.lowlink.insert(v, self.index_counter);
        self.index_counter += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        for w in self.successors(v) {
            if !self.index.contains_key(&w) {
                self.strongconnect(w);
                let wl = self.lowlink[&w];
                let vl = self.lowlink[&v];
                self.lowlink.insert(v, vl.min(wl));
            } else if self.on_stack.contains(&w) {
                let wi = self.index[&w];
                let vl = self.lowlink[&v];
                self.lowlink.insert(v, vl.min(wi));
            }
        }

        if self.lowlink[&v] == self.index[&v] {
            let mut component = Vec::new();
            loop {
                let w = self.stack.pop().unwrap();
                self.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            self.sccs.push(component);
        }
    }

    fn run(mut self, entry: NodeId) -> Vec<Vec<NodeId>> {
        if !self.index.contains_key(&entry) {
            self.strongconnect(entry);
        }
        self.sccs
    }
}

/// A loop body: every block in a non-trivial SCC, or a single block with a
/// self-edge.
fn find_loop_bodies(graph: &IrGraph) -> Vec<Vec<NodeId>> {
    let tarjan = Tarjan::new(graph);
    let sccs = tarjan.run(graph.start_block());
    sccs.into_iter()
        .filter(|scc| {
            scc.len() > 1
                || (scc.len() == 1 && {
                    let b = scc[0];
                    graph.preds_of_block(b).iter().any(|&p| graph.block_of(p) == b)
                })
        })
        .collect()
}

/// Hoists a non-volatile `Load` out of every loop body it's invariant in:
/// its address doesn't depend on any value defined inside the loop, and no
/// store inside the loop may alias it. The hoisted load is deduplicated per
/// loop-entry block via `entry_cache` so repeated invariant loads of the
/// same address only get one hoisted copy.
pub fn hoist_loop_invariant_loads(graph: &mut IrGraph, oracle: &dyn AliasOracle) {
    let loops = find_loop_bodies(graph);
    for body in loops {
        let body_set: HashSet<NodeId> = body.iter().copied().collect();
        let mut entry_cache: HashMap<NodeId, NodeId> = HashMap::new();
        let preheader = match find_preheader(graph, &body_set) {
            Some(p) => p,
            None => continue,
        };

        let candidate_loads: Vec<NodeId> = body
            .iter()
            .flat_map(|&b| nodes_in_block(graph, b))
            .filter(|&n| {
                matches!(graph.node(n).attrs, Attrs::Load { volatile: false })
                    && is_loop_invariant_addr(graph, &body_set, graph.node(n).ins[1])
                    && !aliased_by_any_store_in_loop(graph, oracle, &body_set, graph.node(n).ins[1])
            })
            .collect();

        for load in candidate_loads {
            let addr = graph.node(load).ins[1];
            if let Some(&hoisted) = entry_cache.get(&addr) {
                if let Some(res) = result_proj(graph, load) {
                    graph.exchange(res, hoisted);
                }
                eliminate_load_keep_mem(graph, load);
                continue;
            }
            let mem = mem_in(graph, load);
            let new_load = graph.new_node(OpKind::Load, firm_types::mode::mode_T, preheader, vec![mem, addr], Attrs::Load { volatile: false });
            let mode = result_proj(graph, load).map(|r| graph.node(r).mode).unwrap_or(firm_types::mode::mode_Is);
            let new_res = graph.new_node(OpKind::Proj, mode, preheader, vec![new_load], Attrs::Proj { index: 1, pn_cmp: None });
            if let Some(res) = result_proj(graph, load) {
                graph.exchange(res, new_res);
            }
            eliminate_load_keep_mem(graph, load);
            entry_cache.insert(addr, new_res);
        }
    }
}

fn eliminate_load_keep_mem(graph: &mut IrGraph, load: NodeId) {
    let mem_before = mem_in(graph, load);
    if let Some(mem_after) = mem_out_proj(graph, load) {
        graph.exchange(mem_after, mem_before);
    }
}

fn nodes_in_block(graph: &IrGraph, block: NodeId) -> Vec<NodeId> {
    (0..graph.node_count())
        .map(NodeId::from_index)
        .filter(|&n| graph.node(n).block == Some(block))
        .collect()
}

/// A node is loop-invariant if it (transitively) depends only on values
/// defined outside `body`.
fn is_loop_invariant_addr(graph: &IrGraph, body: &HashSet<NodeId>, addr: NodeId) -> bool {
    fn walk(graph: &IrGraph, body: &HashSet<NodeId>, n: NodeId, seen: &mut HashSet<NodeId>) -> bool {
        if !seen.insert(n) {
            return true;
        }
        if let Some(block) = graph.node(n).block {
            if body.contains(&block) && graph.node(n).op == OpKind::Phi {
                return false;
            }
            if body.contains(&block) {
                return graph.node(n).ins.iter().all(|&p| walk(graph, body, p, seen));
            }
        }
        true
    }
    walk(graph, body, addr, &mut HashSet::new())
}

fn aliased_by_any_store_in_loop(graph: &IrGraph, oracle: &dyn AliasOracle, body: &HashSet<NodeId>, addr: NodeId) -> bool {
    body.iter().flat_map(|&b| nodes_in_block(graph, b)).any(|n| {
        matches!(graph.node(n).attrs, Attrs::Store { .. })
            && oracle.get_alias_relation(graph, graph.node(n).ins[1], addr) != AliasRelation::NoAlias
    })
}

/// The unique block outside `body` that dominates entry into it — here
/// approximated as the sole non-member predecessor block of whichever
/// member block has a predecessor outside the loop (spec §4.G "preheader").
fn find_preheader(graph: &IrGraph, body: &HashSet<NodeId>) -> Option<NodeId> {
    for &b in body {
        for &cf in graph.preds_of_block(b) {
            let pred_block = graph.block_of(cf);
            if !body.contains(&pred_block) {
                return Some(pred_block);
            }
        }
    }
    None
}

/// `additional_properties(PURE)` lets the caller of a known-pure call treat
/// it as a plain value: no memory edge needed, so the load/store chain can
/// route straight past it (spec §4.G / funccall.c "call purity", used by
/// [`crate::opt::funccall`]).
pub fn is_pure_call(graph: &IrGraph, call: NodeId, callee_purity: impl Fn(EntityId) -> bool) -> bool {
    match &graph.node(call).attrs {
        Attrs::Call { callee: Some(e) } => callee_purity(*e),
        _ => false,
    }
}
