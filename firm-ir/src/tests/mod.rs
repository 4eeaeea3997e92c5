//! End-to-end scenario tests exercising the full pipeline across several
//! modules at once (teacher: `fuel-vm/src/tests/*`'s run-a-whole-script
//! style, reproduced here as run-a-whole-graph-through-every-pass).

mod pipeline;
