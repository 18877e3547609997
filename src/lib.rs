//! Fact propagation for JVM bytecode optimizers.
//!
//! A [`ir::Program`] holds program classes (analyzed) and library classes
//! (opaque). Markers in [`markers`] refine the optimistic facts attached to
//! program entities; one [`engine::run_markers`] call is one pass, and a
//! driver repeats it until no marker reports a change. Library entities always
//! read conservative facts.

pub mod builder;
pub mod bytecode;
pub mod callgraph;
pub mod config;
pub mod constant_pool;
pub mod dataflow;
pub mod descriptor;
pub mod engine;
pub mod facts;
pub mod filters;
pub mod ir;
pub mod markers;
pub mod opcodes;
pub mod side_effects;
pub mod telemetry;
pub mod visitor;
