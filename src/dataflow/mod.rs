//! Intraprocedural dataflow over decoded method bodies.

pub mod frame;
pub mod opcode_semantics;
pub mod reference_tracer;
pub mod worklist;
