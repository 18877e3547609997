//! Optimization facts attached to classes, fields, methods and method bodies.

mod class;
mod code;
mod field;
mod mask;
mod method;

pub use class::{ClassFacts, KnownClassFacts, UnknownClassFacts};
pub use code::CodeFacts;
pub use field::{FieldFacts, FieldValue, KnownFieldFacts};
pub use mask::ParameterMask;
pub use method::{KnownMethodFacts, MethodFacts};

use tracing::debug;

use crate::ir::Program;

/// Attach optimistic facts to every program class, field and method that has
/// none yet. Methods without a body stay unknown; library classes are skipped.
/// Returns the number of records attached.
pub fn attach_known_facts(program: &mut Program) -> usize {
    let mut attached = 0;
    let classes: Vec<_> = program.program_class_ids().collect();
    for class_id in classes {
        let class = program.class_mut(class_id);
        if !class.has_facts() {
            class.set_facts(ClassFacts::known());
            attached += 1;
        }
        for field in &mut class.fields {
            if !field.has_facts() {
                field.set_facts(FieldFacts::known(&field.access));
                attached += 1;
            }
        }
        for method in &mut class.methods {
            if method.code.is_some() && !method.has_facts() {
                method.set_facts(MethodFacts::known());
                attached += 1;
            }
        }
    }
    debug!(attached, "attached known facts");
    attached
}
