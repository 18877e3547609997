use anyhow::Result;

use crate::config::AnalysisConfig;
use crate::constant_pool::Constant;
use crate::facts::ClassFacts;
use crate::ir::{ClassId, Instruction, Program};
use crate::markers::{Marker, MarkerMetadata, update_class_facts, visit_bodies};
use crate::opcodes;
use crate::visitor::{ClassVisitor, InstructionContext, InstructionVisitor};

/// Marks classes that are loaded as class literals (`Foo.class`).
///
/// Also usable as a [`ClassVisitor`] that marks every class it is handed.
#[derive(Default)]
pub struct DotClassMarker;

crate::register_marker!(DotClassMarker);

impl Marker for DotClassMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "DOT_CLASS",
            name: "Class literal references",
            description: "Classes loaded with ldc of a class constant are dot-classed",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let literals = visit_bodies::<ClassLiterals>(program)?;
        let mut changed = 0;
        for (_, found) in literals {
            for class in found.classes {
                if mark(program, class) {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

impl ClassVisitor for DotClassMarker {
    fn visit_class(&mut self, program: &mut Program, class: ClassId) -> Result<()> {
        mark(program, class);
        Ok(())
    }
}

fn mark(program: &mut Program, class: ClassId) -> bool {
    update_class_facts(program, class, "dot_classed", ClassFacts::mark_dot_classed)
}

#[derive(Default)]
struct ClassLiterals {
    classes: Vec<ClassId>,
}

impl InstructionVisitor for ClassLiterals {
    fn visit_constant_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        index: u16,
    ) -> Result<()> {
        if !matches!(instruction.opcode, opcodes::LDC | opcodes::LDC_W) {
            return Ok(());
        }
        if let Constant::Class(constant) = context.class.constant_pool.get(index)? {
            self.classes.extend(constant.referenced_class);
        }
        Ok(())
    }
}
