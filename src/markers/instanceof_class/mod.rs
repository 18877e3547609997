use anyhow::Result;

use crate::config::AnalysisConfig;
use crate::facts::ClassFacts;
use crate::ir::{ClassId, Instruction, Program};
use crate::markers::{Marker, MarkerMetadata, update_class_facts, visit_bodies};
use crate::opcodes;
use crate::visitor::{InstructionContext, InstructionVisitor};

/// Marks classes that appear as the operand of an `instanceof` check.
#[derive(Default)]
pub struct InstanceofClassMarker;

crate::register_marker!(InstanceofClassMarker);

impl Marker for InstanceofClassMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "INSTANCEOF_CLASS",
            name: "instanceof operands",
            description: "Classes tested with instanceof are instanceofed",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let checks = visit_bodies::<InstanceofChecks>(program)?;
        let mut changed = 0;
        for (_, found) in checks {
            for class in found.classes {
                if update_class_facts(program, class, "instanceofed", ClassFacts::mark_instanceofed)
                {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
struct InstanceofChecks {
    classes: Vec<ClassId>,
}

impl InstructionVisitor for InstanceofChecks {
    fn visit_constant_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        index: u16,
    ) -> Result<()> {
        if instruction.opcode == opcodes::INSTANCEOF {
            let constant = context.class.constant_pool.class(index)?;
            self.classes.extend(constant.referenced_class);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Assembler, ClassBuilder, assemble_program};
    use crate::ir::MethodAccess;

    #[test]
    fn instanceof_marks_tested_class_only() {
        let target = ClassBuilder::program("com/example/Shape");
        let other = ClassBuilder::program("com/example/Other");
        let mut app = ClassBuilder::program("com/example/App");
        let shape = app.class_constant("com/example/Shape");
        let other_ref = app.class_constant("com/example/Other");
        let body = Assembler::new()
            .op(opcodes::ALOAD_1)
            .op_u16(opcodes::INSTANCEOF, shape)
            .op(opcodes::POP)
            .op(opcodes::ALOAD_1)
            .op_u16(opcodes::CHECKCAST, other_ref)
            .op(opcodes::POP)
            .op(opcodes::RETURN)
            .finish(2)
            .expect("code");
        app.method(
            "test",
            "(Ljava/lang/Object;)V",
            MethodAccess::default(),
            Some(body),
        );
        let mut program =
            assemble_program([target.build(), other.build(), app.build()]).expect("program");

        let changed = InstanceofClassMarker
            .run(&mut program, &AnalysisConfig::default())
            .expect("run");

        assert_eq!(changed, 1);
        let shape = program.class_id("com/example/Shape").expect("shape");
        let other = program.class_id("com/example/Other").expect("other");
        assert!(program.class(shape).facts().is_instanceofed());
        assert!(!program.class(other).facts().is_instanceofed());
    }
}
