use anyhow::Result;

use crate::config::AnalysisConfig;
use crate::facts::FieldFacts;
use crate::ir::{FieldId, Instruction, Program};
use crate::markers::{Marker, MarkerMetadata, update_field_facts, visit_bodies};
use crate::opcodes;
use crate::visitor::{InstructionContext, InstructionVisitor};

/// Marks fields read by `getfield`/`getstatic` and written by
/// `putfield`/`putstatic`.
#[derive(Default)]
pub struct ReadWriteFieldMarker;

crate::register_marker!(ReadWriteFieldMarker);

impl Marker for ReadWriteFieldMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "READ_WRITE_FIELD",
            name: "Field reads and writes",
            description: "Fields accessed by field instructions are read or written",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let scanned = visit_bodies::<FieldAccesses>(program)?;
        let mut changed = 0;
        for (_, accesses) in scanned {
            for field in accesses.read {
                if update_field_facts(program, field, "read", FieldFacts::mark_read) {
                    changed += 1;
                }
            }
            for field in accesses.written {
                if update_field_facts(program, field, "written", FieldFacts::mark_written) {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
struct FieldAccesses {
    read: Vec<FieldId>,
    written: Vec<FieldId>,
}

impl InstructionVisitor for FieldAccesses {
    fn visit_constant_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        index: u16,
    ) -> Result<()> {
        if !opcodes::is_field_access(instruction.opcode) {
            return Ok(());
        }
        let field_ref = context.class.constant_pool.field_ref(index)?;
        let Some(field) = field_ref.referenced_field else {
            return Ok(());
        };
        if opcodes::is_field_store(instruction.opcode) {
            self.written.push(field);
        } else {
            self.read.push(field);
        }
        Ok(())
    }
}
