use anyhow::Result;

use crate::config::AnalysisConfig;
use crate::facts::MethodFacts;
use crate::ir::{Instruction, Program};
use crate::markers::{Marker, MarkerMetadata, update_method_facts, visit_bodies};
use crate::opcodes;
use crate::visitor::{InstructionContext, InstructionVisitor};

/// Marks methods that store into a `final` field.
#[derive(Default)]
pub struct FinalFieldAssignmentMarker;

crate::register_marker!(FinalFieldAssignmentMarker);

impl Marker for FinalFieldAssignmentMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "FINAL_FIELD_ASSIGNMENT",
            name: "Final field assignments",
            description: "Methods storing into a final field assign final fields",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let scanned = visit_bodies::<FinalFieldStores>(program)?;
        let mut changed = 0;
        for (method, stores) in scanned {
            if stores.found
                && update_method_facts(
                    program,
                    method,
                    "assigns_final_field",
                    MethodFacts::mark_assigns_final_field,
                )
            {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
struct FinalFieldStores {
    found: bool,
}

impl InstructionVisitor for FinalFieldStores {
    fn visit_constant_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        index: u16,
    ) -> Result<()> {
        if !opcodes::is_field_store(instruction.opcode) {
            return Ok(());
        }
        let field_ref = context.class.constant_pool.field_ref(index)?;
        // A field we cannot see may be final.
        self.found |= field_ref
            .referenced_field
            .is_none_or(|field| context.program.field(field).access.is_final);
        Ok(())
    }
}
