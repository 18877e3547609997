use anyhow::Result;

use crate::config::AnalysisConfig;
use crate::facts::MethodFacts;
use crate::ir::{Instruction, Program};
use crate::markers::{Marker, MarkerMetadata, update_method_facts, visit_bodies};
use crate::visitor::{InstructionContext, InstructionVisitor};

/// Marks methods whose body jumps backwards, i.e. contains a loop.
#[derive(Default)]
pub struct BackwardBranchMarker;

crate::register_marker!(BackwardBranchMarker);

impl Marker for BackwardBranchMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "BACKWARD_BRANCH",
            name: "Backward branches",
            description: "Methods with a branch to an earlier offset have backward branches",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let scanned = visit_bodies::<BackwardBranches>(program)?;
        let mut changed = 0;
        for (method, branches) in scanned {
            if branches.found
                && update_method_facts(
                    program,
                    method,
                    "has_backward_branches",
                    MethodFacts::mark_has_backward_branches,
                )
            {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
struct BackwardBranches {
    found: bool,
}

impl InstructionVisitor for BackwardBranches {
    fn visit_branch_instruction(
        &mut self,
        _context: &InstructionContext<'_>,
        instruction: &Instruction,
        target: u32,
    ) -> Result<()> {
        self.found |= target < instruction.offset;
        Ok(())
    }

    fn visit_switch_instruction(
        &mut self,
        _context: &InstructionContext<'_>,
        instruction: &Instruction,
        default: u32,
        targets: &[u32],
    ) -> Result<()> {
        self.found |= std::iter::once(&default)
            .chain(targets)
            .any(|target| *target < instruction.offset);
        Ok(())
    }
}
