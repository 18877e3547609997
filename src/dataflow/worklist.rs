use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};

use crate::ir::{Code, Instruction, InstructionKind};
use crate::opcodes;

/// Domain callbacks required by the generic worklist engine.
pub trait WorklistSemantics {
    type State: Clone;

    fn initial_state(&self, code: &Code) -> Result<Self::State>;

    /// Applies one instruction to `state` in place.
    fn transfer_instruction(&mut self, instruction: &Instruction, state: &mut Self::State)
    -> Result<()>;

    /// State on entry to an exception handler reached from `state`.
    fn handler_state(&self, state: &Self::State) -> Self::State;

    /// Merges `incoming` into `existing`; returns whether `existing` changed.
    fn merge(&self, existing: &mut Self::State, incoming: &Self::State) -> Result<bool>;
}

/// Runs `semantics` to a fixpoint over `code` and returns the state on entry
/// to every reachable instruction, keyed by offset.
pub fn analyze_code<S>(code: &Code, semantics: &mut S) -> Result<BTreeMap<u32, S::State>>
where
    S: WorklistSemantics,
{
    let graph = CodeGraph::new(code);
    let mut states: Vec<Option<S::State>> = vec![None; code.instructions.len()];
    let mut pending = BTreeSet::new();
    if !code.instructions.is_empty() {
        states[0] = Some(semantics.initial_state(code)?);
        pending.insert(0usize);
    }

    while let Some(index) = pending.pop_first() {
        let instruction = &code.instructions[index];
        let Some(input) = states[index].clone() else {
            continue;
        };
        let mut output = input.clone();
        semantics
            .transfer_instruction(instruction, &mut output)
            .with_context(|| format!("offset {}", instruction.offset))?;

        let mut targets = Vec::new();
        for successor in graph.successors(index)? {
            targets.push((successor, output.clone()));
        }
        for handler in graph.handlers(instruction.offset)? {
            targets.push((handler, semantics.handler_state(&input)));
            targets.push((handler, semantics.handler_state(&output)));
        }
        for (target, incoming) in targets {
            let changed = if let Some(existing) = &mut states[target] {
                semantics.merge(existing, &incoming).with_context(|| {
                    format!(
                        "merge from offset {} into offset {}",
                        instruction.offset, code.instructions[target].offset
                    )
                })?
            } else {
                states[target] = Some(incoming);
                true
            };
            if changed {
                pending.insert(target);
            }
        }
    }

    Ok(code
        .instructions
        .iter()
        .zip(states)
        .filter_map(|(instruction, state)| state.map(|state| (instruction.offset, state)))
        .collect())
}

/// Instruction-level control flow of one method body.
struct CodeGraph<'a> {
    code: &'a Code,
    /// Instructions following each `jsr`, where a `ret` may return to.
    return_sites: Vec<usize>,
}

impl<'a> CodeGraph<'a> {
    fn new(code: &'a Code) -> Self {
        let return_sites = code
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, instruction)| {
                matches!(instruction.opcode, opcodes::JSR | opcodes::JSR_W)
            })
            .map(|(index, _)| index + 1)
            .filter(|index| *index < code.instructions.len())
            .collect();
        Self { code, return_sites }
    }

    fn index_of(&self, offset: u32) -> Result<usize> {
        self.code
            .instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .map_err(|_| anyhow::anyhow!("no instruction starts at offset {offset}"))
    }

    fn fall_through(&self, index: usize) -> Result<usize> {
        if index + 1 >= self.code.instructions.len() {
            anyhow::bail!(
                "control falls off the end of the code at offset {}",
                self.code.instructions[index].offset
            );
        }
        Ok(index + 1)
    }

    fn successors(&self, index: usize) -> Result<Vec<usize>> {
        let instruction = &self.code.instructions[index];
        let successors = match (&instruction.kind, instruction.opcode) {
            (_, opcode) if opcodes::is_return(opcode) || opcode == opcodes::ATHROW => Vec::new(),
            (_, opcodes::RET) => self.return_sites.clone(),
            (
                InstructionKind::Branch { target },
                opcodes::GOTO | opcodes::GOTO_W | opcodes::JSR | opcodes::JSR_W,
            ) => vec![self.index_of(*target)?],
            (InstructionKind::Branch { target }, _) => {
                vec![self.index_of(*target)?, self.fall_through(index)?]
            }
            (InstructionKind::Switch { default, targets }, _) => {
                let mut successors = vec![self.index_of(*default)?];
                for target in targets {
                    successors.push(self.index_of(*target)?);
                }
                successors.sort_unstable();
                successors.dedup();
                successors
            }
            _ => vec![self.fall_through(index)?],
        };
        Ok(successors)
    }

    fn handlers(&self, offset: u32) -> Result<Vec<usize>> {
        self.code
            .exception_handlers
            .iter()
            .filter(|handler| handler.covers(offset))
            .map(|handler| self.index_of(handler.handler_pc))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Assembler;

    /// Counts the longest path (in instructions) reaching each offset, capped.
    struct DepthSemantics {
        transfers: usize,
    }

    impl WorklistSemantics for DepthSemantics {
        type State = u32;

        fn initial_state(&self, _code: &Code) -> Result<u32> {
            Ok(0)
        }

        fn transfer_instruction(&mut self, _instruction: &Instruction, state: &mut u32) -> Result<()> {
            self.transfers += 1;
            *state = (*state + 1).min(8);
            Ok(())
        }

        fn handler_state(&self, _state: &u32) -> u32 {
            100
        }

        fn merge(&self, existing: &mut u32, incoming: &u32) -> Result<bool> {
            if *incoming > *existing {
                *existing = *incoming;
                return Ok(true);
            }
            Ok(false)
        }
    }

    #[test]
    fn branches_merge_at_join_points() {
        // 0: iconst_0, 1: ifeq -> 5, 4: nop, 5: return
        let mut code = Assembler::new();
        code.op(opcodes::ICONST_0)
            .branch(opcodes::IFEQ, 4)
            .op(opcodes::NOP)
            .op(opcodes::RETURN);
        let code = code.finish(0).expect("code");
        let mut semantics = DepthSemantics { transfers: 0 };

        let states = analyze_code(&code, &mut semantics).expect("analyze");

        assert_eq!(states.get(&5), Some(&3));
        assert_eq!(states.len(), 4);
    }

    #[test]
    fn loops_reach_a_fixpoint() {
        // 0: nop, 1: goto -> 0
        let mut code = Assembler::new();
        code.op(opcodes::NOP).branch(opcodes::GOTO, -1);
        let code = code.finish(0).expect("code");
        let mut semantics = DepthSemantics { transfers: 0 };

        let states = analyze_code(&code, &mut semantics).expect("analyze");

        assert_eq!(states.get(&0), Some(&8));
        assert!(semantics.transfers < 40);
    }

    #[test]
    fn handlers_receive_handler_state() {
        // 0: nop, 1: return, 2: return (handler for [0, 1))
        let mut code = Assembler::new();
        code.op(opcodes::NOP)
            .op(opcodes::RETURN)
            .op(opcodes::RETURN)
            .handler(0, 1, 2, None);
        let code = code.finish(0).expect("code");
        let mut semantics = DepthSemantics { transfers: 0 };

        let states = analyze_code(&code, &mut semantics).expect("analyze");

        assert_eq!(states.get(&2), Some(&100));
    }

    #[test]
    fn falling_off_the_end_is_an_error() {
        let mut code = Assembler::new();
        code.op(opcodes::NOP);
        let code = code.finish(0).expect("code");
        let mut semantics = DepthSemantics { transfers: 0 };

        assert!(analyze_code(&code, &mut semantics).is_err());
    }
}
