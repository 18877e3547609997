use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::callgraph::{CallKind, CallResolver};
use crate::facts::ParameterMask;
use crate::ir::{ClassId, Code, Instruction, Program};
use crate::opcodes;

/// Which instruction families count as side effects beyond the obvious ones.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SideEffectCheckerConfig {
    /// Count `ireturn` through `return`.
    pub include_return_instructions: bool,
    /// Count stores into array elements.
    pub include_array_store_instructions: bool,
    /// Count instructions that may raise an implicit runtime exception
    /// (null receivers, array bounds, division by zero, failed casts).
    pub include_built_in_exceptions: bool,
}

/// Decides whether instructions can have an effect other than producing
/// their result.
///
/// Field and method references start out as side effects and are only
/// cleared when the referenced entity's facts prove them harmless: a stored
/// field nobody reads, a loaded field nobody writes, a callee that modifies
/// nothing. Unresolved and library references are never cleared.
pub struct SideEffectInstructionChecker<'p> {
    config: SideEffectCheckerConfig,
    resolver: CallResolver<'p>,
}

impl<'p> SideEffectInstructionChecker<'p> {
    pub fn new(program: &'p Program, config: SideEffectCheckerConfig) -> Self {
        Self {
            config,
            resolver: CallResolver::new(program),
        }
    }

    pub fn config(&self) -> SideEffectCheckerConfig {
        self.config
    }

    /// Whether `instruction`, declared in `class`, may have a side effect.
    pub fn has_side_effects(&self, class: ClassId, instruction: &Instruction) -> Result<bool> {
        let config = &self.config;
        let side_effects = match instruction.opcode {
            opcodes::ATHROW | opcodes::MONITORENTER | opcodes::MONITOREXIT => true,
            opcode if opcodes::is_return(opcode) => config.include_return_instructions,
            opcode if opcodes::is_array_store(opcode) => {
                config.include_array_store_instructions || config.include_built_in_exceptions
            }
            opcode if opcodes::is_array_load(opcode) => config.include_built_in_exceptions,
            opcodes::IDIV
            | opcodes::LDIV
            | opcodes::IREM
            | opcodes::LREM
            | opcodes::ARRAYLENGTH
            | opcodes::NEWARRAY
            | opcodes::ANEWARRAY
            | opcodes::MULTIANEWARRAY
            | opcodes::CHECKCAST => config.include_built_in_exceptions,
            opcode if opcodes::is_field_access(opcode) => self.field_access(class, instruction)?,
            opcode if opcodes::is_invoke(opcode) => self.invocation(class, instruction)?,
            opcodes::INVOKEDYNAMIC => true,
            opcodes::NEW => {
                let index = constant_operand(instruction)?;
                let constant = self.program().class(class).constant_pool.class(index)?;
                self.initializes_class(class, constant.referenced_class)
            }
            _ => false,
        };
        Ok(side_effects)
    }

    /// Whether any instruction of `code` starting in `[start, end)` may have
    /// a side effect.
    pub fn has_side_effects_in(
        &self,
        class: ClassId,
        code: &Code,
        start: u32,
        end: u32,
    ) -> Result<bool> {
        for instruction in &code.instructions {
            if instruction.offset < start || instruction.offset >= end {
                continue;
            }
            if self
                .has_side_effects(class, instruction)
                .with_context(|| format!("offset {}", instruction.offset))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn program(&self) -> &'p Program {
        self.resolver.program()
    }

    fn field_access(&self, class: ClassId, instruction: &Instruction) -> Result<bool> {
        let opcode = instruction.opcode;
        let is_static = matches!(opcode, opcodes::GETSTATIC | opcodes::PUTSTATIC);
        if !is_static && self.config.include_built_in_exceptions {
            return Ok(true);
        }
        let index = constant_operand(instruction)?;
        let field_ref = self.program().class(class).constant_pool.field_ref(index)?;
        let declaring_class = field_ref
            .referenced_field
            .map(|field| field.class)
            .or(field_ref.referenced_class);
        if is_static && self.initializes_class(class, declaring_class) {
            return Ok(true);
        }
        let Some(field) = field_ref.referenced_field else {
            return Ok(true);
        };
        let facts = self.program().field(field).facts();
        if opcodes::is_field_store(opcode) {
            // A store only matters when something reads the field back.
            Ok(facts.is_read())
        } else {
            Ok(facts.is_written())
        }
    }

    fn invocation(&self, class: ClassId, instruction: &Instruction) -> Result<bool> {
        let kind =
            CallKind::from_opcode(instruction.opcode).context("invocation without call kind")?;
        if kind.has_receiver() && self.config.include_built_in_exceptions {
            return Ok(true);
        }
        let index = constant_operand(instruction)?;
        let method_ref = self.program().class(class).constant_pool.method_ref(index)?;
        if kind == CallKind::Static {
            let declaring_class = method_ref
                .referenced_method
                .map(|method| method.class)
                .or(method_ref.referenced_class);
            if self.initializes_class(class, declaring_class) {
                return Ok(true);
            }
        }
        let facts = self.resolver.callee_facts(kind, method_ref);
        if facts.modifies_anything() {
            return Ok(true);
        }
        let mut modified = facts.modified_parameters();
        if method_ref.name == "<init>" {
            // Constructors only ever initialize an object nobody else has seen yet.
            modified = ParameterMask::from_bits(modified.bits() & !1);
        }
        Ok(!modified.is_empty())
    }

    /// Whether touching `target` from code in `class` may run a static
    /// initializer with side effects.
    fn initializes_class(&self, class: ClassId, target: Option<ClassId>) -> bool {
        let Some(target) = target else {
            return true;
        };
        let program = self.program();
        let already_initialized =
            std::iter::successors(Some(class), |id| program.class(*id).super_class)
                .take(program.class_count())
                .any(|id| id == target);
        !already_initialized && program.class(target).facts().has_side_effects()
    }
}

fn constant_operand(instruction: &Instruction) -> Result<u16> {
    instruction
        .constant_index()
        .with_context(|| format!("opcode 0x{:02x} without constant operand", instruction.opcode))
}
