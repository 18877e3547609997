use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::warn;

use crate::callgraph::{CallKind, CallResolver};
use crate::constant_pool::MethodRefConstant;
use crate::dataflow::frame::{Frame, Join};
use crate::dataflow::opcode_semantics::{
    ApplyOutcome, SemanticsHooks, ValueDomain, apply_semantics,
};
use crate::dataflow::worklist::{WorklistSemantics, analyze_code};
use crate::descriptor::{self, ParameterSlot, ReturnKind};
use crate::facts::{MethodFacts, ParameterMask};
use crate::ir::{ClassId, Code, Instruction, MethodId, Program};
use crate::opcodes;

/// Where a reference may have come from: the caller's parameters, a fresh
/// allocation in this method, or somewhere outside of it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TracedValue {
    pub parameters: ParameterMask,
    pub is_new: bool,
    pub is_external: bool,
}

impl TracedValue {
    pub const NONE: Self = Self {
        parameters: ParameterMask::NONE,
        is_new: false,
        is_external: false,
    };

    pub fn parameter(index: usize) -> Self {
        Self {
            parameters: ParameterMask::NONE.with(index),
            ..Self::NONE
        }
    }

    pub fn new_instance() -> Self {
        Self {
            is_new: true,
            ..Self::NONE
        }
    }

    pub fn external() -> Self {
        Self {
            is_external: true,
            ..Self::NONE
        }
    }
}

impl Join for TracedValue {
    fn join(&self, other: &Self) -> Self {
        Self {
            parameters: self.parameters | other.parameters,
            is_new: self.is_new || other.is_new,
            is_external: self.is_external || other.is_external,
        }
    }
}

/// Call instruction with its resolved descriptor shape.
pub struct CallSite<'p> {
    pub kind: CallKind,
    /// Absent for `invokedynamic`.
    pub method_ref: Option<&'p MethodRefConstant>,
    pub parameters: Vec<ParameterSlot>,
    pub return_kind: ReturnKind,
}

impl<'p> CallSite<'p> {
    /// Call site for `instruction`, or `None` when it is not an invocation.
    pub fn of(program: &'p Program, class: ClassId, instruction: &Instruction) -> Result<Option<Self>> {
        let Some(kind) = CallKind::from_opcode(instruction.opcode) else {
            return Ok(None);
        };
        let index = instruction
            .constant_index()
            .context("invocation without constant operand")?;
        let pool = &program.class(class).constant_pool;
        let (method_ref, descriptor) = if kind == CallKind::Dynamic {
            (None, pool.invoke_dynamic(index)?.descriptor.as_str())
        } else {
            let method_ref = pool.method_ref(index)?;
            (Some(method_ref), method_ref.descriptor.as_str())
        };
        Ok(Some(Self {
            kind,
            method_ref,
            parameters: descriptor::parameter_slots(descriptor, !kind.has_receiver())?,
            return_kind: descriptor::method_return_kind(descriptor)?,
        }))
    }

    pub fn argument_slots(&self) -> usize {
        self.parameters.iter().map(|slot| slot.size).sum()
    }

    /// One value per formal parameter, read from the top of `frame` without popping.
    pub fn arguments(&self, frame: &Frame<TracedValue>) -> Result<Vec<TracedValue>> {
        let mut depth = self.argument_slots();
        let mut arguments = Vec::with_capacity(self.parameters.len());
        for slot in &self.parameters {
            arguments.push(*frame.peek(depth - 1)?);
            depth -= slot.size;
        }
        Ok(arguments)
    }

    /// Facts of whatever the call may reach.
    pub fn callee_facts(&self, resolver: &CallResolver<'_>) -> MethodFacts {
        match self.method_ref {
            Some(method_ref) => resolver.callee_facts(self.kind, method_ref),
            None => MethodFacts::Unknown,
        }
    }
}

/// Value a call returns given what the callee is known to return.
pub fn call_result(facts: &MethodFacts, arguments: &[TracedValue]) -> TracedValue {
    let returned = facts.returned_parameters();
    let mut result = TracedValue {
        parameters: ParameterMask::NONE,
        is_new: facts.returns_new_instances(),
        is_external: facts.returns_external_values(),
    };
    for (index, argument) in arguments.iter().enumerate() {
        if returned.contains(index) {
            result = result.join(argument);
        }
    }
    result
}

/// Traces reference origins through `method` and returns the frame on entry
/// to every reachable instruction.
pub fn trace_method(
    resolver: &CallResolver<'_>,
    method: MethodId,
) -> Result<BTreeMap<u32, Frame<TracedValue>>> {
    let program = resolver.program();
    let Some(code) = program.method(method).code.as_ref() else {
        return Ok(BTreeMap::new());
    };
    let mut tracer = ReferenceTracer {
        resolver,
        program,
        method,
    };
    analyze_code(code, &mut tracer).with_context(|| program.describe_method(method))
}

struct ReferenceTracer<'r, 'p> {
    resolver: &'r CallResolver<'p>,
    program: &'p Program,
    method: MethodId,
}

struct TracingDomain;

impl ValueDomain<TracedValue> for TracingDomain {
    fn scalar_value(&self) -> TracedValue {
        TracedValue::NONE
    }

    fn null_value(&self) -> TracedValue {
        TracedValue::NONE
    }

    fn new_instance_value(&self) -> TracedValue {
        TracedValue::new_instance()
    }

    fn external_value(&self) -> TracedValue {
        TracedValue::external()
    }
}

impl WorklistSemantics for ReferenceTracer<'_, '_> {
    type State = Frame<TracedValue>;

    fn initial_state(&self, code: &Code) -> Result<Self::State> {
        let method = self.program.method(self.method);
        let slots = descriptor::parameter_slots(&method.descriptor, method.access.is_static)?;
        let mut locals = vec![TracedValue::NONE; code.max_locals as usize];
        let mut position = 0usize;
        let mut dropped = 0usize;
        for (index, slot) in slots.iter().enumerate() {
            if position + slot.size > locals.len() {
                anyhow::bail!(
                    "parameters need more than max_locals {} slots",
                    code.max_locals
                );
            }
            if slot.is_reference {
                if index < ParameterMask::CAPACITY {
                    locals[position] = TracedValue::parameter(index);
                } else {
                    dropped += 1;
                }
            }
            position += slot.size;
        }
        if dropped > 0 {
            warn!(
                method = %self.program.describe_method(self.method),
                dropped,
                "reference parameters past the mask capacity are not traced"
            );
        }
        Ok(Frame::new(locals))
    }

    fn transfer_instruction(
        &mut self,
        instruction: &Instruction,
        state: &mut Self::State,
    ) -> Result<()> {
        match apply_semantics(state, instruction, &TracingDomain, self)? {
            ApplyOutcome::Applied => Ok(()),
            ApplyOutcome::NotHandled => anyhow::bail!(
                "unsupported opcode 0x{:02x}",
                instruction.opcode
            ),
        }
    }

    fn handler_state(&self, state: &Self::State) -> Self::State {
        let mut handler = state.clone();
        handler.clear_stack();
        handler.push(TracedValue::external());
        handler
    }

    fn merge(&self, existing: &mut Self::State, incoming: &Self::State) -> Result<bool> {
        existing.join_from(incoming)
    }
}

impl SemanticsHooks<TracedValue> for ReferenceTracer<'_, '_> {
    fn pre_apply(
        &mut self,
        frame: &mut Frame<TracedValue>,
        instruction: &Instruction,
    ) -> Result<ApplyOutcome> {
        let class = self.method.class;
        let pool = &self.program.class(class).constant_pool;
        match instruction.opcode {
            opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => {
                let index = instruction.constant_index().context("ldc without operand")?;
                frame.push_sized(TracedValue::NONE, pool.get(index)?.stack_size());
            }
            opcodes::GETSTATIC | opcodes::GETFIELD => {
                let index = instruction.constant_index().context("field access without operand")?;
                let field = pool.field_ref(index)?;
                if instruction.opcode == opcodes::GETFIELD {
                    frame.pop()?;
                }
                let value = if descriptor::is_reference_field(&field.descriptor) {
                    TracedValue::external()
                } else {
                    TracedValue::NONE
                };
                frame.push_sized(value, descriptor::field_size(&field.descriptor)?);
            }
            opcodes::PUTSTATIC | opcodes::PUTFIELD => {
                let index = instruction.constant_index().context("field access without operand")?;
                let field = pool.field_ref(index)?;
                let mut size = descriptor::field_size(&field.descriptor)?;
                if instruction.opcode == opcodes::PUTFIELD {
                    size += 1;
                }
                frame.pop_n(size)?;
            }
            opcode if opcodes::is_invoke(opcode) || opcode == opcodes::INVOKEDYNAMIC => {
                let Some(site) = CallSite::of(self.program, class, instruction)? else {
                    return Ok(ApplyOutcome::NotHandled);
                };
                let arguments = site.arguments(frame)?;
                frame.pop_n(site.argument_slots())?;
                let result = match site.return_kind {
                    ReturnKind::Void => return Ok(ApplyOutcome::Applied),
                    ReturnKind::Primitive { size } => {
                        frame.push_sized(TracedValue::NONE, size);
                        return Ok(ApplyOutcome::Applied);
                    }
                    ReturnKind::Reference => {
                        call_result(&site.callee_facts(self.resolver), &arguments)
                    }
                };
                frame.push(result);
            }
            _ => return Ok(ApplyOutcome::NotHandled),
        }
        Ok(ApplyOutcome::Applied)
    }
}
