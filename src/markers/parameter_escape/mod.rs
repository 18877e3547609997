//! Which parameters a method lets escape, modifies, or returns, and where its
//! returned references come from.
//!
//! Each body is traced with [`trace_method`], then every instruction that
//! publishes, mutates or returns a reference is checked against the traced
//! origins of its operands. Calls transfer the callee's masks bit by bit:
//! when the callee lets argument `i` escape, whatever the caller passed as
//! argument `i` escapes too. Callees without known facts let everything
//! escape and modify everything they are handed.
//!
//! Class literals and strings naming program classes or fields are recorded
//! on the named entity instead of on the method.

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::callgraph::CallResolver;
use crate::config::AnalysisConfig;
use crate::constant_pool::{ClassConstant, MemberRef, StringConstant};
use crate::dataflow::frame::Frame;
use crate::dataflow::reference_tracer::{CallSite, TracedValue, trace_method};
use crate::descriptor;
use crate::facts::{ClassFacts, FieldFacts, MethodFacts, ParameterMask};
use crate::ir::{ClassId, FieldId, Instruction, MethodId, Program};
use crate::markers::{
    Marker, MarkerMetadata, update_class_facts, update_field_facts, update_method_facts,
};
use crate::opcodes;
use crate::visitor::{ConstantVisitor, accept_constant};

#[derive(Default)]
pub struct ParameterEscapeMarker;

crate::register_marker!(ParameterEscapeMarker);

impl Marker for ParameterEscapeMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "PARAMETER_ESCAPE",
            name: "Parameter escape analysis",
            description: "Escaping, modified and returned parameters of every method body",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let summaries = summarize_program(program)?;
        let mut changed = 0;
        for (method, summary) in summaries {
            changed += summary.apply(program, method);
        }
        Ok(changed)
    }
}

fn summarize_program(program: &Program) -> Result<Vec<(MethodId, EscapeSummary)>> {
    let resolver = CallResolver::new(program);
    program
        .program_methods_with_code()
        .into_par_iter()
        .filter(|method| program.method(*method).facts().is_known())
        .map(|method| Ok((method, summarize(&resolver, method)?)))
        .collect()
}

/// Evidence gathered from one body.
#[derive(Debug, Default)]
struct EscapeSummary {
    escaping: ParameterMask,
    modified: ParameterMask,
    returned: ParameterMask,
    returns_new_instances: bool,
    returns_external_values: bool,
    modifies_anything: bool,
    dot_classed: Vec<ClassId>,
    escaping_classes: Vec<ClassId>,
    named_fields: Vec<FieldId>,
}

fn summarize(resolver: &CallResolver<'_>, method: MethodId) -> Result<EscapeSummary> {
    let program = resolver.program();
    let mut summary = EscapeSummary::default();
    let Some(code) = program.method(method).code.as_ref() else {
        return Ok(summary);
    };
    let frames = trace_method(resolver, method)?;
    for instruction in &code.instructions {
        // Unreachable code has no frame and cannot contribute.
        let Some(frame) = frames.get(&instruction.offset) else {
            continue;
        };
        summary
            .instruction(resolver, method.class, instruction, frame)
            .with_context(|| {
                format!(
                    "{} at offset {}",
                    program.describe_method(method),
                    instruction.offset
                )
            })?;
    }
    Ok(summary)
}

impl EscapeSummary {
    fn instruction(
        &mut self,
        resolver: &CallResolver<'_>,
        class: ClassId,
        instruction: &Instruction,
        frame: &Frame<TracedValue>,
    ) -> Result<()> {
        let program = resolver.program();
        let pool = &program.class(class).constant_pool;
        match instruction.opcode {
            opcodes::PUTFIELD | opcodes::PUTSTATIC => {
                let index = instruction
                    .constant_index()
                    .context("field store without operand")?;
                let field = pool.field_ref(index)?;
                if descriptor::is_reference_field(&field.descriptor) {
                    self.escape(*frame.peek(0)?);
                }
                if instruction.opcode == opcodes::PUTFIELD {
                    let size = descriptor::field_size(&field.descriptor)?;
                    self.modify(*frame.peek(size)?);
                } else {
                    self.modifies_anything = true;
                }
            }
            opcodes::AASTORE => {
                self.escape(*frame.peek(0)?);
                self.modify(*frame.peek(2)?);
            }
            opcode if opcodes::is_array_store(opcode) => {
                let value_size = if matches!(opcode, opcodes::LASTORE | opcodes::DASTORE) {
                    2
                } else {
                    1
                };
                self.modify(*frame.peek(value_size + 1)?);
            }
            opcodes::ATHROW => self.escape(*frame.peek(0)?),
            opcodes::ARETURN => {
                let value = *frame.peek(0)?;
                self.returned |= value.parameters;
                self.returns_new_instances |= value.is_new;
                self.returns_external_values |= value.is_external;
            }
            opcodes::LDC | opcodes::LDC_W => {
                let index = instruction.constant_index().context("ldc without operand")?;
                accept_constant(self, program, class, index)?;
            }
            _ => {
                if let Some(site) = CallSite::of(program, class, instruction)? {
                    self.call(resolver, &site, frame)?;
                }
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        resolver: &CallResolver<'_>,
        site: &CallSite<'_>,
        frame: &Frame<TracedValue>,
    ) -> Result<()> {
        let facts = site.callee_facts(resolver);
        let arguments = site.arguments(frame)?;
        for (index, argument) in arguments.iter().enumerate() {
            if facts.is_parameter_escaping(index) {
                self.escape(*argument);
            }
            if facts.is_parameter_modified(index) {
                self.modify(*argument);
            }
        }
        self.modifies_anything |= facts.modifies_anything();
        Ok(())
    }

    fn escape(&mut self, value: TracedValue) {
        self.escaping |= value.parameters;
    }

    /// Mutation of the object `target` refers to. Fresh objects are private
    /// to this method; anything from outside makes the method modify state
    /// it does not own.
    fn modify(&mut self, target: TracedValue) {
        self.modified |= target.parameters;
        self.modifies_anything |= target.is_external;
    }

    /// Writes the evidence into the method's facts and the referenced
    /// entities' facts. Returns the number of facts that changed.
    fn apply(self, program: &mut Program, method: MethodId) -> usize {
        let mut updates = [
            update_method_facts(program, method, "escaping_parameters", |facts| {
                facts.union_escaping_parameters(self.escaping)
            }),
            update_method_facts(program, method, "modified_parameters", |facts| {
                facts.union_modified_parameters(self.modified)
            }),
            update_method_facts(program, method, "returned_parameters", |facts| {
                facts.union_returned_parameters(self.returned)
            }),
        ]
        .into_iter()
        .filter(|changed| *changed)
        .count();
        let flags: [(bool, &'static str, fn(&mut MethodFacts) -> bool); 3] = [
            (
                self.returns_new_instances,
                "returns_new_instances",
                MethodFacts::mark_returns_new_instances,
            ),
            (
                self.returns_external_values,
                "returns_external_values",
                MethodFacts::mark_returns_external_values,
            ),
            (
                self.modifies_anything,
                "modifies_anything",
                MethodFacts::mark_modifies_anything,
            ),
        ];
        for (set, fact, mark) in flags {
            if set && update_method_facts(program, method, fact, mark) {
                updates += 1;
            }
        }
        for class in self.dot_classed {
            if update_class_facts(program, class, "dot_classed", ClassFacts::mark_dot_classed) {
                updates += 1;
            }
        }
        for class in self.escaping_classes {
            if update_class_facts(program, class, "escaping", ClassFacts::mark_escaping) {
                updates += 1;
            }
        }
        for field in self.named_fields {
            if update_field_facts(program, field, "read", FieldFacts::mark_read) {
                updates += 1;
            }
            if update_field_facts(program, field, "written", FieldFacts::mark_written) {
                updates += 1;
            }
        }
        updates
    }
}

/// Loaded constants that name other classes. References to the visiting
/// class itself carry no information and are skipped.
impl ConstantVisitor for EscapeSummary {
    fn visit_class_constant(
        &mut self,
        _program: &Program,
        class: ClassId,
        _index: u16,
        constant: &ClassConstant,
    ) -> Result<()> {
        if let Some(named) = constant.referenced_class.filter(|named| *named != class) {
            self.dot_classed.push(named);
        }
        Ok(())
    }

    fn visit_string_constant(
        &mut self,
        _program: &Program,
        class: ClassId,
        _index: u16,
        constant: &StringConstant,
    ) -> Result<()> {
        if constant.referenced_class == Some(class) {
            return Ok(());
        }
        if let Some(named) = constant.referenced_class {
            self.escaping_classes.push(named);
        }
        if let Some(MemberRef::Field(field)) = constant.referenced_member {
            self.named_fields.push(field);
        }
        Ok(())
    }
}
