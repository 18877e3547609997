use anyhow::Result;

use crate::config::AnalysisConfig;
use crate::facts::MethodFacts;
use crate::ir::{Instruction, Program};
use crate::markers::{Marker, MarkerMetadata, update_method_facts, visit_bodies};
use crate::opcodes;
use crate::visitor::{InstructionContext, InstructionVisitor};

/// Marks methods that call a superclass implementation through
/// `invokespecial`.
#[derive(Default)]
pub struct SuperInvocationMarker;

crate::register_marker!(SuperInvocationMarker);

impl Marker for SuperInvocationMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "SUPER_INVOCATION",
            name: "Super method invocations",
            description: "Methods using invokespecial to reach a superclass method invoke super methods",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let scanned = visit_bodies::<SuperCalls>(program)?;
        let mut changed = 0;
        for (method, calls) in scanned {
            if !calls.offsets.is_empty()
                && update_method_facts(
                    program,
                    method,
                    "invokes_super_methods",
                    MethodFacts::mark_invokes_super_methods,
                )
            {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Offsets of the genuine super calls in one body.
#[derive(Default)]
struct SuperCalls {
    offsets: Vec<u32>,
}

impl InstructionVisitor for SuperCalls {
    fn visit_constant_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        index: u16,
    ) -> Result<()> {
        if instruction.opcode == opcodes::INVOKESPECIAL && is_super_call(context, index)? {
            self.offsets.push(instruction.offset);
        }
        Ok(())
    }
}

/// Constructor chaining and private calls share `invokespecial` with super
/// calls but never dispatch to a superclass implementation.
fn is_super_call(context: &InstructionContext<'_>, index: u16) -> Result<bool> {
    let method_ref = context.class.constant_pool.method_ref(index)?;
    if method_ref.name == "<init>" {
        return Ok(false);
    }
    let own_class = context.method_id.class;
    let targets_own_class = match method_ref.referenced_class {
        Some(class) => class == own_class,
        None => method_ref.class_name == context.class.name,
    };
    if targets_own_class {
        return Ok(false);
    }
    if let Some(target) = method_ref.referenced_method {
        if context.program.method(target).access.is_private {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Assembler, ClassBuilder, assemble_program};
    use crate::ir::{Code, MethodAccess, MethodId};
    use crate::visitor::accept_instructions;

    fn body() -> Code {
        Assembler::new()
            .op(opcodes::RETURN)
            .finish(1)
            .expect("code")
    }

    fn program_with(calls: &[(&str, &str)]) -> Program {
        let mut base = ClassBuilder::program("com/example/Base");
        base.method("describe", "()V", MethodAccess::default(), Some(body()));
        let mut app = ClassBuilder::program("com/example/App");
        app.super_class("com/example/Base");
        app.method(
            "helper",
            "()V",
            MethodAccess {
                is_private: true,
                ..MethodAccess::default()
            },
            Some(body()),
        );
        let mut code = Assembler::new();
        for (owner, name) in calls {
            let index = app.method_ref(owner, name, "()V");
            code.op(opcodes::ALOAD_0).op_u16(opcodes::INVOKESPECIAL, index);
        }
        code.op(opcodes::RETURN);
        app.method(
            "describe",
            "()V",
            MethodAccess::default(),
            Some(code.finish(1).expect("code")),
        );
        assemble_program([base.build(), app.build()]).expect("program")
    }

    fn describe(program: &Program) -> MethodId {
        let class = program.class_id("com/example/App").expect("app");
        MethodId { class, index: 1 }
    }

    #[test]
    fn private_call_then_super_call_reports_only_the_super_call() {
        // 0: aload_0, 1: invokespecial App.helper, 4: aload_0, 5: invokespecial Base.describe
        let mut program = program_with(&[
            ("com/example/App", "helper"),
            ("com/example/Base", "describe"),
        ]);
        let method = describe(&program);

        let mut calls = SuperCalls::default();
        accept_instructions(&mut calls, &program, method).expect("visit");
        assert_eq!(calls.offsets, vec![5]);

        let changed = SuperInvocationMarker
            .run(&mut program, &AnalysisConfig::default())
            .expect("run");
        assert_eq!(changed, 1);
        assert!(program.method(method).facts().invokes_super_methods());
    }

    #[test]
    fn constructor_and_private_calls_are_not_super_calls() {
        let mut program = program_with(&[
            ("com/example/App", "helper"),
            ("com/example/Base", "<init>"),
        ]);
        let method = describe(&program);

        SuperInvocationMarker
            .run(&mut program, &AnalysisConfig::default())
            .expect("run");

        assert!(!program.method(method).facts().invokes_super_methods());
    }
}
