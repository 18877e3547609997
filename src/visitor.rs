//! Visitor traits over classes, method bodies, instructions and constants.
//!
//! Instruction and constant visitors are read-only: they see the program as
//! it is and report what they find. Class and code visitors may update facts.

use anyhow::{Context, Result};

use crate::constant_pool::{
    ClassConstant, Constant, DynamicConstant, FieldRefConstant, MethodRefConstant, StringConstant,
};
use crate::ir::{Class, ClassId, Code, Instruction, InstructionKind, Method, MethodId, Program};

/// Handler invoked for a class.
pub trait ClassVisitor {
    fn visit_class(&mut self, program: &mut Program, class: ClassId) -> Result<()>;
}

impl<F> ClassVisitor for F
where
    F: FnMut(&mut Program, ClassId) -> Result<()>,
{
    fn visit_class(&mut self, program: &mut Program, class: ClassId) -> Result<()> {
        self(program, class)
    }
}

/// Handler invoked for a method body, addressed by its method.
pub trait CodeVisitor {
    fn visit_code(&mut self, program: &mut Program, method: MethodId) -> Result<()>;
}

impl<F> CodeVisitor for F
where
    F: FnMut(&mut Program, MethodId) -> Result<()>,
{
    fn visit_code(&mut self, program: &mut Program, method: MethodId) -> Result<()> {
        self(program, method)
    }
}

/// Where an instruction sits: the method being visited and its body.
#[derive(Clone, Copy)]
pub struct InstructionContext<'a> {
    pub program: &'a Program,
    pub method_id: MethodId,
    pub class: &'a Class,
    pub method: &'a Method,
    pub code: &'a Code,
}

impl<'a> InstructionContext<'a> {
    /// Context for `method`, or `None` when it has no body.
    pub fn new(program: &'a Program, method_id: MethodId) -> Option<Self> {
        let method = program.method(method_id);
        let code = method.code.as_ref()?;
        Some(Self {
            program,
            method_id,
            class: program.class(method_id.class),
            method,
            code,
        })
    }
}

/// Per-kind instruction callbacks. Every arm falls back to
/// [`InstructionVisitor::visit_any_instruction`], which does nothing.
pub trait InstructionVisitor {
    fn visit_any_instruction(
        &mut self,
        _context: &InstructionContext<'_>,
        _instruction: &Instruction,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_simple_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
    ) -> Result<()> {
        self.visit_any_instruction(context, instruction)
    }

    fn visit_variable_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
    ) -> Result<()> {
        self.visit_any_instruction(context, instruction)
    }

    /// Instructions with a constant pool operand.
    fn visit_constant_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        _index: u16,
    ) -> Result<()> {
        self.visit_any_instruction(context, instruction)
    }

    fn visit_branch_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        _target: u32,
    ) -> Result<()> {
        self.visit_any_instruction(context, instruction)
    }

    fn visit_switch_instruction(
        &mut self,
        context: &InstructionContext<'_>,
        instruction: &Instruction,
        _default: u32,
        _targets: &[u32],
    ) -> Result<()> {
        self.visit_any_instruction(context, instruction)
    }
}

pub fn accept_instruction<V: InstructionVisitor + ?Sized>(
    visitor: &mut V,
    context: &InstructionContext<'_>,
    instruction: &Instruction,
) -> Result<()> {
    match &instruction.kind {
        InstructionKind::Simple | InstructionKind::Push { .. } | InstructionKind::NewArray { .. } => {
            visitor.visit_simple_instruction(context, instruction)
        }
        InstructionKind::Variable { .. } | InstructionKind::Increment { .. } => {
            visitor.visit_variable_instruction(context, instruction)
        }
        InstructionKind::Constant { index } | InstructionKind::MultiANewArray { index, .. } => {
            visitor.visit_constant_instruction(context, instruction, *index)
        }
        InstructionKind::Branch { target } => {
            visitor.visit_branch_instruction(context, instruction, *target)
        }
        InstructionKind::Switch { default, targets } => {
            visitor.visit_switch_instruction(context, instruction, *default, targets)
        }
    }
}

/// Visits every instruction of `method` in offset order. Methods without a
/// body are skipped. Errors name the method and offset.
pub fn accept_instructions<V: InstructionVisitor + ?Sized>(
    visitor: &mut V,
    program: &Program,
    method: MethodId,
) -> Result<()> {
    let Some(context) = InstructionContext::new(program, method) else {
        return Ok(());
    };
    for instruction in &context.code.instructions {
        accept_instruction(visitor, &context, instruction).with_context(|| {
            format!(
                "{} at offset {}",
                program.describe_method(method),
                instruction.offset
            )
        })?;
    }
    Ok(())
}

/// Per-kind constant pool callbacks; unmatched kinds reach
/// [`ConstantVisitor::visit_other_constant`].
pub trait ConstantVisitor {
    fn visit_class_constant(
        &mut self,
        _program: &Program,
        _class: ClassId,
        _index: u16,
        _constant: &ClassConstant,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_string_constant(
        &mut self,
        _program: &Program,
        _class: ClassId,
        _index: u16,
        _constant: &StringConstant,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_field_ref_constant(
        &mut self,
        _program: &Program,
        _class: ClassId,
        _index: u16,
        _constant: &FieldRefConstant,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_method_ref_constant(
        &mut self,
        _program: &Program,
        _class: ClassId,
        _index: u16,
        _constant: &MethodRefConstant,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_invoke_dynamic_constant(
        &mut self,
        _program: &Program,
        _class: ClassId,
        _index: u16,
        _constant: &DynamicConstant,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_other_constant(
        &mut self,
        _program: &Program,
        _class: ClassId,
        _index: u16,
        _constant: &Constant,
    ) -> Result<()> {
        Ok(())
    }
}

pub fn accept_constant<V: ConstantVisitor + ?Sized>(
    visitor: &mut V,
    program: &Program,
    class: ClassId,
    index: u16,
) -> Result<()> {
    let constant = program.class(class).constant_pool.get(index)?;
    match constant {
        Constant::Class(constant) => visitor.visit_class_constant(program, class, index, constant),
        Constant::String(constant) => {
            visitor.visit_string_constant(program, class, index, constant)
        }
        Constant::FieldRef(constant) => {
            visitor.visit_field_ref_constant(program, class, index, constant)
        }
        Constant::MethodRef(constant) => {
            visitor.visit_method_ref_constant(program, class, index, constant)
        }
        Constant::InvokeDynamic(constant) => {
            visitor.visit_invoke_dynamic_constant(program, class, index, constant)
        }
        other => visitor.visit_other_constant(program, class, index, other),
    }
}

/// Visits every usable constant pool entry of `class` in index order.
pub fn accept_constants<V: ConstantVisitor + ?Sized>(
    visitor: &mut V,
    program: &Program,
    class: ClassId,
) -> Result<()> {
    let indices: Vec<u16> = program
        .class(class)
        .constant_pool
        .iter()
        .map(|(index, _)| index)
        .collect();
    for index in indices {
        accept_constant(visitor, program, class, index)
            .with_context(|| format!("{} constant #{index}", program.class(class).name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Assembler, ClassBuilder, assemble_program};
    use crate::ir::MethodAccess;
    use crate::opcodes;

    #[derive(Default)]
    struct Tally {
        simple: usize,
        variable: usize,
        constant: Vec<u16>,
        branch: Vec<u32>,
        any: usize,
    }

    impl InstructionVisitor for Tally {
        fn visit_any_instruction(
            &mut self,
            _context: &InstructionContext<'_>,
            _instruction: &Instruction,
        ) -> Result<()> {
            self.any += 1;
            Ok(())
        }

        fn visit_simple_instruction(
            &mut self,
            _context: &InstructionContext<'_>,
            _instruction: &Instruction,
        ) -> Result<()> {
            self.simple += 1;
            Ok(())
        }

        fn visit_variable_instruction(
            &mut self,
            _context: &InstructionContext<'_>,
            _instruction: &Instruction,
        ) -> Result<()> {
            self.variable += 1;
            Ok(())
        }

        fn visit_constant_instruction(
            &mut self,
            _context: &InstructionContext<'_>,
            _instruction: &Instruction,
            index: u16,
        ) -> Result<()> {
            self.constant.push(index);
            Ok(())
        }

        fn visit_branch_instruction(
            &mut self,
            _context: &InstructionContext<'_>,
            _instruction: &Instruction,
            target: u32,
        ) -> Result<()> {
            self.branch.push(target);
            Ok(())
        }
    }

    #[test]
    fn instructions_dispatch_by_kind() {
        let mut app = ClassBuilder::program("com/example/App");
        let literal = app.class_constant("com/example/App");
        let mut code = Assembler::new();
        code.op_u8(opcodes::ILOAD, 0)
            .branch(opcodes::IFEQ, 6)
            .op_u16(opcodes::LDC_W, literal)
            .op(opcodes::POP)
            .op(opcodes::RETURN)
            .handler(0, 2, 9, None);
        app.method(
            "run",
            "(I)V",
            MethodAccess {
                is_static: true,
                ..MethodAccess::default()
            },
            Some(code.finish(1).expect("code")),
        );
        let program = assemble_program([app.build()]).expect("program");
        let method = program.program_methods_with_code()[0];

        let mut tally = Tally::default();
        accept_instructions(&mut tally, &program, method).expect("visit");

        assert_eq!(tally.variable, 1);
        assert_eq!(tally.branch, vec![8]);
        assert_eq!(tally.constant, vec![literal]);
        assert_eq!(tally.simple, 2);
        assert_eq!(tally.any, 0);
    }

    #[test]
    fn switch_falls_back_to_any() {
        let mut app = ClassBuilder::program("com/example/App");
        let mut code = Assembler::new();
        code.op(opcodes::ICONST_0).op(opcodes::LOOKUPSWITCH).raw(&[0, 0]);
        code.raw(&11i32.to_be_bytes()).raw(&0i32.to_be_bytes());
        code.op(opcodes::RETURN);
        app.method(
            "run",
            "()V",
            MethodAccess {
                is_static: true,
                ..MethodAccess::default()
            },
            Some(code.finish(0).expect("code")),
        );
        let program = assemble_program([app.build()]).expect("program");
        let method = program.program_methods_with_code()[0];

        let mut tally = Tally::default();
        accept_instructions(&mut tally, &program, method).expect("visit");

        assert_eq!(tally.any, 1);
    }

    #[derive(Default)]
    struct ConstantKinds(Vec<&'static str>);

    impl ConstantVisitor for ConstantKinds {
        fn visit_class_constant(
            &mut self,
            _program: &Program,
            _class: ClassId,
            _index: u16,
            _constant: &ClassConstant,
        ) -> Result<()> {
            self.0.push("class");
            Ok(())
        }

        fn visit_method_ref_constant(
            &mut self,
            _program: &Program,
            _class: ClassId,
            _index: u16,
            _constant: &MethodRefConstant,
        ) -> Result<()> {
            self.0.push("method");
            Ok(())
        }

        fn visit_other_constant(
            &mut self,
            _program: &Program,
            _class: ClassId,
            _index: u16,
            _constant: &Constant,
        ) -> Result<()> {
            self.0.push("other");
            Ok(())
        }
    }

    #[test]
    fn constants_dispatch_by_kind() {
        let mut app = ClassBuilder::program("com/example/App");
        app.class_constant("com/example/App");
        app.constant(Constant::Long(5));
        app.method_ref("java/lang/Object", "hashCode", "()I");
        app.string("unused");
        let program = assemble_program([app.build()]).expect("program");
        let app = program.class_id("com/example/App").expect("app");

        let mut kinds = ConstantKinds::default();
        accept_constants(&mut kinds, &program, app).expect("visit");

        assert_eq!(kinds.0, vec!["class", "other", "method"]);
    }
}
