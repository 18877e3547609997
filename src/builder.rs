//! In-memory construction of classes and method bodies without a class-file
//! parser. Used by tests and by embedders that already hold a decoded model.

use anyhow::{Context, Result};

use crate::constant_pool::{
    ClassConstant, Constant, DynamicConstant, FieldRefConstant, MethodRefConstant, ReflectiveName,
    StringConstant,
};
use crate::facts::attach_known_facts;
use crate::ir::{
    Class, ClassAccess, ClassKind, Code, ExceptionHandler, Field, FieldAccess, Method,
    MethodAccess, Program,
};

/// Builder for one class and its constant pool.
pub struct ClassBuilder {
    class: Class,
}

impl ClassBuilder {
    pub fn program(name: &str) -> Self {
        Self::new(name, ClassKind::Program)
    }

    pub fn library(name: &str) -> Self {
        Self::new(name, ClassKind::Library)
    }

    fn new(name: &str, kind: ClassKind) -> Self {
        let mut class = Class::new(name, kind);
        class.super_name = (name != "java/lang/Object").then(|| "java/lang/Object".to_string());
        Self { class }
    }

    pub fn super_class(&mut self, name: &str) -> &mut Self {
        self.class.super_name = Some(name.to_string());
        self
    }

    pub fn interface(&mut self, name: &str) -> &mut Self {
        self.class.interfaces.push(name.to_string());
        self
    }

    pub fn access(&mut self, access: ClassAccess) -> &mut Self {
        self.class.access = access;
        self
    }

    /// Declares a field and returns its index in the class.
    pub fn field(&mut self, name: &str, descriptor: &str, access: FieldAccess) -> usize {
        self.class.fields.push(Field::new(name, descriptor, access));
        self.class.fields.len() - 1
    }

    /// Declares a method and returns its index in the class.
    pub fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        access: MethodAccess,
        code: Option<Code>,
    ) -> usize {
        self.class
            .methods
            .push(Method::new(name, descriptor, access, code));
        self.class.methods.len() - 1
    }

    /// Adds a constant, reusing an equal entry already in the pool.
    pub fn constant(&mut self, constant: Constant) -> u16 {
        if let Some((index, _)) = self
            .class
            .constant_pool
            .iter()
            .find(|(_, existing)| **existing == constant)
        {
            return index;
        }
        self.class.constant_pool.push(constant)
    }

    pub fn class_constant(&mut self, name: &str) -> u16 {
        self.constant(Constant::Class(ClassConstant {
            name: name.to_string(),
            referenced_class: None,
        }))
    }

    pub fn string(&mut self, value: &str) -> u16 {
        self.string_constant(value, None)
    }

    /// String constant that a reflection analysis identified as naming a class or member.
    pub fn string_naming(&mut self, value: &str, names: ReflectiveName) -> u16 {
        self.string_constant(value, Some(names))
    }

    fn string_constant(&mut self, value: &str, names: Option<ReflectiveName>) -> u16 {
        self.constant(Constant::String(StringConstant {
            value: value.to_string(),
            names,
            referenced_class: None,
            referenced_member: None,
        }))
    }

    pub fn field_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        self.constant(Constant::FieldRef(FieldRefConstant {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            referenced_class: None,
            referenced_field: None,
        }))
    }

    pub fn method_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        self.member_method_ref(class_name, name, descriptor, false)
    }

    pub fn interface_method_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        self.member_method_ref(class_name, name, descriptor, true)
    }

    fn member_method_ref(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> u16 {
        self.constant(Constant::MethodRef(MethodRefConstant {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface,
            referenced_class: None,
            referenced_method: None,
        }))
    }

    pub fn invoke_dynamic(&mut self, name: &str, descriptor: &str) -> u16 {
        self.constant(Constant::InvokeDynamic(DynamicConstant {
            bootstrap_method: 0,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }))
    }

    pub fn build(self) -> Class {
        self.class
    }
}

/// Bytecode assembler producing a decoded [`Code`] body.
#[derive(Default)]
pub struct Assembler {
    bytes: Vec<u8>,
    handlers: Vec<ExceptionHandler>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next instruction will occupy.
    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.bytes.push(opcode);
        self
    }

    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Self {
        self.bytes.extend_from_slice(&[opcode, operand]);
        self
    }

    pub fn op_u16(&mut self, opcode: u8, operand: u16) -> &mut Self {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&operand.to_be_bytes());
        self
    }

    /// Branch with a 16-bit offset relative to this instruction.
    pub fn branch(&mut self, opcode: u8, relative: i16) -> &mut Self {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&relative.to_be_bytes());
        self
    }

    /// Branch to an absolute offset.
    pub fn branch_to(&mut self, opcode: u8, target: u32) -> &mut Self {
        let relative = target as i64 - self.offset() as i64;
        self.branch(opcode, relative as i16)
    }

    /// `invokeinterface` with its count byte and trailing zero.
    pub fn invoke_interface(&mut self, index: u16, count: u8) -> &mut Self {
        self.op_u16(crate::opcodes::INVOKEINTERFACE, index);
        self.bytes.extend_from_slice(&[count, 0]);
        self
    }

    pub fn invoke_dynamic(&mut self, index: u16) -> &mut Self {
        self.op_u16(crate::opcodes::INVOKEDYNAMIC, index);
        self.bytes.extend_from_slice(&[0, 0]);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn handler(
        &mut self,
        start_pc: u32,
        end_pc: u32,
        handler_pc: u32,
        catch_type: Option<u16>,
    ) -> &mut Self {
        self.handlers.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }

    pub fn finish(&self, max_locals: u16) -> Result<Code> {
        Code::from_bytecode(max_locals, &self.bytes, self.handlers.clone())
            .context("assemble method body")
    }
}

/// Adds the classes to a fresh program, links references, and attaches the
/// optimistic facts every analysis starts from.
pub fn assemble_program(classes: impl IntoIterator<Item = Class>) -> Result<Program> {
    let mut program = Program::new();
    for class in classes {
        program.add_class(class)?;
    }
    program.link();
    attach_known_facts(&mut program);
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstructionKind, MethodId};
    use crate::opcodes;

    #[test]
    fn constants_are_deduplicated() {
        let mut builder = ClassBuilder::program("com/example/App");

        let first = builder.class_constant("com/example/Other");
        let second = builder.class_constant("com/example/Other");
        let other = builder.string("com/example/Other");

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn assembler_resolves_backward_branch_targets() {
        let mut code = Assembler::new();
        code.op(opcodes::NOP);
        let start = code.offset();
        code.op(opcodes::NOP).branch_to(opcodes::GOTO, start);

        let code = code.finish(0).expect("code");

        assert_eq!(code.instructions[2].kind, InstructionKind::Branch { target: 1 });
    }

    #[test]
    fn assembled_program_resolves_reflective_strings() {
        let mut target = ClassBuilder::program("com/example/Target");
        target.field("value", "I", FieldAccess::default());
        let mut app = ClassBuilder::program("com/example/App");
        let names_class = app.string_naming(
            "com.example.Target",
            ReflectiveName::Class("com/example/Target".to_string()),
        );
        let names_field = app.string_naming(
            "value",
            ReflectiveName::Field {
                class_name: "com/example/Target".to_string(),
                name: "value".to_string(),
                descriptor: "I".to_string(),
            },
        );
        app.method(
            "run",
            "()V",
            MethodAccess::default(),
            Some(Assembler::new().op(opcodes::RETURN).finish(0).expect("code")),
        );

        let program = assemble_program([target.build(), app.build()]).expect("program");

        let target = program.class_id("com/example/Target").expect("target");
        let app = program.class_id("com/example/App").expect("app");
        let pool = &program.class(app).constant_pool;
        let Constant::String(class_string) = pool.get(names_class).expect("string") else {
            panic!("expected string");
        };
        let Constant::String(field_string) = pool.get(names_field).expect("string") else {
            panic!("expected string");
        };
        assert_eq!(class_string.referenced_class, Some(target));
        assert_eq!(class_string.referenced_member, None);
        assert_eq!(
            field_string.referenced_member.map(|member| member.class()),
            Some(target)
        );
        assert!(program.method(MethodId { class: app, index: 0 }).facts().is_known());
    }
}
