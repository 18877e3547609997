use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{Context, Result};

use crate::constant_pool::{Constant, ConstantPool, MemberRef, ReflectiveName};
use crate::facts::{ClassFacts, CodeFacts, FieldFacts, MethodFacts};

/// Index of a class inside a [`Program`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClassId(pub(crate) usize);

impl ClassId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Field addressed by declaring class and declaration order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldId {
    pub class: ClassId,
    pub index: usize,
}

/// Method addressed by declaring class and declaration order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MethodId {
    pub class: ClassId,
    pub index: usize,
}

/// Whether a class body is available for analysis.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ClassKind {
    Program,
    Library,
}

/// Class access flags used by the markers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClassAccess {
    pub is_public: bool,
    pub is_final: bool,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_enum: bool,
}

/// Field access flags used by the markers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FieldAccess {
    pub is_public: bool,
    pub is_private: bool,
    pub is_protected: bool,
    pub is_static: bool,
    pub is_final: bool,
    pub is_volatile: bool,
}

impl FieldAccess {
    /// Default (package) visibility.
    pub fn is_package_visible(&self) -> bool {
        !self.is_public && !self.is_private && !self.is_protected
    }
}

/// Method access flags used by the markers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MethodAccess {
    pub is_public: bool,
    pub is_private: bool,
    pub is_protected: bool,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_native: bool,
    pub is_synchronized: bool,
}

impl MethodAccess {
    /// Default (package) visibility.
    pub fn is_package_visible(&self) -> bool {
        !self.is_public && !self.is_private && !self.is_protected
    }
}

static UNKNOWN_CLASS_FACTS: ClassFacts = ClassFacts::UNKNOWN;
static UNKNOWN_FIELD_FACTS: FieldFacts = FieldFacts::Unknown;
static UNKNOWN_METHOD_FACTS: MethodFacts = MethodFacts::Unknown;

/// Parsed class with its constant pool, members and fact slot.
#[derive(Clone, Debug)]
pub struct Class {
    pub name: String,
    pub super_name: Option<String>,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<String>,
    pub kind: ClassKind,
    pub access: ClassAccess,
    pub constant_pool: ConstantPool,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    facts: Option<ClassFacts>,
}

impl Class {
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            super_class: None,
            interfaces: Vec::new(),
            kind,
            access: ClassAccess::default(),
            constant_pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            facts: None,
        }
    }

    pub fn is_library(&self) -> bool {
        self.kind == ClassKind::Library
    }

    /// Internal package name, empty for the default package.
    pub fn package_name(&self) -> &str {
        self.name.rsplit_once('/').map(|(package, _)| package).unwrap_or("")
    }

    /// Attached facts, or the conservative defaults when nothing is attached.
    pub fn facts(&self) -> &ClassFacts {
        self.facts.as_ref().unwrap_or(&UNKNOWN_CLASS_FACTS)
    }

    /// Attached facts for in-place updates.
    pub fn facts_mut(&mut self) -> Option<&mut ClassFacts> {
        self.facts.as_mut()
    }

    pub fn has_facts(&self) -> bool {
        self.facts.is_some()
    }

    /// Attaches facts, replacing any previous record.
    pub fn set_facts(&mut self, facts: ClassFacts) {
        self.facts = Some(facts);
    }

    /// Attached facts, attaching an unknown-entity record first when the slot is empty.
    pub fn facts_or_unknown_mut(&mut self) -> &mut ClassFacts {
        self.facts.get_or_insert(ClassFacts::UNKNOWN)
    }

    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name == name && field.descriptor == descriptor)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.name == name && method.descriptor == descriptor)
    }
}

/// Field declaration with its fact slot.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub descriptor: String,
    pub access: FieldAccess,
    facts: Option<FieldFacts>,
}

impl Field {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access: FieldAccess) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            facts: None,
        }
    }

    pub fn facts(&self) -> &FieldFacts {
        self.facts.as_ref().unwrap_or(&UNKNOWN_FIELD_FACTS)
    }

    pub fn facts_mut(&mut self) -> Option<&mut FieldFacts> {
        self.facts.as_mut()
    }

    pub fn has_facts(&self) -> bool {
        self.facts.is_some()
    }

    pub fn set_facts(&mut self, facts: FieldFacts) {
        self.facts = Some(facts);
    }

    /// Object and array typed fields can reference a class.
    pub fn is_reference(&self) -> bool {
        self.descriptor.starts_with('L') || self.descriptor.starts_with('[')
    }
}

/// Method declaration with optional body and its fact slot.
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub access: MethodAccess,
    pub code: Option<Code>,
    facts: Option<MethodFacts>,
}

impl Method {
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access: MethodAccess,
        code: Option<Code>,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            code,
            facts: None,
        }
    }

    pub fn facts(&self) -> &MethodFacts {
        self.facts.as_ref().unwrap_or(&UNKNOWN_METHOD_FACTS)
    }

    pub fn facts_mut(&mut self) -> Option<&mut MethodFacts> {
        self.facts.as_mut()
    }

    pub fn has_facts(&self) -> bool {
        self.facts.is_some()
    }

    pub fn set_facts(&mut self, facts: MethodFacts) {
        self.facts = Some(facts);
    }

    pub fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>"
    }
}

/// Method body: decoded instructions and exception table.
#[derive(Clone, Debug)]
pub struct Code {
    pub max_locals: u16,
    pub instructions: Vec<Instruction>,
    pub exception_handlers: Vec<ExceptionHandler>,
    facts: Option<CodeFacts>,
}

impl Code {
    pub fn new(
        max_locals: u16,
        instructions: Vec<Instruction>,
        exception_handlers: Vec<ExceptionHandler>,
    ) -> Self {
        Self {
            max_locals,
            instructions,
            exception_handlers,
            facts: None,
        }
    }

    /// Decodes a raw code array into a body.
    pub fn from_bytecode(
        max_locals: u16,
        bytecode: &[u8],
        exception_handlers: Vec<ExceptionHandler>,
    ) -> Result<Self> {
        let instructions =
            crate::bytecode::decode_instructions(bytecode).context("decode bytecode")?;
        Ok(Self::new(max_locals, instructions, exception_handlers))
    }

    /// Kept bodies carry a [`CodeFacts`] record and must not be optimized.
    pub fn is_kept(&self) -> bool {
        self.facts.is_some()
    }

    pub fn facts(&self) -> Option<&CodeFacts> {
        self.facts.as_ref()
    }

    pub fn set_facts(&mut self, facts: CodeFacts) {
        self.facts = Some(facts);
    }
}

/// Exception table entry from the Code attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    /// Constant pool index of the caught class; `None` catches everything.
    pub catch_type: Option<u16>,
}

impl ExceptionHandler {
    pub fn covers(&self, offset: u32) -> bool {
        self.start_pc <= offset && offset < self.end_pc
    }
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub kind: InstructionKind,
}

/// Operand shapes of decoded instructions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstructionKind {
    /// Opcode alone determines the semantics.
    Simple,
    /// `bipush`/`sipush` immediate.
    Push { value: i32 },
    /// Explicit local variable index (`wide` forms normalised).
    Variable { index: u16 },
    Increment { index: u16, delta: i16 },
    /// Constant pool reference.
    Constant { index: u16 },
    MultiANewArray { index: u16, dimensions: u8 },
    NewArray { element_type: u8 },
    /// Absolute branch target.
    Branch { target: u32 },
    Switch { default: u32, targets: Vec<u32> },
}

impl Instruction {
    pub fn constant_index(&self) -> Option<u16> {
        match self.kind {
            InstructionKind::Constant { index } | InstructionKind::MultiANewArray { index, .. } => {
                Some(index)
            }
            _ => None,
        }
    }
}

/// Whole program: program classes plus the library classes they reference.
#[derive(Clone, Debug, Default)]
pub struct Program {
    classes: Vec<Class>,
    by_name: BTreeMap<String, ClassId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class. Class names must be unique.
    pub fn add_class(&mut self, class: Class) -> Result<ClassId> {
        if self.by_name.contains_key(&class.name) {
            anyhow::bail!("duplicate class: {}", class.name);
        }
        let id = ClassId(self.classes.len());
        self.by_name.insert(class.name.clone(), id);
        self.classes.push(class);
        Ok(id)
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.classes[id.class.0].fields[id.index]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.classes[id.class.0].fields[id.index]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.classes[id.class.0].methods[id.index]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.classes[id.class.0].methods[id.index]
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.classes.len()).map(ClassId)
    }

    pub fn program_class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.class_ids()
            .filter(|id| self.classes[id.0].kind == ClassKind::Program)
    }

    pub fn method_ids(&self, class: ClassId) -> impl Iterator<Item = MethodId> + '_ {
        (0..self.classes[class.0].methods.len()).map(move |index| MethodId { class, index })
    }

    /// Methods with a body declared by program classes, in declaration order.
    pub fn program_methods_with_code(&self) -> Vec<MethodId> {
        self.program_class_ids()
            .flat_map(|class| self.method_ids(class))
            .filter(|id| self.method(*id).code.is_some())
            .collect()
    }

    /// `Class.name(descriptor)` label used in diagnostics.
    pub fn describe_method(&self, id: MethodId) -> String {
        let method = self.method(id);
        format!(
            "{}.{}{}",
            self.class(id.class).name,
            method.name,
            method.descriptor
        )
    }

    pub fn describe_field(&self, id: FieldId) -> String {
        let field = self.field(id);
        format!("{}.{} ({})", self.class(id.class).name, field.name, field.descriptor)
    }

    /// Looks up a field in `class` and then its supertypes.
    pub fn resolve_field(&self, class: ClassId, name: &str, descriptor: &str) -> Option<FieldId> {
        self.supertypes(class).into_iter().find_map(|candidate| {
            self.classes[candidate.0]
                .find_field(name, descriptor)
                .map(|index| FieldId {
                    class: candidate,
                    index,
                })
        })
    }

    /// Looks up a method in `class` and then its supertypes.
    pub fn resolve_method(
        &self,
        class: ClassId,
        name: &str,
        descriptor: &str,
    ) -> Option<MethodId> {
        self.supertypes(class).into_iter().find_map(|candidate| {
            self.classes[candidate.0]
                .find_method(name, descriptor)
                .map(|index| MethodId {
                    class: candidate,
                    index,
                })
        })
    }

    /// `class` followed by its superclasses, then interfaces, breadth first.
    pub fn supertypes(&self, class: ClassId) -> Vec<ClassId> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut superclass = Some(class);
        while let Some(current) = superclass {
            if !seen.insert(current) {
                break;
            }
            order.push(current);
            let class = &self.classes[current.0];
            superclass = class
                .super_class
                .or_else(|| class.super_name.as_deref().and_then(|name| self.class_id(name)));
        }
        let mut queue: VecDeque<ClassId> = order.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            for name in &self.classes[current.0].interfaces {
                if let Some(interface) = self.class_id(name) {
                    if seen.insert(interface) {
                        order.push(interface);
                        queue.push_back(interface);
                    }
                }
            }
        }
        order
    }

    /// Resolves superclass links and class/field/method constants against the
    /// classes present. References to absent classes stay unresolved.
    pub fn link(&mut self) {
        for index in 0..self.classes.len() {
            let super_class = self.classes[index]
                .super_name
                .as_deref()
                .and_then(|name| self.class_id(name));
            self.classes[index].super_class = super_class;
        }

        for index in 0..self.classes.len() {
            let mut resolutions = Vec::new();
            for (constant_index, constant) in self.classes[index].constant_pool.iter() {
                let resolved = match constant {
                    Constant::Class(class) => Resolution::Class(
                        element_class_name(&class.name).and_then(|name| self.class_id(name)),
                    ),
                    Constant::FieldRef(field) => {
                        let class = self.class_id(&field.class_name);
                        let member = class.and_then(|class| {
                            self.resolve_field(class, &field.name, &field.descriptor)
                        });
                        Resolution::Field(class, member)
                    }
                    Constant::MethodRef(method) => {
                        let class = self.class_id(&method.class_name);
                        let member = class.and_then(|class| {
                            self.resolve_method(class, &method.name, &method.descriptor)
                        });
                        Resolution::Method(class, member)
                    }
                    Constant::String(string) => match &string.names {
                        Some(names) => self.resolve_reflective_name(names),
                        None => continue,
                    },
                    _ => continue,
                };
                resolutions.push((constant_index, resolved));
            }
            let pool = &mut self.classes[index].constant_pool;
            for (constant_index, resolution) in resolutions {
                match (pool.get_mut(constant_index), resolution) {
                    (Some(Constant::Class(class)), Resolution::Class(id)) => {
                        class.referenced_class = id;
                    }
                    (Some(Constant::FieldRef(field)), Resolution::Field(class, member)) => {
                        field.referenced_class = class;
                        field.referenced_field = member;
                    }
                    (Some(Constant::MethodRef(method)), Resolution::Method(class, member)) => {
                        method.referenced_class = class;
                        method.referenced_method = member;
                    }
                    (Some(Constant::String(string)), Resolution::Class(class)) => {
                        string.referenced_class = class;
                        string.referenced_member = None;
                    }
                    (Some(Constant::String(string)), Resolution::Field(class, member)) => {
                        string.referenced_class = class;
                        string.referenced_member = member.map(MemberRef::Field);
                    }
                    (Some(Constant::String(string)), Resolution::Method(class, member)) => {
                        string.referenced_class = class;
                        string.referenced_member = member.map(MemberRef::Method);
                    }
                    _ => {}
                }
            }
        }
    }

    fn resolve_reflective_name(&self, names: &ReflectiveName) -> Resolution {
        let class = self.class_id(names.class_name());
        match names {
            ReflectiveName::Class(_) => Resolution::Class(class),
            ReflectiveName::Field {
                name, descriptor, ..
            } => Resolution::Field(
                class,
                class.and_then(|class| self.resolve_field(class, name, descriptor)),
            ),
            ReflectiveName::Method {
                name, descriptor, ..
            } => Resolution::Method(
                class,
                class.and_then(|class| self.resolve_method(class, name, descriptor)),
            ),
        }
    }
}

enum Resolution {
    Class(Option<ClassId>),
    Field(Option<ClassId>, Option<FieldId>),
    Method(Option<ClassId>, Option<MethodId>),
}

/// Class named by a class constant; array constants name their element class.
fn element_class_name(raw: &str) -> Option<&str> {
    if !raw.starts_with('[') {
        return Some(raw);
    }
    let element = raw.trim_start_matches('[');
    element.strip_prefix('L').and_then(|s| s.strip_suffix(';'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassBuilder;

    #[test]
    fn duplicate_classes_are_rejected() {
        let mut program = Program::new();
        program
            .add_class(Class::new("com/example/App", ClassKind::Program))
            .expect("first");

        let error = program
            .add_class(Class::new("com/example/App", ClassKind::Program))
            .expect_err("duplicate");

        assert!(error.to_string().contains("duplicate class: com/example/App"));
    }

    #[test]
    fn link_resolves_inherited_members_and_array_classes() {
        let mut program = Program::new();
        let mut base = ClassBuilder::program("com/example/Base");
        base.field("count", "I", FieldAccess::default());
        base.method("run", "()V", MethodAccess::default(), None);
        let base = program.add_class(base.build()).expect("base");

        let mut sub = ClassBuilder::program("com/example/Sub");
        sub.super_class("com/example/Base");
        let field_ref = sub.field_ref("com/example/Sub", "count", "I");
        let method_ref = sub.method_ref("com/example/Sub", "run", "()V");
        let array = sub.class_constant("[Lcom/example/Base;");
        let missing = sub.method_ref("java/lang/Object", "hashCode", "()I");
        let sub = program.add_class(sub.build()).expect("sub");

        program.link();

        let pool = &program.class(sub).constant_pool;
        assert_eq!(program.class(sub).super_class, Some(base));
        assert_eq!(
            pool.field_ref(field_ref).expect("field").referenced_field,
            Some(FieldId { class: base, index: 0 })
        );
        assert_eq!(
            pool.method_ref(method_ref).expect("method").referenced_method,
            Some(MethodId { class: base, index: 0 })
        );
        assert_eq!(
            pool.class(array).expect("class").referenced_class,
            Some(base)
        );
        assert_eq!(pool.method_ref(missing).expect("method").referenced_method, None);
    }

    #[test]
    fn unattached_entities_read_unknown_facts() {
        let class = Class::new("com/example/Lib", ClassKind::Library);

        assert!(!class.has_facts());
        assert!(class.facts().is_escaping());
        assert!(class.facts().has_side_effects());
    }

    #[test]
    fn package_name_of_default_package_is_empty() {
        assert_eq!(Class::new("Main", ClassKind::Program).package_name(), "");
        assert_eq!(
            Class::new("com/example/Main", ClassKind::Program).package_name(),
            "com/example"
        );
    }
}
