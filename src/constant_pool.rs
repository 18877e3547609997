use anyhow::{Context, Result};

use crate::ir::{ClassId, FieldId, MethodId};

/// Program member a constant names once resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MemberRef {
    Field(FieldId),
    Method(MethodId),
}

impl MemberRef {
    /// Class declaring the member.
    pub fn class(self) -> ClassId {
        match self {
            MemberRef::Field(field) => field.class,
            MemberRef::Method(method) => method.class,
        }
    }
}

/// `CONSTANT_Class` entry with its resolved class.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassConstant {
    pub name: String,
    pub referenced_class: Option<ClassId>,
}

/// `CONSTANT_String` entry. A string may name a class or member used reflectively.
#[derive(Clone, Debug, PartialEq)]
pub struct StringConstant {
    pub value: String,
    /// What a reflection analysis decided the string names, if anything.
    pub names: Option<ReflectiveName>,
    pub referenced_class: Option<ClassId>,
    pub referenced_member: Option<MemberRef>,
}

/// Symbolic target of a string used as a reflective name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReflectiveName {
    Class(String),
    Field {
        class_name: String,
        name: String,
        descriptor: String,
    },
    Method {
        class_name: String,
        name: String,
        descriptor: String,
    },
}

impl ReflectiveName {
    pub fn class_name(&self) -> &str {
        match self {
            ReflectiveName::Class(name) => name,
            ReflectiveName::Field { class_name, .. } | ReflectiveName::Method { class_name, .. } => {
                class_name
            }
        }
    }
}

/// `CONSTANT_Fieldref` entry with its resolved field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldRefConstant {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
    pub referenced_class: Option<ClassId>,
    pub referenced_field: Option<FieldId>,
}

/// `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref` entry with its resolved method.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodRefConstant {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
    pub interface: bool,
    pub referenced_class: Option<ClassId>,
    pub referenced_method: Option<MethodId>,
}

/// `CONSTANT_Dynamic` or `CONSTANT_InvokeDynamic` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicConstant {
    pub bootstrap_method: u16,
    pub name: String,
    pub descriptor: String,
}

/// Constant pool entry kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    /// Index 0 and the upper half of long/double entries.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(ClassConstant),
    String(StringConstant),
    FieldRef(FieldRefConstant),
    MethodRef(MethodRefConstant),
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor: String },
    Dynamic(DynamicConstant),
    InvokeDynamic(DynamicConstant),
}

impl Constant {
    /// Operand stack slots an `ldc` of this constant pushes.
    pub fn stack_size(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            Constant::Dynamic(dynamic) if matches!(dynamic.descriptor.as_str(), "J" | "D") => 2,
            _ => 1,
        }
    }

    fn tag_name(&self) -> &'static str {
        match self {
            Constant::Unusable => "unusable",
            Constant::Utf8(_) => "utf8",
            Constant::Integer(_) => "integer",
            Constant::Float(_) => "float",
            Constant::Long(_) => "long",
            Constant::Double(_) => "double",
            Constant::Class(_) => "class",
            Constant::String(_) => "string",
            Constant::FieldRef(_) => "field ref",
            Constant::MethodRef(_) => "method ref",
            Constant::MethodHandle { .. } => "method handle",
            Constant::MethodType { .. } => "method type",
            Constant::Dynamic(_) => "dynamic",
            Constant::InvokeDynamic(_) => "invoke dynamic",
        }
    }
}

/// Per-class constant table addressed by 1-based index.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    /// Appends a constant and returns its index. Long and double entries take two indices.
    pub fn push(&mut self, constant: Constant) -> u16 {
        let index = self.entries.len() as u16;
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`, failing for absent or placeholder slots.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        let entry = self
            .entries
            .get(index as usize)
            .with_context(|| format!("missing constant pool entry #{index}"))?;
        if matches!(entry, Constant::Unusable) {
            anyhow::bail!("unusable constant pool entry #{index}");
        }
        Ok(entry)
    }

    pub(crate) fn get_mut(&mut self, index: u16) -> Option<&mut Constant> {
        self.entries.get_mut(index as usize)
    }

    /// Iterates usable entries with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !matches!(entry, Constant::Unusable))
            .map(|(index, entry)| (index as u16, entry))
    }

    pub fn class(&self, index: u16) -> Result<&ClassConstant> {
        match self.get(index)? {
            Constant::Class(class) => Ok(class),
            other => anyhow::bail!("expected class at #{index}, found {}", other.tag_name()),
        }
    }

    pub fn field_ref(&self, index: u16) -> Result<&FieldRefConstant> {
        match self.get(index)? {
            Constant::FieldRef(field) => Ok(field),
            other => anyhow::bail!("expected field ref at #{index}, found {}", other.tag_name()),
        }
    }

    pub fn method_ref(&self, index: u16) -> Result<&MethodRefConstant> {
        match self.get(index)? {
            Constant::MethodRef(method) => Ok(method),
            other => anyhow::bail!(
                "expected method ref at #{index}, found {}",
                other.tag_name()
            ),
        }
    }

    pub fn invoke_dynamic(&self, index: u16) -> Result<&DynamicConstant> {
        match self.get(index)? {
            Constant::InvokeDynamic(dynamic) => Ok(dynamic),
            other => anyhow::bail!(
                "expected invoke dynamic at #{index}, found {}",
                other.tag_name()
            ),
        }
    }
}
