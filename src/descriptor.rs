use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// One formal parameter as seen by the callee, receiver included.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParameterSlot {
    /// Local variable slots occupied (2 for long and double).
    pub size: usize,
    pub is_reference: bool,
}

/// Formal parameters in index order; index 0 is the receiver for instance methods.
pub fn parameter_slots(descriptor: &str, is_static: bool) -> Result<Vec<ParameterSlot>> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("parse method descriptor {descriptor}"))?;
    let mut slots = Vec::with_capacity(parsed.parameter_types().len() + 1);
    if !is_static {
        slots.push(ParameterSlot {
            size: 1,
            is_reference: true,
        });
    }
    for parameter in parsed.parameter_types() {
        slots.push(ParameterSlot {
            size: type_size(parameter),
            is_reference: is_reference_type(parameter),
        });
    }
    Ok(slots)
}

/// Return kind of a JVM method descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReturnKind {
    Void,
    Primitive { size: usize },
    Reference,
}

impl ReturnKind {
    /// Operand stack slots the return value occupies.
    pub fn size(self) -> usize {
        match self {
            ReturnKind::Void => 0,
            ReturnKind::Primitive { size } => size,
            ReturnKind::Reference => 1,
        }
    }
}

/// Determine the return kind from a JVM method descriptor.
pub fn method_return_kind(descriptor: &str) -> Result<ReturnKind> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("parse method descriptor {descriptor}"))?;
    let kind = match parsed.return_type() {
        TypeDescriptor::Void => ReturnKind::Void,
        TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => ReturnKind::Reference,
        other => ReturnKind::Primitive {
            size: type_size(other),
        },
    };
    Ok(kind)
}

/// Operand stack slots of a field value.
pub fn field_size(descriptor: &str) -> Result<usize> {
    match descriptor.as_bytes().first() {
        Some(b'J' | b'D') => Ok(2),
        Some(b'B' | b'C' | b'F' | b'I' | b'S' | b'Z' | b'L' | b'[') => Ok(1),
        _ => anyhow::bail!("invalid field descriptor {descriptor:?}"),
    }
}

/// Whether a field descriptor names an object or array type.
pub fn is_reference_field(descriptor: &str) -> bool {
    matches!(descriptor.as_bytes().first(), Some(b'L' | b'['))
}

fn type_size(ty: &TypeDescriptor) -> usize {
    if matches!(ty, TypeDescriptor::Long | TypeDescriptor::Double) {
        2
    } else {
        1
    }
}

fn is_reference_type(ty: &TypeDescriptor) -> bool {
    matches!(ty, TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _))
}
