use crate::ir::{ClassId, FieldAccess};

/// Statically known value a field is believed to always hold.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Null,
    /// Sentinel written by a value analysis once writes disagree.
    Unknown,
}

/// Optimization facts for a field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldFacts {
    Unknown,
    Known(KnownFieldFacts),
}

#[derive(Clone, Debug, PartialEq)]
pub struct KnownFieldFacts {
    is_written: bool,
    is_read: bool,
    can_be_made_private: bool,
    referenced_class: Option<ClassId>,
    value: Option<FieldValue>,
}

impl FieldFacts {
    /// Optimistic facts for a program field. Volatile fields may be written
    /// from outside the analyzed code, so they start out written.
    pub fn known(access: &FieldAccess) -> Self {
        FieldFacts::Known(KnownFieldFacts {
            is_written: access.is_volatile,
            is_read: false,
            can_be_made_private: true,
            referenced_class: None,
            value: None,
        })
    }

    pub fn is_known(&self) -> bool {
        matches!(self, FieldFacts::Known(_))
    }

    pub fn is_kept(&self) -> bool {
        true
    }

    pub fn is_written(&self) -> bool {
        match self {
            FieldFacts::Unknown => true,
            FieldFacts::Known(facts) => facts.is_written,
        }
    }

    pub fn is_read(&self) -> bool {
        match self {
            FieldFacts::Unknown => true,
            FieldFacts::Known(facts) => facts.is_read,
        }
    }

    pub fn can_be_made_private(&self) -> bool {
        match self {
            FieldFacts::Unknown => false,
            FieldFacts::Known(facts) => facts.can_be_made_private,
        }
    }

    pub fn referenced_class(&self) -> Option<ClassId> {
        match self {
            FieldFacts::Unknown => None,
            FieldFacts::Known(facts) => facts.referenced_class,
        }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            FieldFacts::Unknown => None,
            FieldFacts::Known(facts) => facts.value.as_ref(),
        }
    }

    pub fn mark_written(&mut self) -> bool {
        match self {
            FieldFacts::Unknown => false,
            FieldFacts::Known(facts) => !std::mem::replace(&mut facts.is_written, true),
        }
    }

    pub fn mark_read(&mut self) -> bool {
        match self {
            FieldFacts::Unknown => false,
            FieldFacts::Known(facts) => !std::mem::replace(&mut facts.is_read, true),
        }
    }

    pub fn mark_can_not_be_made_private(&mut self) -> bool {
        match self {
            FieldFacts::Unknown => false,
            FieldFacts::Known(facts) => std::mem::replace(&mut facts.can_be_made_private, false),
        }
    }

    pub fn set_referenced_class(&mut self, class: Option<ClassId>) -> bool {
        match self {
            FieldFacts::Unknown => false,
            FieldFacts::Known(facts) => {
                let changed = facts.referenced_class != class;
                facts.referenced_class = class;
                changed
            }
        }
    }

    /// Overwrites the value slot. No merging happens here: detecting
    /// conflicting writes is up to the value analysis calling this.
    pub fn set_value(&mut self, value: Option<FieldValue>) -> bool {
        match self {
            FieldFacts::Unknown => false,
            FieldFacts::Known(facts) => {
                let changed = facts.value != value;
                facts.value = value;
                changed
            }
        }
    }
}
