use tracing::warn;

use super::ParameterMask;

/// Optimization facts for a method.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MethodFacts {
    /// Library methods, methods without a body, and anything not yet analyzed.
    Unknown,
    Known(KnownMethodFacts),
}

/// Facts accumulated while analyzing a method body. Masks only grow and
/// flags only go from `false` to `true`, except through
/// [`MethodFacts::clear_escaping_parameters`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KnownMethodFacts {
    escaping_parameters: ParameterMask,
    modified_parameters: ParameterMask,
    returned_parameters: ParameterMask,
    returns_new_instances: bool,
    returns_external_values: bool,
    modifies_anything: bool,
    invokes_super_methods: bool,
    assigns_final_field: bool,
    has_backward_branches: bool,
}

impl MethodFacts {
    pub fn known() -> Self {
        MethodFacts::Known(KnownMethodFacts::default())
    }

    pub fn is_known(&self) -> bool {
        matches!(self, MethodFacts::Known(_))
    }

    pub fn is_kept(&self) -> bool {
        true
    }

    /// Facts valid for a call that may reach either method. Unknown wins.
    pub fn join(&self, other: &MethodFacts) -> MethodFacts {
        let (MethodFacts::Known(left), MethodFacts::Known(right)) = (self, other) else {
            return MethodFacts::Unknown;
        };
        MethodFacts::Known(KnownMethodFacts {
            escaping_parameters: left.escaping_parameters | right.escaping_parameters,
            modified_parameters: left.modified_parameters | right.modified_parameters,
            returned_parameters: left.returned_parameters | right.returned_parameters,
            returns_new_instances: left.returns_new_instances || right.returns_new_instances,
            returns_external_values: left.returns_external_values
                || right.returns_external_values,
            modifies_anything: left.modifies_anything || right.modifies_anything,
            invokes_super_methods: left.invokes_super_methods || right.invokes_super_methods,
            assigns_final_field: left.assigns_final_field || right.assigns_final_field,
            has_backward_branches: left.has_backward_branches || right.has_backward_branches,
        })
    }

    pub fn escaping_parameters(&self) -> ParameterMask {
        self.mask(|facts| facts.escaping_parameters)
    }

    pub fn modified_parameters(&self) -> ParameterMask {
        self.mask(|facts| facts.modified_parameters)
    }

    pub fn returned_parameters(&self) -> ParameterMask {
        self.mask(|facts| facts.returned_parameters)
    }

    pub fn is_parameter_escaping(&self, index: usize) -> bool {
        self.escaping_parameters().contains(index)
    }

    pub fn is_parameter_modified(&self, index: usize) -> bool {
        self.modified_parameters().contains(index)
    }

    pub fn is_parameter_returned(&self, index: usize) -> bool {
        self.returned_parameters().contains(index)
    }

    pub fn returns_new_instances(&self) -> bool {
        self.flag(|facts| facts.returns_new_instances)
    }

    pub fn returns_external_values(&self) -> bool {
        self.flag(|facts| facts.returns_external_values)
    }

    pub fn modifies_anything(&self) -> bool {
        self.flag(|facts| facts.modifies_anything)
    }

    pub fn invokes_super_methods(&self) -> bool {
        self.flag(|facts| facts.invokes_super_methods)
    }

    pub fn assigns_final_field(&self) -> bool {
        self.flag(|facts| facts.assigns_final_field)
    }

    pub fn has_backward_branches(&self) -> bool {
        self.flag(|facts| facts.has_backward_branches)
    }

    pub fn union_escaping_parameters(&mut self, mask: ParameterMask) -> bool {
        self.union(mask, |facts| &mut facts.escaping_parameters)
    }

    pub fn union_modified_parameters(&mut self, mask: ParameterMask) -> bool {
        self.union(mask, |facts| &mut facts.modified_parameters)
    }

    pub fn union_returned_parameters(&mut self, mask: ParameterMask) -> bool {
        self.union(mask, |facts| &mut facts.returned_parameters)
    }

    pub fn mark_escaping_parameter(&mut self, index: usize) -> bool {
        self.mark_parameter(index, |facts| &mut facts.escaping_parameters)
    }

    pub fn mark_modified_parameter(&mut self, index: usize) -> bool {
        self.mark_parameter(index, |facts| &mut facts.modified_parameters)
    }

    pub fn mark_returned_parameter(&mut self, index: usize) -> bool {
        self.mark_parameter(index, |facts| &mut facts.returned_parameters)
    }

    /// Empties the escaping mask of a method proven not to let any parameter escape.
    pub fn clear_escaping_parameters(&mut self) -> bool {
        match self {
            MethodFacts::Unknown => false,
            MethodFacts::Known(facts) => {
                let changed = !facts.escaping_parameters.is_empty();
                facts.escaping_parameters = ParameterMask::NONE;
                changed
            }
        }
    }

    pub fn mark_returns_new_instances(&mut self) -> bool {
        self.mark(|facts| &mut facts.returns_new_instances)
    }

    pub fn mark_returns_external_values(&mut self) -> bool {
        self.mark(|facts| &mut facts.returns_external_values)
    }

    pub fn mark_modifies_anything(&mut self) -> bool {
        self.mark(|facts| &mut facts.modifies_anything)
    }

    pub fn mark_invokes_super_methods(&mut self) -> bool {
        self.mark(|facts| &mut facts.invokes_super_methods)
    }

    pub fn mark_assigns_final_field(&mut self) -> bool {
        self.mark(|facts| &mut facts.assigns_final_field)
    }

    pub fn mark_has_backward_branches(&mut self) -> bool {
        self.mark(|facts| &mut facts.has_backward_branches)
    }

    fn mask(&self, read: impl FnOnce(&KnownMethodFacts) -> ParameterMask) -> ParameterMask {
        match self {
            MethodFacts::Unknown => ParameterMask::ALL,
            MethodFacts::Known(facts) => read(facts),
        }
    }

    fn flag(&self, read: impl FnOnce(&KnownMethodFacts) -> bool) -> bool {
        match self {
            MethodFacts::Unknown => true,
            MethodFacts::Known(facts) => read(facts),
        }
    }

    fn mark(&mut self, flag: impl FnOnce(&mut KnownMethodFacts) -> &mut bool) -> bool {
        match self {
            MethodFacts::Unknown => false,
            MethodFacts::Known(facts) => !std::mem::replace(flag(facts), true),
        }
    }

    fn union(
        &mut self,
        mask: ParameterMask,
        slot: impl FnOnce(&mut KnownMethodFacts) -> &mut ParameterMask,
    ) -> bool {
        match self {
            MethodFacts::Unknown => false,
            MethodFacts::Known(facts) => {
                let slot = slot(facts);
                let merged = *slot | mask;
                let changed = merged != *slot;
                *slot = merged;
                changed
            }
        }
    }

    fn mark_parameter(
        &mut self,
        index: usize,
        slot: impl FnOnce(&mut KnownMethodFacts) -> &mut ParameterMask,
    ) -> bool {
        match ParameterMask::bit(index) {
            Some(bit) => self.union(bit, slot),
            None => {
                warn!(
                    index,
                    capacity = ParameterMask::CAPACITY,
                    "parameter index exceeds mask capacity; ignored"
                );
                false
            }
        }
    }
}
