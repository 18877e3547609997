use crate::ir::ClassId;

/// Optimization facts for a class.
///
/// `Unknown` stands for library classes and anything not yet initialized: it
/// answers every question conservatively. `Known` starts optimistic and only
/// moves towards the conservative answer as markers report evidence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClassFacts {
    Unknown(UnknownClassFacts),
    Known(KnownClassFacts),
}

/// Conservative class facts. The only state is whether the class is known to
/// be free of side effects, which also clears the derived dot-class and
/// instanceof answers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UnknownClassFacts {
    no_side_effects: bool,
}

/// Class facts computed from the program.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KnownClassFacts {
    is_dot_classed: bool,
    is_instanceofed: bool,
    is_escaping: bool,
    has_side_effects: bool,
    invokes_package_visible_members: bool,
    is_simple_enum: bool,
    may_be_merged: bool,
    wrapped_class: Option<ClassId>,
    target_class: Option<ClassId>,
}

impl ClassFacts {
    pub const UNKNOWN: ClassFacts = ClassFacts::Unknown(UnknownClassFacts {
        no_side_effects: false,
    });

    pub fn known() -> Self {
        ClassFacts::Known(KnownClassFacts::default())
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ClassFacts::Known(_))
    }

    // Not computed here; owned by the keep configuration and other passes.
    pub fn is_kept(&self) -> bool {
        true
    }

    pub fn contains_constructors(&self) -> bool {
        true
    }

    pub fn is_instantiated(&self) -> bool {
        true
    }

    pub fn is_caught(&self) -> bool {
        true
    }

    pub fn contains_package_visible_members(&self) -> bool {
        true
    }

    pub fn is_dot_classed(&self) -> bool {
        match self {
            ClassFacts::Unknown(facts) => !facts.no_side_effects,
            ClassFacts::Known(facts) => facts.is_dot_classed,
        }
    }

    pub fn is_instanceofed(&self) -> bool {
        match self {
            ClassFacts::Unknown(facts) => !facts.no_side_effects,
            ClassFacts::Known(facts) => facts.is_instanceofed,
        }
    }

    pub fn is_escaping(&self) -> bool {
        match self {
            ClassFacts::Unknown(_) => true,
            ClassFacts::Known(facts) => facts.is_escaping,
        }
    }

    pub fn has_side_effects(&self) -> bool {
        match self {
            ClassFacts::Unknown(facts) => !facts.no_side_effects,
            ClassFacts::Known(facts) => facts.has_side_effects,
        }
    }

    pub fn invokes_package_visible_members(&self) -> bool {
        match self {
            ClassFacts::Unknown(_) => true,
            ClassFacts::Known(facts) => facts.invokes_package_visible_members,
        }
    }

    pub fn is_simple_enum(&self) -> bool {
        match self {
            ClassFacts::Unknown(_) => false,
            ClassFacts::Known(facts) => facts.is_simple_enum,
        }
    }

    pub fn may_be_merged(&self) -> bool {
        match self {
            ClassFacts::Unknown(_) => false,
            ClassFacts::Known(facts) => facts.may_be_merged,
        }
    }

    pub fn wrapped_class(&self) -> Option<ClassId> {
        match self {
            ClassFacts::Unknown(_) => None,
            ClassFacts::Known(facts) => facts.wrapped_class,
        }
    }

    pub fn target_class(&self) -> Option<ClassId> {
        match self {
            ClassFacts::Unknown(_) => None,
            ClassFacts::Known(facts) => facts.target_class,
        }
    }

    /// Declares a library class free of side effects. Returns whether anything changed.
    pub fn set_no_side_effects(&mut self) -> bool {
        match self {
            ClassFacts::Unknown(facts) => !std::mem::replace(&mut facts.no_side_effects, true),
            ClassFacts::Known(_) => false,
        }
    }

    pub fn mark_dot_classed(&mut self) -> bool {
        self.mark(|facts| &mut facts.is_dot_classed)
    }

    pub fn mark_instanceofed(&mut self) -> bool {
        self.mark(|facts| &mut facts.is_instanceofed)
    }

    pub fn mark_escaping(&mut self) -> bool {
        self.mark(|facts| &mut facts.is_escaping)
    }

    pub fn mark_side_effects(&mut self) -> bool {
        self.mark(|facts| &mut facts.has_side_effects)
    }

    pub fn mark_invokes_package_visible_members(&mut self) -> bool {
        self.mark(|facts| &mut facts.invokes_package_visible_members)
    }

    pub fn set_simple_enum(&mut self, simple: bool) -> bool {
        self.assign(|facts| &mut facts.is_simple_enum, simple)
    }

    pub fn set_may_be_merged(&mut self, may_be_merged: bool) -> bool {
        self.assign(|facts| &mut facts.may_be_merged, may_be_merged)
    }

    pub fn set_wrapped_class(&mut self, class: Option<ClassId>) -> bool {
        self.assign(|facts| &mut facts.wrapped_class, class)
    }

    pub fn set_target_class(&mut self, class: Option<ClassId>) -> bool {
        self.assign(|facts| &mut facts.target_class, class)
    }

    fn mark(&mut self, flag: impl FnOnce(&mut KnownClassFacts) -> &mut bool) -> bool {
        match self {
            ClassFacts::Unknown(_) => false,
            ClassFacts::Known(facts) => !std::mem::replace(flag(facts), true),
        }
    }

    fn assign<T: PartialEq>(
        &mut self,
        slot: impl FnOnce(&mut KnownClassFacts) -> &mut T,
        value: T,
    ) -> bool {
        match self {
            ClassFacts::Unknown(_) => false,
            ClassFacts::Known(facts) => {
                let slot = slot(facts);
                if *slot == value {
                    return false;
                }
                *slot = value;
                true
            }
        }
    }
}
