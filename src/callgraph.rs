use std::collections::{BTreeMap, BTreeSet};

use crate::constant_pool::MethodRefConstant;
use crate::facts::MethodFacts;
use crate::ir::{ClassId, MethodId, Program};
use crate::opcodes;

/// Dispatch kind of a call instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CallKind {
    Virtual,
    Special,
    Static,
    Interface,
    Dynamic,
}

impl CallKind {
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            opcodes::INVOKEVIRTUAL => Some(CallKind::Virtual),
            opcodes::INVOKESPECIAL => Some(CallKind::Special),
            opcodes::INVOKESTATIC => Some(CallKind::Static),
            opcodes::INVOKEINTERFACE => Some(CallKind::Interface),
            opcodes::INVOKEDYNAMIC => Some(CallKind::Dynamic),
            _ => None,
        }
    }

    pub fn has_receiver(self) -> bool {
        matches!(
            self,
            CallKind::Virtual | CallKind::Special | CallKind::Interface
        )
    }
}

/// Direct subtypes of every class, for class hierarchy analysis.
#[derive(Clone, Debug, Default)]
pub struct ClassHierarchy {
    subtypes: BTreeMap<ClassId, Vec<ClassId>>,
}

impl ClassHierarchy {
    pub fn build(program: &Program) -> Self {
        let mut subtypes: BTreeMap<ClassId, Vec<ClassId>> = BTreeMap::new();
        for class_id in program.class_ids() {
            let class = program.class(class_id);
            let parents = class
                .super_class
                .into_iter()
                .chain(class.interfaces.iter().filter_map(|name| program.class_id(name)));
            for parent in parents {
                subtypes.entry(parent).or_default().push(class_id);
            }
        }
        for children in subtypes.values_mut() {
            children.sort();
            children.dedup();
        }
        Self { subtypes }
    }

    /// Transitive subtypes of `class`, excluding `class` itself.
    pub fn descendants(&self, class: ClassId) -> BTreeSet<ClassId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![class];
        while let Some(current) = stack.pop() {
            for child in self.subtypes.get(&current).into_iter().flatten() {
                if *child != class && seen.insert(*child) {
                    stack.push(*child);
                }
            }
        }
        seen
    }
}

/// Resolves call sites to the facts of every method they may reach.
pub struct CallResolver<'a> {
    program: &'a Program,
    hierarchy: ClassHierarchy,
}

impl<'a> CallResolver<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            hierarchy: ClassHierarchy::build(program),
        }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    /// Methods with a body a call may execute, or `None` when the target set
    /// cannot be determined from the program.
    pub fn targets(&self, kind: CallKind, method_ref: &MethodRefConstant) -> Option<Vec<MethodId>> {
        let resolved = method_ref.referenced_method?;
        if self.program.class(resolved.class).is_library() {
            return None;
        }
        let mut targets = BTreeSet::new();
        let resolved_method = self.program.method(resolved);
        if resolved_method.code.is_some() {
            targets.insert(resolved);
        } else if !resolved_method.access.is_abstract {
            // Native or library bodies.
            return None;
        }
        if matches!(kind, CallKind::Virtual | CallKind::Interface)
            && !resolved_method.access.is_private
            && !resolved_method.access.is_static
        {
            let owner = method_ref.referenced_class.unwrap_or(resolved.class);
            for descendant in self.hierarchy.descendants(owner) {
                let class = self.program.class(descendant);
                let Some(index) = class.find_method(&method_ref.name, &method_ref.descriptor)
                else {
                    continue;
                };
                let method = &class.methods[index];
                if method.access.is_static || method.access.is_abstract {
                    continue;
                }
                if method.code.is_none() {
                    return None;
                }
                targets.insert(MethodId {
                    class: descendant,
                    index,
                });
            }
        }
        if targets.is_empty() {
            return None;
        }
        Some(targets.into_iter().collect())
    }

    /// Facts that hold for whichever method the call ends up in.
    pub fn callee_facts(&self, kind: CallKind, method_ref: &MethodRefConstant) -> MethodFacts {
        if kind == CallKind::Dynamic {
            return MethodFacts::Unknown;
        }
        let Some(targets) = self.targets(kind, method_ref) else {
            return MethodFacts::Unknown;
        };
        let mut facts = targets.iter().map(|target| *self.program.method(*target).facts());
        let Some(first) = facts.next() else {
            return MethodFacts::Unknown;
        };
        facts.fold(first, |joined, next| joined.join(&next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Assembler, ClassBuilder, assemble_program};
    use crate::ir::{Code, MethodAccess};

    fn body() -> Code {
        Assembler::new()
            .op(opcodes::RETURN)
            .finish(1)
            .expect("code")
    }

    fn program_with_override() -> (Program, u16) {
        let mut base = ClassBuilder::program("com/example/Base");
        base.method("target", "()V", MethodAccess::default(), Some(body()));
        let mut sub = ClassBuilder::program("com/example/Sub");
        sub.super_class("com/example/Base");
        sub.method("target", "()V", MethodAccess::default(), Some(body()));
        let mut caller = ClassBuilder::program("com/example/Caller");
        let call = caller.method_ref("com/example/Base", "target", "()V");
        let program =
            assemble_program([base.build(), sub.build(), caller.build()]).expect("program");
        (program, call)
    }

    #[test]
    fn virtual_calls_include_overrides() {
        let (program, call) = program_with_override();
        let caller = program.class_id("com/example/Caller").expect("caller");
        let method_ref = program
            .class(caller)
            .constant_pool
            .method_ref(call)
            .expect("method ref");
        let resolver = CallResolver::new(&program);

        let virtual_targets = resolver
            .targets(CallKind::Virtual, method_ref)
            .expect("targets");
        let special_targets = resolver
            .targets(CallKind::Special, method_ref)
            .expect("targets");

        assert_eq!(virtual_targets.len(), 2);
        assert_eq!(special_targets.len(), 1);
    }

    #[test]
    fn callee_facts_join_overrides() {
        let (mut program, call) = program_with_override();
        let sub = program.class_id("com/example/Sub").expect("sub");
        program
            .method_mut(MethodId { class: sub, index: 0 })
            .facts_mut()
            .expect("facts")
            .mark_escaping_parameter(0);
        let caller = program.class_id("com/example/Caller").expect("caller");
        let method_ref = program
            .class(caller)
            .constant_pool
            .method_ref(call)
            .expect("method ref")
            .clone();
        let resolver = CallResolver::new(&program);

        let virtual_facts = resolver.callee_facts(CallKind::Virtual, &method_ref);
        let special_facts = resolver.callee_facts(CallKind::Special, &method_ref);

        assert!(virtual_facts.is_parameter_escaping(0));
        assert!(!special_facts.is_parameter_escaping(0));
        assert!(!virtual_facts.modifies_anything());
    }

    #[test]
    fn library_and_dynamic_calls_are_unknown() {
        let mut library = ClassBuilder::library("java/util/List");
        library.method(
            "size",
            "()I",
            MethodAccess {
                is_abstract: true,
                ..MethodAccess::default()
            },
            None,
        );
        let mut caller = ClassBuilder::program("com/example/Caller");
        let call = caller.interface_method_ref("java/util/List", "size", "()I");
        let program = assemble_program([library.build(), caller.build()]).expect("program");
        let caller = program.class_id("com/example/Caller").expect("caller");
        let method_ref = program
            .class(caller)
            .constant_pool
            .method_ref(call)
            .expect("method ref");
        let resolver = CallResolver::new(&program);

        assert_eq!(
            resolver.callee_facts(CallKind::Interface, method_ref),
            MethodFacts::Unknown
        );
        assert_eq!(
            resolver.callee_facts(CallKind::Dynamic, method_ref),
            MethodFacts::Unknown
        );
    }
}
