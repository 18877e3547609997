use anyhow::Result;
use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::constant_pool::{
    ClassConstant, FieldRefConstant, MemberRef, MethodRefConstant, StringConstant,
};
use crate::facts::ClassFacts;
use crate::ir::{ClassId, Program};
use crate::markers::{Marker, MarkerMetadata, update_class_facts};
use crate::visitor::{ConstantVisitor, accept_constants};

/// Marks classes whose constant pool references a package-private class or
/// member declared elsewhere. Such classes cannot move to another package.
#[derive(Default)]
pub struct PackageVisibleMemberInvokingMarker;

crate::register_marker!(PackageVisibleMemberInvokingMarker);

impl Marker for PackageVisibleMemberInvokingMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "PACKAGE_VISIBLE_MEMBER_INVOKING",
            name: "Package-visible member references",
            description: "Classes referencing package-private classes or members of other classes",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let classes: Vec<ClassId> = program.program_class_ids().collect();
        let coupled: Vec<ClassId> = classes
            .into_par_iter()
            .map(|class| {
                let mut references = PackageVisibleReferences::default();
                accept_constants(&mut references, program, class)?;
                Ok(references.found.then_some(class))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        let mut changed = 0;
        for class in coupled {
            if update_class_facts(
                program,
                class,
                "invokes_package_visible_members",
                ClassFacts::mark_invokes_package_visible_members,
            ) {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
struct PackageVisibleReferences {
    found: bool,
}

impl PackageVisibleReferences {
    fn check(
        &mut self,
        program: &Program,
        visiting: ClassId,
        class: Option<ClassId>,
        member: Option<MemberRef>,
    ) {
        if class == Some(visiting) {
            return;
        }
        if let Some(class) = class {
            self.found |= !program.class(class).access.is_public;
        }
        if let Some(member) = member {
            self.found |= match member {
                MemberRef::Field(field) => program.field(field).access.is_package_visible(),
                MemberRef::Method(method) => program.method(method).access.is_package_visible(),
            };
        }
    }
}

impl ConstantVisitor for PackageVisibleReferences {
    fn visit_class_constant(
        &mut self,
        program: &Program,
        class: ClassId,
        _index: u16,
        constant: &ClassConstant,
    ) -> Result<()> {
        self.check(program, class, constant.referenced_class, None);
        Ok(())
    }

    fn visit_string_constant(
        &mut self,
        program: &Program,
        class: ClassId,
        _index: u16,
        constant: &StringConstant,
    ) -> Result<()> {
        self.check(
            program,
            class,
            constant.referenced_class,
            constant.referenced_member,
        );
        Ok(())
    }

    fn visit_field_ref_constant(
        &mut self,
        program: &Program,
        class: ClassId,
        _index: u16,
        constant: &FieldRefConstant,
    ) -> Result<()> {
        self.check(
            program,
            class,
            constant.referenced_class,
            constant.referenced_field.map(MemberRef::Field),
        );
        Ok(())
    }

    fn visit_method_ref_constant(
        &mut self,
        program: &Program,
        class: ClassId,
        _index: u16,
        constant: &MethodRefConstant,
    ) -> Result<()> {
        self.check(
            program,
            class,
            constant.referenced_class,
            constant.referenced_method.map(MemberRef::Method),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ClassBuilder, assemble_program};
    use crate::constant_pool::ReflectiveName;
    use crate::ir::{ClassAccess, FieldAccess, MethodAccess};

    fn public_class(name: &str) -> ClassBuilder {
        let mut builder = ClassBuilder::program(name);
        builder.access(ClassAccess {
            is_public: true,
            ..ClassAccess::default()
        });
        builder
    }

    fn run(program: &mut Program) -> usize {
        PackageVisibleMemberInvokingMarker
            .run(program, &AnalysisConfig::default())
            .expect("run")
    }

    fn invokes(program: &Program, name: &str) -> bool {
        let class = program.class_id(name).expect("class");
        program.class(class).facts().invokes_package_visible_members()
    }

    #[test]
    fn package_private_member_of_other_class_marks_caller() {
        let mut target = public_class("com/example/Target");
        target.field("count", "I", FieldAccess::default());
        let mut app = public_class("com/example/App");
        app.field_ref("com/example/Target", "count", "I");
        let mut program = assemble_program([target.build(), app.build()]).expect("program");

        assert_eq!(run(&mut program), 1);
        assert!(invokes(&program, "com/example/App"));
        assert!(!invokes(&program, "com/example/Target"));
    }

    #[test]
    fn package_private_class_marks_caller() {
        let hidden = ClassBuilder::program("com/example/Hidden");
        let mut app = public_class("com/example/App");
        app.class_constant("com/example/Hidden");
        let mut program = assemble_program([hidden.build(), app.build()]).expect("program");

        run(&mut program);

        assert!(invokes(&program, "com/example/App"));
    }

    #[test]
    fn self_references_are_excluded() {
        let mut app = ClassBuilder::program("com/example/App");
        app.method("helper", "()V", MethodAccess::default(), None);
        app.class_constant("com/example/App");
        app.method_ref("com/example/App", "helper", "()V");
        let mut program = assemble_program([app.build()]).expect("program");

        assert_eq!(run(&mut program), 0);
        assert!(!invokes(&program, "com/example/App"));
    }

    fn field_name(class_name: &str) -> ReflectiveName {
        ReflectiveName::Field {
            class_name: class_name.to_string(),
            name: "value".to_string(),
            descriptor: "I".to_string(),
        }
    }

    #[test]
    fn strings_naming_own_class_are_excluded() {
        let mut app = public_class("com/example/App");
        app.field("value", "I", FieldAccess::default());
        app.string_naming(
            "com.example.App",
            ReflectiveName::Class("com/example/App".to_string()),
        );
        app.string_naming("value", field_name("com/example/App"));
        let mut program = assemble_program([app.build()]).expect("program");

        assert_eq!(run(&mut program), 0);
    }

    #[test]
    fn inherited_member_named_through_own_class_is_excluded() {
        let mut base = public_class("com/example/Base");
        base.field("value", "I", FieldAccess::default());
        let mut app = public_class("com/example/App");
        app.super_class("com/example/Base");
        app.string_naming("value", field_name("com/example/App"));
        let mut program = assemble_program([base.build(), app.build()]).expect("program");

        assert_eq!(run(&mut program), 0);
        assert!(!invokes(&program, "com/example/App"));
    }

    #[test]
    fn other_class_name_resolving_into_own_member_marks_class() {
        let mut app = public_class("com/example/App");
        app.field("value", "I", FieldAccess::default());
        app.string_naming("value", field_name("com/example/Sub"));
        let mut sub = public_class("com/example/Sub");
        sub.super_class("com/example/App");
        let mut program = assemble_program([app.build(), sub.build()]).expect("program");

        run(&mut program);

        assert!(invokes(&program, "com/example/App"));
        assert!(!invokes(&program, "com/example/Sub"));
    }

    #[test]
    fn public_members_of_public_classes_are_fine() {
        let mut target = public_class("com/example/Target");
        target.method(
            "run",
            "()V",
            MethodAccess {
                is_public: true,
                ..MethodAccess::default()
            },
            None,
        );
        let mut app = public_class("com/example/App");
        app.method_ref("com/example/Target", "run", "()V");
        let mut program = assemble_program([target.build(), app.build()]).expect("program");

        assert_eq!(run(&mut program), 0);
    }
}
