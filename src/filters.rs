//! Two-way routers that splice fact checks into a larger visitor pipeline.
//!
//! Each filter reads one fact of the visited element and forwards the visit
//! to one of two handlers. A missing handler turns that branch into a no-op.

use anyhow::Result;

use crate::ir::{ClassId, MethodId, Program};
use crate::visitor::{ClassVisitor, CodeVisitor};

/// Routes classes on their `is_escaping` fact.
pub struct EscapingClassFilter<'a> {
    escaping: Option<&'a mut dyn ClassVisitor>,
    other: Option<&'a mut dyn ClassVisitor>,
}

impl<'a> EscapingClassFilter<'a> {
    pub fn new(
        escaping: Option<&'a mut dyn ClassVisitor>,
        other: Option<&'a mut dyn ClassVisitor>,
    ) -> Self {
        Self { escaping, other }
    }

    /// Filter that only sees escaping classes.
    pub fn escaping_only(escaping: &'a mut dyn ClassVisitor) -> Self {
        Self::new(Some(escaping), None)
    }
}

impl ClassVisitor for EscapingClassFilter<'_> {
    fn visit_class(&mut self, program: &mut Program, class: ClassId) -> Result<()> {
        let handler = if program.class(class).facts().is_escaping() {
            self.escaping.as_deref_mut()
        } else {
            self.other.as_deref_mut()
        };
        match handler {
            Some(handler) => handler.visit_class(program, class),
            None => Ok(()),
        }
    }
}

/// Routes method bodies on whether they carry code facts (kept bodies).
/// Methods without a body are ignored.
pub struct OptimizationCodeAttributeFilter<'a> {
    optimizable: Option<&'a mut dyn CodeVisitor>,
    kept: Option<&'a mut dyn CodeVisitor>,
}

impl<'a> OptimizationCodeAttributeFilter<'a> {
    pub fn new(
        optimizable: Option<&'a mut dyn CodeVisitor>,
        kept: Option<&'a mut dyn CodeVisitor>,
    ) -> Self {
        Self { optimizable, kept }
    }

    pub fn optimizable_only(optimizable: &'a mut dyn CodeVisitor) -> Self {
        Self::new(Some(optimizable), None)
    }
}

impl CodeVisitor for OptimizationCodeAttributeFilter<'_> {
    fn visit_code(&mut self, program: &mut Program, method: MethodId) -> Result<()> {
        let Some(code) = program.method(method).code.as_ref() else {
            return Ok(());
        };
        let handler = if code.is_kept() {
            self.kept.as_deref_mut()
        } else {
            self.optimizable.as_deref_mut()
        };
        match handler {
            Some(handler) => handler.visit_code(program, method),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Assembler, ClassBuilder, assemble_program};
    use crate::facts::CodeFacts;
    use crate::ir::MethodAccess;
    use crate::markers::escaping_class::EscapingClassMarker;
    use crate::opcodes;

    fn two_classes() -> (Program, ClassId, ClassId) {
        let program = assemble_program([
            ClassBuilder::program("com/example/Thrown").build(),
            ClassBuilder::program("com/example/Local").build(),
        ])
        .expect("program");
        let thrown = program.class_id("com/example/Thrown").expect("class");
        let local = program.class_id("com/example/Local").expect("class");
        (program, thrown, local)
    }

    #[test]
    fn escaping_class_with_only_other_handler_is_silent() {
        let (mut program, thrown, _) = two_classes();
        EscapingClassMarker
            .visit_class(&mut program, thrown)
            .expect("mark");
        let mut visited = Vec::new();
        let mut other = |_: &mut Program, class: ClassId| -> Result<()> {
            visited.push(class);
            Ok(())
        };

        EscapingClassFilter::new(None, Some(&mut other))
            .visit_class(&mut program, thrown)
            .expect("visit");

        assert!(visited.is_empty());
    }

    #[test]
    fn classes_route_on_escaping_fact() {
        let (mut program, thrown, local) = two_classes();
        EscapingClassMarker
            .visit_class(&mut program, thrown)
            .expect("mark");
        let mut escaping = Vec::new();
        let mut other = Vec::new();
        let mut on_escaping = |_: &mut Program, class: ClassId| -> Result<()> {
            escaping.push(class);
            Ok(())
        };
        let mut on_other = |_: &mut Program, class: ClassId| -> Result<()> {
            other.push(class);
            Ok(())
        };

        let mut filter = EscapingClassFilter::new(Some(&mut on_escaping), Some(&mut on_other));
        filter.visit_class(&mut program, thrown).expect("visit");
        filter.visit_class(&mut program, local).expect("visit");
        drop(filter);

        assert_eq!(escaping, vec![thrown]);
        assert_eq!(other, vec![local]);
    }

    #[test]
    fn library_classes_count_as_escaping() {
        let mut program =
            assemble_program([ClassBuilder::library("java/lang/Error").build()]).expect("program");
        let error = program.class_id("java/lang/Error").expect("class");
        let mut hits = 0;
        let mut on_escaping = |_: &mut Program, _: ClassId| -> Result<()> {
            hits += 1;
            Ok(())
        };

        EscapingClassFilter::escaping_only(&mut on_escaping)
            .visit_class(&mut program, error)
            .expect("visit");

        assert_eq!(hits, 1);
    }

    #[test]
    fn bodies_route_on_kept_fact() {
        let mut app = ClassBuilder::program("com/example/App");
        let body = Assembler::new()
            .op(opcodes::RETURN)
            .finish(1)
            .expect("code");
        app.method("free", "()V", MethodAccess::default(), Some(body.clone()));
        app.method("pinned", "()V", MethodAccess::default(), Some(body));
        app.method("abstractly", "()V", MethodAccess::default(), None);
        let mut program = assemble_program([app.build()]).expect("program");
        let class = program.class_id("com/example/App").expect("class");
        let methods: Vec<MethodId> = program.method_ids(class).collect();
        let code = program.method_mut(methods[1]).code.as_mut().expect("body");
        code.set_facts(CodeFacts);
        let mut optimizable = Vec::new();
        let mut kept = Vec::new();
        let mut on_optimizable = |_: &mut Program, method: MethodId| -> Result<()> {
            optimizable.push(method);
            Ok(())
        };
        let mut on_kept = |_: &mut Program, method: MethodId| -> Result<()> {
            kept.push(method);
            Ok(())
        };

        let mut filter =
            OptimizationCodeAttributeFilter::new(Some(&mut on_optimizable), Some(&mut on_kept));
        for method in &methods {
            filter.visit_code(&mut program, *method).expect("visit");
        }
        drop(filter);

        assert_eq!(optimizable, vec![methods[0]]);
        assert_eq!(kept, vec![methods[1]]);
    }

    #[test]
    fn kept_body_without_kept_handler_is_skipped() {
        let mut app = ClassBuilder::program("com/example/App");
        let body = Assembler::new()
            .op(opcodes::RETURN)
            .finish(1)
            .expect("code");
        app.method("pinned", "()V", MethodAccess::default(), Some(body));
        let mut program = assemble_program([app.build()]).expect("program");
        let class = program.class_id("com/example/App").expect("class");
        let method = program.method_ids(class).next().expect("method");
        let code = program.method_mut(method).code.as_mut().expect("body");
        code.set_facts(CodeFacts);
        let mut hits = 0;
        let mut on_optimizable = |_: &mut Program, _: MethodId| -> Result<()> {
            hits += 1;
            Ok(())
        };

        OptimizationCodeAttributeFilter::optimizable_only(&mut on_optimizable)
            .visit_code(&mut program, method)
            .expect("visit");

        assert_eq!(hits, 0);
    }
}
