use anyhow::{Context, Result};

use crate::config::AnalysisConfig;
use crate::facts::ClassFacts;
use crate::ir::{ClassId, Program};
use crate::markers::{Marker, MarkerMetadata, update_class_facts};
use crate::visitor::ClassVisitor;

/// Marks classes reachable from outside the analyzed code.
///
/// As a pass it seeds the exception types caught by handlers, since the
/// runtime creates and throws those. As a [`ClassVisitor`] it marks every
/// class it is handed, for callers that discover escapes themselves.
#[derive(Default)]
pub struct EscapingClassMarker;

crate::register_marker!(EscapingClassMarker);

impl Marker for EscapingClassMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "ESCAPING_CLASS",
            name: "Escaping classes",
            description: "Caught exception types escape the analyzed code",
        }
    }

    fn run(&self, program: &mut Program, _config: &AnalysisConfig) -> Result<usize> {
        let caught = caught_classes(program)?;
        let mut changed = 0;
        for class in caught {
            if mark(program, class) {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl ClassVisitor for EscapingClassMarker {
    fn visit_class(&mut self, program: &mut Program, class: ClassId) -> Result<()> {
        mark(program, class);
        Ok(())
    }
}

fn mark(program: &mut Program, class: ClassId) -> bool {
    update_class_facts(program, class, "escaping", ClassFacts::mark_escaping)
}

fn caught_classes(program: &Program) -> Result<Vec<ClassId>> {
    let mut caught = Vec::new();
    for method in program.program_methods_with_code() {
        let pool = &program.class(method.class).constant_pool;
        let Some(code) = program.method(method).code.as_ref() else {
            continue;
        };
        for handler in &code.exception_handlers {
            let Some(index) = handler.catch_type else {
                continue;
            };
            let constant = pool
                .class(index)
                .with_context(|| format!("catch type of {}", program.describe_method(method)))?;
            caught.extend(constant.referenced_class);
        }
    }
    caught.sort();
    caught.dedup();
    Ok(caught)
}
