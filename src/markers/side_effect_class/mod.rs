use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::facts::ClassFacts;
use crate::ir::{ClassId, Program};
use crate::markers::{Marker, MarkerMetadata, update_class_facts};
use crate::side_effects::SideEffectInstructionChecker;

/// Marks program classes whose initialization has side effects: their own
/// `<clinit>` contains a side-effecting instruction, or a program superclass
/// has side effects. Library superclasses are initialized by the runtime
/// regardless and do not count.
#[derive(Default)]
pub struct SideEffectClassMarker;

crate::register_marker!(SideEffectClassMarker);

impl Marker for SideEffectClassMarker {
    fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata {
            id: "SIDE_EFFECT_CLASS",
            name: "Class initialization side effects",
            description: "Classes whose static initialization has side effects",
        }
    }

    fn run(&self, program: &mut Program, config: &AnalysisConfig) -> Result<usize> {
        let initializing = classes_with_side_effects(program, config)?;
        let mut changed = 0;
        for class in initializing {
            if update_class_facts(program, class, "side_effects", ClassFacts::mark_side_effects) {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

fn classes_with_side_effects(program: &Program, config: &AnalysisConfig) -> Result<Vec<ClassId>> {
    let checker = SideEffectInstructionChecker::new(program, config.side_effects);
    let classes: Vec<ClassId> = program.program_class_ids().collect();
    let own: BTreeSet<ClassId> = classes
        .par_iter()
        .map(|class| {
            Ok(initializer_has_side_effects(program, &checker, *class)?.then_some(*class))
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    Ok(classes
        .into_iter()
        .filter(|class| {
            superclass_chain(program, *class).any(|ancestor| {
                let ancestor_class = program.class(ancestor);
                own.contains(&ancestor)
                    || (!ancestor_class.is_library() && ancestor_class.facts().has_side_effects())
            })
        })
        .collect())
}

fn initializer_has_side_effects(
    program: &Program,
    checker: &SideEffectInstructionChecker<'_>,
    class: ClassId,
) -> Result<bool> {
    let declared = program.class(class);
    let Some(code) = declared
        .methods
        .iter()
        .find(|method| method.is_class_initializer())
        .and_then(|method| method.code.as_ref())
    else {
        return Ok(false);
    };
    checker
        .has_side_effects_in(class, code, 0, u32::MAX)
        .with_context(|| format!("{}.<clinit>", declared.name))
}

/// `class` followed by its resolved superclasses.
fn superclass_chain(program: &Program, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
    let mut seen = BTreeSet::new();
    std::iter::successors(Some(class), move |current| program.class(*current).super_class)
        .take_while(move |current| seen.insert(*current))
}
