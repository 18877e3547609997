use anyhow::Result;
use rayon::prelude::*;
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::facts::{ClassFacts, FieldFacts, MethodFacts};
use crate::ir::{ClassId, FieldId, MethodId, Program};
use crate::visitor::{InstructionVisitor, accept_instructions};

// Marker modules are discovered by build.rs; do not list them here.
include!(concat!(env!("OUT_DIR"), "/marker_modules.rs"));

/// Metadata describing a marker pass.
#[derive(Clone, Debug)]
pub struct MarkerMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// One whole-program pass that refines facts from evidence in the code.
///
/// A call to [`Marker::run`] is a single pass. Facts read during the pass are
/// whatever other entities hold at that moment, so callers that need stable
/// facts run the markers again until no pass reports a change.
pub trait Marker {
    fn metadata(&self) -> MarkerMetadata;

    /// Runs the pass and returns how many facts changed.
    fn run(&self, program: &mut Program, config: &AnalysisConfig) -> Result<usize>;
}

/// Wrapper struct for marker factory functions to enable inventory collection.
pub struct MarkerFactory(pub fn() -> Box<dyn Marker + Sync>);

inventory::collect!(MarkerFactory);

/// Macro to register a marker implementation.
///
/// Usage: `register_marker!(MarkerName);`
#[macro_export]
macro_rules! register_marker {
    ($marker_type:ty) => {
        inventory::submit! {
            $crate::markers::MarkerFactory(|| Box::new(<$marker_type>::default()))
        }
    };
}

/// Returns all registered markers, sorted by id.
pub fn all_markers() -> Vec<Box<dyn Marker + Sync>> {
    let mut markers: Vec<Box<dyn Marker + Sync>> = inventory::iter::<MarkerFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect();
    markers.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));
    markers
}

/// Runs a fresh `V` over every program method body in parallel and returns
/// each visitor with the method it walked, in declaration order.
pub(crate) fn visit_bodies<V>(program: &Program) -> Result<Vec<(MethodId, V)>>
where
    V: InstructionVisitor + Default + Send,
{
    program
        .program_methods_with_code()
        .into_par_iter()
        .map(|method| {
            let mut visitor = V::default();
            accept_instructions(&mut visitor, program, method)?;
            Ok((method, visitor))
        })
        .collect()
}

/// Applies `update` to the facts attached to `class`. Classes without
/// attached facts keep their conservative defaults.
pub(crate) fn update_class_facts(
    program: &mut Program,
    class: ClassId,
    fact: &'static str,
    update: impl FnOnce(&mut ClassFacts) -> bool,
) -> bool {
    let target = program.class_mut(class);
    let changed = target.facts_mut().is_some_and(update);
    if changed {
        debug!(class = %target.name, fact, "class fact changed");
    }
    changed
}

pub(crate) fn update_field_facts(
    program: &mut Program,
    field: FieldId,
    fact: &'static str,
    update: impl FnOnce(&mut FieldFacts) -> bool,
) -> bool {
    let changed = program.field_mut(field).facts_mut().is_some_and(update);
    if changed {
        debug!(field = %program.describe_field(field), fact, "field fact changed");
    }
    changed
}

pub(crate) fn update_method_facts(
    program: &mut Program,
    method: MethodId,
    fact: &'static str,
    update: impl FnOnce(&mut MethodFacts) -> bool,
) -> bool {
    let changed = program.method_mut(method).facts_mut().is_some_and(update);
    if changed {
        debug!(method = %program.describe_method(method), fact, "method fact changed");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_markers_are_sorted_and_unique() {
        let ids: Vec<&str> = all_markers()
            .iter()
            .map(|marker| marker.metadata().id)
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
        assert!(ids.contains(&"PARAMETER_ESCAPE"));
        assert!(ids.contains(&"BACKWARD_BRANCH"));
        assert_eq!(ids.len(), 10);
    }
}
