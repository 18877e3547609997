use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::AnalysisConfig;
use crate::ir::Program;
use crate::markers::Marker;
use crate::telemetry::{Telemetry, current_trace_id, in_marker_span};

/// Outcome of one marker pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PassReport {
    pub marker_id: &'static str,
    pub changed: usize,
    pub duration_ms: u128,
}

/// Runs each marker once, in order, over `program`.
///
/// This is a single pass per marker. A driver that wants stable facts calls
/// this again until every report has `changed == 0`. The first failing
/// marker aborts the run; its error names the marker and the offending
/// class or method.
pub fn run_markers<M>(
    program: &mut Program,
    config: &AnalysisConfig,
    markers: &[M],
    telemetry: Option<&Telemetry>,
) -> Result<Vec<PassReport>>
where
    M: AsRef<dyn Marker + Sync>,
{
    let mut reports = Vec::with_capacity(markers.len());
    for marker in markers {
        let marker = marker.as_ref();
        let metadata = marker.metadata();
        let started_at = Instant::now();
        let changed = in_marker_span(telemetry, &metadata, || {
            let changed = marker
                .run(program, config)
                .with_context(|| format!("marker {} failed", metadata.id))?;
            info!(
                marker = metadata.id,
                changed,
                trace_id = current_trace_id().as_deref().unwrap_or(""),
                "marker pass finished"
            );
            Ok(changed)
        })?;
        reports.push(PassReport {
            marker_id: metadata.id,
            changed,
            duration_ms: started_at.elapsed().as_millis(),
        });
    }
    Ok(reports)
}

/// Total number of fact changes across `reports`.
pub fn total_changes(reports: &[PassReport]) -> usize {
    reports.iter().map(|report| report.changed).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Assembler, ClassBuilder, assemble_program};
    use crate::config::select_markers;
    use crate::ir::MethodAccess;
    use crate::markers::all_markers;
    use crate::opcodes;

    fn looping_program() -> Program {
        let mut app = ClassBuilder::program("com/example/App");
        let body = Assembler::new()
            .op(opcodes::NOP)
            .branch(opcodes::GOTO, -1)
            .finish(1)
            .expect("code");
        app.method("spin", "()V", MethodAccess::default(), Some(body));
        assemble_program([app.build()]).expect("program")
    }

    #[test]
    fn reports_follow_marker_order() {
        let mut program = looping_program();
        let config = AnalysisConfig::default();
        let markers = all_markers();

        let reports = run_markers(&mut program, &config, &markers, None).expect("run");

        let ids: Vec<&str> = reports.iter().map(|report| report.marker_id).collect();
        let expected: Vec<&str> = markers.iter().map(|marker| marker.metadata().id).collect();
        assert_eq!(ids, expected);
        let backward = reports
            .iter()
            .find(|report| report.marker_id == "BACKWARD_BRANCH")
            .expect("report");
        assert_eq!(backward.changed, 1);
    }

    #[test]
    fn second_run_reaches_fixed_point() {
        let mut program = looping_program();
        let config = AnalysisConfig {
            markers: Some(vec!["BACKWARD_BRANCH".to_string()]),
            ..AnalysisConfig::default()
        };
        let markers = select_markers(&config).expect("markers");

        let first = run_markers(&mut program, &config, &markers, None).expect("run");
        let second = run_markers(&mut program, &config, &markers, None).expect("run");

        assert_eq!(total_changes(&first), 1);
        assert_eq!(total_changes(&second), 0);
    }

    #[test]
    fn malformed_code_names_marker_and_method() {
        let mut app = ClassBuilder::program("com/example/Broken");
        let body = Assembler::new()
            .op(opcodes::ALOAD_0)
            .op(opcodes::ARETURN)
            .finish(0)
            .expect("code");
        // Reads local 0 although the frame has no locals.
        app.method(
            "broken",
            "()Ljava/lang/Object;",
            MethodAccess {
                is_static: true,
                ..MethodAccess::default()
            },
            Some(body),
        );
        let mut program = assemble_program([app.build()]).expect("program");
        let config = AnalysisConfig {
            markers: Some(vec!["PARAMETER_ESCAPE".to_string()]),
            ..AnalysisConfig::default()
        };
        let markers = select_markers(&config).expect("markers");

        let err = run_markers(&mut program, &config, &markers, None).expect_err("malformed");

        let message = format!("{err:#}");
        assert!(message.contains("PARAMETER_ESCAPE"), "{message}");
        assert!(message.contains("com/example/Broken.broken"), "{message}");
    }
}
