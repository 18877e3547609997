use anyhow::Result;
use optfacts::builder::{Assembler, ClassBuilder, assemble_program};
use optfacts::config::{AnalysisConfig, select_markers};
use optfacts::engine::{run_markers, total_changes};
use optfacts::filters::EscapingClassFilter;
use optfacts::ir::{ClassId, FieldAccess, FieldId, MethodAccess, MethodId, Program};
use optfacts::opcodes;
use optfacts::side_effects::SideEffectInstructionChecker;
use optfacts::visitor::ClassVisitor;

const APP: &str = "com/example/App";

fn static_method() -> MethodAccess {
    MethodAccess {
        is_static: true,
        ..MethodAccess::default()
    }
}

/// `remember` stores its argument in a static field, `forward` hands its own
/// argument to `remember`, `literal` loads a class literal and `spin` loops.
fn sample_program() -> Program {
    let target = ClassBuilder::program("com/example/Target");
    let mut app = ClassBuilder::program(APP);
    app.field(
        "cache",
        "Ljava/lang/Object;",
        FieldAccess {
            is_static: true,
            ..FieldAccess::default()
        },
    );
    let cache = app.field_ref(APP, "cache", "Ljava/lang/Object;");
    let remember = app.method_ref(APP, "remember", "(Ljava/lang/Object;)V");
    let target_literal = app.class_constant("com/example/Target");

    let body = Assembler::new()
        .op(opcodes::ALOAD_0)
        .op_u16(opcodes::PUTSTATIC, cache)
        .op(opcodes::RETURN)
        .finish(1)
        .expect("remember");
    app.method("remember", "(Ljava/lang/Object;)V", static_method(), Some(body));

    let body = Assembler::new()
        .op(opcodes::ALOAD_0)
        .op_u16(opcodes::INVOKESTATIC, remember)
        .op(opcodes::RETURN)
        .finish(1)
        .expect("forward");
    app.method("forward", "(Ljava/lang/Object;)V", static_method(), Some(body));

    let body = Assembler::new()
        .op_u8(opcodes::LDC, u8::try_from(target_literal).expect("small pool"))
        .op(opcodes::ARETURN)
        .finish(0)
        .expect("literal");
    app.method("literal", "()Ljava/lang/Object;", static_method(), Some(body));

    let body = Assembler::new()
        .op(opcodes::NOP)
        .branch(opcodes::GOTO, -1)
        .finish(0)
        .expect("spin");
    app.method("spin", "()V", static_method(), Some(body));

    assemble_program([target.build(), app.build()]).expect("program")
}

fn method_id(program: &Program, index: usize) -> MethodId {
    MethodId {
        class: program.class_id(APP).expect("class"),
        index,
    }
}

fn run_to_fixed_point(program: &mut Program, config: &AnalysisConfig) -> usize {
    let markers = select_markers(config).expect("markers");
    let mut passes = 0;
    loop {
        passes += 1;
        assert!(passes < 10, "no fixed point");
        let reports = run_markers(program, config, &markers, None).expect("pass");
        if total_changes(&reports) == 0 {
            return passes;
        }
    }
}

#[test]
fn all_markers_converge_on_sample_program() {
    let mut program = sample_program();
    let config = AnalysisConfig::default();

    let passes = run_to_fixed_point(&mut program, &config);

    assert_eq!(passes, 3);
    let remember = program.method(method_id(&program, 0)).facts();
    assert!(remember.is_parameter_escaping(0));
    assert!(remember.modifies_anything());
    let forward = program.method(method_id(&program, 1)).facts();
    assert!(forward.is_parameter_escaping(0));
    assert!(forward.modifies_anything());
    let literal = program.method(method_id(&program, 2)).facts();
    assert!(!literal.returns_external_values() && !literal.returns_new_instances());
    assert!(!literal.has_backward_branches());
    assert!(program.method(method_id(&program, 3)).facts().has_backward_branches());

    let target = program.class_id("com/example/Target").expect("class");
    assert!(program.class(target).facts().is_dot_classed());
    assert!(!program.class(target).facts().is_escaping());

    let app = program.class_id(APP).expect("class");
    let cache = program.field(FieldId { class: app, index: 0 }).facts();
    assert!(cache.is_written());
    assert!(!cache.is_read());
}

#[test]
fn call_into_modifying_callee_is_a_side_effect_after_convergence() {
    let mut program = sample_program();
    let config = AnalysisConfig::default();
    let forward = method_id(&program, 1);
    let call = |program: &Program| -> bool {
        let code = program.method(forward).code.as_ref().expect("body");
        let checker = SideEffectInstructionChecker::new(program, config.side_effects);
        checker
            .has_side_effects(forward.class, &code.instructions[1])
            .expect("check")
    };
    assert!(!call(&program));

    run_to_fixed_point(&mut program, &config);

    assert!(call(&program));
}

#[test]
fn configured_subset_only_touches_its_facts() {
    let mut program = sample_program();
    let config =
        AnalysisConfig::from_json(r#"{"markers": ["BACKWARD_BRANCH", "DOT_CLASS"]}"#).expect("config");

    run_to_fixed_point(&mut program, &config);

    assert!(program.method(method_id(&program, 3)).facts().has_backward_branches());
    assert!(!program.method(method_id(&program, 0)).facts().is_parameter_escaping(0));
    let target = program.class_id("com/example/Target").expect("class");
    assert!(program.class(target).facts().is_dot_classed());
}

#[test]
fn escaping_filter_routes_program_classes() {
    let mut program = sample_program();
    let target = program.class_id("com/example/Target").expect("class");
    let app = program.class_id(APP).expect("class");
    program
        .class_mut(target)
        .facts_mut()
        .expect("facts")
        .mark_escaping();
    let mut escaping = Vec::new();
    let mut on_escaping = |_: &mut Program, class: ClassId| -> Result<()> {
        escaping.push(class);
        Ok(())
    };

    let mut filter = EscapingClassFilter::escaping_only(&mut on_escaping);
    for class in [target, app] {
        filter.visit_class(&mut program, class).expect("visit");
    }
    drop(filter);

    assert_eq!(escaping, vec![target]);
}
