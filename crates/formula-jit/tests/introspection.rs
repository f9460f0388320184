//! The introspection surface: instruction texts, argument counts, flags,
//! and the five pool/sequence counters.

use formula_jit::{CompileOptions, Engine};

#[test]
fn main_sequence_text_is_stable() {
    let mut engine = Engine::with_options(CompileOptions {
        optimize_stack_pushes: false,
        ..CompileOptions::default()
    });
    engine.compile("X0*X1+2").expect("compile");
    let program = engine.program().expect("program");
    assert_eq!(
        program.main_sequence_text(),
        "push x0\npush x1\nmul\npush 2\nadd"
    );
}

#[test]
fn sequence_texts_cover_every_sequence_with_main_last() {
    let mut engine = Engine::new();
    engine.compile("IF(X0<3,1,2)+IF(X0<3,1,2)").expect("compile");
    let program = engine.program().expect("program");
    let texts = program.sequence_texts();
    assert_eq!(
        texts.len(),
        1 + program.subterm_count() + program.vector_subterm_count()
    );
    // The extracted conditional comes first, the main sequence last.
    assert!(texts[0].contains("jumpfalse"));
    assert!(texts[1].contains("sub[0]"));
}

#[test]
fn argument_counts_and_flags() {
    let mut engine = Engine::new();
    engine
        .compile("subTotal(X1{},0,X4)+mean({1,{2,3}})")
        .expect("compile");
    let program = engine.program().expect("program");
    assert_eq!(program.scalar_arg_count(), 5);
    assert_eq!(program.vector_arg_count(), 2);
    assert!(program.has_vector());
    assert!(program.has_nested_vector());
    assert!(!program.has_jump());
}

#[test]
fn the_five_counters() {
    let mut engine = Engine::new();
    engine
        .compile("exp(pi)+X0*1.5+(X1+X2)*(X1+X2)+sum({X1,7})+sum({X1,7})+count({8,9})")
        .expect("compile");
    let program = engine.program().expect("program");
    // exp(pi) and the fully-constant count({8,9}) are calculated constants;
    // {8,9} lands in the vector constant pool; the repeated sum({X1,7}) is
    // a vector subterm; the repeated (X1+X2) is a scalar subterm.
    assert_eq!(program.calculated_constant_count(), 2);
    assert_eq!(program.vector_constant_count(), 1);
    assert_eq!(program.subterm_count(), 1);
    assert_eq!(program.vector_subterm_count(), 1);
    assert!(program.constant_count() >= 1);
    assert_eq!(
        program.sequence_texts().len(),
        1 + program.subterm_count() + program.vector_subterm_count()
    );

    let value = engine.evaluate(&[2.0, 3.0, 4.0], &[]);
    let expected = std::f64::consts::PI.exp() + 3.0 + 49.0 + 10.0 + 10.0 + 2.0;
    assert!((value - expected).abs() < 1e-9, "got {value}");
}

#[test]
fn uncompiled_engine_exposes_no_program() {
    let engine = Engine::new();
    assert!(engine.program().is_none());
    assert!(!engine.is_compiled());
}
