//! Compile-time failure reporting: every failure kind carries its
//! documented parameters and renders a stable message.

use formula_jit::{Engine, FailureKind};

fn compile_err(formula: &str) -> formula_jit::CompileError {
    let mut engine = Engine::new();
    engine
        .compile(formula)
        .expect_err("formula should fail to compile")
}

#[test]
fn bare_variable_name_is_an_invalid_token() {
    let err = compile_err("X");
    assert_eq!(err.kind(), FailureKind::InvalidToken);
    assert_eq!(err.diagnostic().params(), ["X"]);
}

#[test]
fn unknown_identifier_reports_its_text() {
    let err = compile_err("X0 + foo(1)");
    assert_eq!(err.kind(), FailureKind::InvalidToken);
    assert_eq!(err.diagnostic().params(), ["foo"]);
}

#[test]
fn trailing_operator_is_an_invalid_last_token() {
    let err = compile_err("X0 + ");
    assert_eq!(err.kind(), FailureKind::InvalidLastToken);
    assert_eq!(err.diagnostic().params(), ["+"]);
}

#[test]
fn unbalanced_brackets_report_both_counts() {
    let err = compile_err("ln((5.5)");
    assert_eq!(err.kind(), FailureKind::UnequalBracketCount);
    assert_eq!(err.diagnostic().params(), ["2", "1"]);
}

#[test]
fn wrong_argument_count_reports_name_and_required() {
    let err = compile_err("log(5.5)");
    assert_eq!(err.kind(), FailureKind::WrongArgumentCount);
    assert_eq!(err.diagnostic().params(), ["log", "2"]);
    assert_eq!(
        err.diagnostic().message(),
        "function 'log' requires exactly 2 argument(s)"
    );
}

#[test]
fn comma_as_decimal_point_fails_to_compile() {
    let mut engine = Engine::new();
    assert!(engine.compile("1,2345").is_err());
    assert!(!engine.is_compiled());
}

#[test]
fn forbidden_character_reports_the_character() {
    let err = compile_err("X0 # 1");
    assert_eq!(err.kind(), FailureKind::ForbiddenCharacter);
    assert_eq!(err.diagnostic().params(), ["#"]);
}

#[test]
fn success_resets_the_diagnostic() {
    let mut engine = Engine::new();
    assert!(engine.compile("log(5.5)").is_err());
    assert_eq!(engine.diagnostic().kind(), FailureKind::WrongArgumentCount);

    engine.compile("X0+1").expect("compile");
    assert!(engine.diagnostic().is_success());
    assert_eq!(engine.diagnostic().message(), "formula compiled successfully");
}

#[test]
fn failure_discards_the_previous_program() {
    let mut engine = Engine::new();
    engine.compile("X0+1").expect("compile");
    assert!(engine.is_compiled());

    assert!(engine.compile("ln((5.5)").is_err());
    assert!(!engine.is_compiled());
    assert!(engine.program().is_none());
    assert_eq!(engine.diagnostic().kind(), FailureKind::UnequalBracketCount);
}

#[test]
fn message_template_table_is_exposed() {
    let templates = formula_jit::message_templates();
    assert_eq!(
        templates[FailureKind::Success.code()],
        "formula compiled successfully"
    );
    assert_eq!(
        templates[FailureKind::UnequalBracketCount.code()],
        "unequal bracket count: {0} opening, {1} closing"
    );
}

#[test]
fn no_fault_escapes_pathological_inputs() {
    let unclosed = "(".repeat(200);
    let deeply_nested = format!("{}1{}", "(".repeat(80), ")".repeat(80));
    let mut engine = Engine::new();
    for formula in [
        "",
        "   ",
        "(((((((",
        ")",
        "{}",
        "IF(,,)",
        "X0{",
        "X0{}{}",
        "X99999999999999999999",
        unclosed.as_str(),
        deeply_nested.as_str(),
    ] {
        assert!(engine.compile(formula).is_err(), "expected failure: {formula:?}");
        assert!(!engine.is_compiled());
    }
}
