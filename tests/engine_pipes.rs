#![cfg(unix)]

mod common;

use common::*;
use nami::ast::{BinaryOp, Param};
use nami::{Engine, ErrorKind, Value};

fn run(body: Vec<nami::ast::Expr>) -> Value {
    Engine::new().execute(module(body)).expect("execution succeeds")
}

fn sh(script: &str) -> nami::ast::Expr {
    call("sh", vec![bareword("-c"), string(script)])
}

#[test]
fn value_position_programs_yield_pipes_of_lines() {
    let result = run(vec![call(
        "join",
        vec![sh("printf 'a\\nb\\n'"), string(",")],
    )]);
    assert_eq!(result, Value::string("a,b"));
}

#[test]
fn pipeline_threads_a_list_into_a_program() {
    let result = run(vec![call(
        "join",
        vec![
            pipe(
                list(vec![string("x"), string("y"), string("z")]),
                call("cat", vec![]),
            ),
            string("-"),
        ],
    )]);
    assert_eq!(result, Value::string("x-y-z"));
}

#[test]
fn programs_chain_through_pipes() {
    let result = run(vec![call(
        "join",
        vec![pipe(sh("printf '1\\n2\\n'"), call("cat", vec![]))],
    )]);
    assert_eq!(result, Value::string("12"));
}

#[test]
fn piping_a_pipe_into_std_functions_inserts_it_as_first_argument() {
    let result = run(vec![pipe(
        sh("printf '3\\n4\\n'"),
        call_with_closure(
            "map",
            vec![],
            &["line"],
            vec![binary(BinaryOp::Add, var("line"), string("!"))],
        ),
    )]);
    assert_eq!(
        result,
        Value::list(vec![Value::string("3!"), Value::string("4!")])
    );
}

#[test]
fn for_loops_consume_pipe_lines_lazily() {
    let result = run(vec![
        let_("acc", list(vec![])),
        for_(
            &["line"],
            sh("printf 'one\\ntwo\\n'"),
            block(vec![call("push", vec![var("acc"), var("line")])]),
        ),
        var("acc"),
    ]);
    assert_eq!(
        result,
        Value::list(vec![Value::string("one"), Value::string("two")])
    );
}

#[test]
fn root_programs_set_the_shell_exit_variable() {
    let mut engine = Engine::new();
    engine
        .execute(module(vec![sh("exit 7"), int(0)]))
        .expect("root program run");
    assert_eq!(engine.last_exit_code(), 7);

    // `?` reads back through the dollar-variable surface.
    let result = engine
        .execute(module(vec![var("$?")]))
        .expect("read $?");
    assert_eq!(result, Value::Integer(7));
}

#[test]
fn pipe_completion_updates_the_shell_exit_variable() {
    let mut engine = Engine::new();
    engine
        .execute(module(vec![sh("exit 7"), int(0)]))
        .expect("seed a non-zero exit code");
    assert_eq!(engine.last_exit_code(), 7);

    engine
        .execute(module(vec![call("join", vec![sh("printf 'ok\\n'")])]))
        .expect("drained pipe");
    assert_eq!(engine.last_exit_code(), 0);
}

#[test]
fn missing_programs_fail_with_not_found_naming_them() {
    let err = Engine::new()
        .execute(module(vec![call("nami-no-such-program-zz", vec![])]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.message.contains("nami-no-such-program-zz"));
}

#[test]
fn draining_a_failed_pipe_raises_unless_stderr_was_redirected() {
    let err = Engine::new()
        .execute(module(vec![call("join", vec![sh("exit 3")])]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("status 3"));
}

#[test]
fn stderr_is_subscribed_into_the_line_buffer() {
    let result = run(vec![pipe(
        sh("echo out; echo err 1>&2"),
        call_with_closure("filter", vec![], &["l"], vec![boolean(true)]),
    )]);
    let Value::List(lines) = result else {
        panic!("expected a list of lines");
    };
    let mut lines: Vec<String> = lines
        .borrow()
        .iter()
        .map(Value::to_display_string)
        .collect();
    lines.sort();
    assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
}

#[test]
fn exec_runs_a_program_named_at_runtime() {
    let result = run(vec![call(
        "join",
        vec![call("exec", vec![string("echo"), string("hi")])],
    )]);
    assert_eq!(result, Value::string("hi"));
}

#[test]
fn exec_accepts_a_piped_value() {
    let result = run(vec![call(
        "join",
        vec![pipe(string("through"), call("exec", vec![string("cat")]))],
    )]);
    assert_eq!(result, Value::string("through"));
}

#[test]
fn maybe_root_calls_inherit_the_callers_root_context() {
    // A root call at the top level keeps its body's programs on the
    // shell pipeline; the exit code lands in `?`.
    let runner = function(
        "runner",
        vec![Param::required("code")],
        vec![
            call(
                "sh",
                vec![
                    bareword("-c"),
                    interp(vec![text_part("exit "), expr_part(var("code"))]),
                ],
            ),
            nil(),
        ],
    );
    let mut engine = Engine::new();
    engine
        .execute(module(vec![runner, call("runner", vec![int(5)]), int(0)]))
        .expect("root call");
    assert_eq!(engine.last_exit_code(), 5);
}

#[test]
fn dynamic_program_references_resolve_at_runtime() {
    // `true` is no user function, so the reference falls back to the
    // program on PATH.
    let mut engine = Engine::new();
    engine
        .execute(module(vec![
            call("call", vec![fref("true")]),
            int(0),
        ]))
        .expect("dynamic program call");
    assert_eq!(engine.last_exit_code(), 0);
}

#[test]
fn failing_producer_feeds_its_diagnostics_downstream() {
    // The producer's stderr is merged into its pipe, so the consumer
    // sees the diagnostic; the run itself succeeds.
    let result = run(vec![call(
        "join",
        vec![pipe(
            call("cat", vec![bareword("/nami/definitely/missing.txt")]),
            call("cat", vec![]),
        )],
    )]);
    let Value::String(text) = result else {
        panic!("expected joined output");
    };
    assert!(!text.is_empty());
}
