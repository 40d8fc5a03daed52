mod common;

use common::*;
use nami::ast::{BinaryOp, Param};
use nami::{Engine, ErrorKind, Value};

fn run(body: Vec<nami::ast::Expr>) -> Value {
    Engine::new().execute(module(body)).expect("execution succeeds")
}

/// `fn sum(a, b = 5, *rest) => a + b + len(rest)`
fn sum_decl() -> nami::ast::Expr {
    function(
        "sum",
        vec![
            Param::required("a"),
            Param::with_default("b", int(5)),
            Param::variadic("rest"),
        ],
        vec![binary(
            BinaryOp::Add,
            binary(BinaryOp::Add, var("a"), var("b")),
            call("len", vec![var("rest")]),
        )],
    )
}

#[test]
fn defaults_and_variadic_tail() {
    assert_eq!(
        run(vec![sum_decl(), call("sum", vec![int(1)])]),
        Value::Integer(6)
    );
    assert_eq!(
        run(vec![
            sum_decl(),
            call("sum", vec![int(1), int(2), int(3), int(4)]),
        ]),
        Value::Integer(5)
    );
}

#[test]
fn missing_required_argument_reports_full_arity() {
    let err = Engine::new()
        .execute(module(vec![sum_decl(), call("sum", vec![])]))
        .unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::WrongArgumentCount {
            expected: 3,
            actual: 0,
            variadic: true,
        }
    );
}

#[test]
fn recursion_preserves_the_operand_stack() {
    // fn fact(n) => if n <= 1 { 1 } else { n * fact(n - 1) }
    let fact = function(
        "fact",
        vec![Param::required("n")],
        vec![if_(
            binary(BinaryOp::LessEqual, var("n"), int(1)),
            int(1),
            Some(binary(
                BinaryOp::Mul,
                var("n"),
                call("fact", vec![binary(BinaryOp::Sub, var("n"), int(1))]),
            )),
        )],
    );
    assert_eq!(
        run(vec![fact, call("fact", vec![int(5)])]),
        Value::Integer(120)
    );
}

#[test]
fn mutually_recursive_functions_resolve_out_of_order() {
    let is_even = function(
        "isEven",
        vec![Param::required("n")],
        vec![if_(
            binary(BinaryOp::Equal, var("n"), int(0)),
            boolean(true),
            Some(call("isOdd", vec![binary(BinaryOp::Sub, var("n"), int(1))])),
        )],
    );
    let is_odd = function(
        "isOdd",
        vec![Param::required("n")],
        vec![if_(
            binary(BinaryOp::Equal, var("n"), int(0)),
            boolean(false),
            Some(call("isEven", vec![binary(BinaryOp::Sub, var("n"), int(1))])),
        )],
    );
    assert_eq!(
        run(vec![is_even, is_odd, call("isEven", vec![int(10)])]),
        Value::Boolean(true)
    );
}

#[test]
fn return_exits_the_frame_early() {
    let f = function(
        "firstNegative",
        vec![Param::required("items")],
        vec![
            for_(
                &["x"],
                var("items"),
                block(vec![if_(
                    binary(BinaryOp::Less, var("x"), int(0)),
                    block(vec![ret(Some(var("x")))]),
                    None,
                )]),
            ),
            nil(),
        ],
    );
    assert_eq!(
        run(vec![
            f,
            call(
                "firstNegative",
                vec![list(vec![int(3), int(-7), int(5)])],
            ),
        ]),
        Value::Integer(-7)
    );
}

#[test]
fn closures_capture_enclosing_variables() {
    let result = run(vec![
        let_("n", int(10)),
        pipe(
            list(vec![int(1), int(2)]),
            call_with_closure(
                "map",
                vec![],
                &["x"],
                vec![binary(BinaryOp::Add, var("x"), var("n"))],
            ),
        ),
    ]);
    assert_eq!(
        result,
        Value::list(vec![Value::Integer(11), Value::Integer(12)])
    );
}

#[test]
fn captures_are_snapshots_taken_at_construction() {
    // The closure is built while n is 1; the later re-assignment is not
    // visible through the captured frame.
    let result = run(vec![
        let_("n", int(1)),
        let_(
            "c",
            closure(&["x"], vec![binary(BinaryOp::Add, var("x"), var("n"))]),
        ),
        assign("n", int(2)),
        call("call", vec![var("c"), int(100)]),
    ]);
    assert_eq!(result, Value::Integer(101));
}

#[test]
fn piping_into_a_closure_threads_the_value_as_first_argument() {
    let result = run(vec![pipe(
        int(5),
        closure(&["x"], vec![binary(BinaryOp::Mul, var("x"), int(2))]),
    )]);
    assert_eq!(result, Value::Integer(10));
}

#[test]
fn function_references_dispatch_through_call() {
    let double = function(
        "double",
        vec![Param::required("x")],
        vec![binary(BinaryOp::Mul, var("x"), int(2))],
    );
    let result = run(vec![
        double,
        call("call", vec![fref("double"), int(21)]),
    ]);
    assert_eq!(result, Value::Integer(42));

    // Std targets resolve too.
    let result = run(vec![call("call", vec![fref("len"), string("abc")])]);
    assert_eq!(result, Value::Integer(3));
}

#[test]
fn closure_builtin_invokes_the_attached_closure() {
    // fn twice(x) => closure(x) + closure(x), with closure in signature.
    let twice = function_with_closure(
        "twice",
        vec![Param::required("x")],
        vec![binary(
            BinaryOp::Add,
            call("closure", vec![var("x")]),
            call("closure", vec![var("x")]),
        )],
    );
    let result = run(vec![
        twice,
        call_with_closure(
            "twice",
            vec![int(3)],
            &["v"],
            vec![binary(BinaryOp::Mul, var("v"), int(10))],
        ),
    ]);
    assert_eq!(result, Value::Integer(60));
}

#[test]
fn closure_builtin_outside_a_closure_taking_function_is_rejected() {
    let err = Engine::new()
        .execute(module(vec![call("closure", vec![int(1)])]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ExpectedClosure);
}

#[test]
fn closures_on_plain_callees_are_rejected() {
    let plain = function("plain", vec![Param::required("x")], vec![var("x")]);
    let err = Engine::new()
        .execute(module(vec![
            plain,
            call_with_closure("plain", vec![int(1)], &["v"], vec![var("v")]),
        ]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnexpectedClosure);
}

#[test]
fn module_members_resolve_through_paths() {
    let result = run(vec![
        submodule(
            "math",
            vec![function(
                "square",
                vec![Param::required("x")],
                vec![binary(BinaryOp::Mul, var("x"), var("x"))],
            )],
        ),
        call_in(&["math"], "square", vec![int(7)]),
    ]);
    assert_eq!(result, Value::Integer(49));
}

#[test]
fn unknown_module_paths_fail_with_module_not_found() {
    let err = Engine::new()
        .execute(module(vec![call_in(&["nowhere"], "f", vec![])]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ModuleNotFound);
    assert!(err.message.contains("nowhere"));
}

#[test]
fn imported_functions_resolve_unqualified() {
    let mut engine = Engine::new();
    engine
        .execute(module(vec![submodule(
            "util",
            vec![function("five", vec![], vec![int(5)])],
        )]))
        .expect("declaration");

    let root = engine.symbols().root_module();
    let util = engine
        .symbols()
        .resolve_module_path(root, &["util".to_string()])
        .expect("module declared");
    let five = engine
        .symbols()
        .lookup_function(util, "five", false)
        .expect("function declared");
    engine.symbols_mut().import_function(root, five);

    let result = engine
        .execute(module(vec![call("five", vec![])]))
        .expect("imported call");
    assert_eq!(result, Value::Integer(5));
}

#[test]
fn structs_construct_read_and_mutate_by_field() {
    let point = struct_("Point", vec![Param::required("x"), Param::required("y")]);
    let result = run(vec![
        point.clone(),
        let_("p", new_(&["Point"], vec![int(1), int(2)])),
        binary(BinaryOp::Assign, index(var("p"), string("x")), int(9)),
        binary(BinaryOp::Add, field(var("p"), "x"), field(var("p"), "y")),
    ]);
    assert_eq!(result, Value::Integer(11));

    let err = Engine::new()
        .execute(module(vec![
            point,
            new_(&["Point"], vec![int(1)]),
        ]))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::WrongArgumentCount { .. }));
}

#[test]
fn field_assignment_is_not_an_assignment_target() {
    let point = struct_("Point", vec![Param::required("x")]);
    let err = Engine::new()
        .execute(module(vec![
            point,
            let_("p", new_(&["Point"], vec![int(1)])),
            binary(BinaryOp::Assign, field(var("p"), "x"), int(2)),
        ]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidAssignment);
}

#[test]
fn std_struct_fallback_backs_new_error() {
    let result = run(vec![
        let_("e", new_(&["Error"], vec![string("boom")])),
        field(var("e"), "message"),
    ]);
    assert_eq!(result, Value::string("boom"));
}

#[test]
fn error_builtin_raises_a_runtime_error() {
    let err = Engine::new()
        .execute(module(vec![call("error", vec![string("kaput")])]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("kaput"));
}

#[test]
fn script_path_builtin_exposes_the_script_directory() {
    let mut engine = Engine::new();
    engine.set_script_path("/opt/scripts/tool.na");
    let result = engine
        .execute(module(vec![call("scriptPath", vec![])]))
        .expect("scriptPath");
    assert_eq!(result, Value::string("/opt/scripts"));
}

#[test]
fn cd_to_a_missing_directory_is_not_found() {
    let err = Engine::new()
        .execute(module(vec![call(
            "cd",
            vec![string("/definitely/not/a/dir")],
        )]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[test]
fn builtin_names_are_never_shadowed_by_user_functions() {
    // Declaring a user function named `error` does not shadow the
    // built-in classification.
    let fake = function("error", vec![Param::required("m")], vec![int(0)]);
    let err = Engine::new()
        .execute(module(vec![fake, call("error", vec![string("still boom")])]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("still boom"));
}

#[test]
fn std_collection_functions_work_with_closures() {
    let filtered = run(vec![pipe(
        list(vec![int(1), int(2), int(3), int(4)]),
        call_with_closure(
            "filter",
            vec![],
            &["x"],
            vec![binary(BinaryOp::Greater, var("x"), int(2))],
        ),
    )]);
    assert_eq!(
        filtered,
        Value::list(vec![Value::Integer(3), Value::Integer(4)])
    );

    let any = run(vec![pipe(
        list(vec![int(1), int(5)]),
        call_with_closure(
            "any",
            vec![],
            &["x"],
            vec![binary(BinaryOp::Greater, var("x"), int(4))],
        ),
    )]);
    assert_eq!(any, Value::Boolean(true));
}
