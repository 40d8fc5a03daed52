mod common;

use common::*;
use nami::ast::{BinaryOp, UnaryOp};
use nami::{Engine, ErrorKind, Value};

fn run(body: Vec<nami::ast::Expr>) -> Value {
    Engine::new().execute(module(body)).expect("execution succeeds")
}

#[test]
fn let_binding_and_arithmetic() {
    let result = run(vec![
        let_("x", binary(BinaryOp::Add, int(1), int(2))),
        var("x"),
    ]);
    assert_eq!(result, Value::Integer(3));
}

#[test]
fn mixed_numeric_arithmetic_promotes_to_float() {
    let result = run(vec![binary(BinaryOp::Mul, int(2), float(1.5))]);
    assert_eq!(result, Value::Float(3.0));
}

#[test]
fn list_indexing_and_out_of_range() {
    let body = |idx: i64| {
        vec![
            let_("xs", list(vec![int(10), int(20), int(30)])),
            index(var("xs"), int(idx)),
        ]
    };
    assert_eq!(run(body(1)), Value::Integer(20));

    let err = Engine::new().execute(module(body(5))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.message.contains('5'));
}

#[test]
fn indexed_assignment_mutates_in_place() {
    let result = run(vec![
        let_("xs", list(vec![int(1), int(2)])),
        binary(BinaryOp::Assign, index(var("xs"), int(0)), int(9)),
        index(var("xs"), int(0)),
    ]);
    assert_eq!(result, Value::Integer(9));
}

#[test]
fn assignment_to_an_unknown_variable_is_not_found() {
    let err = Engine::new()
        .execute(module(vec![assign("ghost", int(1))]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[test]
fn assignment_to_a_literal_is_invalid() {
    let err = Engine::new()
        .execute(module(vec![binary(BinaryOp::Assign, int(1), int(2))]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidAssignment);
}

#[test]
fn tuple_destructuring_let() {
    let result = run(vec![
        let_many(&["a", "b"], tuple(vec![int(4), int(6)])),
        binary(BinaryOp::Add, var("a"), var("b")),
    ]);
    assert_eq!(result, Value::Integer(10));
}

#[test]
fn if_yields_its_branch_value() {
    let result = run(vec![if_(
        binary(BinaryOp::Less, int(1), int(2)),
        string("yes"),
        Some(string("no")),
    )]);
    assert_eq!(result, Value::string("yes"));

    let result = run(vec![if_(boolean(false), int(1), None)]);
    assert_eq!(result, Value::Nil);
}

#[test]
fn while_loop_with_break() {
    let result = run(vec![
        let_("i", int(0)),
        while_(
            boolean(true),
            block(vec![
                assign("i", binary(BinaryOp::Add, var("i"), int(1))),
                if_(
                    binary(BinaryOp::GreaterEqual, var("i"), int(3)),
                    block(vec![brk()]),
                    None,
                ),
            ]),
        ),
        var("i"),
    ]);
    assert_eq!(result, Value::Integer(3));
}

#[test]
fn for_loop_accumulates_over_lists_and_ranges() {
    let over_list = run(vec![
        let_("acc", int(0)),
        for_(
            &["x"],
            list(vec![int(1), int(2), int(3)]),
            block(vec![assign("acc", binary(BinaryOp::Add, var("acc"), var("x")))]),
        ),
        var("acc"),
    ]);
    assert_eq!(over_list, Value::Integer(6));

    let over_range = run(vec![
        let_("acc", int(0)),
        for_(
            &["x"],
            range(int(1), int(4), false),
            block(vec![assign("acc", binary(BinaryOp::Add, var("acc"), var("x")))]),
        ),
        var("acc"),
    ]);
    assert_eq!(over_range, Value::Integer(6));
}

#[test]
fn blocks_scope_their_locals_and_yield_their_last_value() {
    let result = run(vec![
        let_("x", int(1)),
        let_(
            "y",
            block(vec![
                let_("inner", int(40)),
                binary(BinaryOp::Add, var("inner"), int(2)),
            ]),
        ),
        binary(BinaryOp::Add, var("x"), var("y")),
    ]);
    assert_eq!(result, Value::Integer(43));
}

#[test]
fn string_interpolation_uses_display_forms() {
    let result = run(vec![
        let_("x", int(3)),
        interp(vec![text_part("x="), expr_part(var("x")), text_part("!")]),
    ]);
    assert_eq!(result, Value::string("x=3!"));
}

#[test]
fn dictionaries_and_sets() {
    let result = run(vec![
        let_("d", dict(vec![(string("a"), int(1))])),
        binary(BinaryOp::Assign, index(var("d"), string("b")), int(2)),
        index(var("d"), string("b")),
    ]);
    assert_eq!(result, Value::Integer(2));

    let contains = run(vec![
        let_("s", set_lit(vec![string("x"), string("y")])),
        binary(BinaryOp::In, string("x"), var("s")),
    ]);
    assert_eq!(contains, Value::Boolean(true));
}

#[test]
fn logical_operators_short_circuit_and_preserve_operands() {
    // The right operand would fail if evaluated.
    let result = run(vec![binary(
        BinaryOp::And,
        boolean(false),
        call("error", vec![string("boom")]),
    )]);
    assert_eq!(result, Value::Boolean(false));

    let result = run(vec![binary(BinaryOp::Or, nil(), int(7))]);
    assert_eq!(result, Value::Integer(7));

    // Effect-free operands go through the dedicated opcode.
    let result = run(vec![binary(BinaryOp::And, int(1), int(2))]);
    assert_eq!(result, Value::Integer(2));
}

#[test]
fn negated_conditions_run_the_inverse_branch() {
    let result = run(vec![if_(
        unary(UnaryOp::Not, boolean(false)),
        int(1),
        Some(int(2)),
    )]);
    assert_eq!(result, Value::Integer(1));
}

#[test]
fn conversions_and_invalid_casts() {
    assert_eq!(run(vec![call("int", vec![string("42")])]), Value::Integer(42));
    assert_eq!(run(vec![call("str", vec![int(42)])]), Value::string("42"));
    assert_eq!(
        run(vec![call("len", vec![string("héllo")])]),
        Value::Integer(5)
    );

    let err = Engine::new()
        .execute(module(vec![call("int", vec![string("seven")])]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidCast);
}

#[test]
fn invalid_operations_name_the_operand_tags() {
    let err = Engine::new()
        .execute(module(vec![binary(BinaryOp::Add, string("a"), int(1))]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOperation);
    assert!(err.message.contains("String"));
    assert!(err.message.contains("Integer"));
}

#[test]
fn malformed_number_literals_are_rejected_with_position() {
    let mut bad = int(0);
    bad.pos = nami::ast::Pos::new(7, 3);
    if let nami::ast::ExprKind::Literal { literal, .. } = &mut bad.kind {
        *literal = nami::ast::Literal::Number("12xy".to_string());
    }
    let err = Engine::new().execute(module(vec![bad])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidNumberLiteral);
    assert_eq!(err.pos, Some(nami::ast::Pos::new(7, 3)));
}

#[test]
fn unknown_variables_are_not_found() {
    let err = Engine::new()
        .execute(module(vec![var("missing")]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.message.contains("missing"));
}

#[test]
fn environment_variables_read_through_the_dollar_prefix() {
    // PATH exists in any reasonable environment.
    let path = run(vec![var("$PATH")]);
    assert!(matches!(path, Value::String(s) if !s.is_empty()));

    let unset = run(vec![var("$NAMI_DEFINITELY_UNSET_VARIABLE")]);
    assert_eq!(unset, Value::Nil);

    // `?` starts at zero before any external process ran.
    assert_eq!(run(vec![var("$?")]), Value::Integer(0));
}

#[test]
fn top_level_bindings_persist_across_executions() {
    let mut engine = Engine::new();
    engine
        .execute(module(vec![let_("x", int(10))]))
        .expect("first execution");
    let result = engine
        .execute(module(vec![binary(BinaryOp::Add, var("x"), int(5))]))
        .expect("second execution");
    assert_eq!(result, Value::Integer(15));
}

#[test]
fn type_values_compare_by_tag() {
    let result = run(vec![binary(
        BinaryOp::Equal,
        call("type", vec![int(1)]),
        e(nami::ast::ExprKind::Type {
            name: "Integer".to_string(),
            constant: None,
            struct_symbol: None,
        }),
    )]);
    assert_eq!(result, Value::Boolean(true));
}
