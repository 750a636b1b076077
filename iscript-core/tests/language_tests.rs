//! End-to-end language tests: compile, run, inspect globals

mod common;
use common::{compile_err, run_code};

// ===== expressions =====

#[test]
fn test_multiplication_binds_tighter() {
    let run = run_code("var x = 1 + 2 * 3;");
    assert_eq!(run.global_int("x"), 7);
}

#[test]
fn test_assignment_operators_and_increments() {
    let run = run_code(
        r#"
        var a = 10;
        a += 5; a -= 3; a *= 2; a /= 4; a %= 4;
        var b = 1;
        var c = b++;
        var d = ++b;
        var e = 0xff & 0x0f;
        "#,
    );
    assert_eq!(run.global_int("a"), 2);
    assert_eq!(run.global_int("c"), 1);
    assert_eq!(run.global_int("d"), 3);
    assert_eq!(run.global_int("e"), 15);
}

#[test]
fn test_logical_operators_short_circuit() {
    let run = run_code(
        r#"
        var calls = 0;
        function touch() { calls++; return 1; }
        var a = 0 && touch();
        var b = 1 || touch();
        var c = 1 && touch();
        var t = 1 ? "yes" : "no";
        "#,
    );
    assert_eq!(run.global_int("calls"), 1);
    assert_eq!(run.global_int("a"), 0);
    assert_eq!(run.global_int("b"), 1);
    assert_eq!(run.global_int("c"), 1);
    assert_eq!(run.global_string("t"), "yes");
}

#[test]
fn test_type_checks_and_casts() {
    let run = run_code(
        r#"
        var isInt = 3 is int;
        var isStr = 3 is string;
        var f = 3 as float;
        var s = 42 as string;
        var n = "17" as int;
        "#,
    );
    run.assert_ok();
    assert_eq!(run.global_int("isInt"), 1);
    assert_eq!(run.global_int("isStr"), 0);
    assert_eq!(run.display("f"), "3.0");
    assert_eq!(run.global_string("s"), "42");
    assert_eq!(run.global_int("n"), 17);
}

#[test]
fn test_integer_limits() {
    let run = run_code("var lo = -9223372036854775808; var hi = 9223372036854775807;");
    assert_eq!(run.global_int("lo"), i64::MIN);
    assert_eq!(run.global_int("hi"), i64::MAX);

    let message = compile_err("var m = 9223372036854775808;");
    assert!(message.contains("out of range"), "{message}");
}

// ===== control flow =====

#[test]
fn test_switch_matches_case_without_default() {
    let run = run_code(
        r#"
        var hits = "";
        foreach (var v in [1, 2, 5]) {
            switch (v) {
                case 1, 2: hits = hits + "c" + v;
                default: hits = hits + "d" + v;
            }
        }
        "#,
    );
    assert_eq!(run.global_string("hits"), "c1c2d5");
}

#[test]
fn test_switch_without_match_or_default_skips() {
    let run = run_code("var y = 0; switch (9) { case 1: y = 1; } var after = 1;");
    assert_eq!(run.global_int("y"), 0);
    assert_eq!(run.global_int("after"), 1);
}

#[test]
fn test_loops_and_multi_level_break() {
    let run = run_code(
        r#"
        var count = 0;
        for (var i = 0; i < 5; i++) {
            var j = 0;
            while (1) {
                j++;
                if (j > 2) continue 2;
                if (i == 3) break 2;
                count++;
            }
        }
        var k = 0;
        do { k++; } while (k < 4);
        "#,
    );
    assert_eq!(run.global_int("count"), 6);
    assert_eq!(run.global_int("i"), 3);
    assert_eq!(run.global_int("k"), 4);
}

#[test]
fn test_break_level_beyond_nesting() {
    let message = compile_err("while (1) { break 2; }");
    assert!(message.contains("break level 2"), "{message}");
}

// ===== declarations =====

#[test]
fn test_redefinition_reports_one_error() {
    let message = compile_err("var a;\nfunction f() {}\nvar A = 2;");
    assert!(message.contains("redefinition of 'A'"), "{message}");
}

#[test]
fn test_call_to_undeclared_function() {
    let message = compile_err("function spawn() {}\nundefinedFn();");
    assert!(message.contains("undefined identifier 'undefinedFn'"), "{message}");
}

#[test]
fn test_shadowing_in_inner_block_is_allowed() {
    let run = run_code("function f(a) { { var a = 1; } return a * 2; } var r = f(4);");
    assert_eq!(run.global_int("r"), 8);
}

#[test]
fn test_duplicate_constant_dict_keys() {
    let message = compile_err(r#"var d = {"a": 1, "a": 2};"#);
    assert!(message.contains("duplicate dictionary key"), "{message}");
}

#[test]
fn test_register_exhaustion_is_compile_error() {
    let deep = format!("var x = {}1{};", "(1 + ".repeat(30), ")".repeat(30));
    let message = compile_err(&deep);
    assert!(message.contains("register pool exhausted"), "{message}");
}

#[test]
fn test_function_alias_and_native_binding() {
    let run = run_code(
        r#"
        function add(a, b) { return a + b; }
        function plus = add;
        function size(x) = native("len");
        var r = plus(2, 3);
        var n = size([1, 2, 3]);
        "#,
    );
    assert_eq!(run.global_int("r"), 5);
    assert_eq!(run.global_int("n"), 3);
}
