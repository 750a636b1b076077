//! End-to-end runtime scenarios through the public API

mod common;
use common::{compile_ok, run_code, run_with};
use iscript_core::{
    load_from_bytes, save_to_bytes, ContextStatus, Resume, RuntimeErrorKind, Value, Vm, VmConfig,
};
use std::time::Duration;

// ===== calls =====

#[test]
fn test_add_scenario() {
    let run = run_code("function add(a, b) { return a + b; } var r = add(2, 3);");
    run.assert_ok();
    assert_eq!(run.global_int("r"), 5);
    assert_eq!(run.vm.status(run.id), Some(ContextStatus::Idle));
}

#[test]
fn test_function_values_and_closures_over_globals() {
    let run = run_code(
        r#"
        var base = 100;
        function offset(x) { return base + x; }
        var f = offset;
        var r = f(5);
        var t = typeof(f);
        "#,
    );
    assert_eq!(run.global_int("r"), 105);
    assert_eq!(run.global_string("t"), "function");
}

// ===== generators =====

#[test]
fn test_generator_yields_then_completes() {
    let mut run = run_code(
        r#"
        generator count(n) { for (var i = 0; i < n; i++) { yield i; } }
        var it = count(3);
        "#,
    );
    let it = run.global("it");
    let mut seen = Vec::new();
    while let Resume::Yielded(value) = run.vm.resume(run.id, it).expect("resume") {
        seen.push(value);
    }
    assert_eq!(seen, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_generator_iterator_methods() {
    let run = run_code(
        r#"
        generator letters() { yield "a"; yield "b"; }
        var it = letters();
        var first = it.next();
        var second = it.next();
        var third = it.next();
        var done = it.done();
        "#,
    );
    run.assert_ok();
    assert_eq!(run.global_string("first"), "a");
    assert_eq!(run.global_string("second"), "b");
    assert_eq!(run.global("third"), Value::Null);
    assert_eq!(run.global_int("done"), 1);
}

// ===== dictionaries =====

#[test]
fn test_duplicate_runtime_key_terminates_context() {
    let run = run_code(r#"var k = "a"; var d = { k: 1, "a": 2 };"#);
    let err = run.vm.last_error(run.id).expect("error");
    assert_eq!(err.kind, RuntimeErrorKind::DuplicateKey);
    assert_eq!(err.operation, "DICTINS");
    assert_eq!(run.vm.status(run.id), Some(ContextStatus::Terminated));
}

#[test]
fn test_dict_assignment_overwrites() {
    let run = run_code(r#"var d = { "a": 1 }; d["a"] = 2; d.a = d.a + 1;"#);
    assert_eq!(run.display("d"), r#"{"a": 3}"#);
}

// ===== garbage collection =====

#[test]
fn test_popped_frame_objects_are_reclaimed() {
    let config = VmConfig {
        gc_interval: 0,
        ..VmConfig::default()
    };
    let mut run = run_with(
        r#"
        var kept = { "name": "global" };
        function scratch() { var l = [1, 2, 3]; var s = "tmp" + 1; return 0; }
        scratch();
        "#,
        config,
    );
    let before = run.vm.heap_stats().live;
    let first = run.vm.collect_garbage(0);
    assert!(first.freed >= 2, "{first:?}");
    assert_eq!(run.vm.heap_stats().live, before - first.freed);

    for _ in 0..5 {
        run.vm.collect_garbage(2);
    }
    assert_eq!(run.display("kept"), r#"{"name": "global"}"#);
    let stats = run.vm.heap_stats();
    assert_eq!(stats.per_generation.len(), 3);
    assert_eq!(stats.per_generation[2], stats.live);
}

#[test]
fn test_unreachable_instances_are_unloaded() {
    let mut vm = Vm::new(VmConfig::default());
    vm.register_class(compile_ok("class Temp; var n = 1;")).expect("class");
    let id = vm
        .load(compile_ok("using Temp; function make() { var t = Temp(); return t.n; } var r = make();"))
        .expect("load");
    vm.run_until_idle(4);
    assert_eq!(vm.global(id, "r"), Some(Value::Int(1)));
    assert_eq!(vm.context_count(), 2);
    vm.collect_garbage(2);
    assert_eq!(vm.context_count(), 1);
}

// ===== binary round trip =====

#[test]
fn test_saved_program_runs_identically() {
    let source = r#"
        var total = 0;
        generator evens(n) { for (var i = 0; i < n; i += 2) yield i; }
        foreach (var v in evens(10)) total += v;
        var label = "total=" + total;
    "#;
    let program = compile_ok(source);
    let bytes = save_to_bytes(&program).expect("save");
    let loaded = load_from_bytes(&bytes).expect("load");
    assert_eq!(loaded.instructions, program.without_jump_targets().instructions);

    let mut vm = Vm::new(VmConfig::default());
    let original = vm.load(program).expect("original");
    let reloaded = vm.load(loaded).expect("reloaded");
    vm.run_until_idle(8);
    for id in [original, reloaded] {
        let label = vm.global(id, "label").expect("label");
        assert_eq!(vm.string_of(label), Some("total=20"));
    }
}

// ===== states, events and classes =====

#[test]
fn test_state_machine_driven_by_host() {
    let mut vm = Vm::new(VmConfig::default());
    let id = vm
        .load(compile_ok(
            r#"
            var log = "";
            state Idle as default {
                event poke() { log = log + "i"; gotostate Busy; }
            }
            state Busy {
                event poke() { log = log + "b"; gotostate Idle; }
                event done() { log = log + "!"; }
            }
            "#,
        ))
        .expect("load");
    for _ in 0..3 {
        vm.queue_event(id, "poke", vec![]).expect("queue");
    }
    vm.queue_event(id, "done", vec![]).expect("queue");
    let stats = vm.run(Duration::from_millis(500));
    assert_eq!(stats.errors, 0);
    let log = vm.global(id, "log").expect("log");
    assert_eq!(vm.string_of(log), Some("ibi!"));
    assert_eq!(vm.state(id), Some("Busy"));
}

#[test]
fn test_class_operator_overload() {
    let mut vm = Vm::new(VmConfig::default());
    vm.register_class(compile_ok(
        r#"
        class Money;
        var cents = 0;
        operator +(other) { return cents + other.cents; }
        operator ==(other) { return cents == other.cents; }
        "#,
    ))
    .expect("class");
    let id = vm
        .load(compile_ok(
            r#"
            using Money;
            var a = Money(); a.cents = 150;
            var b = Money(); b.cents = 150;
            var sum = a + b;
            var same = a == b;
            var other = a != b;
            "#,
        ))
        .expect("load");
    vm.run_until_idle(4);
    assert_eq!(vm.last_error(id), None);
    assert_eq!(vm.global(id, "sum"), Some(Value::Int(300)));
    assert_eq!(vm.global(id, "same"), Some(Value::Int(1)));
    assert_eq!(vm.global(id, "other"), Some(Value::Int(1)));
}

#[test]
fn test_contexts_share_time_slices() {
    let config = VmConfig {
        slice_instructions: 20,
        ..VmConfig::default()
    };
    let mut vm = Vm::new(config);
    let a = vm.load(compile_ok("var n = 0; while (n < 50) n++;")).expect("a");
    let b = vm.load(compile_ok("var m = 0; while (m < 50) m++;")).expect("b");
    let round = vm.run(Duration::from_secs(5));
    assert_eq!(round.contexts, 2);
    assert_eq!(round.suspended, 2);
    assert_eq!(round.instructions, 40);

    vm.run_until_idle(1000);
    assert_eq!(vm.global(a, "n"), Some(Value::Int(50)));
    assert_eq!(vm.global(b, "m"), Some(Value::Int(50)));
}
