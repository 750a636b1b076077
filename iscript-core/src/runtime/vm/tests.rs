use super::*;
use crate::compiler::context::CompileContext;
use crate::compiler::instruction::{Opcode, Operand};
use iscript_config::CompilerConfig;
use iscript_log::{Level, LogConfig};
use std::time::Duration;

fn compile(source: &str) -> Program {
    let mut ctx = CompileContext::new(source, CompilerConfig::default());
    assert!(ctx.compile(), "{}", ctx.render_diagnostics());
    ctx.program().expect("program")
}

fn vm() -> Vm {
    let mut vm = Vm::new(VmConfig::default());
    vm.register_builtins();
    vm
}

fn run(source: &str) -> (Vm, ContextId) {
    let mut vm = vm();
    let id = vm.load(compile(source)).expect("load");
    vm.run_until_idle(16);
    (vm, id)
}

fn int(vm: &Vm, id: ContextId, name: &str) -> i64 {
    vm.global(id, name)
        .and_then(|v| v.as_int())
        .unwrap_or_else(|| panic!("global '{name}' is not an int: {:?}", vm.global(id, name)))
}

// ===== expressions and calls =====

#[test]
fn test_precedence_and_arithmetic() {
    let (vm, id) = run("var a = 1 + 2 * 3; var b = (1 + 2) * 3; var c = 7 % 4 - 10 / 3; var d = 1 << 4 | 1;");
    assert_eq!(int(&vm, id, "a"), 7);
    assert_eq!(int(&vm, id, "b"), 9);
    assert_eq!(int(&vm, id, "c"), 0);
    assert_eq!(int(&vm, id, "d"), 17);
    assert_eq!(vm.status(id), Some(ContextStatus::Idle));
}

#[test]
fn test_mixed_numbers_and_strings() {
    let (vm, id) = run(r#"var f = 1 + 0.5; var s = "n=" + 3; var eq = 2 == 2.0; var lt = "a" < "b";"#);
    assert_eq!(vm.global(id, "f"), Some(Value::Float(1.5)));
    let s = vm.global(id, "s").expect("s");
    assert_eq!(vm.string_of(s), Some("n=3"));
    assert_eq!(int(&vm, id, "eq"), 1);
    assert_eq!(int(&vm, id, "lt"), 1);
}

#[test]
fn test_function_call_and_host_call() {
    let (mut vm, id) = run("function add(a, b) { return a + b; } var r = add(2, 3);");
    assert_eq!(int(&vm, id, "r"), 5);
    let value = vm
        .call_function(id, "ADD", &[Value::Int(40), Value::Int(2)])
        .expect("call");
    assert_eq!(value, Value::Int(42));
}

#[test]
fn test_wrong_parameter_count_from_host() {
    let (mut vm, id) = run("function add(a, b) { return a + b; }");
    let err = vm.call_function(id, "add", &[Value::Int(1)]).expect_err("arity");
    assert_eq!(
        err.kind,
        RuntimeErrorKind::WrongParameterCount {
            expected: 2,
            found: 1
        }
    );
    assert_eq!(vm.status(id), Some(ContextStatus::Terminated));
}

#[test]
fn test_recursion_overflows() {
    let (vm, id) = run("function down(n) { return down(n + 1); } var x = down(0);");
    assert_eq!(vm.status(id), Some(ContextStatus::Terminated));
    let err = vm.last_error(id).expect("error");
    assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
}

// ===== collections =====

#[test]
fn test_list_and_dict_access() {
    let (vm, id) = run(
        r#"
        var l = [1, 2, 3];
        l[0] = 10;
        var last = l[-1];
        var d = { "a": 1, 2: "two" };
        d["b"] = 5;
        d.c = 6;
        var sum = l[0] + d["b"] + d.c + d.a;
        var size = len(d);
        "#,
    );
    assert_eq!(int(&vm, id, "last"), 3);
    assert_eq!(int(&vm, id, "sum"), 22);
    assert_eq!(int(&vm, id, "size"), 4);
}

#[test]
fn test_dynamic_duplicate_key_is_runtime_error() {
    let (vm, id) = run(r#"var k = "a"; var d = { k: 1, "a": 2 }; var after = 1;"#);
    assert_eq!(vm.status(id), Some(ContextStatus::Terminated));
    assert_eq!(vm.last_error(id).map(|e| e.kind.clone()), Some(RuntimeErrorKind::DuplicateKey));
    assert_eq!(vm.global(id, "after"), Some(Value::Null));
}

#[test]
fn test_strings_are_immutable() {
    let (vm, id) = run(r#"var s = "abc"; var c = s[1]; s[0] = "x";"#);
    let c = vm.global(id, "c").expect("c");
    assert_eq!(vm.string_of(c), Some("b"));
    let err = vm.last_error(id).expect("error");
    assert_eq!(err.kind, RuntimeErrorKind::Immutable);
    assert_eq!(err.operation, "SETIDX");
}

#[test]
fn test_index_out_of_range() {
    let (vm, id) = run("var l = [1]; var x = l[3];");
    assert_eq!(
        vm.last_error(id).map(|e| e.kind.clone()),
        Some(RuntimeErrorKind::IndexOutOfRange { index: 3, len: 1 })
    );
}

#[test]
fn test_builtin_methods() {
    let (vm, id) = run(
        r#"
        var l = [3, 1];
        l.push(7);
        var popped = l.pop();
        l.insert(0, 9);
        var n = l.length();
        var has = l.contains(1);
        var d = { "x": 1, "y": 2 };
        var removed = d.remove("x");
        var keys = d.keys();
        var up = "MiXed".upper();
        var part = "hello".substr(1, 3);
        "#,
    );
    assert_eq!(int(&vm, id, "popped"), 7);
    assert_eq!(int(&vm, id, "n"), 3);
    assert_eq!(int(&vm, id, "has"), 1);
    assert_eq!(int(&vm, id, "removed"), 1);
    let keys = vm.global(id, "keys").expect("keys");
    assert_eq!(vm.display(keys), "[\"y\"]");
    let up = vm.global(id, "up").expect("up");
    assert_eq!(vm.string_of(up), Some("MIXED"));
    let part = vm.global(id, "part").expect("part");
    assert_eq!(vm.string_of(part), Some("ell"));
}

#[test]
fn test_unknown_method() {
    let (vm, id) = run("var l = []; l.fly();");
    let err = vm.last_error(id).expect("error");
    assert_eq!(err.kind, RuntimeErrorKind::UndefinedMember("fly".into()));
    assert_eq!(err.value, "list");
}

// ===== iteration and generators =====

#[test]
fn test_foreach_over_list_dict_and_string() {
    let (vm, id) = run(
        r#"
        var sum = 0;
        foreach (var v in [1, 2, 3]) sum += v;
        var keys = "";
        foreach (var k in { "a": 1, "b": 2 }) keys = keys + k;
        var chars = 0;
        foreach (var c in "héllo") chars++;
        "#,
    );
    assert_eq!(int(&vm, id, "sum"), 6);
    let keys = vm.global(id, "keys").expect("keys");
    assert_eq!(vm.string_of(keys), Some("ab"));
    assert_eq!(int(&vm, id, "chars"), 5);
}

#[test]
fn test_generator_resumed_from_host() {
    let (mut vm, id) = run(
        r#"
        generator count(n) { var i = 0; while (i < n) { yield i; i++; } }
        var it = count(3);
        "#,
    );
    let it = vm.global(id, "it").expect("iterator");
    for expected in 0..3 {
        assert_eq!(vm.resume(id, it).expect("resume"), Resume::Yielded(Value::Int(expected)));
    }
    assert_eq!(vm.resume(id, it).expect("resume"), Resume::Done);
    assert_eq!(vm.resume(id, it).expect("resume"), Resume::Done);
}

#[test]
fn test_generator_in_foreach() {
    let (vm, id) = run(
        r#"
        generator evens(n) { for (var i = 0; i < n; i++) { if (i % 2 == 0) yield i; } }
        var total = 0;
        var steps = 0;
        foreach (var v in evens(7)) { total += v; steps++; }
        "#,
    );
    assert_eq!(int(&vm, id, "total"), 12);
    assert_eq!(int(&vm, id, "steps"), 4);
}

// ===== garbage collection =====

#[test]
fn test_collection_frees_popped_frames_and_keeps_globals() {
    let (mut vm, id) = run(
        r#"
        function churn() { var tmp = [1, 2, 3]; return 0; }
        var keep = [4, 5];
        churn();
        "#,
    );
    let before = vm.heap_stats().live;
    let stats = vm.collect_garbage(2);
    assert!(stats.freed >= 1, "{stats:?}");
    assert_eq!(stats.live, before - stats.freed);
    let keep = vm.global(id, "keep").expect("keep");
    assert_eq!(vm.list_items(keep), Some(&[Value::Int(4), Value::Int(5)][..]));
}

#[test]
fn test_periodic_collection_during_run() {
    let config = VmConfig {
        gc_interval: 10,
        ..VmConfig::default()
    };
    let mut vm = Vm::new(config);
    let id = vm
        .load(compile("var keep = [0]; for (var i = 0; i < 200; i++) { var t = [i]; keep[0] = i; }"))
        .expect("load");
    let stats = vm.run_until_idle(4);
    assert!(stats.collections > 0);
    let keep = vm.global(id, "keep").expect("keep");
    assert_eq!(vm.list_items(keep), Some(&[Value::Int(199)][..]));
    assert!(vm.heap_stats().live < 50);
}

// ===== scheduling =====

#[test]
fn test_time_slices_suspend_and_resume() {
    let config = VmConfig {
        slice_instructions: 50,
        ..VmConfig::default()
    };
    let mut vm = Vm::new(config);
    let id = vm
        .load(compile("var n = 0; while (n < 100) n++;"))
        .expect("load");
    let first = vm.run(Duration::from_secs(5));
    assert_eq!(first.suspended, 1);
    assert_eq!(vm.status(id), Some(ContextStatus::Suspended));
    assert_eq!(first.instructions, 50);

    vm.run_until_idle(100);
    assert_eq!(int(&vm, id, "n"), 100);
    assert_eq!(vm.status(id), Some(ContextStatus::Idle));
    assert!(!vm.has_work());
}

#[test]
fn test_unloaded_context_never_runs() {
    let mut vm = vm();
    let id = vm.load(compile("var n = 1;")).expect("load");
    vm.unload(id).expect("unload");
    let stats = vm.run_until_idle(4);
    assert_eq!(stats.contexts, 0);
    assert!(vm.call_function(id, "f", &[]).is_err());
}

// ===== states and events =====

const MOOD: &str = r#"
    var hits = 0;
    state Calm as default {
        event hit(n) { hits += n; gotostate Angry; }
    }
    state Angry {
        event hit(n) { hits += n * 10; }
    }
    event reset() { hits = 0; }
"#;

#[test]
fn test_events_follow_active_state() {
    let (mut vm, id) = run(MOOD);
    assert_eq!(vm.state(id), Some("Calm"));
    vm.call_event(id, "hit", &[Value::Int(1)]).expect("hit");
    assert_eq!(vm.state(id), Some("Angry"));

    vm.queue_event(id, "hit", vec![Value::Int(2)]).expect("queue");
    vm.queue_event(id, "unknown", vec![]).expect("queue");
    let stats = vm.run_until_idle(4);
    assert_eq!(stats.errors, 0);
    assert_eq!(int(&vm, id, "hits"), 21);

    vm.call_event(id, "reset", &[]).expect("reset");
    assert_eq!(int(&vm, id, "hits"), 0);
    assert_eq!(vm.call_event(id, "missing", &[]).expect("no-op"), Value::Null);
}

#[test]
fn test_native_queues_event_for_caller() {
    let mut vm = vm();
    vm.register_native("later", |call| {
        let args = call.parameters().to_vec();
        call.queue_event("hit", args);
        call.set_return_null();
        Ok(())
    });
    let source = format!("{MOOD} function later = native(\"later\"); later(5);");
    let id = vm.load(compile(&source)).expect("load");
    vm.run_until_idle(4);
    assert_eq!(int(&vm, id, "hits"), 5);
    assert_eq!(vm.state(id), Some("Angry"));
}

// ===== classes =====

const POINT: &str = r#"
    class Point;
    var x = 0;
    var y = 0;
    const kind = "point";
    function length2() { return x * x + y * y; }
    operator +(other) { return x + other.x; }
"#;

#[test]
fn test_class_members_and_operators() {
    let mut vm = vm();
    vm.register_class(compile(POINT)).expect("class");
    let id = vm
        .load(compile(
            r#"
            using Point;
            var p = Point();
            p.x = 3;
            p.y = 4;
            var d = p.length2();
            var q = Point();
            q.x = 10;
            var s = p + q;
            var t = typeof(p);
            "#,
        ))
        .expect("load");
    vm.run_until_idle(4);
    assert_eq!(vm.last_error(id), None);
    assert_eq!(int(&vm, id, "d"), 25);
    assert_eq!(int(&vm, id, "s"), 13);
    let t = vm.global(id, "t").expect("t");
    assert_eq!(vm.string_of(t), Some("object"));
}

#[test]
fn test_class_constant_is_immutable() {
    let mut vm = vm();
    vm.register_class(compile(POINT)).expect("class");
    let id = vm
        .load(compile(r#"using Point; var p = Point(); p.kind = "other";"#))
        .expect("load");
    vm.run_until_idle(4);
    assert_eq!(vm.last_error(id).map(|e| e.kind.clone()), Some(RuntimeErrorKind::Immutable));
}

#[test]
fn test_base_class_members() {
    let mut vm = vm();
    vm.register_class(compile("class Base; var hp = 10; function heal() { hp += 5; return hp; }"))
        .expect("base");
    vm.register_class(compile("class Hero extends Base; var name = \"hero\";"))
        .expect("hero");
    let id = vm
        .load(compile("using Hero; var h = Hero(); var hp = h.heal(); var n = h.name;"))
        .expect("load");
    vm.run_until_idle(4);
    assert_eq!(int(&vm, id, "hp"), 15);
    let n = vm.global(id, "n").expect("n");
    assert_eq!(vm.string_of(n), Some("hero"));
}

#[test]
fn test_unknown_class() {
    let (vm, id) = run("using Ghost; var g = Ghost();");
    assert_eq!(
        vm.last_error(id).map(|e| e.kind.clone()),
        Some(RuntimeErrorKind::UndefinedClass("Ghost".into()))
    );
}

// ===== natives, output and errors =====

#[test]
fn test_natives_and_print_output() {
    let mut vm = vm();
    vm.register_native("twice", |call| {
        let v = call.get_int_parameter(0)?;
        call.set_return_int(v * 2);
        Ok(())
    });
    let config = CompilerConfig {
        natives: vec!["twice".into()],
        ..CompilerConfig::default()
    };
    let mut ctx = CompileContext::new(
        r#"
            var x = twice(21);
            print("x is", x, [1, "a"], 2.0);
            var r = range(0, 10, 3);
            var t = typeof(r);
            "#,
        config,
    );
    assert!(ctx.compile(), "{}", ctx.render_diagnostics());
    let id = vm.load(ctx.program().expect("program")).expect("load");
    vm.run_until_idle(4);
    assert_eq!(int(&vm, id, "x"), 42);
    assert_eq!(vm.take_output(), vec!["x is 42 [1, \"a\"] 2.0".to_string()]);
    let r = vm.global(id, "r").expect("r");
    assert_eq!(vm.display(r), "[0, 3, 6, 9]");
    assert!(vm.take_output().is_empty());
}

#[test]
fn test_builtin_names_are_registered() {
    let vm = vm();
    for name in native::BUILTIN_NAMES {
        assert!(vm.native_id(name).is_some(), "{name}");
    }
    assert_eq!(vm.native_names.len(), native::BUILTIN_NAMES.len());
}

#[test]
fn test_undefined_native() {
    let (vm, id) = run("function missing = native(\"missing\"); missing(1);");
    assert_eq!(
        vm.last_error(id).map(|e| e.kind.clone()),
        Some(RuntimeErrorKind::UndefinedNative("missing".into()))
    );
}

#[test]
fn test_local_slot_outside_frame_is_malformed() {
    for opcode in [Opcode::GetLocal, Opcode::SetLocal] {
        let mut program = compile("function f(a) { var b = a; return b; } var r = f(1);");
        let access = program
            .instructions
            .iter_mut()
            .find(|ins| ins.opcode == opcode)
            .expect("local access");
        for operand in &mut access.operands {
            if let Operand::Stack(slot) = operand {
                *slot = 40;
            }
        }

        let mut vm = vm();
        let id = vm.load(program).expect("load");
        vm.run_until_idle(4);
        assert_eq!(
            vm.last_error(id).map(|e| e.kind.clone()),
            Some(RuntimeErrorKind::MalformedInstruction),
            "{opcode:?}"
        );
        assert_eq!(vm.global(id, "r"), Some(Value::Null));
    }
}

#[test]
fn test_runtime_error_terminates_and_logs() {
    let (logger, buffer) = LogConfig::new(Level::Debug).with_ring_buffer(256).init();
    let buffer = buffer.expect("ring buffer");
    let mut vm = Vm::new(VmConfig::default()).with_logger(logger);
    let id = vm
        .load(compile("var a = 1; var b = a / 0; var c = 3;"))
        .expect("load");
    let stats = vm.run_until_idle(4);
    assert_eq!(stats.errors, 1);
    assert_eq!(vm.status(id), Some(ContextStatus::Terminated));
    let err = vm.last_error(id).expect("error");
    assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
    assert!(err.instruction.is_some());
    assert_eq!(vm.global(id, "c"), Some(Value::Null));
    assert!(buffer.contains_message("terminated"));

    assert!(vm.queue_event(id, "tick", vec![]).is_err());
    assert_eq!(vm.run_until_idle(4).contexts, 0);
}

#[test]
fn test_host_globals() {
    let (mut vm, id) = run("var a = 1; const b = 2;");
    vm.set_global(id, "A", Value::Int(9)).expect("set");
    assert_eq!(vm.global(id, "a"), Some(Value::Int(9)));
    let err = vm.set_global(id, "b", Value::Int(0)).expect_err("constant");
    assert_eq!(err.kind, RuntimeErrorKind::Immutable);
    let names: Vec<String> = vm.globals(id).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["a", "b"]);
}
