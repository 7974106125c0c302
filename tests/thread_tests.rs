// Script threads sharing one session

mod common;

use std::sync::Arc;

use common::{define_function, node, str_lit, Stmt};
use kestrel::environment::EnvId;
use kestrel::interpreter::engine::Interpreter;
use kestrel::interpreter::errors::RuntimeError;
use kestrel::interpreter::threads::Session;
use kestrel::memory::heap::NativeFn;
use kestrel::memory::value::{Reference, Value};
use pretty_assertions::assert_eq;

/// Native `add(n)`: adds `n` to the global `total`
fn define_adder(interp: &mut Interpreter) -> Reference {
    let global = interp.global();
    interp.define_var(global, "total", Value::Int(0)).unwrap();
    let add: NativeFn = Arc::new(
        |interp: &mut Interpreter, env: EnvId, args: &[Value]| -> Result<Value, RuntimeError> {
            let n = args[0].as_int().unwrap_or(0);
            let current = interp.get(env, "total")?.as_int().unwrap_or(0);
            interp.set(env, "total", Value::Int(current + n))?;
            Ok(Value::Null)
        },
    );
    let r = interp.allocate_native("add", 1, add).unwrap();
    interp.define_var(global, "add", Value::Reference(r)).unwrap();
    r
}

#[test]
fn test_threads_share_global_scope() {
    let session = Session::new(Interpreter::default());
    let add = session.with(define_adder);

    for n in 1..=10 {
        session
            .spawn(Value::Reference(add), vec![Value::Int(n)], false)
            .unwrap();
    }
    session.join();

    let total = session.with(|interp| interp.get(interp.global(), "total").unwrap());
    assert_eq!(total, Value::Int(55));
}

#[test]
fn test_spawn_without_session_runs_inline() {
    let mut interp = Interpreter::default();
    let add = define_adder(&mut interp);
    let global = interp.global();

    let first = interp
        .spawn_thread(Value::Reference(add), vec![Value::Int(4)], false)
        .unwrap();
    assert_eq!(interp.get(global, "total").unwrap(), Value::Int(4));

    let second = interp
        .spawn_thread(Value::Reference(add), vec![Value::Int(5)], true)
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(interp.get(global, "total").unwrap(), Value::Int(9));
}

#[test]
fn test_uncaught_exception_stays_in_its_thread() {
    // The escaped exception is reported through tracing
    kestrel::config::init_tracing();
    let session = Session::new(Interpreter::default());
    let (fail, add) = session.with(|interp| {
        let fail = define_function(interp, "fail", &[], vec![node(Stmt::Throw(str_lit("bad")))]);
        (fail, define_adder(interp))
    });

    session.spawn(Value::Reference(fail), Vec::new(), false).unwrap();
    session.join();
    session
        .spawn(Value::Reference(add), vec![Value::Int(2)], false)
        .unwrap();
    session.join();

    session.with(|interp| {
        let global = interp.global();
        assert!(!interp.has_exception(global));
        assert!(interp.report_uncaught(global).is_none());
        assert_eq!(interp.get(global, "total").unwrap(), Value::Int(2));
    });
}

#[test]
fn test_pending_thread_arguments_survive_collection() {
    let session = Session::new(Interpreter::default());
    let measure = session.with(|interp| {
        let global = interp.global();
        interp.define_var(global, "len", Value::Null).unwrap();
        let measure: NativeFn = Arc::new(
            |interp: &mut Interpreter, env: EnvId, args: &[Value]| -> Result<Value, RuntimeError> {
                let array = args[0].as_reference().ok_or_else(|| RuntimeError::TypeError {
                    expected: "Array".to_string(),
                    got: args[0].type_name().to_string(),
                })?;
                let len = interp.memory().array_len(array)?;
                interp.set(env, "len", Value::Int(len as i64))?;
                Ok(Value::Null)
            },
        );
        interp.allocate_native("measure", 1, measure).unwrap()
    });

    {
        // The new thread cannot start until this guard is dropped
        let mut interp = session.lock();
        let global = interp.global();
        interp
            .define_var(global, "measure", Value::Reference(measure))
            .unwrap();
        let array = interp
            .allocate_array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap();
        interp
            .spawn_thread(Value::Reference(measure), vec![Value::Reference(array)], false)
            .unwrap();

        interp.gc().unwrap();
        assert!(!interp.available_view().slots.contains(&array.slot()));
    }
    session.join();

    let len = session.with(|interp| interp.get(interp.global(), "len").unwrap());
    assert_eq!(len, Value::Int(3));
}
