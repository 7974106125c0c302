// Minimal statement language used to drive the runtime from integration tests
#![allow(dead_code)]

use std::sync::Arc;

use kestrel::ast::{Node, NodeRef, SourceLocation};
use kestrel::environment::EnvId;
use kestrel::interpreter::engine::Interpreter;
use kestrel::interpreter::errors::RuntimeError;
use kestrel::interpreter::jumps::{CaseArm, CatchClause};
use kestrel::memory::value::{Reference, Value};
use parking_lot::Mutex;

/// Output collected by `Emit` statements
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::default()
}

pub fn lines(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[derive(Debug)]
pub enum Stmt {
    Lit(Value),
    Var(&'static str),
    Let(&'static str, NodeRef),
    Const(&'static str, NodeRef),
    Assign(&'static str, NodeRef),
    Inc(&'static str),
    Less(&'static str, i64),
    Equals(&'static str, i64),
    Emit(Log, &'static str),
    EmitVar(Log, &'static str),
    If(NodeRef, Vec<NodeRef>),
    Seq(Vec<NodeRef>),
    Block(Vec<NodeRef>),
    Loop {
        label: Option<&'static str>,
        condition: Option<NodeRef>,
        update: Option<NodeRef>,
        body: Vec<NodeRef>,
    },
    Break(Option<&'static str>),
    Continue(Option<&'static str>),
    Return(Option<NodeRef>),
    Throw(NodeRef),
    Try {
        body: Vec<NodeRef>,
        catch: Option<(&'static str, Vec<NodeRef>)>,
        finally: Option<Vec<NodeRef>>,
    },
    Case {
        subject: NodeRef,
        arms: Vec<CaseArm>,
    },
    Fallthrough,
    Yield(NodeRef),
    Call(&'static str, Vec<NodeRef>),
}

fn int(value: Value) -> Result<i64, RuntimeError> {
    value.as_int().ok_or_else(|| RuntimeError::TypeError {
        expected: "int".to_string(),
        got: value.type_name().to_string(),
    })
}

impl Node for Stmt {
    fn evaluate(&self, interp: &mut Interpreter, env: EnvId) -> Result<Value, RuntimeError> {
        match self {
            Stmt::Lit(value) => Ok(value.clone()),
            Stmt::Var(name) => interp.get(env, name),
            Stmt::Let(name, init) => {
                let value = interp.evaluate(init, env)?;
                interp.define_var(env, name, value)?;
                Ok(Value::Null)
            }
            Stmt::Const(name, init) => {
                let value = interp.evaluate(init, env)?;
                interp.define_const(env, name, value)?;
                Ok(Value::Null)
            }
            Stmt::Assign(name, value) => {
                let value = interp.evaluate(value, env)?;
                interp.set(env, name, value)?;
                Ok(Value::Null)
            }
            Stmt::Inc(name) => {
                let current = int(interp.get(env, name)?)?;
                interp.set(env, name, Value::Int(current + 1))?;
                Ok(Value::Null)
            }
            Stmt::Less(name, limit) => Ok(Value::Bool(int(interp.get(env, name)?)? < *limit)),
            Stmt::Equals(name, expected) => {
                Ok(Value::Bool(int(interp.get(env, name)?)? == *expected))
            }
            Stmt::Emit(log, text) => {
                log.lock().push(text.to_string());
                Ok(Value::Null)
            }
            Stmt::EmitVar(log, name) => {
                let value = interp.get(env, name)?;
                log.lock().push(value.to_string());
                Ok(Value::Null)
            }
            Stmt::If(condition, then) => {
                let value = interp.evaluate(condition, env)?;
                if !interp.halted(env) && value.is_truthy() {
                    interp.execute_block(env, then)?;
                }
                Ok(Value::Null)
            }
            Stmt::Seq(body) => interp.execute_sequence(env, body),
            Stmt::Block(body) => interp.execute_block(env, body),
            Stmt::Loop {
                label,
                condition,
                update,
                body,
            } => {
                interp.execute_loop(env, *label, condition.as_ref(), update.as_ref(), body)?;
                Ok(Value::Null)
            }
            Stmt::Break(label) => {
                interp.break_loop(env, *label)?;
                Ok(Value::Null)
            }
            Stmt::Continue(label) => {
                interp.pause_loop(env, *label)?;
                Ok(Value::Null)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => {
                        let value = interp.evaluate(expr, env)?;
                        if interp.halted(env) {
                            return Ok(Value::Null);
                        }
                        value
                    }
                    None => Value::Null,
                };
                interp.set_return(env, value)?;
                Ok(Value::Null)
            }
            Stmt::Throw(value) => {
                let value = interp.evaluate(value, env)?;
                interp.throw(env, value)?;
                Ok(Value::Null)
            }
            Stmt::Try {
                body,
                catch,
                finally,
            } => {
                let catch = catch.as_ref().map(|(binding, body)| CatchClause {
                    binding: *binding,
                    body: body.as_slice(),
                });
                interp.execute_try(env, body, catch, finally.as_deref())?;
                Ok(Value::Null)
            }
            Stmt::Case { subject, arms } => {
                let subject = interp.evaluate(subject, env)?;
                Ok(interp.execute_case(env, &subject, arms)?.unwrap_or(Value::Null))
            }
            Stmt::Fallthrough => {
                interp.fallthrough(env)?;
                Ok(Value::Null)
            }
            Stmt::Yield(value) => {
                let value = interp.evaluate(value, env)?;
                interp.yield_value(env, value)?;
                Ok(Value::Null)
            }
            Stmt::Call(name, args) => {
                let callee = interp.get(env, name)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(interp.evaluate(arg, env)?);
                }
                interp.call(callee, values, env, SourceLocation::new(1, 1))
            }
        }
    }
}

pub fn node(stmt: Stmt) -> NodeRef {
    Arc::new(stmt)
}

pub fn int_lit(n: i64) -> NodeRef {
    node(Stmt::Lit(Value::Int(n)))
}

pub fn str_lit(s: &str) -> NodeRef {
    node(Stmt::Lit(Value::str(s)))
}

pub fn arm(pattern: Option<i64>, body: Vec<NodeRef>) -> CaseArm {
    CaseArm {
        pattern: pattern.map(int_lit),
        body,
    }
}

/// `for (let name = 0; name < limit; name++) { body }`, written in `env`
pub fn counted_loop(
    interp: &mut Interpreter,
    env: EnvId,
    name: &'static str,
    limit: i64,
    label: Option<&'static str>,
    body: Vec<NodeRef>,
) -> Result<(), RuntimeError> {
    interp.define_var(env, name, Value::Int(0))?;
    let condition = node(Stmt::Less(name, limit));
    let update = node(Stmt::Inc(name));
    interp.execute_loop(env, label, Some(&condition), Some(&update), &body)
}

/// Define a global script function whose body is `body`
pub fn define_function(
    interp: &mut Interpreter,
    name: &'static str,
    params: &[&str],
    body: Vec<NodeRef>,
) -> Reference {
    let global = interp.global();
    let params = params.iter().map(|p| p.to_string()).collect();
    let f = interp
        .allocate_function(name, params, node(Stmt::Seq(body)), global)
        .unwrap();
    interp.define_var(global, name, Value::Reference(f)).unwrap();
    f
}
