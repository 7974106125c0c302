//! Script threads
//!
//! Every thread shares one heap and one scope graph, so a [`Session`] wraps the
//! interpreter in a single lock. A thread holds the lock for the whole of its
//! evaluation; allocation, collection and compaction therefore never race with
//! another thread's mutation.
//!
//! [`Interpreter::spawn_thread`] parks the callee and its arguments in a rooted
//! table before the OS thread starts, so a collection that runs before the new
//! thread acquires the lock cannot reclaim them. Each thread evaluates its
//! callee inside a `Thread` scope whose outer scope is global; an exception that
//! escapes the callee is logged together with its trace.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::ast::SourceLocation;
use crate::environment::Scope;
use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::{Reference, Value};

/// Identifies a spawned thread
pub type ThreadTicket = u64;

type Workers = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// A callee waiting for its thread to acquire the session lock
#[derive(Debug, Clone)]
pub(crate) struct ThreadRequest {
    callee: Value,
    args: Vec<Value>,
}

#[derive(Debug, Clone)]
struct SessionLink {
    interp: Weak<Mutex<Interpreter>>,
    workers: Workers,
}

/// Pending thread requests plus the handle back to the owning session
#[derive(Debug, Default)]
pub(crate) struct ThreadTable {
    pending: FxHashMap<ThreadTicket, ThreadRequest>,
    next_ticket: ThreadTicket,
    link: Option<SessionLink>,
}

impl ThreadTable {
    /// Values the collector must treat as roots
    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.pending
            .values()
            .flat_map(|request| std::iter::once(&request.callee).chain(&request.args))
    }

    pub(crate) fn remap(&mut self, f: &impl Fn(Reference) -> Reference) {
        for request in self.pending.values_mut() {
            request.callee.map_reference(f);
            request.args.iter_mut().for_each(|arg| arg.map_reference(f));
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Interpreter {
    /// Start `callee(args)` on a new OS thread.
    ///
    /// Without a [`Session`] there is no lock to hand over, so the thread body
    /// runs to completion before this returns.
    pub fn spawn_thread(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        daemon: bool,
    ) -> Result<ThreadTicket, RuntimeError> {
        let ticket = self.threads.next_ticket;
        self.threads.next_ticket += 1;
        self.threads
            .pending
            .insert(ticket, ThreadRequest { callee, args });

        let Some(link) = self.threads.link.clone() else {
            debug!(ticket, "no session, running thread inline");
            self.run_thread(ticket)?;
            return Ok(ticket);
        };

        let interp = link.interp;
        let handle = std::thread::Builder::new()
            .name(format!("kestrel-thread-{}", ticket))
            .spawn(move || {
                if let Some(interp) = interp.upgrade() {
                    let mut guard = interp.lock();
                    if let Err(err) = guard.run_thread(ticket) {
                        error!(ticket, %err, "thread terminated");
                    }
                }
            })
            .map_err(|err| {
                self.threads.pending.remove(&ticket);
                RuntimeError::ThreadSpawnFailed {
                    message: err.to_string(),
                }
            })?;

        debug!(ticket, daemon, "spawned thread");
        if !daemon {
            link.workers.lock().push(handle);
        }
        Ok(ticket)
    }

    /// Evaluate a parked thread request in a fresh `Thread` scope
    pub(crate) fn run_thread(&mut self, ticket: ThreadTicket) -> Result<Option<Value>, RuntimeError> {
        let Some(request) = self.threads.pending.remove(&ticket) else {
            return Ok(None);
        };

        let global = self.global();
        let thread_env = self.enter_scope(Scope::thread(), global);
        let result = self.call(
            request.callee,
            request.args,
            thread_env,
            SourceLocation::default(),
        );

        let outcome = match result {
            Ok(value) => match self.report_uncaught(thread_env) {
                Some(report) => {
                    error!(ticket, "{}", report);
                    None
                }
                None => Some(value),
            },
            Err(err) => {
                self.exit_scope(thread_env);
                return Err(err);
            }
        };
        self.exit_scope(thread_env);
        Ok(outcome)
    }
}

/// An interpreter shared between script threads
#[derive(Clone)]
pub struct Session {
    interp: Arc<Mutex<Interpreter>>,
    workers: Workers,
}

impl Session {
    pub fn new(interp: Interpreter) -> Self {
        let workers: Workers = Arc::default();
        let interp = Arc::new_cyclic(|weak| {
            let mut interp = interp;
            interp.threads.link = Some(SessionLink {
                interp: weak.clone(),
                workers: Arc::clone(&workers),
            });
            Mutex::new(interp)
        });
        Session { interp, workers }
    }

    /// Acquire the session lock
    pub fn lock(&self) -> MutexGuard<'_, Interpreter> {
        self.interp.lock()
    }

    /// Run `f` while holding the session lock
    pub fn with<T>(&self, f: impl FnOnce(&mut Interpreter) -> T) -> T {
        f(&mut self.interp.lock())
    }

    pub fn spawn(
        &self,
        callee: Value,
        args: Vec<Value>,
        daemon: bool,
    ) -> Result<ThreadTicket, RuntimeError> {
        self.lock().spawn_thread(callee, args, daemon)
    }

    /// Wait for every non-daemon thread, including ones spawned while waiting.
    ///
    /// Must not be called while holding the session lock.
    pub fn join(&self) {
        loop {
            let handles = std::mem::take(&mut *self.workers.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    error!("script thread panicked");
                }
            }
        }
    }
}
