//! # Promise Implementation
//!
//! This module implements a Promises/A+ conforming deferred value:
//! - Promise construction with an executor and its two settlement capabilities
//! - `then()` chaining with derived promises, plus `catch()` / `finally()`
//! - The resolution procedure that unwraps promises and foreign thenables
//!
//! ## Architecture Overview
//!
//! 1. **Promise**: shared state cell (`PromiseState` + reaction queues) and the
//!    task queue every continuation of this promise is deferred to
//! 2. **ResolveFunction / RejectFunction**: settlement capabilities bound to a
//!    single promise; only the first effective call has any effect
//! 3. **Reactions**: a handler paired with the derived promise it settles,
//!    queued while pending and turned into a job on settlement
//! 4. **Resolution procedure**: `resolve_promise` probes a handler's return
//!    value once and either fulfills, adopts a thenable, or rejects a cycle
//!
//! No handler ever runs in the turn that registered it or that settled its
//! parent; every reaction goes through `TaskQueue::enqueue`.

use crate::core::{EvalError, Value, call_function, get_property_with_accessors, value_to_string};
use crate::task_queue::TaskQueue;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

impl PromiseState {
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReactionKind {
    Fulfill,
    Reject,
}

/// A registered continuation: the (optional) handler and the derived
/// promise its outcome is routed to.
#[derive(Clone)]
struct Reaction {
    handler: Option<Value>,
    derived: Promise,
}

pub(crate) struct PromiseInner {
    id: usize,
    state: PromiseState,
    on_fulfilled: Vec<Reaction>,
    on_rejected: Vec<Reaction>,
    /// Set once any `then` is attached. Read by unhandled-rejection tracking.
    handled: bool,
}

static PROMISE_ID_SEED: AtomicUsize = AtomicUsize::new(1);

impl PromiseInner {
    fn new() -> Self {
        Self {
            id: PROMISE_ID_SEED.fetch_add(1, Ordering::SeqCst),
            state: PromiseState::Pending,
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            handled: false,
        }
    }
}

#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<PromiseInner>>,
    queue: Rc<dyn TaskQueue>,
}

impl std::fmt::Debug for Promise {
    // Payloads are left out: a promise may be fulfilled with itself through a raw capability.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Ok(inner) = self.inner.try_borrow() else {
            return f.write_str("Promise { <borrowed> }");
        };
        let state = match inner.state {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled(_) => "fulfilled",
            PromiseState::Rejected(_) => "rejected",
        };
        write!(f, "Promise {{ id: {}, state: {state} }}", inner.id)
    }
}

/// Success capability of exactly one promise.
#[derive(Clone)]
pub struct ResolveFunction {
    promise: Promise,
}

impl ResolveFunction {
    /// Fulfill with `value` as-is. No effect once the promise has settled.
    pub fn call(&self, value: impl Into<Value>) {
        self.promise.fulfill(value.into());
    }

    /// This capability as a callable value, for handing to foreign code.
    pub fn to_value(&self) -> Value {
        let resolve = self.clone();
        Value::function(move |args| {
            resolve.call(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        })
    }
}

/// Failure capability of exactly one promise.
#[derive(Clone)]
pub struct RejectFunction {
    promise: Promise,
}

impl RejectFunction {
    pub fn call(&self, reason: impl Into<Value>) {
        self.promise.reject(reason.into());
    }

    pub fn to_value(&self) -> Value {
        let reject = self.clone();
        Value::function(move |args| {
            reject.call(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        })
    }
}

/// A promise together with its capabilities, for driving settlement from
/// outside an executor.
#[derive(Clone, Debug)]
pub struct Deferred {
    pub promise: Promise,
    pub resolve: ResolveFunction,
    pub reject: RejectFunction,
}

impl std::fmt::Debug for ResolveFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResolveFunction({})", self.promise.id())
    }
}

impl std::fmt::Debug for RejectFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RejectFunction({})", self.promise.id())
    }
}

impl Promise {
    fn pending(queue: Rc<dyn TaskQueue>) -> Promise {
        Promise {
            inner: Rc::new(RefCell::new(PromiseInner::new())),
            queue,
        }
    }

    fn capabilities(&self) -> (ResolveFunction, RejectFunction) {
        (ResolveFunction { promise: self.clone() }, RejectFunction { promise: self.clone() })
    }

    /// Construct a promise and run `executor` synchronously with its
    /// capabilities. An executor error rejects the promise with the error's
    /// value (unless the executor already settled it).
    pub fn new<F>(queue: Rc<dyn TaskQueue>, executor: F) -> Promise
    where
        F: FnOnce(ResolveFunction, RejectFunction) -> Result<(), EvalError>,
    {
        let promise = Promise::pending(queue);
        let (resolve, reject) = promise.capabilities();
        if let Err(err) = executor(resolve, reject.clone()) {
            log::debug!("Promise::new: executor of promise id={} threw: {}", promise.id(), err.message());
            reject.call(err.into_value());
        }
        promise
    }

    /// The test/interop factory: a pending promise plus its capabilities.
    pub fn deferred(queue: Rc<dyn TaskQueue>) -> Deferred {
        let promise = Promise::pending(queue);
        let (resolve, reject) = promise.capabilities();
        Deferred { promise, resolve, reject }
    }

    /// Alias of [`Promise::deferred`].
    pub fn defer(queue: Rc<dyn TaskQueue>) -> Deferred {
        Promise::deferred(queue)
    }

    /// Already fulfilled with `value`, taken as-is (thenables are not unwrapped).
    pub fn resolved(queue: Rc<dyn TaskQueue>, value: impl Into<Value>) -> Promise {
        let promise = Promise::pending(queue);
        promise.fulfill(value.into());
        promise
    }

    pub fn rejected(queue: Rc<dyn TaskQueue>, reason: impl Into<Value>) -> Promise {
        let promise = Promise::pending(queue);
        promise.reject(reason.into());
        promise
    }

    /// A promise whose fate follows `x` through the resolution procedure:
    /// thenables are adopted, anything else fulfills it.
    pub fn adopt(queue: Rc<dyn TaskQueue>, x: impl Into<Value>) -> Promise {
        let promise = Promise::pending(queue);
        let (resolve, reject) = promise.capabilities();
        resolve_promise(&promise, x.into(), &resolve, &reject);
        promise
    }

    pub fn id(&self) -> usize {
        self.inner.borrow().id
    }

    pub fn state(&self) -> PromiseState {
        self.inner.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.borrow().state.is_pending()
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn task_queue(&self) -> Rc<dyn TaskQueue> {
        self.queue.clone()
    }

    fn fulfill(&self, value: Value) {
        let reactions = {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_pending() {
                log::trace!("fulfill: promise id={} already settled, ignoring", inner.id);
                return;
            }
            log::trace!("fulfill: promise id={} value={}", inner.id, value_to_string(&value));
            inner.state = PromiseState::Fulfilled(value.clone());
            inner.on_rejected.clear();
            std::mem::take(&mut inner.on_fulfilled)
        };
        if !reactions.is_empty() {
            log::debug!("fulfill: scheduling {} reactions for promise id={}", reactions.len(), self.id());
        }
        for reaction in reactions {
            self.schedule_reaction(reaction, ReactionKind::Fulfill, value.clone());
        }
    }

    fn reject(&self, reason: Value) {
        let (reactions, handled) = {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_pending() {
                log::trace!("reject: promise id={} already settled, ignoring", inner.id);
                return;
            }
            log::debug!("reject: promise id={} reason={}", inner.id, value_to_string(&reason));
            inner.state = PromiseState::Rejected(reason.clone());
            inner.on_fulfilled.clear();
            (std::mem::take(&mut inner.on_rejected), inner.handled)
        };
        if reactions.is_empty() && !handled {
            self.queue.track_rejection(RejectionWatch::new(self.id(), Rc::downgrade(&self.inner), reason.clone()));
        }
        for reaction in reactions {
            self.schedule_reaction(reaction, ReactionKind::Reject, reason.clone());
        }
    }

    fn schedule_reaction(&self, reaction: Reaction, kind: ReactionKind, payload: Value) {
        log::trace!(
            "schedule_reaction: parent id={} derived id={} kind={:?}",
            self.id(),
            reaction.derived.id(),
            kind
        );
        self.queue.enqueue(Box::new(move || run_reaction(reaction, kind, payload)));
    }

    /// Register continuations and return the derived promise.
    ///
    /// Non-callable handlers count as absent: a missing `on_fulfilled`
    /// passes the value through, a missing `on_rejected` rethrows the reason.
    pub fn then(&self, on_fulfilled: Option<Value>, on_rejected: Option<Value>) -> Promise {
        let on_fulfilled = on_fulfilled.filter(Value::is_callable);
        let on_rejected = on_rejected.filter(Value::is_callable);
        let derived = Promise::pending(self.queue.clone());

        let settled = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            inner.handled = true;
            match &inner.state {
                PromiseState::Pending => {
                    inner.on_fulfilled.push(Reaction {
                        handler: on_fulfilled,
                        derived: derived.clone(),
                    });
                    inner.on_rejected.push(Reaction {
                        handler: on_rejected,
                        derived: derived.clone(),
                    });
                    None
                }
                PromiseState::Fulfilled(value) => Some((ReactionKind::Fulfill, value.clone(), on_fulfilled)),
                PromiseState::Rejected(reason) => Some((ReactionKind::Reject, reason.clone(), on_rejected)),
            }
        };

        if let Some((kind, payload, handler)) = settled {
            let reaction = Reaction {
                handler,
                derived: derived.clone(),
            };
            self.schedule_reaction(reaction, kind, payload);
        }
        derived
    }

    pub fn catch(&self, on_rejected: Option<Value>) -> Promise {
        self.then(None, on_rejected)
    }

    /// `then` with a Rust closure as the fulfillment handler.
    pub fn then_fn<F>(&self, on_fulfilled: F) -> Promise
    where
        F: Fn(Value) -> Result<Value, EvalError> + 'static,
    {
        self.then(Some(unary_handler(on_fulfilled)), None)
    }

    /// `catch` with a Rust closure as the rejection handler.
    pub fn catch_fn<F>(&self, on_rejected: F) -> Promise
    where
        F: Fn(Value) -> Result<Value, EvalError> + 'static,
    {
        self.then(None, Some(unary_handler(on_rejected)))
    }

    /// Run `on_finally` for either outcome, then pass the original outcome on.
    /// A throw from `on_finally`, or a rejecting thenable it returns, replaces
    /// the outcome with that rejection.
    pub fn finally(&self, on_finally: Option<Value>) -> Promise {
        let Some(callback) = on_finally.filter(Value::is_callable) else {
            return self.then(None, None);
        };

        let queue = self.queue.clone();
        let cb = callback.clone();
        let on_fulfilled = Value::function(move |args| {
            let value = args.first().cloned().unwrap_or_default();
            let result = call_function(&cb, &Value::Undefined, &[])?;
            let pass_value = Value::function(move |_| Ok(value.clone()));
            Ok(Value::Promise(Promise::adopt(queue.clone(), result).then(Some(pass_value), None)))
        });

        let queue = self.queue.clone();
        let on_rejected = Value::function(move |args| {
            let reason = args.first().cloned().unwrap_or_default();
            let result = call_function(&callback, &Value::Undefined, &[])?;
            let rethrow = Value::function(move |_| Err(EvalError::Throw(reason.clone())));
            Ok(Value::Promise(Promise::adopt(queue.clone(), result).then(Some(rethrow), None)))
        });

        self.then(Some(on_fulfilled), Some(on_rejected))
    }

    /// `then` exposed as a callable value, as read off a promise by foreign code.
    pub(crate) fn then_method(&self) -> Value {
        let promise = self.clone();
        Value::function(move |args| {
            let derived = promise.then(args.first().cloned(), args.get(1).cloned());
            Ok(Value::Promise(derived))
        })
    }
}

fn unary_handler<F>(f: F) -> Value
where
    F: Fn(Value) -> Result<Value, EvalError> + 'static,
{
    Value::function(move |args| f(args.first().cloned().unwrap_or_default()))
}

/// Body of a queued reaction job: run the handler (or its default) and
/// route the completion into the derived promise.
fn run_reaction(reaction: Reaction, kind: ReactionKind, payload: Value) {
    let Reaction { handler, derived } = reaction;
    let (resolve, reject) = derived.capabilities();

    let completion = match (handler, kind) {
        (Some(handler), _) => call_function(&handler, &Value::Undefined, &[payload]),
        (None, ReactionKind::Fulfill) => Ok(payload),
        (None, ReactionKind::Reject) => Err(EvalError::Throw(payload)),
    };

    match completion {
        Ok(x) => resolve_promise(&derived, x, &resolve, &reject),
        Err(err) => {
            log::trace!("run_reaction: handler for derived id={} threw: {}", derived.id(), err.message());
            reject.call(err.into_value());
        }
    }
}

/// Outcome of probing a handler's return value.
enum Resolution {
    PlainValue(Value),
    Thenable(ThenableHandle),
    CyclicSelf,
}

enum ThenableHandle {
    Native(Promise),
    Foreign { target: Value, then: Value },
}

/// Inspect `x` exactly once. Reading a foreign `then` may run a getter,
/// whose failure is returned as-is.
fn probe_resolution(derived: &Promise, x: Value) -> Result<Resolution, EvalError> {
    match &x {
        Value::Promise(p) if p.ptr_eq(derived) => Ok(Resolution::CyclicSelf),
        Value::Promise(p) => Ok(Resolution::Thenable(ThenableHandle::Native(p.clone()))),
        Value::Object(_) => {
            let then = get_property_with_accessors(&x, "then")?;
            if then.is_callable() {
                Ok(Resolution::Thenable(ThenableHandle::Foreign { target: x, then }))
            } else {
                Ok(Resolution::PlainValue(x))
            }
        }
        _ => Ok(Resolution::PlainValue(x)),
    }
}

/// The resolution procedure: decide `derived`'s fate from `x`, settling it
/// through `resolve` / `reject`.
///
/// Nested thenables are unwrapped transitively with no depth bound.
pub fn resolve_promise(derived: &Promise, x: Value, resolve: &ResolveFunction, reject: &RejectFunction) {
    let resolution = match probe_resolution(derived, x) {
        Ok(resolution) => resolution,
        Err(err) => {
            log::trace!("resolve_promise: probing `then` failed for derived id={}", derived.id());
            reject.call(err.into_value());
            return;
        }
    };

    let handle = match resolution {
        Resolution::CyclicSelf => {
            log::debug!("resolve_promise: chaining cycle on promise id={}", derived.id());
            reject.call(Value::type_error("Chaining cycle detected for promise"));
            return;
        }
        Resolution::PlainValue(value) => {
            resolve.call(value);
            return;
        }
        Resolution::Thenable(handle) => handle,
    };

    // One flag shared by both continuations and the failure path below.
    let called = Rc::new(Cell::new(false));

    let on_inner_fulfill = {
        let called = called.clone();
        let derived = derived.clone();
        let resolve = resolve.clone();
        let reject = reject.clone();
        Value::function(move |args| {
            if called.replace(true) {
                return Ok(Value::Undefined);
            }
            let y = args.first().cloned().unwrap_or_default();
            resolve_promise(&derived, y, &resolve, &reject);
            Ok(Value::Undefined)
        })
    };

    let on_inner_reject = {
        let called = called.clone();
        let reject = reject.clone();
        Value::function(move |args| {
            if called.replace(true) {
                return Ok(Value::Undefined);
            }
            reject.call(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        })
    };

    let outcome = match handle {
        ThenableHandle::Native(promise) => {
            promise.then(Some(on_inner_fulfill), Some(on_inner_reject));
            Ok(())
        }
        ThenableHandle::Foreign { target, then } => call_function(&then, &target, &[on_inner_fulfill, on_inner_reject]).map(|_| ()),
    };

    if let Err(err) = outcome {
        if called.replace(true) {
            log::trace!("resolve_promise: `then` threw after settling derived id={}, ignored", derived.id());
            return;
        }
        reject.call(err.into_value());
    }
}

/// A rejection that had no handler when it happened. Handed to
/// `TaskQueue::track_rejection` so the host can report it later.
pub struct RejectionWatch {
    promise_id: usize,
    promise: Weak<RefCell<PromiseInner>>,
    reason: Value,
}

impl RejectionWatch {
    fn new(promise_id: usize, promise: Weak<RefCell<PromiseInner>>, reason: Value) -> Self {
        RejectionWatch {
            promise_id,
            promise,
            reason,
        }
    }

    pub fn promise_id(&self) -> usize {
        self.promise_id
    }

    pub fn reason(&self) -> &Value {
        &self.reason
    }

    /// `Some(handled)` while the promise is alive, `None` once it is dropped.
    pub fn is_handled(&self) -> Option<bool> {
        self.promise.upgrade().map(|inner| inner.borrow().handled)
    }
}

impl std::fmt::Debug for RejectionWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RejectionWatch {{ promise_id: {}, reason: {:?} }}", self.promise_id, self.reason)
    }
}
