use std::cell::RefCell;
use std::rc::Rc;
use thenable::*;

#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// A handler that records `tag:value` and returns the value unchanged.
fn recorder(log: &Log, tag: &'static str) -> Value {
    let log = log.clone();
    Value::function(move |args| {
        let v = args.first().cloned().unwrap_or_default();
        log.borrow_mut().push(format!("{tag}:{}", value_to_string(&v)));
        Ok(v)
    })
}

#[test]
fn test_handler_return_value_fulfills_derived() {
    let event_loop = EventLoop::new();
    let derived = event_loop.resolved(1).then_fn(|_| Ok(Value::from(42)));
    assert!(derived.is_pending());
    event_loop.run_until_idle();
    assert_eq!(derived.state(), PromiseState::Fulfilled(Value::from(42)));
}

#[test]
fn test_then_on_fulfilled_parent_runs_in_a_later_turn() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let promise = event_loop.resolved("v");
    promise.then(Some(recorder(&log, "handler")), None);
    log.borrow_mut().push("after then".to_string());
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["after then", "handler:v"]);
}

#[test]
fn test_then_on_pending_parent_runs_after_settlement_turn() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let d = event_loop.deferred();
    d.promise.then(Some(recorder(&log, "handler")), None);
    d.resolve.call("v");
    log.borrow_mut().push("after resolve".to_string());
    assert_eq!(*log.borrow(), vec!["after resolve"]);
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["after resolve", "handler:v"]);
}

#[test]
fn test_handlers_run_once_each_in_registration_order() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let d = event_loop.deferred();
    for tag in ["a", "b", "c"] {
        d.promise.then(Some(recorder(&log, tag)), Some(recorder(&log, "never")));
    }
    d.resolve.call(1);
    d.resolve.call(2);
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["a:1", "b:1", "c:1"]);

    // Handlers added after settlement keep registration order too.
    d.promise.then(Some(recorder(&log, "d")), None);
    d.promise.then(Some(recorder(&log, "e")), None);
    assert_eq!(event_loop.run_until_idle(), 2);
    assert_eq!(log.borrow()[3..], ["d:1".to_string(), "e:1".to_string()]);
}

#[test]
fn test_each_handler_gets_its_own_turn() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let promise = event_loop.resolved(0);
    promise.then(Some(recorder(&log, "first")), None);
    promise.then(Some(recorder(&log, "second")), None);
    assert_eq!(event_loop.poll_event_loop(), PollResult::Executed);
    assert_eq!(*log.borrow(), vec!["first:0"]);
    assert_eq!(event_loop.poll_event_loop(), PollResult::Executed);
    assert_eq!(*log.borrow(), vec!["first:0", "second:0"]);
}

#[test]
fn test_then_without_handlers_passes_outcome_through() {
    let event_loop = EventLoop::new();
    let fulfilled = event_loop.resolved(5).then(None, None);
    let rejected = event_loop.rejected("e").then(None, None);
    event_loop.run_until_idle();
    assert_eq!(fulfilled.state(), PromiseState::Fulfilled(Value::from(5)));
    assert_eq!(rejected.state(), PromiseState::Rejected(Value::from("e")));
}

#[test]
fn test_non_callable_handlers_are_ignored() {
    let event_loop = EventLoop::new();
    let fulfilled = event_loop.resolved(5).then(Some(Value::from(3)), Some(Value::object()));
    let rejected = event_loop.rejected("e").then(Some(Value::Null), Some(Value::from("not a function")));
    event_loop.run_until_idle();
    assert_eq!(fulfilled.state(), PromiseState::Fulfilled(Value::from(5)));
    assert_eq!(rejected.state(), PromiseState::Rejected(Value::from("e")));
}

#[test]
fn test_handler_throw_rejects_derived_with_exact_value() {
    let event_loop = EventLoop::new();
    let boom = Value::error("boom");
    let thrown = boom.clone();
    let derived = event_loop.resolved(1).then_fn(move |_| Err(EvalError::Throw(thrown.clone())));
    event_loop.run_until_idle();
    match derived.state() {
        PromiseState::Rejected(reason) => {
            assert_eq!(reason, boom);
            assert_eq!(value_to_string(&reason), "Error: boom");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn test_rejection_handler_recovers() {
    let event_loop = EventLoop::new();
    let derived = event_loop
        .rejected("e")
        .catch_fn(|reason| Ok(Value::from(format!("recovered from {}", value_to_string(&reason)))));
    event_loop.run_until_idle();
    assert_eq!(derived.state(), PromiseState::Fulfilled(Value::from("recovered from e")));
}

#[test]
fn test_rejection_skips_fulfillment_handlers_down_the_chain() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let end = event_loop
        .rejected("e")
        .then(Some(recorder(&log, "skipped-1")), None)
        .then(Some(recorder(&log, "skipped-2")), None)
        .catch(Some(recorder(&log, "caught")));
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["caught:e"]);
    assert_eq!(end.state(), PromiseState::Fulfilled(Value::from("e")));
}

#[test]
fn test_chained_values_flow_through() {
    let event_loop = EventLoop::new();
    let result = event_loop
        .resolved(1)
        .then_fn(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) + 1.0)))
        .then_fn(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 10.0)))
        .then_fn(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) - 3.0)));
    event_loop.run_until_idle();
    assert_eq!(result.state(), PromiseState::Fulfilled(Value::from(17)));
}

#[test]
fn test_derived_promises_are_independent() {
    let event_loop = EventLoop::new();
    let parent = event_loop.resolved(2);
    let a = parent.then_fn(|_| Ok(Value::from("a")));
    let b = parent.then_fn(|_| Err(raise_throw!("b")));
    assert!(!a.ptr_eq(&b));
    b.catch(None);
    event_loop.run_until_idle();
    assert_eq!(a.state(), PromiseState::Fulfilled(Value::from("a")));
    assert_eq!(b.state(), PromiseState::Rejected(Value::from("b")));
    assert_eq!(parent.state(), PromiseState::Fulfilled(Value::from(2)));
}

#[test]
fn test_then_called_from_inside_a_handler_is_deferred() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let promise = event_loop.resolved("x");
    let inner_log = log.clone();
    let inner_promise = promise.clone();
    promise.then_fn(move |_| {
        inner_promise.then(Some(recorder(&inner_log, "nested")), None);
        inner_log.borrow_mut().push("outer done".to_string());
        Ok(Value::Undefined)
    });
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["outer done", "nested:x"]);
}

#[test]
fn test_finally_passes_outcome_through() {
    let event_loop = EventLoop::new();
    let log = new_log();
    let cleanup = {
        let log = log.clone();
        Value::function(move |args| {
            log.borrow_mut().push(format!("finally({})", args.len()));
            Ok(Value::from("ignored"))
        })
    };
    let fulfilled = event_loop.resolved(1).finally(Some(cleanup.clone()));
    let rejected = event_loop.rejected("e").finally(Some(cleanup));
    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["finally(0)", "finally(0)"]);
    assert_eq!(fulfilled.state(), PromiseState::Fulfilled(Value::from(1)));
    assert_eq!(rejected.state(), PromiseState::Rejected(Value::from("e")));
}

#[test]
fn test_finally_throw_or_rejected_thenable_overrides() {
    let event_loop = EventLoop::new();
    let throwing = Value::function(|_| Err(raise_throw!("cleanup failed")));
    let by_throw = event_loop.resolved(1).finally(Some(throwing));

    let queue = event_loop.queue();
    let rejecting = Value::function(move |_| Ok(Value::Promise(Promise::rejected(queue.clone(), "late failure"))));
    let by_thenable = event_loop.resolved(1).finally(Some(rejecting));

    let plain = event_loop.resolved(1).finally(None);
    event_loop.run_until_idle();
    assert_eq!(by_throw.state(), PromiseState::Rejected(Value::from("cleanup failed")));
    assert_eq!(by_thenable.state(), PromiseState::Rejected(Value::from("late failure")));
    assert_eq!(plain.state(), PromiseState::Fulfilled(Value::from(1)));
}

#[test]
fn test_then_is_readable_as_a_property_of_a_promise() {
    let event_loop = EventLoop::new();
    let promise = Value::Promise(event_loop.resolved(9));
    let then = get_property_with_accessors(&promise, "then").unwrap();
    assert!(then.is_callable());
    let derived = call_function(&then, &promise, &[Value::function(|args| Ok(args[0].clone()))]).unwrap();
    event_loop.run_until_idle();
    let derived = derived.as_promise().cloned().expect("then returns a promise");
    assert_eq!(derived.state(), PromiseState::Fulfilled(Value::from(9)));
}
