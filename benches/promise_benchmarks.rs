use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use thenable::{EvalError, EventLoop, Promise, Value};

// cargo bench --profile dev

// Initialize logger for benchmark so `RUST_LOG` is honored.
#[ctor::ctor]
fn __init_bench_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).try_init();
}

fn add(n: f64) -> impl Fn(Value) -> Result<Value, EvalError> {
    move |v| Ok(Value::from(v.as_number().unwrap_or(0.0) + n))
}

fn benchmark_promise_operations(c: &mut Criterion) {
    // Benchmark basic promise creation and resolution
    c.bench_function("promise_basic_resolution", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let p = event_loop.new_promise(|resolve, _reject| {
                resolve.call(42);
                Ok(())
            });
            let doubled = p.then_fn(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 2.0)));
            event_loop.run_until_idle();
            black_box(doubled.state())
        })
    });

    // Benchmark promise chaining
    c.bench_function("promise_chaining", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let end = event_loop.resolved(1).then_fn(add(1.0)).then_fn(add(2.0)).then_fn(add(-3.0)).then_fn(add(4.0));
            event_loop.run_until_idle();
            black_box(end.state())
        })
    });

    // Benchmark promise rejection and catch
    c.bench_function("promise_rejection_catch", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let caught = event_loop.rejected("error").catch_fn(|e| Ok(Value::from(format!("caught: {e}"))));
            event_loop.run_until_idle();
            black_box(caught.state())
        })
    });

    // Benchmark unwrapping nested promises returned from handlers
    c.bench_function("promise_nested_adoption", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let queue = event_loop.queue();
            let end = event_loop.resolved(0).then_fn(move |v| {
                let inner = Promise::resolved(queue.clone(), v);
                Ok(Value::Promise(Promise::adopt(queue.clone(), inner)))
            });
            event_loop.run_until_idle();
            black_box(end.state())
        })
    });

    // Benchmark a foreign thenable returned from a handler
    c.bench_function("promise_foreign_thenable", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let foreign = Value::object_from([(
                "then",
                Value::function(|args| {
                    let on_fulfilled = args.first().cloned().unwrap_or_default();
                    thenable::call_function(&on_fulfilled, &Value::Undefined, &[Value::from(7)])
                }),
            )]);
            let end = event_loop.resolved(0).then_fn(move |_| Ok(foreign.clone()));
            event_loop.run_until_idle();
            black_box(end.state())
        })
    });

    // Benchmark fan-out: many handlers on one pending promise
    c.bench_function("promise_fan_out_100", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let d = event_loop.deferred();
            for i in 0..100 {
                d.promise.then_fn(add(i as f64));
            }
            d.resolve.call(1);
            black_box(event_loop.run_until_idle())
        })
    });

    // Benchmark complex promise chains with error handling
    c.bench_function("promise_complex_chain", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let queue = event_loop.queue();
            let async_operation = move |v: Value| {
                let n = v.as_number().unwrap_or(0.0);
                let queue = queue.clone();
                Ok(Value::Promise(Promise::new(queue, move |resolve, reject| {
                    if n > 0.0 {
                        resolve.call(n * 2.0);
                    } else {
                        reject.call("negative value");
                    }
                    Ok(())
                })))
            };
            let end = event_loop
                .resolved(5)
                .then_fn(async_operation.clone())
                .then_fn(add(10.0))
                .then_fn(async_operation)
                .catch_fn(|e| Ok(Value::from(format!("error: {e}"))))
                .finally(Some(Value::function(|_| Ok(Value::from("cleanup")))));
            event_loop.run_until_idle();
            black_box(end.state())
        })
    });
}

criterion_group!(benches, benchmark_promise_operations);
criterion_main!(benches);
