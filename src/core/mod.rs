mod value;
pub use value::*;

pub mod js_error;
pub use js_error::*;

/// Invoke `func` with the given receiver and arguments.
///
/// Only objects carrying a native call slot are callable; anything else
/// fails with a `TypeError`, mirroring what a `then` call site expects.
pub fn call_function(func: &Value, this_val: &Value, args: &[Value]) -> Result<Value, EvalError> {
    let Value::Object(obj) = func else {
        return Err(crate::raise_type_error!("Not a function").into());
    };
    // The borrow must end before the call: the callee may touch `obj` again.
    let closure = obj.borrow().get_closure();
    match closure {
        Some(f) => f(this_val, args),
        None => Err(crate::raise_type_error!("Not a function").into()),
    }
}
