use crate::{
    JSError,
    core::{Value, value_to_string},
};

/// Abrupt completion of a handler, executor, getter or foreign `then`.
#[derive(Debug, Clone)]
pub enum EvalError {
    Js(JSError),
    Throw(Value),
}

impl From<JSError> for EvalError {
    fn from(e: JSError) -> Self {
        EvalError::Js(e)
    }
}

impl From<EvalError> for JSError {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::Js(j) => j,
            EvalError::Throw(value) => JSError::Throw { value },
        }
    }
}

impl EvalError {
    pub fn message(&self) -> String {
        match self {
            EvalError::Js(e) => e.to_string(),
            EvalError::Throw(v) => value_to_string(v),
        }
    }

    /// The value a promise is rejected with when this completion escapes.
    /// Host errors become error objects of the matching kind; thrown values
    /// pass through untouched so identity is kept.
    pub fn into_value(self) -> Value {
        match self {
            EvalError::Throw(v) | EvalError::Js(JSError::Throw { value: v }) => v,
            EvalError::Js(JSError::TypeError { message }) => Value::type_error(message),
            EvalError::Js(other) => Value::error(other.to_string()),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}
