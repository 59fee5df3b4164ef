#[derive(thiserror::Error, Debug, Clone)]
pub enum JSError {
    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Thrown value: {}", crate::core::value_to_string(.value))]
    Throw { value: crate::core::Value },

    #[error("Timer thread error: {message}")]
    TimerThread { message: String },
}

impl From<JSError> for std::io::Error {
    fn from(err: JSError) -> std::io::Error {
        std::io::Error::other(err.to_string())
    }
}

// Build a `JSError::TypeError` at the call site. Accepts anything that
// implements `ToString`, or a format string with arguments.
#[macro_export]
macro_rules! raise_type_error {
    ($msg:expr) => {
        $crate::JSError::TypeError { message: $msg.to_string() }
    };
    ($fmt:expr, $($arg:tt)+) => {
        $crate::JSError::TypeError { message: format!($fmt, $($arg)+) }
    };
}

// Wrap an arbitrary value as a thrown completion, the way a `throw value`
// statement would leave a handler.
#[macro_export]
macro_rules! raise_throw {
    ($value:expr) => {
        $crate::EvalError::Throw($crate::Value::from($value))
    };
}
