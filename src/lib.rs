pub(crate) mod config;
pub(crate) mod core;
pub(crate) mod error;
pub(crate) mod js_promise;
pub(crate) mod task_queue;
pub(crate) mod timer_thread;

pub use config::{ENV_REPORT_UNHANDLED, ENV_SCHEDULING, ENV_UNHANDLED_GRACE, EventLoopConfig, Scheduling};
pub use core::{
    ErrorKind, EvalError, JSObjectData, JSObjectDataPtr, NativeFn, Property, Value, call_function, get_property_with_accessors,
    new_js_object_data, object_define_getter, object_set_key_value, value_to_string, values_equal,
};
pub use error::JSError;
pub use js_promise::{Deferred, Promise, PromiseState, RejectFunction, RejectionWatch, ResolveFunction, resolve_promise};
pub use task_queue::{EventLoop, Job, PollResult, TaskQueue, TimerId};
