use crate::core::EvalError;
use crate::js_promise::Promise;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Native call slot of a callable object: `(this, args) -> completion`.
pub type NativeFn = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, EvalError>>;

pub type JSObjectDataPtr = Rc<RefCell<JSObjectData>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
        }
    }
}

/// A slot in an object's property table.
#[derive(Clone)]
pub enum Property {
    Data(Value),
    /// Reading the property calls `getter` with the owning object as `this`.
    /// A missing getter reads as `undefined`.
    Accessor { getter: Option<Value> },
}

#[derive(Default)]
pub struct JSObjectData {
    pub properties: IndexMap<String, Property>,
    closure: Option<NativeFn>,
    error_kind: Option<ErrorKind>,
}

impl JSObjectData {
    pub fn get_closure(&self) -> Option<NativeFn> {
        self.closure.clone()
    }

    pub fn set_closure(&mut self, closure: Option<NativeFn>) {
        self.closure = closure;
    }

    pub fn is_callable(&self) -> bool {
        self.closure.is_some()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn get_message(&self) -> Option<String> {
        if let Some(Property::Data(Value::String(s))) = self.properties.get("message") {
            return Some(s.clone());
        }
        None
    }
}

impl fmt::Debug for JSObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JSObjectData {{ properties: {}, callable: {}, error_kind: {:?} }}",
            self.properties.len(),
            self.closure.is_some(),
            self.error_kind
        )
    }
}

pub fn new_js_object_data() -> JSObjectDataPtr {
    Rc::new(RefCell::new(JSObjectData::default()))
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(JSObjectDataPtr),
    Promise(Promise),
}

impl Value {
    /// A fresh, empty plain object.
    pub fn object() -> Value {
        Value::Object(new_js_object_data())
    }

    /// A plain object holding the given data properties, in order.
    pub fn object_from<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let obj = new_js_object_data();
        {
            let mut data = obj.borrow_mut();
            for (k, v) in entries {
                data.properties.insert(k.into(), Property::Data(v));
            }
        }
        Value::Object(obj)
    }

    /// A callable value that ignores its receiver.
    pub fn function<F>(f: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    {
        Value::method(move |_this, args| f(args))
    }

    /// A callable value that receives `this` as its first argument.
    pub fn method<F>(f: F) -> Value
    where
        F: Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
    {
        let obj = new_js_object_data();
        obj.borrow_mut().set_closure(Some(Rc::new(f)));
        Value::Object(obj)
    }

    pub fn error(message: impl Into<String>) -> Value {
        Value::error_with_kind(ErrorKind::Error, message)
    }

    pub fn type_error(message: impl Into<String>) -> Value {
        Value::error_with_kind(ErrorKind::TypeError, message)
    }

    pub fn error_with_kind(kind: ErrorKind, message: impl Into<String>) -> Value {
        let obj = new_js_object_data();
        {
            let mut data = obj.borrow_mut();
            data.error_kind = Some(kind);
            data.properties.insert("name".to_string(), Property::Data(Value::String(kind.name().to_string())));
            data.properties.insert("message".to_string(), Property::Data(Value::String(message.into())));
        }
        Value::Object(obj)
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Objects, functions and promises. Primitives are not object-like.
    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Promise(_))
    }

    pub fn is_callable(&self) -> bool {
        match self {
            Value::Object(obj) => obj.borrow().is_callable(),
            _ => false,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Value::Object(obj) => obj.borrow().error_kind(),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&JSObjectDataPtr> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

/// Read `key` from `target`, running accessors. Getter failures are
/// surfaced as the getter's own completion.
pub fn get_property_with_accessors(target: &Value, key: &str) -> Result<Value, EvalError> {
    match target {
        Value::Object(obj) => {
            let slot = obj.borrow().properties.get(key).cloned();
            match slot {
                Some(Property::Data(v)) => Ok(v),
                Some(Property::Accessor { getter: Some(getter) }) => crate::core::call_function(&getter, target, &[]),
                Some(Property::Accessor { getter: None }) | None => Ok(Value::Undefined),
            }
        }
        Value::Promise(promise) if key == "then" => Ok(promise.then_method()),
        _ => Ok(Value::Undefined),
    }
}

pub fn object_set_key_value(obj: &JSObjectDataPtr, key: impl Into<String>, value: Value) {
    obj.borrow_mut().properties.insert(key.into(), Property::Data(value));
}

pub fn object_define_getter(obj: &JSObjectDataPtr, key: impl Into<String>, getter: Value) {
    obj.borrow_mut().properties.insert(key.into(), Property::Accessor { getter: Some(getter) });
}

/// SameValue: identity for objects and promises, value equality for
/// primitives (with `NaN` equal to itself).
pub fn values_equal(v1: &Value, v2: &Value) -> bool {
    match (v1, v2) {
        (Value::Number(n1), Value::Number(n2)) => {
            if n1.is_nan() && n2.is_nan() {
                true
            } else {
                n1 == n2
            }
        }
        (Value::String(s1), Value::String(s2)) => s1 == s2,
        (Value::Boolean(b1), Value::Boolean(b2)) => b1 == b2,
        (Value::Undefined, Value::Undefined) => true,
        (Value::Null, Value::Null) => true,
        (Value::Object(o1), Value::Object(o2)) => Rc::ptr_eq(o1, o2),
        (Value::Promise(p1), Value::Promise(p2)) => p1.ptr_eq(p2),
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

fn format_js_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n.is_sign_negative() { "-Infinity" } else { "Infinity" };
        s.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::Number(n) => format_js_number(*n),
        Value::String(s) => s.clone(),
        Value::Boolean(b) => b.to_string(),
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Object(obj) => {
            let Ok(borrowed) = obj.try_borrow() else {
                return "[object Object]".to_string();
            };
            if let Some(kind) = borrowed.error_kind() {
                let msg = borrowed.get_message().unwrap_or_default();
                return format!("{}: {msg}", kind.name());
            }
            if let Some(msg) = borrowed.get_message() {
                return msg;
            }
            if borrowed.is_callable() {
                return "function".to_string();
            }
            "[object Object]".to_string()
        }
        Value::Promise(_) => "[object Promise]".to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&value_to_string(self))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(obj) => write!(f, "Object({:p}: {})", Rc::as_ptr(obj), value_to_string(self)),
            Value::Promise(p) => write!(f, "{p:?}"),
            _ => f.write_str(&value_to_string(self)),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                let len = items.len();
                let obj = new_js_object_data();
                for (i, item) in items.into_iter().enumerate() {
                    object_set_key_value(&obj, i.to_string(), Value::from(item));
                }
                object_set_key_value(&obj, "length", Value::Number(len as f64));
                Value::Object(obj)
            }
            serde_json::Value::Object(map) => Value::object_from(map.into_iter().map(|(k, v)| (k, Value::from(v)))),
        }
    }
}
