//! Runtime values seen by scripts.
//!
//! Arrays and objects are shared and interior-mutable, so two names can alias
//! one container exactly like in the markup's script language. Snapshots are
//! made with [`Value::deep_clone`]; change detection compares with
//! [`Value::shallow_eq`].

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use bindery_script::ArrowFunction;
use indexmap::IndexMap;

use crate::collections::IdentityMap;
use crate::context::ScopeRef;
use crate::engine::CallContext;
use crate::error::ScriptError;

pub type LocalFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;
pub type NativeResult = LocalFuture<'static, Result<Value, ScriptError>>;

pub type ObjectMap = IndexMap<String, Value>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type ObjectRef = Rc<RefCell<ObjectMap>>;

/// Depth at which string and JSON conversion stop descending.
const MAX_NESTING: usize = 64;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
}

/// A script arrow function together with the local scopes it closed over.
pub struct Closure {
    pub(crate) arrow: Rc<ArrowFunction>,
    pub(crate) captured: Vec<ScopeRef>,
}

impl Closure {
    pub fn source(&self) -> &str {
        &self.arrow.source
    }

    pub fn params(&self) -> &[String] {
        &self.arrow.params
    }
}

/// Arguments handed to a host function.
pub struct NativeCall {
    pub this: Value,
    pub args: Vec<Value>,
    pub cx: CallContext,
}

impl NativeCall {
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }
}

type HostBody = dyn Fn(NativeCall) -> NativeResult;

/// Built-ins the interpreter runs itself because they read or write through
/// the mutation tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intrinsic {
    Lookup,
    ObjectAssign,
}

pub(crate) enum NativeBody {
    Host(Box<HostBody>),
    Intrinsic(Intrinsic),
}

/// A host function callable from scripts. It may complete immediately or
/// return a future that suspends (which the synchronous processor rejects).
pub struct NativeFunction {
    name: Cow<'static, str>,
    body: NativeBody,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        body: impl Fn(NativeCall) -> NativeResult + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: NativeBody::Host(Box::new(body)),
        }
    }

    /// Wraps a function that never suspends.
    pub fn sync(
        name: impl Into<Cow<'static, str>>,
        body: impl Fn(&[Value]) -> Result<Value, ScriptError> + 'static,
    ) -> Self {
        Self::new(name, move |call| {
            let result = body(&call.args);
            Box::pin(std::future::ready(result))
        })
    }

    pub(crate) fn intrinsic(name: &'static str, intrinsic: Intrinsic) -> Self {
        Self {
            name: Cow::Borrowed(name),
            body: NativeBody::Intrinsic(intrinsic),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn body(&self) -> &NativeBody {
        &self.body
    }

    /// Invokes a host function. Intrinsics only run inside the interpreter
    /// and report themselves as not callable here.
    pub fn call(&self, call: NativeCall) -> NativeResult {
        match &self.body {
            NativeBody::Host(body) => body(call),
            NativeBody::Intrinsic(_) => {
                let callee = self.name.to_string();
                Box::pin(std::future::ready(Err(ScriptError::NotCallable { callee })))
            }
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<ObjectMap> for Value {
    fn from(map: ObjectMap) -> Self {
        Value::object(map)
    }
}

impl From<NativeFunction> for Value {
    fn from(function: NativeFunction) -> Self {
        Value::Native(Rc::new(function))
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(map: ObjectMap) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn object_from<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Identity of a shared container, used to key the mutation tracker.
    pub(crate) fn ptr_id(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(Rc::as_ptr(items) as *const () as usize),
            Value::Object(map) => Some(Rc::as_ptr(map) as *const () as usize),
            _ => None,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(value) => format!("boolean {value}"),
            Value::Number(value) => format!("number {}", format_number(*value)),
            Value::String(text) => format!("string {text:?}"),
            Value::Array(_) => "array".into(),
            Value::Object(_) => "object".into(),
            Value::Function(_) | Value::Native(_) => "function".into(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::String(text) => !text.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(value) => f64::from(u8::from(*value)),
            Value::Number(value) => *value,
            Value::String(text) => parse_number(text),
            Value::Array(_) => parse_number(&self.to_display()),
            _ => f64::NAN,
        }
    }

    /// String conversion as used by concatenation and template literals.
    /// An array nested inside itself contributes the empty string.
    pub fn to_display(&self) -> String {
        let mut joining = Vec::new();
        self.display_with(&mut joining)
    }

    fn display_with(&self, joining: &mut Vec<usize>) -> String {
        match self {
            Value::Array(items) => {
                let id = Rc::as_ptr(items) as *const () as usize;
                if joining.contains(&id) || joining.len() >= MAX_NESTING {
                    return String::new();
                }
                joining.push(id);
                let joined = items
                    .borrow()
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.display_with(joining)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                joining.pop();
                joined
            }
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(value) => value.to_string(),
            Value::Number(value) => format_number(*value),
            Value::String(text) => text.to_string(),
            Value::Object(_) => "[object Object]".into(),
            Value::Function(closure) => closure.source().to_string(),
            Value::Native(native) => format!("function {}() {{ [native code] }}", native.name()),
        }
    }

    /// Key form of a value used in member access.
    pub fn to_property_key(&self) -> String {
        match self {
            Value::String(text) => text.to_string(),
            other => other.to_display(),
        }
    }

    /// Plain property read without tracking or errors: missing members are
    /// `undefined`.
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
            Value::Array(items) => {
                let items = items.borrow();
                if key == "length" {
                    return Value::from(items.len());
                }
                index_of_key(key)
                    .and_then(|index| items.get(index).cloned())
                    .unwrap_or_default()
            }
            Value::String(text) => {
                if key == "length" {
                    return Value::from(text.chars().count());
                }
                index_of_key(key)
                    .and_then(|index| text.chars().nth(index))
                    .map(|ch| Value::from(ch.to_string()))
                    .unwrap_or_default()
            }
            _ => Value::Undefined,
        }
    }

    /// Scalars by value, containers and functions by identity. `NaN` equals
    /// itself here so an unchanged `NaN` does not defeat memoization.
    pub fn shallow_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self.strict_eq(other),
        }
    }

    /// `===`
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if matches!(self, Value::Array(_) | Value::Object(_))
                    || matches!(other, Value::Array(_) | Value::Object(_))
                {
                    self.to_display() == other.to_display()
                } else {
                    self.to_number() == other.to_number()
                }
            }
            _ => self.strict_eq(other),
        }
    }

    /// Structurally equal copy in which every array and object is new.
    /// Shared sub-graphs stay shared (and cycles stay cycles) in the copy.
    pub fn deep_clone(&self) -> Value {
        let mut seen = IdentityMap::default();
        self.deep_clone_with(&mut seen)
    }

    fn deep_clone_with(&self, seen: &mut IdentityMap<Value>) -> Value {
        let Some(id) = self.ptr_id() else {
            return self.clone();
        };
        if let Some(copy) = seen.get(&id) {
            return copy.clone();
        }
        match self {
            Value::Array(items) => {
                let copy = Rc::new(RefCell::new(Vec::new()));
                seen.insert(id, Value::Array(copy.clone()));
                let cloned: Vec<Value> = items
                    .borrow()
                    .iter()
                    .map(|item| item.deep_clone_with(seen))
                    .collect();
                *copy.borrow_mut() = cloned;
                Value::Array(copy)
            }
            Value::Object(map) => {
                let copy = Rc::new(RefCell::new(ObjectMap::new()));
                seen.insert(id, Value::Object(copy.clone()));
                let cloned: ObjectMap = map
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.deep_clone_with(seen)))
                    .collect();
                *copy.borrow_mut() = cloned;
                Value::Object(copy)
            }
            _ => self.clone(),
        }
    }

    /// JSON form of the value. Functions and `undefined` become `null` (or
    /// are skipped as object members); a container nested inside itself is
    /// cut off as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_with(&mut Vec::new())
    }

    fn to_json_with(&self, open: &mut Vec<usize>) -> serde_json::Value {
        if let Some(id) = self.ptr_id() {
            if open.contains(&id) || open.len() >= MAX_NESTING {
                return serde_json::Value::Null;
            }
        }
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Native(_) => {
                serde_json::Value::Null
            }
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 9.0e15 {
                    serde_json::Value::from(*value as i64)
                } else {
                    serde_json::Number::from_f64(*value)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(text) => serde_json::Value::String(text.to_string()),
            Value::Array(items) => {
                open.push(Rc::as_ptr(items) as *const () as usize);
                let json: Vec<serde_json::Value> = items
                    .borrow()
                    .iter()
                    .map(|item| item.to_json_with(open))
                    .collect();
                open.pop();
                serde_json::Value::Array(json)
            }
            Value::Object(map) => {
                open.push(Rc::as_ptr(map) as *const () as usize);
                let json: serde_json::Map<String, serde_json::Value> = map
                    .borrow()
                    .iter()
                    .filter(|(_, value)| {
                        !matches!(value, Value::Undefined | Value::Function(_) | Value::Native(_))
                    })
                    .map(|(key, value)| (key.clone(), value.to_json_with(open)))
                    .collect();
                open.pop();
                serde_json::Value::Object(json)
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(*value),
            serde_json::Value::Number(number) => Value::Number(number.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(text) => Value::from(text.as_str()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::String(text) => write!(f, "{text:?}"),
            Value::Function(closure) => write!(f, "[Function {}]", closure.source()),
            Value::Native(native) => write!(f, "[Native {}]", native.name()),
            Value::Number(value) => f.write_str(&format_number(*value)),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Number formatting following the script language: integral values have no
/// fractional part, non-finite values use their script names.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        if value > 0.0 {
            "Infinity".into()
        } else {
            "-Infinity".into()
        }
    } else if value == 0.0 {
        "0".into()
    } else if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Numeric conversion of a string: blank is zero, anything unparsable is NaN.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|value| value as f64)
            .unwrap_or(f64::NAN);
    }
    if trimmed
        .chars()
        .any(|ch| !(ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+' | 'e' | 'E')))
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

pub(crate) fn index_of_key(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse::<usize>().ok()
}
