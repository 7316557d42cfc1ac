use crate::value::Value;
use bindery_script::ParseError;
use thiserror::Error;

/// Everything that can go wrong while evaluating a binding or running a
/// handler. Errors are `Clone` so one failure can be stored on the
/// container's lifecycle, handed to the error sink and returned.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("cannot write read-only path '{path}'")]
    ReadOnlyPath { path: String },
    #[error("cannot read property '{property}' of {target}")]
    UndefinedMember {
        property: String,
        target: &'static str,
    },
    #[error("'{callee}' is not a function")]
    NotCallable { callee: String },
    #[error("assignment to constant '{name}'")]
    ConstAssignment { name: String },
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("uncaught {0}")]
    Thrown(Value),
    #[error("'{keyword}' outside of a loop")]
    IllegalJump { keyword: &'static str },
    #[error("statement suspended during synchronous execution")]
    SuspendedInSync,
    #[error("bindings cannot modify state")]
    ReadOnlyEvaluation,
    #[error("maximum call depth of {limit} exceeded")]
    CallDepthExceeded { limit: usize },
    #[error("invalid length {requested}: the limit is {limit}")]
    LengthExceeded { requested: f64, limit: usize },
    #[error(transparent)]
    Action(#[from] ActionError),
}

impl ScriptError {
    pub(crate) fn type_mismatch(expected: &'static str, found: &Value) -> Self {
        ScriptError::TypeMismatch {
            expected,
            found: found.describe(),
        }
    }

    /// The value a `catch` clause binds for this error.
    pub fn to_value(&self) -> Value {
        match self {
            ScriptError::Thrown(value) => value.clone(),
            other => Value::object_from([
                ("name", Value::from(other.kind_name())),
                ("message", Value::from(other.to_string())),
            ]),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            ScriptError::Parse(_) => "SyntaxError",
            ScriptError::TypeMismatch { .. } | ScriptError::NotCallable { .. } => "TypeError",
            ScriptError::UndefinedMember { .. } => "TypeError",
            ScriptError::ReadOnlyPath { .. }
            | ScriptError::ConstAssignment { .. }
            | ScriptError::ReadOnlyEvaluation => "TypeError",
            ScriptError::InvalidAssignmentTarget | ScriptError::IllegalJump { .. } => {
                "SyntaxError"
            }
            ScriptError::Thrown(_) => "Error",
            ScriptError::CallDepthExceeded { .. } | ScriptError::LengthExceeded { .. } => {
                "RangeError"
            }
            ScriptError::SuspendedInSync => "SuspendedError",
            ScriptError::Action(_) => "ActionError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    Unknown(String),
    #[error("invalid arguments for '{action}': {message}")]
    InvalidArguments { action: String, message: String },
    #[error("no api client configured")]
    NoApiClient,
    #[error("the engine was dropped before the action ran")]
    EngineDropped,
    #[error("{method} {url} failed: {message}")]
    Api {
        method: String,
        url: String,
        status: Option<u16>,
        message: String,
    },
}
