//! Pull-side evaluation of property bindings.
//!
//! A property like `"Hello {user.name}!"` is evaluated against a state view,
//! and the result is remembered per (scope, parse id) together with the
//! values of the expression's dependencies. The next evaluation re-projects
//! the dependencies and, if every one of them is shallow-equal to last time,
//! hands back the remembered result without running the expression.

use bindery_script::Segment;

use crate::container::ScopeId;
use crate::context::EvalContext;
use crate::dependencies::{collect_dependencies, resolve_dependency, DependencySet};
use crate::engine::Engine;
use crate::error::ScriptError;
use crate::fragment_cache::ParsedPropertyValue;
use crate::interpreter::poll_once;
use crate::value::{format_number, parse_number, Value};

pub(crate) struct MemoCell {
    pub(crate) dependencies: DependencySet,
    pub(crate) projection: Vec<Value>,
    pub(crate) result: Value,
}

impl MemoCell {
    fn matches(&self, dependencies: &DependencySet, projection: &[Value]) -> bool {
        std::rc::Rc::ptr_eq(&self.dependencies, dependencies)
            && self.projection.len() == projection.len()
            && self
                .projection
                .iter()
                .zip(projection)
                .all(|(old, new)| old.shallow_eq(new))
    }
}

/// Binding evaluator bound to one scope and one state view.
pub struct ValueExtractor {
    engine: Engine,
    scope: ScopeId,
    state: Value,
    services: Option<Value>,
}

/// Drops blank literal text around the expressions, so `" {count} "`
/// yields the raw value of `count`.
fn trim_segments(segments: &[Segment]) -> &[Segment] {
    let start = segments
        .iter()
        .position(|segment| !segment.is_blank_literal())
        .unwrap_or(segments.len());
    let end = segments
        .iter()
        .rposition(|segment| !segment.is_blank_literal())
        .map_or(start, |index| index + 1);
    &segments[start..end]
}

impl ValueExtractor {
    pub(crate) fn new(
        engine: Engine,
        scope: ScopeId,
        state: Value,
        services: Option<Value>,
    ) -> Self {
        Self {
            engine,
            scope,
            state,
            services,
        }
    }

    /// Parses (through the fragment cache) and evaluates `property`.
    pub fn value(&self, property: &str) -> Result<Value, ScriptError> {
        let parsed = self.engine.parse_property(property)?;
        self.value_of(&parsed)
    }

    pub fn value_of(&self, parsed: &ParsedPropertyValue) -> Result<Value, ScriptError> {
        let segments = trim_segments(&parsed.segments);
        match segments {
            [] => return Ok(Value::from(&*parsed.source)),
            [Segment::Literal(text)] => return Ok(Value::from(text.as_str())),
            _ => {}
        }

        let dependencies = self.dependencies(parsed);
        let projection: Vec<Value> = dependencies.iter().map(|path| self.project(path)).collect();
        let key = (self.scope, parsed.id);
        if let Some(cell) = self.engine.caches().memo.borrow().get(&key) {
            if cell.matches(&dependencies, &projection) {
                return Ok(cell.result.clone());
            }
        }

        let result = self.compute(segments)?;
        log::trace!(
            "scope {}: recomputed {:?} = {:?}",
            self.scope,
            parsed.source,
            result
        );
        self.engine.caches().memo.borrow_mut().insert(
            key,
            MemoCell {
                dependencies,
                projection,
                result: result.clone(),
            },
        );
        Ok(result)
    }

    fn dependencies(&self, parsed: &ParsedPropertyValue) -> DependencySet {
        let caches = self.engine.caches();
        if let Some(found) = caches.dependencies.borrow().get(&parsed.id) {
            return found.clone();
        }
        let found = collect_dependencies(&parsed.segments);
        caches
            .dependencies
            .borrow_mut()
            .insert(parsed.id, found.clone());
        found
    }

    fn project(&self, path: &str) -> Value {
        // `$state` reads the whole view, whose identity changes on every commit.
        let sigil = self.engine.config().reserved_sigil;
        let whole_state = path
            .strip_prefix(sigil)
            .and_then(|rest| rest.strip_prefix("state"))
            .filter(|rest| rest.is_empty() || rest.starts_with('.'));
        if let Some(rest) = whole_state {
            return rest
                .split('.')
                .filter(|segment| !segment.is_empty())
                .fold(self.state.clone(), |current, segment| {
                    current.get_property(segment)
                });
        }
        resolve_dependency(path, &self.state, self.services.as_ref())
    }

    fn compute(&self, segments: &[Segment]) -> Result<Value, ScriptError> {
        let mut cx = EvalContext::new(self.engine.clone(), self.state.clone())
            .with_services(self.services.clone())
            .with_tracker()
            .read_only();
        if let [Segment::Expression(expr)] = segments {
            return poll_once(cx.eval(expr));
        }
        let mut text = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(chunk) => text.push_str(chunk),
                Segment::Expression(expr) => {
                    let value = poll_once(cx.eval(expr))?;
                    if !value.is_nullish() {
                        text.push_str(&value.to_display());
                    }
                }
            }
        }
        Ok(Value::from(text))
    }

    // ---------------------------------------------------------------------
    // Typed accessors
    // ---------------------------------------------------------------------

    /// `undefined` and `null` read as the empty string.
    pub fn as_string(&self, property: &str) -> Result<String, ScriptError> {
        Ok(self.as_optional_string(property)?.unwrap_or_default())
    }

    pub fn as_optional_string(&self, property: &str) -> Result<Option<String>, ScriptError> {
        let value = self.value(property)?;
        Ok((!value.is_nullish()).then(|| value.to_display()))
    }

    /// Numbers, and strings that parse as one. Anything else is a
    /// [`ScriptError::TypeMismatch`].
    pub fn as_number(&self, property: &str) -> Result<f64, ScriptError> {
        let value = self.value(property)?;
        strict_number(&value).ok_or_else(|| ScriptError::type_mismatch("number", &value))
    }

    pub fn as_optional_number(&self, property: &str, default: f64) -> Result<f64, ScriptError> {
        let value = self.value(property)?;
        Ok(strict_number(&value).unwrap_or(default))
    }

    /// [`ValueExtractor::as_number`] truncated towards zero.
    pub fn as_integer(&self, property: &str) -> Result<i64, ScriptError> {
        let number = self.as_number(property)?;
        if !number.is_finite() {
            return Err(ScriptError::type_mismatch("integer", &Value::Number(number)));
        }
        Ok(number.trunc() as i64)
    }

    pub fn as_boolean(&self, property: &str) -> Result<bool, ScriptError> {
        let value = self.value(property)?;
        Ok(coerce_boolean(&value).unwrap_or(false))
    }

    pub fn as_optional_boolean(&self, property: &str, default: bool) -> Result<bool, ScriptError> {
        let value = self.value(property)?;
        Ok(coerce_boolean(&value).unwrap_or(default))
    }

    /// Numbers become pixel sizes (`12` → `"12px"`), strings pass through.
    pub fn as_size(&self, property: &str) -> Result<Option<String>, ScriptError> {
        Ok(match self.value(property)? {
            Value::Number(number) if number.is_finite() => Some(format!("{}px", format_number(number))),
            Value::String(text) if !text.is_empty() => Some(text.to_string()),
            Value::Undefined | Value::Null => None,
            other => return Err(ScriptError::type_mismatch("size", &other)),
        })
    }

    pub fn as_display_text(&self, property: &str) -> Result<String, ScriptError> {
        let value = self.value(property)?;
        Ok(if value.is_nullish() {
            String::new()
        } else {
            value.to_display()
        })
    }
}

fn strict_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => Some(*number),
        Value::String(text) if !text.trim().is_empty() => {
            Some(parse_number(text)).filter(|number| !number.is_nan())
        }
        _ => None,
    }
}

/// `None` for `undefined`/`null`, so callers pick their own default.
fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Undefined | Value::Null => None,
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => Some(*number != 0.0 && !number.is_nan()),
        Value::String(text) => {
            let text = text.trim();
            if text.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                Some(!text.is_empty())
            }
        }
        _ => Some(true),
    }
}
