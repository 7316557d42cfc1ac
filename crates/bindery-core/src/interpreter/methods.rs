//! Built-in methods of arrays, strings and numbers.
//!
//! In-place array methods go through the mutation tracker as one write of
//! the whole array, so a `push` onto state commits like an assignment.

use super::EvalFuture;
use crate::context::EvalContext;
use crate::error::ScriptError;
use crate::value::{format_number, ArrayRef, Value};

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "splice", "reverse", "sort", "includes", "indexOf", "join",
    "slice", "concat", "map", "filter", "find", "findIndex", "some", "every", "forEach", "reduce",
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "trimStart",
    "trimEnd",
    "includes",
    "startsWith",
    "endsWith",
    "split",
    "slice",
    "substring",
    "indexOf",
    "replace",
    "replaceAll",
    "padStart",
    "padEnd",
    "charAt",
    "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

pub(crate) fn has_intrinsic(receiver: &Value, name: &str) -> bool {
    match receiver {
        Value::Array(_) => ARRAY_METHODS.contains(&name),
        Value::String(_) => STRING_METHODS.contains(&name),
        Value::Number(_) => NUMBER_METHODS.contains(&name),
        _ => false,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// Resolves a possibly negative index against `len`, clamped to `0..=len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_undefined() {
        return default;
    }
    let number = value.to_number();
    if number.is_nan() {
        return 0;
    }
    let number = number.trunc();
    if number < 0.0 {
        (len as f64 + number).max(0.0) as usize
    } else {
        number.min(len as f64) as usize
    }
}

impl EvalContext {
    pub(crate) fn call_intrinsic_method<'a>(
        &'a mut self,
        receiver: Value,
        name: &'a str,
        args: Vec<Value>,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            match &receiver {
                Value::Array(items) => {
                    let items = items.clone();
                    self.expose_children(std::slice::from_ref(&receiver));
                    self.expose_children(&args);
                    self.array_method(receiver, items, name, args).await
                }
                Value::String(text) => {
                    string_method(text, name, &args, self.engine.config().max_array_length)
                }
                Value::Number(number) => number_method(*number, name, &args),
                other => Err(ScriptError::NotCallable {
                    callee: format!("{}.{name}", other.type_of()),
                }),
            }
        })
    }

    async fn array_method(
        &mut self,
        receiver: Value,
        items: ArrayRef,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        match name {
            "push" | "pop" | "shift" | "unshift" | "splice" | "reverse" => {
                self.check_array_writable(&receiver)?;
                let result = mutate_array(&items, &receiver, name, args);
                self.array_mutated(&receiver)?;
                Ok(result)
            }
            "sort" => {
                self.check_array_writable(&receiver)?;
                let snapshot = items.borrow().clone();
                let comparator = arg(&args, 0);
                let sorted = if comparator.is_callable() {
                    self.sort_with(snapshot, comparator).await?
                } else {
                    default_sort(snapshot)
                };
                *items.borrow_mut() = sorted;
                self.array_mutated(&receiver)?;
                Ok(receiver)
            }
            "includes" => {
                let needle = arg(&args, 0);
                let found = items.borrow().iter().any(|item| item.shallow_eq(&needle));
                Ok(Value::Bool(found))
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let position = items.borrow().iter().position(|item| item.strict_eq(&needle));
                Ok(position.map_or(Value::Number(-1.0), Value::from))
            }
            "join" => {
                let separator = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    other => other.to_display(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.to_display()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(Value::from(joined))
            }
            "slice" => {
                let items = items.borrow();
                let len = items.len();
                let start = relative_index(&arg(&args, 0), len, 0);
                let end = relative_index(&arg(&args, 1), len, len).max(start);
                Ok(Value::array(items[start..end].to_vec()))
            }
            "concat" => {
                let mut joined = items.borrow().clone();
                for value in args {
                    match value {
                        Value::Array(other) => joined.extend(other.borrow().iter().cloned()),
                        other => joined.push(other),
                    }
                }
                Ok(Value::array(joined))
            }
            "reduce" => {
                let callback = callback_arg(&args, name)?;
                let snapshot = items.borrow().clone();
                let mut entries = snapshot.into_iter().enumerate();
                let mut accumulator = if args.len() > 1 {
                    arg(&args, 1)
                } else {
                    match entries.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(ScriptError::TypeMismatch {
                                expected: "non-empty array",
                                found: "empty array".into(),
                            })
                        }
                    }
                };
                for (index, item) in entries {
                    self.register_element(&receiver, &index.to_string(), &item);
                    accumulator = self
                        .call_value(
                            callback.clone(),
                            Value::Undefined,
                            vec![accumulator, item, Value::from(index), receiver.clone()],
                        )
                        .await?;
                }
                Ok(accumulator)
            }
            _ => self.iterate_with_callback(receiver, items, name, &args).await,
        }
    }

    /// `map`, `filter`, `find`, `findIndex`, `some`, `every`, `forEach`.
    async fn iterate_with_callback(
        &mut self,
        receiver: Value,
        items: ArrayRef,
        name: &str,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        let callback = callback_arg(args, name)?;
        let snapshot = items.borrow().clone();
        let mut mapped = Vec::new();
        for (index, item) in snapshot.into_iter().enumerate() {
            self.register_element(&receiver, &index.to_string(), &item);
            let result = self
                .call_value(
                    callback.clone(),
                    Value::Undefined,
                    vec![item.clone(), Value::from(index), receiver.clone()],
                )
                .await?;
            match name {
                "map" => mapped.push(result),
                "filter" if result.truthy() => mapped.push(item),
                "find" if result.truthy() => return Ok(item),
                "findIndex" if result.truthy() => return Ok(Value::from(index)),
                "some" if result.truthy() => return Ok(Value::Bool(true)),
                "every" if !result.truthy() => return Ok(Value::Bool(false)),
                _ => {}
            }
        }
        Ok(match name {
            "map" | "filter" => Value::array(mapped),
            "findIndex" => Value::Number(-1.0),
            "some" => Value::Bool(false),
            "every" => Value::Bool(true),
            _ => Value::Undefined,
        })
    }

    /// Stable binary insertion sort; the comparator may be a script closure,
    /// so comparisons are awaited one at a time.
    async fn sort_with(
        &mut self,
        snapshot: Vec<Value>,
        comparator: Value,
    ) -> Result<Vec<Value>, ScriptError> {
        let mut sorted: Vec<Value> = Vec::with_capacity(snapshot.len());
        for item in snapshot {
            let (mut low, mut high) = (0, sorted.len());
            while low < high {
                let middle = (low + high) / 2;
                let order = self
                    .call_value(
                        comparator.clone(),
                        Value::Undefined,
                        vec![item.clone(), sorted[middle].clone()],
                    )
                    .await?
                    .to_number();
                if order < 0.0 {
                    high = middle;
                } else {
                    low = middle + 1;
                }
            }
            sorted.insert(low, item);
        }
        Ok(sorted)
    }
}

fn callback_arg(args: &[Value], method: &str) -> Result<Value, ScriptError> {
    let callback = arg(args, 0);
    if callback.is_callable() {
        Ok(callback)
    } else {
        Err(ScriptError::NotCallable {
            callee: format!("{method} callback ({})", callback.describe()),
        })
    }
}

fn mutate_array(items: &ArrayRef, receiver: &Value, name: &str, args: Vec<Value>) -> Value {
    let mut items = items.borrow_mut();
    match name {
        "push" => {
            items.extend(args);
            Value::from(items.len())
        }
        "pop" => items.pop().unwrap_or_default(),
        "shift" => {
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        }
        "unshift" => {
            items.splice(0..0, args);
            Value::from(items.len())
        }
        "splice" => {
            let len = items.len();
            let start = relative_index(&arg(&args, 0), len, 0);
            let delete_count = if args.len() < 2 {
                len - start
            } else {
                let count = arg(&args, 1).to_number();
                if count.is_nan() || count < 0.0 {
                    0
                } else {
                    (count.trunc() as usize).min(len - start)
                }
            };
            let inserted: Vec<Value> = args.into_iter().skip(2).collect();
            let removed: Vec<Value> = items
                .splice(start..start + delete_count, inserted)
                .collect();
            Value::array(removed)
        }
        "reverse" => {
            items.reverse();
            receiver.clone()
        }
        _ => Value::Undefined,
    }
}

/// Default ordering: `undefined` last, everything else by string form.
fn default_sort(mut items: Vec<Value>) -> Vec<Value> {
    items.sort_by(|a, b| match (a.is_undefined(), b.is_undefined()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.to_display().cmp(&b.to_display()),
    });
    items
}

fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn char_index_of(text: &str, needle: &str) -> Option<usize> {
    text.find(needle).map(|byte| text[..byte].chars().count())
}

fn pad(text: &str, args: &[Value], at_start: bool, limit: usize) -> Result<String, ScriptError> {
    let target = arg(args, 0).to_number();
    let fill = match arg(args, 1) {
        Value::Undefined => " ".to_string(),
        other => other.to_display(),
    };
    let len = text.chars().count();
    if target.is_nan() || target <= len as f64 || fill.is_empty() {
        return Ok(text.to_string());
    }
    if target > limit as f64 {
        return Err(ScriptError::LengthExceeded {
            requested: target.trunc(),
            limit,
        });
    }
    let padding: String = fill.chars().cycle().take(target as usize - len).collect();
    Ok(if at_start {
        format!("{padding}{text}")
    } else {
        format!("{text}{padding}")
    })
}

fn string_method(
    text: &str,
    name: &str,
    args: &[Value],
    limit: usize,
) -> Result<Value, ScriptError> {
    let len = text.chars().count();
    let needle = || arg(args, 0).to_display();
    let value = match name {
        "toUpperCase" => Value::from(text.to_uppercase()),
        "toLowerCase" => Value::from(text.to_lowercase()),
        "trim" => Value::from(text.trim()),
        "trimStart" => Value::from(text.trim_start()),
        "trimEnd" => Value::from(text.trim_end()),
        "includes" => Value::Bool(text.contains(needle().as_str())),
        "startsWith" => Value::Bool(text.starts_with(needle().as_str())),
        "endsWith" => Value::Bool(text.ends_with(needle().as_str())),
        "indexOf" => char_index_of(text, &needle()).map_or(Value::Number(-1.0), Value::from),
        "charAt" => {
            let index = relative_index(&arg(args, 0), len, 0);
            Value::from(char_slice(text, index, index + 1))
        }
        "slice" => {
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            Value::from(char_slice(text, start, end))
        }
        "substring" => {
            let clamp = |value: Value, default: usize| {
                if value.is_undefined() {
                    return default;
                }
                let number = value.to_number();
                if number.is_nan() || number < 0.0 {
                    0
                } else {
                    (number.trunc() as usize).min(len)
                }
            };
            let start = clamp(arg(args, 0), 0);
            let end = clamp(arg(args, 1), len);
            Value::from(char_slice(text, start.min(end), start.max(end)))
        }
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::from(text)],
                separator => {
                    let separator = separator.to_display();
                    if separator.is_empty() {
                        text.chars().map(|ch| Value::from(ch.to_string())).collect()
                    } else {
                        text.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::array(parts)
        }
        "replace" => Value::from(text.replacen(&needle(), &arg(args, 1).to_display(), 1)),
        "replaceAll" => Value::from(text.replace(&needle(), &arg(args, 1).to_display())),
        "padStart" => Value::from(pad(text, args, true, limit)?),
        "padEnd" => Value::from(pad(text, args, false, limit)?),
        "toString" => Value::from(text),
        other => {
            return Err(ScriptError::NotCallable {
                callee: format!("string.{other}"),
            })
        }
    };
    Ok(value)
}

fn number_method(number: f64, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() {
                0
            } else {
                digits.clamp(0.0, 100.0) as usize
            };
            Ok(Value::from(format!("{number:.digits$}")))
        }
        "toString" => Ok(Value::from(format_number(number))),
        other => Err(ScriptError::NotCallable {
            callee: format!("number.{other}"),
        }),
    }
}
