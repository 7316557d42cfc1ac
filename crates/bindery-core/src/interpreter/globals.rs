use serde::Serialize;

use crate::error::ScriptError;
use crate::value::{Intrinsic, NativeFunction, ObjectMap, Value};

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn native(
    name: &'static str,
    body: impl Fn(&[Value]) -> Result<Value, ScriptError> + 'static,
) -> Value {
    Value::from(NativeFunction::sync(name, body))
}

fn math_fold(args: &[Value], start: f64, pick: fn(f64, f64) -> f64) -> Value {
    let mut result = start;
    for value in args {
        let number = value.to_number();
        if number.is_nan() {
            return Value::Number(f64::NAN);
        }
        result = pick(result, number);
    }
    Value::Number(result)
}

fn unary_math(name: &'static str, op: fn(f64) -> f64) -> Value {
    native(name, move |args| Ok(Value::Number(op(arg(args, 0).to_number()))))
}

fn math() -> Value {
    let mut math = ObjectMap::new();
    math.insert("PI".into(), Value::Number(std::f64::consts::PI));
    math.insert("E".into(), Value::Number(std::f64::consts::E));
    math.insert("abs".into(), unary_math("Math.abs", f64::abs));
    math.insert("floor".into(), unary_math("Math.floor", f64::floor));
    math.insert("ceil".into(), unary_math("Math.ceil", f64::ceil));
    math.insert("trunc".into(), unary_math("Math.trunc", f64::trunc));
    math.insert("sqrt".into(), unary_math("Math.sqrt", f64::sqrt));
    // Halves round towards positive infinity.
    math.insert(
        "round".into(),
        unary_math("Math.round", |value| (value + 0.5).floor()),
    );
    math.insert(
        "sign".into(),
        unary_math("Math.sign", |value| {
            if value.is_nan() || value == 0.0 {
                value
            } else {
                value.signum()
            }
        }),
    );
    math.insert(
        "pow".into(),
        native("Math.pow", |args| {
            Ok(Value::Number(
                arg(args, 0).to_number().powf(arg(args, 1).to_number()),
            ))
        }),
    );
    math.insert(
        "min".into(),
        native("Math.min", |args| Ok(math_fold(args, f64::INFINITY, f64::min))),
    );
    math.insert(
        "max".into(),
        native("Math.max", |args| {
            Ok(math_fold(args, f64::NEG_INFINITY, f64::max))
        }),
    );
    Value::object(math)
}

fn syntax_error(message: String) -> ScriptError {
    ScriptError::Thrown(Value::object_from([
        ("name", Value::from("SyntaxError")),
        ("message", Value::from(message)),
    ]))
}

fn stringify(args: &[Value]) -> Result<Value, ScriptError> {
    let value = arg(args, 0);
    if value.is_undefined() || value.is_callable() {
        return Ok(Value::Undefined);
    }
    let json = value.to_json();
    let indent = match arg(args, 2) {
        Value::Number(width) if width >= 1.0 => " ".repeat(width.min(10.0) as usize),
        Value::String(text) => text.chars().take(10).collect(),
        _ => String::new(),
    };
    if indent.is_empty() {
        return Ok(Value::from(json.to_string()));
    }
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    json.serialize(&mut serializer)
        .map_err(|error| syntax_error(error.to_string()))?;
    Ok(Value::from(String::from_utf8_lossy(&buffer).into_owned()))
}

fn json() -> Value {
    Value::object_from([
        ("stringify", native("JSON.stringify", stringify)),
        (
            "parse",
            native("JSON.parse", |args| {
                let text = arg(args, 0).to_display();
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(Value::from)
                    .map_err(|error| syntax_error(error.to_string()))
            }),
        ),
    ])
}

fn entries_of(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), value.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn object() -> Value {
    Value::object_from([
        (
            "keys",
            native("Object.keys", |args| {
                Ok(Value::array(
                    entries_of(&arg(args, 0))
                        .into_iter()
                        .map(|(key, _)| Value::from(key))
                        .collect(),
                ))
            }),
        ),
        (
            "values",
            native("Object.values", |args| {
                Ok(Value::array(
                    entries_of(&arg(args, 0))
                        .into_iter()
                        .map(|(_, value)| value)
                        .collect(),
                ))
            }),
        ),
        (
            "entries",
            native("Object.entries", |args| {
                Ok(Value::array(
                    entries_of(&arg(args, 0))
                        .into_iter()
                        .map(|(key, value)| Value::array(vec![Value::from(key), value]))
                        .collect(),
                ))
            }),
        ),
        (
            "fromEntries",
            native("Object.fromEntries", |args| {
                let mut map = ObjectMap::new();
                for (_, entry) in entries_of(&arg(args, 0)) {
                    map.insert(entry.get_property("0").to_property_key(), entry.get_property("1"));
                }
                Ok(Value::object(map))
            }),
        ),
        (
            "assign",
            Value::from(NativeFunction::intrinsic(
                "Object.assign",
                Intrinsic::ObjectAssign,
            )),
        ),
    ])
}

/// `parseInt`: leading digits in `radix`, `0x` prefix implies 16.
fn parse_int(args: &[Value]) -> Value {
    let text = arg(args, 0).to_display();
    let mut rest = text.trim();
    let negative = rest.starts_with('-');
    rest = rest.trim_start_matches(['-', '+']);
    let (mut radix, explicit) = match arg(args, 1).to_number() {
        value if value.is_nan() || value == 0.0 => (10, false),
        value => (value as u32, true),
    };
    if !(2..=36).contains(&radix) {
        return Value::Number(f64::NAN);
    }
    if !explicit || radix == 16 {
        if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            rest = hex;
            radix = 16;
        }
    }
    let mut result: Option<f64> = None;
    for ch in rest.chars() {
        let Some(digit) = ch.to_digit(radix) else {
            break;
        };
        result = Some(result.unwrap_or(0.0) * radix as f64 + digit as f64);
    }
    match result {
        Some(value) if negative => Value::Number(-value),
        Some(value) => Value::Number(value),
        None => Value::Number(f64::NAN),
    }
}

/// `parseFloat`: the longest numeric prefix.
fn parse_float(args: &[Value]) -> Value {
    let text = arg(args, 0).to_display();
    let trimmed = text.trim_start();
    for (prefix, value) in [("Infinity", f64::INFINITY), ("-Infinity", f64::NEG_INFINITY)] {
        if trimmed.starts_with(prefix) {
            return Value::Number(value);
        }
    }
    let candidate: String = trimmed
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    let mut end = candidate.len();
    while end > 0 {
        if let Ok(value) = candidate[..end].parse::<f64>() {
            return Value::Number(value);
        }
        end -= 1;
    }
    Value::Number(f64::NAN)
}

fn console() -> Value {
    fn line(args: &[Value]) -> String {
        args.iter()
            .map(Value::to_display)
            .collect::<Vec<_>>()
            .join(" ")
    }
    Value::object_from([
        (
            "log",
            native("console.log", |args| {
                log::info!(target: "bindery::console", "{}", line(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "info",
            native("console.info", |args| {
                log::info!(target: "bindery::console", "{}", line(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "debug",
            native("console.debug", |args| {
                log::debug!(target: "bindery::console", "{}", line(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "warn",
            native("console.warn", |args| {
                log::warn!(target: "bindery::console", "{}", line(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "error",
            native("console.error", |args| {
                log::error!(target: "bindery::console", "{}", line(args));
                Ok(Value::Undefined)
            }),
        ),
    ])
}

/// Names every script can see. `Actions` is resolved separately because
/// the action registry can grow after the engine is built.
pub(crate) fn build_globals() -> ObjectMap {
    let mut globals = ObjectMap::new();
    globals.insert("Math".into(), math());
    globals.insert("JSON".into(), json());
    globals.insert("Object".into(), object());
    globals.insert("console".into(), console());
    globals.insert(
        "Array".into(),
        Value::object_from([(
            "isArray",
            native("Array.isArray", |args| {
                Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
            }),
        )]),
    );
    globals.insert(
        "String".into(),
        native("String", |args| {
            Ok(match args.first() {
                Some(value) => Value::from(value.to_display()),
                None => Value::from(""),
            })
        }),
    );
    globals.insert(
        "Number".into(),
        native("Number", |args| {
            Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
        }),
    );
    globals.insert(
        "Boolean".into(),
        native("Boolean", |args| Ok(Value::Bool(arg(args, 0).truthy()))),
    );
    globals.insert(
        "parseInt".into(),
        native("parseInt", |args| Ok(parse_int(args))),
    );
    globals.insert(
        "parseFloat".into(),
        native("parseFloat", |args| Ok(parse_float(args))),
    );
    globals.insert(
        "isNaN".into(),
        native("isNaN", |args| Ok(Value::Bool(arg(args, 0).to_number().is_nan()))),
    );
    globals.insert(
        "isFinite".into(),
        native("isFinite", |args| {
            Ok(Value::Bool(arg(args, 0).to_number().is_finite()))
        }),
    );
    globals.insert(
        "delay".into(),
        Value::from(NativeFunction::new("delay", |call| {
            crate::actions::delay(call.cx, call.args)
        })),
    );
    globals.insert("NaN".into(), Value::Number(f64::NAN));
    globals.insert("Infinity".into(), Value::Number(f64::INFINITY));
    globals
}
