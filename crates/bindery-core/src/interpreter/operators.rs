use std::cmp::Ordering;

use bindery_script::{BinaryOp, UnaryOp};

use crate::error::ScriptError;
use crate::value::{index_of_key, Value};

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let value = match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::LtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::In => {
            let key = left.to_property_key();
            let found = match right {
                Value::Object(map) => map.borrow().contains_key(&key),
                Value::Array(items) => {
                    key == "length"
                        || index_of_key(&key).is_some_and(|index| index < items.borrow().len())
                }
                other => return Err(ScriptError::type_mismatch("object", other)),
            };
            Value::Bool(found)
        }
    };
    Ok(value)
}

pub(crate) fn unary(op: UnaryOp, value: &Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!value.truthy()),
        UnaryOp::Neg => Value::Number(-value.to_number()),
        UnaryOp::Plus => Value::Number(value.to_number()),
        UnaryOp::TypeOf => Value::from(value.type_of()),
        // Handled by the evaluator, which needs the member target.
        UnaryOp::Delete => Value::Bool(true),
    }
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Native(_) => {
            Value::from(value.to_display())
        }
        other => other.clone(),
    }
}

fn add(left: &Value, right: &Value) -> Value {
    let left = to_primitive(left);
    let right = to_primitive(right);
    if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
        let mut text = left.to_display();
        text.push_str(&right.to_display());
        Value::from(text)
    } else {
        Value::Number(left.to_number() + right.to_number())
    }
}

/// Relational comparison: strings compare lexically, everything else
/// numerically. `None` when either side is `NaN`.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    let left = to_primitive(left);
    let right = to_primitive(right);
    match (&left, &right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}
