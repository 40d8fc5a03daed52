use num_traits::ToPrimitive;
use unicode_segmentation::UnicodeSegmentation;

use super::{RuntimeError, TypeValue, Value, ValueKey};

/// Parse a number token into an integer or float value. Underscore
/// separators are allowed; `0x`, `0o` and `0b` prefixes select a radix.
pub fn parse_number(text: &str) -> Result<Value, RuntimeError> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err(RuntimeError::invalid_number_literal(text));
    }
    if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16)
            .map(Value::Integer)
            .map_err(|_| RuntimeError::invalid_number_literal(text));
    }
    if let Some(oct) = cleaned.strip_prefix("0o").or_else(|| cleaned.strip_prefix("0O")) {
        return i64::from_str_radix(oct, 8)
            .map(Value::Integer)
            .map_err(|_| RuntimeError::invalid_number_literal(text));
    }
    if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2)
            .map(Value::Integer)
            .map_err(|_| RuntimeError::invalid_number_literal(text));
    }
    if !cleaned.contains(['.', 'e', 'E']) {
        return cleaned
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| RuntimeError::invalid_number_literal(text));
    }
    cleaned
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|_| RuntimeError::invalid_number_literal(text))
}

/// Convert a value to a named type, failing with *invalid cast* when the
/// conversion is undefined or lossy beyond repair (NaN/infinite floats to
/// integers, unparsable strings to numbers).
pub fn cast(value: &Value, target: &TypeValue) -> Result<Value, RuntimeError> {
    match target {
        TypeValue::Integer => to_integer(value),
        TypeValue::Float => to_float(value),
        TypeValue::String => Ok(Value::String(value.to_display_string())),
        TypeValue::Boolean => Ok(Value::Boolean(value.truthy())),
        TypeValue::List => to_list(value),
        TypeValue::Tuple => match value {
            Value::Tuple(_) => Ok(value.clone()),
            Value::List(items) => Ok(Value::tuple(items.borrow().clone())),
            _ => Err(bad_cast(value, target)),
        },
        TypeValue::Set => match value {
            Value::Set(_) => Ok(value.clone()),
            Value::List(items) => {
                let keys = items
                    .borrow()
                    .iter()
                    .map(ValueKey::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::set(keys))
            }
            _ => Err(bad_cast(value, target)),
        },
        TypeValue::Nil => Ok(Value::Nil),
        _ => Err(bad_cast(value, target)),
    }
}

fn to_integer(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Integer(_) => Ok(value.clone()),
        Value::Float(f) => f
            .trunc()
            .to_i64()
            .map(Value::Integer)
            .ok_or_else(|| bad_cast(value, &TypeValue::Integer)),
        Value::String(s) => match parse_number(s.trim()) {
            Ok(Value::Integer(n)) => Ok(Value::Integer(n)),
            Ok(Value::Float(f)) => f
                .trunc()
                .to_i64()
                .map(Value::Integer)
                .ok_or_else(|| bad_cast(value, &TypeValue::Integer)),
            _ => Err(bad_cast(value, &TypeValue::Integer)),
        },
        Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
        _ => Err(bad_cast(value, &TypeValue::Integer)),
    }
}

fn to_float(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Float(_) => Ok(value.clone()),
        Value::Integer(n) => Ok(Value::Float(*n as f64)),
        Value::String(s) => match parse_number(s.trim()) {
            Ok(Value::Integer(n)) => Ok(Value::Float(n as f64)),
            Ok(Value::Float(f)) => Ok(Value::Float(f)),
            _ => Err(bad_cast(value, &TypeValue::Float)),
        },
        _ => Err(bad_cast(value, &TypeValue::Float)),
    }
}

fn to_list(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::List(_) => Ok(value.clone()),
        Value::Tuple(items) => Ok(Value::list(items.as_ref().clone())),
        Value::Set(set) => Ok(Value::list(
            set.borrow().iter().map(ValueKey::to_value).collect(),
        )),
        Value::Dictionary(map) => Ok(Value::list(
            map.borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                .collect(),
        )),
        Value::Range(_) => {
            let mut iter = value.iterate()?;
            let mut items = Vec::new();
            while let Some(v) = iter.next()? {
                items.push(v);
            }
            Ok(Value::list(items))
        }
        Value::String(s) => Ok(Value::list(s.graphemes(true).map(Value::string).collect())),
        _ => Err(bad_cast(value, &TypeValue::List)),
    }
}

fn bad_cast(value: &Value, target: &TypeValue) -> RuntimeError {
    RuntimeError::invalid_cast(value.type_name(), target)
}

/// Grapheme-cluster length for strings; element count everywhere else a
/// length is defined.
pub fn value_len(value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::String(s) => Ok(s.graphemes(true).count() as i64),
        Value::List(items) => Ok(items.borrow().len() as i64),
        Value::Tuple(items) => Ok(items.len() as i64),
        Value::Dictionary(map) => Ok(map.borrow().len() as i64),
        Value::Set(set) => Ok(set.borrow().len() as i64),
        Value::Range(range) => range.len().ok_or_else(|| {
            RuntimeError::invalid_operation("len on an unbounded range")
        }),
        other => Err(RuntimeError::invalid_operation(format!(
            "len on {}",
            other.type_name()
        ))),
    }
}
