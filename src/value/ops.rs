use super::{RuntimeError, Value, ValueKey};

/// Binary operator dispatch keyed by the operand tags. Undefined pairings
/// fail with *invalid operation*.
pub fn add(left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a.wrapping_add(b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a + b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (l, r) => Err(undefined("+", &l, &r)),
    }
}

pub fn sub(left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a.wrapping_sub(b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 - b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a - b as f64)),
        (l, r) => Err(undefined("-", &l, &r)),
    }
}

pub fn mul(left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a.wrapping_mul(b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 * b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a * b as f64)),
        (l, r) => Err(undefined("*", &l, &r)),
    }
}

pub fn div(left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Integer(_), Value::Integer(0)) => {
            Err(RuntimeError::invalid_operation("division by zero"))
        }
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a.wrapping_div(b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 / b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a / b as f64)),
        (l, r) => Err(undefined("/", &l, &r)),
    }
}

pub fn modulo(left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Integer(_), Value::Integer(0)) => {
            Err(RuntimeError::invalid_operation("modulo by zero"))
        }
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a.wrapping_rem(b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a % b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 % b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a % b as f64)),
        (l, r) => Err(undefined("%", &l, &r)),
    }
}

pub fn negate(value: Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Integer(n) => Ok(Value::Integer(n.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        v => Err(RuntimeError::invalid_operation(format!(
            "- on {}",
            v.type_name()
        ))),
    }
}

pub fn not(value: Value) -> Value {
    Value::Boolean(!value.truthy())
}

pub fn greater(left: Value, right: Value) -> Result<Value, RuntimeError> {
    compare(left, right, ">").map(|ord| Value::Boolean(ord == std::cmp::Ordering::Greater))
}

pub fn greater_equal(left: Value, right: Value) -> Result<Value, RuntimeError> {
    compare(left, right, ">=").map(|ord| Value::Boolean(ord != std::cmp::Ordering::Less))
}

pub fn less(left: Value, right: Value) -> Result<Value, RuntimeError> {
    compare(left, right, "<").map(|ord| Value::Boolean(ord == std::cmp::Ordering::Less))
}

pub fn less_equal(left: Value, right: Value) -> Result<Value, RuntimeError> {
    compare(left, right, "<=").map(|ord| Value::Boolean(ord != std::cmp::Ordering::Greater))
}

fn compare(
    left: Value,
    right: Value,
    op: &str,
) -> Result<std::cmp::Ordering, RuntimeError> {
    match (&left, &right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let a = to_f64(&left);
            let b = to_f64(&right);
            a.partial_cmp(&b)
                .ok_or_else(|| RuntimeError::invalid_operation(format!("{} on NaN", op)))
        }
        (l, r) => Err(undefined(op, l, r)),
    }
}

fn to_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(n) => *n as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

/// `and`/`or` preserve the deciding operand, so the opcode and the
/// short-circuiting jump lowering agree on results.
pub fn and(left: Value, right: Value) -> Value {
    if left.truthy() { right } else { left }
}

pub fn or(left: Value, right: Value) -> Value {
    if left.truthy() { left } else { right }
}

/// Membership: `left in right`.
pub fn contains(left: Value, right: Value) -> Result<Value, RuntimeError> {
    match &right {
        Value::List(items) => Ok(Value::Boolean(items.borrow().iter().any(|v| *v == left))),
        Value::Tuple(items) => Ok(Value::Boolean(items.iter().any(|v| *v == left))),
        Value::Dictionary(map) => {
            let key = ValueKey::from_value(&left)?;
            Ok(Value::Boolean(map.borrow().contains_key(&key)))
        }
        Value::Set(set) => {
            let key = ValueKey::from_value(&left)?;
            Ok(Value::Boolean(set.borrow().contains(&key)))
        }
        Value::String(haystack) => match &left {
            Value::String(needle) => Ok(Value::Boolean(haystack.contains(needle.as_str()))),
            l => Err(undefined("in", l, &right)),
        },
        Value::Range(range) => match &left {
            Value::Integer(n) => {
                let above = range.from.is_none_or(|from| *n >= from);
                let below = match range.to {
                    Some(to) if range.inclusive => *n <= to,
                    Some(to) => *n < to,
                    None => true,
                };
                Ok(Value::Boolean(above && below))
            }
            l => Err(undefined("in", l, &right)),
        },
        r => Err(undefined("in", &left, r)),
    }
}

fn undefined(op: &str, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::invalid_operation(format!(
        "{} {} {}",
        left.type_name(),
        op,
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic() {
        assert_eq!(
            add(Value::Integer(1), Value::Integer(2)).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            div(Value::Integer(7), Value::Integer(2)).unwrap(),
            Value::Integer(3)
        );
    }

    #[test]
    fn division_by_zero_is_an_invalid_operation() {
        let err = div(Value::Integer(1), Value::Integer(0)).unwrap_err();
        assert_eq!(err.kind, crate::value::ErrorKind::InvalidOperation);
    }

    #[test]
    fn string_concatenation_and_mismatch() {
        assert_eq!(
            add(Value::string("a"), Value::string("b")).unwrap(),
            Value::string("ab")
        );
        assert!(add(Value::string("a"), Value::Integer(1)).is_err());
    }

    #[test]
    fn and_or_preserve_operands() {
        assert_eq!(and(Value::Integer(1), Value::Integer(2)), Value::Integer(2));
        assert_eq!(and(Value::Nil, Value::Integer(2)), Value::Nil);
        assert_eq!(or(Value::Nil, Value::Integer(2)), Value::Integer(2));
        assert_eq!(or(Value::Integer(1), Value::Integer(2)), Value::Integer(1));
    }

    #[test]
    fn contains_checks_lists_strings_and_ranges() {
        let list = Value::list(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(
            contains(Value::Integer(2), list).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            contains(Value::string("ell"), Value::string("hello")).unwrap(),
            Value::Boolean(true)
        );
        let range = Value::Range(std::rc::Rc::new(crate::value::RangeValue {
            from: Some(1),
            to: Some(5),
            inclusive: false,
        }));
        assert_eq!(
            contains(Value::Integer(5), range).unwrap(),
            Value::Boolean(false)
        );
    }
}
