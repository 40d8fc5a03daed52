use unicode_segmentation::UnicodeSegmentation;

use crate::value::{RuntimeError, Value, ValueKey};

/// Indexed read, dispatched on the target tag. Out-of-range indexes and
/// missing keys are *not found* errors naming the offender.
pub(super) fn index_value(target: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match (target, index) {
        (Value::List(items), Value::Integer(i)) => {
            let items = items.borrow();
            usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| RuntimeError::not_found(format!("index {}", i)))
        }
        (Value::Tuple(items), Value::Integer(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .ok_or_else(|| RuntimeError::not_found(format!("index {}", i))),
        (Value::String(text), Value::Integer(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| text.graphemes(true).nth(i))
            .map(Value::string)
            .ok_or_else(|| RuntimeError::not_found(format!("index {}", i))),
        (Value::Dictionary(map), key) => {
            let key = ValueKey::from_value(key)?;
            map.borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| RuntimeError::not_found(format!("key {}", key)))
        }
        (Value::Struct(instance), Value::String(field)) => instance
            .field(field)
            .ok_or_else(|| RuntimeError::not_found(format!("field {}", field))),
        (target, index) => Err(RuntimeError::invalid_operation(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

/// Indexed assignment: lists by position, dictionaries by key, struct
/// fields by name.
pub(super) fn store_index(
    target: &Value,
    index: &Value,
    value: Value,
) -> Result<(), RuntimeError> {
    match (target, index) {
        (Value::List(items), Value::Integer(i)) => {
            let mut items = items.borrow_mut();
            let slot = usize::try_from(*i)
                .ok()
                .filter(|i| *i < items.len())
                .ok_or_else(|| RuntimeError::not_found(format!("index {}", i)))?;
            items[slot] = value;
            Ok(())
        }
        (Value::Dictionary(map), key) => {
            let key = ValueKey::from_value(key)?;
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        (Value::Struct(instance), Value::String(field)) => {
            if instance.set_field(field, value) {
                Ok(())
            } else {
                Err(RuntimeError::not_found(format!("field {}", field)))
            }
        }
        (target, index) => Err(RuntimeError::invalid_operation(format!(
            "cannot assign into {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

/// Expand a glob pattern against the working directory. No match leaves
/// the word as-is, the way a shell would.
pub(super) fn expand_glob(pattern: &Value) -> Value {
    let Value::String(pattern) = pattern else {
        unreachable!("glob pattern is a string constant");
    };
    let mut matches: Vec<String> = match glob::glob(pattern) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    if matches.is_empty() {
        Value::string(pattern.clone())
    } else {
        matches.sort();
        Value::list(matches.into_iter().map(Value::string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_indexing_reports_the_offending_index() {
        let list = Value::list(vec![Value::Integer(10), Value::Integer(20)]);
        assert_eq!(
            index_value(&list, &Value::Integer(1)).unwrap(),
            Value::Integer(20)
        );
        let err = index_value(&list, &Value::Integer(5)).unwrap_err();
        assert_eq!(err.kind, crate::value::ErrorKind::NotFound);
        assert!(err.message.contains('5'));
    }

    #[test]
    fn dictionary_store_inserts_and_read_misses_are_not_found() {
        let dict = Value::dictionary(vec![]);
        store_index(&dict, &Value::string("k"), Value::Integer(1)).unwrap();
        assert_eq!(
            index_value(&dict, &Value::string("k")).unwrap(),
            Value::Integer(1)
        );
        assert!(index_value(&dict, &Value::string("missing")).is_err());
    }

    #[test]
    fn string_indexing_is_grapheme_based() {
        let s = Value::string("héllo");
        assert_eq!(index_value(&s, &Value::Integer(1)).unwrap(), Value::string("é"));
    }

    #[test]
    fn unmatched_glob_keeps_the_word() {
        let result = expand_glob(&Value::string("no-such-file-*.xyz"));
        assert_eq!(result, Value::string("no-such-file-*.xyz"));
    }
}
