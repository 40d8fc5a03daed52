use super::{StdBindings, def, variadic, with_closure};
use crate::value::{RuntimeError, Value, ValueKey, ops, types};
use crate::vm::StdContext;

pub(super) fn register(bindings: &mut StdBindings) {
    bindings.register(def("len", 1, 1, std_len));
    bindings.register(def("contains", 2, 2, std_contains));
    bindings.register(variadic("push", 2, 1, std_push));
    bindings.register(def("pop", 1, 1, std_pop));
    bindings.register(def("keys", 1, 1, std_keys));
    bindings.register(def("values", 1, 1, std_values));
    bindings.register(with_closure("map", 1, 1, std_map));
    bindings.register(with_closure("each", 1, 1, std_each));
    bindings.register(with_closure("filter", 1, 1, std_filter));
    bindings.register(with_closure("all", 1, 1, std_all));
    bindings.register(with_closure("any", 1, 1, std_any));
}

/// Drive one full iteration, recording the exit code in shell state when
/// the source was a pipe.
fn for_each_item(
    ctx: &mut StdContext,
    value: &Value,
    mut f: impl FnMut(&mut StdContext, Value) -> Result<bool, RuntimeError>,
) -> Result<(), RuntimeError> {
    let mut iter = value.iterate()?;
    let mut broke = false;
    loop {
        match iter.next()? {
            Some(item) => {
                if !f(ctx, item)? {
                    broke = true;
                    break;
                }
            }
            None => break,
        }
    }
    if let Some(pipe) = iter.source_pipe() {
        if broke {
            pipe.stop();
        }
        let code = pipe.finish();
        ctx.shell_mut().set_exit_code(code);
    }
    Ok(())
}

fn std_len(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    types::value_len(&args[0]).map(Value::Integer)
}

fn std_contains(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let item = args.remove(1);
    let container = args.remove(0);
    ops::contains(item, container)
}

fn std_push(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let items = match args.pop() {
        Some(Value::List(items)) => items.borrow().clone(),
        Some(single) => vec![single],
        None => Vec::new(),
    };
    let target = args.remove(0);
    match &target {
        Value::List(list) => {
            list.borrow_mut().extend(items);
            Ok(target)
        }
        other => Err(RuntimeError::invalid_operation(format!(
            "push on {}",
            other.type_name()
        ))),
    }
}

fn std_pop(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::List(list) => list
            .borrow_mut()
            .pop()
            .ok_or_else(|| RuntimeError::invalid_operation("pop from an empty list")),
        other => Err(RuntimeError::invalid_operation(format!(
            "pop on {}",
            other.type_name()
        ))),
    }
}

fn std_keys(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Dictionary(map) => Ok(Value::list(
            map.borrow().keys().map(ValueKey::to_value).collect(),
        )),
        other => Err(RuntimeError::invalid_operation(format!(
            "keys on {}",
            other.type_name()
        ))),
    }
}

fn std_values(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Dictionary(map) => Ok(Value::list(map.borrow().values().cloned().collect())),
        other => Err(RuntimeError::invalid_operation(format!(
            "values on {}",
            other.type_name()
        ))),
    }
}

fn std_map(ctx: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let mut out = Vec::new();
    for_each_item(ctx, &args[0], |ctx, item| {
        out.push(ctx.call_attached_closure(vec![item])?);
        Ok(true)
    })?;
    Ok(Value::list(out))
}

fn std_each(ctx: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    for_each_item(ctx, &args[0], |ctx, item| {
        ctx.call_attached_closure(vec![item])?;
        Ok(true)
    })?;
    Ok(Value::Nil)
}

fn std_filter(ctx: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let mut out = Vec::new();
    for_each_item(ctx, &args[0], |ctx, item| {
        if ctx.call_attached_closure(vec![item.clone()])?.truthy() {
            out.push(item);
        }
        Ok(true)
    })?;
    Ok(Value::list(out))
}

fn std_all(ctx: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let mut result = true;
    for_each_item(ctx, &args[0], |ctx, item| {
        if !ctx.call_attached_closure(vec![item])?.truthy() {
            result = false;
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(Value::Boolean(result))
}

fn std_any(ctx: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let mut result = false;
    for_each_item(ctx, &args[0], |ctx, item| {
        if ctx.call_attached_closure(vec![item])?.truthy() {
            result = true;
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(Value::Boolean(result))
}
