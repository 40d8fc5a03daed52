use super::{StdBindings, constructor, def, variadic};
use crate::value::{RuntimeError, StructInstance, TypeValue, Value, cast};
use crate::vm::StdContext;

pub(super) fn register(bindings: &mut StdBindings) {
    bindings.register(def("str", 1, 1, std_str));
    bindings.register(def("int", 1, 1, std_int));
    bindings.register(def("float", 1, 1, std_float));
    bindings.register(def("bool", 1, 1, std_bool));
    bindings.register(def("type", 1, 1, std_type));
    bindings.register(variadic("print", 0, 0, std_print));
    bindings.register(def("join", 1, 2, std_join));
    bindings.register(def("split", 2, 2, std_split));
    bindings.register(def("lines", 1, 1, std_lines));
    bindings.register(def("trim", 1, 1, std_trim));

    // Reserved entries the analyser's built-in classification lowers onto.
    bindings.register(def("cd", 0, 1, std_cd));
    bindings.register(def("scriptPath", 0, 0, std_script_path));
    bindings.register(def("error", 1, 1, std_error));
    bindings.register(variadic("closure", 0, 0, std_closure));
    bindings.register(variadic("exec", 1, 1, std_exec));

    bindings.register(constructor("Error", 1, 1, std_error_struct));
}

fn std_str(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    cast(&args.remove(0), &TypeValue::String)
}

fn std_int(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    cast(&args.remove(0), &TypeValue::Integer)
}

fn std_float(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    cast(&args.remove(0), &TypeValue::Float)
}

fn std_bool(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    cast(&args.remove(0), &TypeValue::Boolean)
}

fn std_type(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    Ok(Value::Type(args[0].type_value()))
}

fn std_print(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let parts: Vec<String> = match args.pop() {
        Some(Value::List(items)) => items.borrow().iter().map(Value::to_display_string).collect(),
        Some(single) => vec![single.to_display_string()],
        None => Vec::new(),
    };
    println!("{}", parts.join(" "));
    Ok(Value::Nil)
}

fn std_join(ctx: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let separator = if args.len() > 1 {
        match args.pop() {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(RuntimeError::invalid_cast(other.type_name(), "String"));
            }
            None => unreachable!(),
        }
    } else {
        String::new()
    };
    let mut iter = args[0].iterate()?;
    let mut parts = Vec::new();
    while let Some(item) = iter.next()? {
        parts.push(item.to_display_string());
    }
    if let Some(pipe) = iter.source_pipe() {
        let code = pipe.finish();
        ctx.shell_mut().set_exit_code(code);
    }
    Ok(Value::string(parts.join(&separator)))
}

fn std_split(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let (Value::String(text), Value::String(sep)) = (&args[0], &args[1]) else {
        return Err(RuntimeError::invalid_operation("split expects two strings"));
    };
    let parts: Vec<Value> = if sep.is_empty() {
        use unicode_segmentation::UnicodeSegmentation;
        text.graphemes(true).map(Value::string).collect()
    } else {
        text.split(sep.as_str()).map(Value::string).collect()
    };
    Ok(Value::list(parts))
}

fn std_lines(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let Value::String(text) = &args[0] else {
        return Err(RuntimeError::invalid_operation("lines expects a string"));
    };
    Ok(Value::list(text.lines().map(Value::string).collect()))
}

fn std_trim(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let Value::String(text) = &args[0] else {
        return Err(RuntimeError::invalid_operation("trim expects a string"));
    };
    Ok(Value::string(text.trim()))
}

fn std_cd(ctx: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let arg = args.first().map(Value::to_display_string);
    let target = ctx.shell_mut().cd_target(arg.as_deref());
    std::env::set_current_dir(&target)
        .map_err(|_| RuntimeError::not_found(format!("directory {}", target.display())))?;
    Ok(Value::Nil)
}

fn std_script_path(ctx: &mut StdContext, _: Vec<Value>) -> Result<Value, RuntimeError> {
    Ok(Value::string(ctx.shell_mut().script_dir()))
}

fn std_error(_: &mut StdContext, args: Vec<Value>) -> Result<Value, RuntimeError> {
    Err(RuntimeError::general(args[0].to_display_string()))
}

/// The `closure` built-in: invoke the closure handed to the enclosing
/// function call.
fn std_closure(ctx: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let items = match args.pop() {
        Some(Value::List(items)) => items.borrow().clone(),
        Some(single) => vec![single],
        None => Vec::new(),
    };
    ctx.call_frame_closure(items)
}

/// `exec` runs a program named at run time, honouring a piped-in value,
/// and yields its output as a pipe value.
fn std_exec(ctx: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let extra = if args.len() > 1 { args.pop() } else { None };
    let program = args[0].to_display_string();
    let argv = match extra {
        Some(list) => crate::vm::program_args(&[list]),
        None => Vec::new(),
    };
    let piped = ctx.take_piped();
    ctx.spawn_redirected(&program, argv, piped)
}

fn std_error_struct(_: &mut StdContext, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let message = args.remove(0);
    Ok(Value::Struct(std::rc::Rc::new(StructInstance::new(
        "Error",
        vec![("message".to_string(), message)],
    ))))
}
