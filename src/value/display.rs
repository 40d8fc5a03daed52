use super::{Value, ValueKey};

impl Value {
    /// The textual form used for string interpolation, program arguments
    /// and the `str` conversion.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => s.clone(),
            Value::Boolean(true) => "true".to_string(),
            Value::Boolean(false) => "false".to_string(),
            Value::Nil => "nil".to_string(),
            Value::List(items) => {
                let parts: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(Value::to_display_string)
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_display_string).collect();
                format!("({})", parts.join(", "))
            }
            Value::Dictionary(map) => {
                let mut parts: Vec<String> = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().to_display_string(), v.to_display_string()))
                    .collect();
                parts.sort();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(set) => {
                let mut parts: Vec<String> = set
                    .borrow()
                    .iter()
                    .map(|k| k.to_value().to_display_string())
                    .collect();
                parts.sort();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Range(range) => {
                let from = range.from.map(|n| n.to_string()).unwrap_or_default();
                let to = range.to.map(|n| n.to_string()).unwrap_or_default();
                let dots = if range.inclusive { "..=" } else { ".." };
                format!("{}{}{}", from, dots, to)
            }
            Value::Struct(s) => {
                let parts: Vec<String> = s
                    .fields
                    .borrow()
                    .iter()
                    .map(|(name, v)| format!("{}: {}", name, v.to_display_string()))
                    .collect();
                format!("{} {{ {} }}", s.name, parts.join(", "))
            }
            Value::Reference(_) => "<function reference>".to_string(),
            Value::Closure(_) => "<closure>".to_string(),
            Value::Type(t) => t.to_string(),
            Value::Pipe(_) => "<pipe>".to_string(),
            Value::Iterator(_) => "<iterator>".to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Inf" } else { "-Inf" }.to_string()
    } else if f == f.trunc() && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

impl std::fmt::Display for ValueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_value().to_display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Value;

    #[test]
    fn whole_floats_keep_one_decimal() {
        assert_eq!(Value::Float(2.0).to_display_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_display_string(), "2.5");
    }

    #[test]
    fn lists_render_recursively() {
        let v = Value::list(vec![Value::Integer(1), Value::string("a")]);
        assert_eq!(v.to_display_string(), "[1, a]");
    }
}
