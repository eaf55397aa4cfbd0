//! Tera filters for config-file syntax.

use std::collections::HashMap;

use tera::{Error, Result, Value};

/// Emit a value as an smb.conf section name.
///
/// Brackets would close the section header early.
pub fn section(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    let name = value
        .as_str()
        .ok_or_else(|| Error::msg("section filter expects a string"))?;

    if name.contains(['[', ']']) {
        return Err(Error::msg(format!(
            "section name '{}' contains brackets",
            name
        )));
    }

    Ok(Value::String(name.to_string()))
}

/// Octal-escape characters exports(5) treats as separators.
pub fn exports_path(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    let path = value
        .as_str()
        .ok_or_else(|| Error::msg("exports_path filter expects a string"))?;

    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' | '\t' | '\\' | '#' => escaped.push_str(&format!("\\{:03o}", c as u32)),
            _ => escaped.push(c),
        }
    }

    Ok(Value::String(escaped))
}
