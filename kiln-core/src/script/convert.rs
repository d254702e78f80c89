//! Conversions between interpreter values and host data.

use mlua::{Lua, LuaSerdeExt, Table, Value, Variadic};
use std::collections::BTreeMap;

/// Arguments as `tostring` renders them, joined by `sep`.
pub fn join_args(args: &Variadic<Value>, sep: &str) -> mlua::Result<String> {
    let parts = args
        .iter()
        .map(Value::to_string)
        .collect::<mlua::Result<Vec<_>>>()?;
    Ok(parts.join(sep))
}

/// Readable form of a value: tables as `{1, 2}` or `{a=1, b="x"}` with sorted keys.
pub fn pretty(value: &Value) -> String {
    match value {
        Value::Table(t) => pretty_table(t),
        other => other.to_string().unwrap_or_default(),
    }
}

fn pretty_nested(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s.to_string_lossy()),
        other => pretty(other),
    }
}

fn pretty_table(table: &Table) -> String {
    let pairs: Vec<(Value, Value)> = table
        .clone()
        .pairs::<Value, Value>()
        .filter_map(Result::ok)
        .collect();
    if pairs.is_empty() {
        return "{}".to_string();
    }

    let len = table.raw_len();
    if len == pairs.len() {
        let items: Vec<String> = (1..=len)
            .map(|i| table.raw_get::<Value>(i).map(|v| pretty_nested(&v)).unwrap_or_default())
            .collect();
        return format!("{{{}}}", items.join(", "));
    }

    let mut entries: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in &pairs {
        entries.insert(pretty(key), pretty_nested(value));
    }
    let items: Vec<String> = entries.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", items.join(", "))
}

pub fn map_to_table(lua: &Lua, map: &BTreeMap<String, String>) -> mlua::Result<Table> {
    lua.create_table_from(map.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

/// A table (or any other value) as JSON, for handing data to renderers.
pub fn to_json(lua: &Lua, value: Value) -> mlua::Result<serde_json::Value> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Function(_) => Ok(serde_json::Value::Null),
        other => lua.from_value(other),
    }
}

/// Globals and data tables become template data; functions are kept as values by the caller.
pub fn table_to_json_map(lua: &Lua, table: &Table) -> mlua::Result<BTreeMap<String, serde_json::Value>> {
    let mut map = BTreeMap::new();
    for pair in table.clone().pairs::<String, Value>() {
        let (key, value) = pair?;
        if matches!(value, Value::Function(_)) {
            continue;
        }
        map.insert(key, to_json(lua, value)?);
    }
    Ok(map)
}
