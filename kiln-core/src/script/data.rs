use super::{ScriptError, chunk_name, convert, lua_message};
use crate::render::TemplateData;
use mlua::{Function, Lua, Table, Value, Variadic};
use std::path::Path;
use std::sync::Arc;

/// Run a data script in its own environment and collect what it defines.
///
/// Plain values become template values; functions become template functions that
/// call back into `lua`, so the state must outlive every render using the result.
pub fn load_data(lua: &Lua, path: &Path) -> Result<TemplateData, ScriptError> {
    let source = std::fs::read(path).map_err(|e| ScriptError::read(path, e))?;
    let env: Table = lua.load("return setmetatable({}, { __index = _G })").eval()?;
    lua.load(&source[..])
        .set_name(chunk_name(path))
        .set_environment(env.clone())
        .exec()?;

    let mut data = TemplateData::default();
    for pair in env.pairs::<String, Value>() {
        let (name, value) = pair?;
        match value {
            Value::Function(f) => {
                data.functions.insert(name, data_fn(f));
            }
            other => {
                data.values.insert(name, convert::to_json(lua, other)?);
            }
        }
    }
    Ok(data)
}

fn data_fn(f: Function) -> crate::render::DataFn {
    Arc::new(move |args: &[String]| {
        let args: Variadic<String> = args.iter().cloned().collect();
        let value: Value = f.call(args).map_err(|e| lua_message(&e))?;
        match value {
            Value::Nil => Ok(serde_json::Value::Null),
            value => serde_json::to_value(&value).map_err(|e| e.to_string()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data_script(source: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.lua");
        std::fs::write(&path, source).unwrap();
        (dir, path)
    }

    #[test]
    fn values_and_functions_are_exported() {
        let (_dir, path) = data_script(
            "title = 'Hello'\ncount = 3\nfunction greet(name) return 'Hi ' .. name end\nlocal hidden = 1",
        );
        let lua = Lua::new();
        let data = load_data(&lua, &path).unwrap();

        assert_eq!(data.values["title"], json!("Hello"));
        assert_eq!(data.values["count"], json!(3));
        assert!(!data.values.contains_key("hidden"));
        let greet = &data.functions["greet"];
        assert_eq!(greet(&["kiln".to_string()]).unwrap(), json!("Hi kiln"));
    }

    #[test]
    fn globals_of_the_state_are_not_exported() {
        let (_dir, path) = data_script("x = string.upper('a')");
        let lua = Lua::new();
        lua.globals().set("leftover", 1).unwrap();
        let data = load_data(&lua, &path).unwrap();
        assert_eq!(data.names(), vec!["x"]);
        assert_eq!(data.values["x"], json!("A"));
    }

    #[test]
    fn function_errors_are_reported() {
        let (_dir, path) = data_script("function broken() error('nope') end");
        let lua = Lua::new();
        let data = load_data(&lua, &path).unwrap();
        let err = data.functions["broken"](&[]).unwrap_err();
        assert!(err.contains("nope"));
    }

    #[test]
    fn syntax_errors_name_the_file() {
        let (_dir, path) = data_script("x = = 1");
        let err = load_data(&Lua::new(), &path).unwrap_err();
        assert!(err.to_string().starts_with("data.lua:1:"), "{err}");
    }
}
