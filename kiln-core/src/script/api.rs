//! Host functions available to scripts.
//!
//! [`install_base`] runs once per interpreter state. [`bind`] runs for every request
//! inside an interpreter scope, so the functions it installs borrow the request and
//! the response output and stop working once the request is over.

use super::convert::{join_args, map_to_table, pretty, table_to_json_map};
use super::output::Output;
use super::{FilePages, HostInfo, ScriptError, chunk_name};
use crate::render::{self, TemplateData};
use crate::request::{RequestInfo, parse_query};
use crate::theme;
use bytes::Bytes;
use mlua::{Function, Lua, MultiValue, Scope, Table, Value, Variadic};
use parking_lot::Mutex;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Theme for `msgpage` when the script does not name one.
const MESSAGE_THEME: &str = "redbox";

const STDOUT_PRINT: &str = "kiln.print";

fn external(err: ScriptError) -> mlua::Error {
    mlua::Error::external(err)
}

/// Functions that need nothing from a request.
pub fn install_base(lua: &Lua, host: &HostInfo) -> mlua::Result<()> {
    let g = lua.globals();

    let version = host.version.clone();
    g.set("version", lua.create_function(move |_, ()| Ok(version.clone()))?)?;

    g.set(
        "log",
        lua.create_function(|_, args: Variadic<Value>| {
            tracing::info!(target: "lua", "{}", join_args(&args, " ")?);
            Ok(())
        })?,
    )?;
    g.set(
        "warn",
        lua.create_function(|_, args: Variadic<Value>| {
            tracing::warn!(target: "lua", "{}", join_args(&args, " ")?);
            Ok(())
        })?,
    )?;
    g.set(
        "err",
        lua.create_function(|_, args: Variadic<Value>| {
            tracing::error!(target: "lua", "{}", join_args(&args, " ")?);
            Ok(())
        })?,
    )?;

    g.set(
        "sleep",
        lua.create_function(|_, seconds: f64| {
            if seconds > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(seconds));
            }
            Ok(())
        })?,
    )?;
    g.set(
        "unixnano",
        lua.create_function(|_, ()| {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
            Ok(nanos)
        })?,
    )?;
    g.set(
        "markdown",
        lua.create_function(|_, args: Variadic<Value>| Ok(render::markdown::to_html(&join_args(&args, "\n")?)))?,
    )?;
    g.set(
        "ppstr",
        lua.create_function(|_, args: Variadic<Value>| {
            Ok(args.iter().map(pretty).collect::<Vec<_>>().join("\t"))
        })?,
    )?;

    let server_dir = host.server_dir.clone();
    g.set(
        "serverdir",
        lua.create_function(move |_, rel: Option<String>| {
            let dir = match rel {
                Some(rel) => server_dir.join(rel),
                None => server_dir.clone(),
            };
            Ok(dir.display().to_string())
        })?,
    )?;

    // The interpreter's own error function stays reachable after `error` is rebound.
    let throw: Function = g.get("error")?;
    g.set("throw", throw)?;
    let print: Function = g.get("print")?;
    lua.set_named_registry_value(STDOUT_PRINT, print)?;
    Ok(())
}

/// Undo the bindings that would otherwise dangle once the request scope is gone.
pub fn unbind(lua: &Lua) -> mlua::Result<()> {
    let g = lua.globals();
    let throw: Function = g.get("throw")?;
    g.set("error", throw)?;
    let print: Function = lua.named_registry_value(STDOUT_PRINT)?;
    g.set("print", print)
}

/// Everything a request script can reach.
pub struct Binding<'a> {
    pub req: &'a RequestInfo,
    pub script: &'a Path,
    pub host: &'a HostInfo,
    pub pages: Option<&'a dyn FilePages>,
    pub out: Mutex<Output>,
}

impl<'a> Binding<'a> {
    pub fn new(
        req: &'a RequestInfo,
        script: &'a Path,
        host: &'a HostInfo,
        pages: Option<&'a dyn FilePages>,
        out: Output,
    ) -> Self {
        Self {
            req,
            script,
            host,
            pages,
            out: Mutex::new(out),
        }
    }

    fn write(&self, data: impl Into<Bytes>) -> mlua::Result<()> {
        let mut out = self.out.lock();
        if out.cancelled() {
            return Err(external(ScriptError::Cancelled));
        }
        out.write(data).map_err(external)
    }

    fn with_output<T>(&self, f: impl FnOnce(&mut Output) -> Result<T, ScriptError>) -> mlua::Result<T> {
        f(&mut self.out.lock()).map_err(external)
    }

    fn script_dir(&self) -> PathBuf {
        let script = std::path::absolute(self.script).unwrap_or_else(|_| self.script.to_path_buf());
        script.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    /// Output from a renderer helper: the result, or the error as text in debug mode.
    fn write_rendered(&self, what: &str, source: &str, result: Result<String, render::RenderError>) -> mlua::Result<()> {
        match result {
            Ok(text) => self.write(text),
            Err(e) if self.host.debug => {
                self.write(format!("Could not compile {what}:\n\t{e}\n\n{source}"))
            }
            Err(e) => {
                tracing::error!(script = %self.script.display(), error = %e, "could not compile {what}");
                Ok(())
            }
        }
    }

    fn template_data(&self, lua: &Lua, table: Option<Table>) -> mlua::Result<Option<TemplateData>> {
        let Some(table) = table else {
            return Ok(None);
        };
        let values = table_to_json_map(lua, &table)?;
        Ok(Some(TemplateData {
            values,
            ..Default::default()
        }))
    }

    fn page(&self, lua: &Lua, file: &str, table: Option<Table>) -> mlua::Result<Bytes> {
        let Some(pages) = self.pages else {
            return Err(mlua::Error::RuntimeError("serving files is not available here".into()));
        };
        let data = self.template_data(lua, table)?;
        let path = self.script_dir().join(file);
        pages
            .page(&path, data, self.req)
            .map_err(mlua::Error::RuntimeError)
    }
}

fn status_code(n: i64) -> mlua::Result<u16> {
    u16::try_from(n).map_err(|_| mlua::Error::RuntimeError(format!("status code out of range: {n}")))
}

/// URL path of `file` relative to the serving root, with a leading slash.
pub fn file_to_url(server_dir: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(server_dir).unwrap_or(file);
    let mut parts: Vec<String> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    format!("/{}", parts.join("/"))
}

/// Install the request functions for the lifetime of `scope`.
pub fn bind<'scope, 'env: 'scope>(
    lua: &Lua,
    scope: &'scope Scope<'scope, 'env>,
    b: &'env Binding<'env>,
) -> mlua::Result<()> {
    let g = lua.globals();

    // Output
    g.set(
        "print",
        scope.create_function(move |_, args: Variadic<Value>| {
            let mut line = join_args(&args, "\t")?;
            line.push('\n');
            b.write(line)
        })?,
    )?;
    g.set(
        "pprint",
        scope.create_function(move |_, args: Variadic<Value>| {
            let mut line = args.iter().map(pretty).collect::<Vec<_>>().join("\t");
            line.push('\n');
            b.write(line)
        })?,
    )?;
    g.set("flush", scope.create_function(move |_, ()| b.with_output(Output::flush))?)?;
    g.set("close", scope.create_function(move |_, ()| b.with_output(Output::close))?)?;
    g.set(
        "content",
        scope.create_function(move |_, content_type: String| b.with_output(|o| o.content_type(&content_type)))?,
    )?;

    // Request
    g.set("urlpath", scope.create_function(move |_, ()| Ok(b.req.path().to_string()))?)?;
    g.set("method", scope.create_function(move |_, ()| Ok(b.req.method.to_string()))?)?;
    g.set(
        "header",
        scope.create_function(move |_, name: String| Ok(b.req.header(&name).to_string()))?,
    )?;
    g.set(
        "headers",
        scope.create_function(move |lua, ()| {
            let table = lua.create_table()?;
            for name in b.req.headers.keys() {
                table.set(name.as_str(), b.req.header(name.as_str()))?;
            }
            Ok(table)
        })?,
    )?;
    g.set(
        "setheader",
        scope.create_function(move |_, (name, value): (String, String)| {
            b.with_output(|o| o.set_header(&name, &value))
        })?,
    )?;
    g.set(
        "body",
        scope.create_function(move |_, ()| Ok(String::from_utf8_lossy(&b.req.body).into_owned()))?,
    )?;
    g.set(
        "formdata",
        scope.create_function(move |lua, ()| map_to_table(lua, &b.req.form_data()))?,
    )?;
    g.set(
        "urldata",
        scope.create_function(move |lua, raw: Option<String>| {
            let values = match raw {
                Some(raw) => parse_query(&raw),
                None => b.req.url_data(),
            };
            map_to_table(lua, &values)
        })?,
    )?;

    // Status, errors and redirects
    g.set(
        "status",
        scope.create_function(move |_, code: u16| b.with_output(|o| o.set_status(code)))?,
    )?;
    g.set(
        "error",
        scope.create_function(move |lua, (first, message): (Value, Option<String>)| {
            let code = match first {
                Value::Integer(n) => status_code(n)?,
                Value::Number(n) if n.fract() == 0.0 => status_code(n as i64)?,
                other => {
                    let throw: Function = lua.globals().get("throw")?;
                    // Level 2 blames the script line, not this function.
                    return throw.call::<()>((other, 2));
                }
            };
            b.with_output(|o| o.set_status(code))?;
            let message = message.unwrap_or_else(|| {
                http::StatusCode::from_u16(code)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Error")
                    .to_string()
            });
            b.write(format!("{message}\n"))
        })?,
    )?;
    g.set(
        "redirect",
        scope.create_function(move |_, (url, code): (String, Option<u16>)| {
            b.with_output(|o| o.redirect(&url, code.unwrap_or(302)))
        })?,
    )?;
    g.set(
        "permanent_redirect",
        scope.create_function(move |_, url: String| b.with_output(|o| o.redirect(&url, 301)))?,
    )?;

    // Files
    g.set(
        "scriptdir",
        scope.create_function(move |_, rel: Option<String>| {
            let dir = b.script_dir();
            let dir = match rel {
                Some(rel) => dir.join(rel),
                None => dir,
            };
            Ok(dir.display().to_string())
        })?,
    )?;
    g.set(
        "readglob",
        scope.create_function(move |lua, (pattern, base): (String, Option<String>)| {
            let base = base.map(PathBuf::from).unwrap_or_else(|| b.script_dir());
            let full = base.join(pattern);
            let Ok(paths) = glob::glob(&full.to_string_lossy()) else {
                return Ok(Value::Nil);
            };
            let contents = lua.create_table()?;
            for path in paths.filter_map(Result::ok) {
                match std::fs::read(&path) {
                    Ok(data) => contents.push(lua.create_string(&data)?)?,
                    Err(_) => return Ok(Value::Nil),
                }
            }
            Ok(Value::Table(contents))
        })?,
    )?;
    g.set(
        "file2url",
        scope.create_function(move |_, file: String| {
            let dir = b.script_dir();
            let server_dir = std::path::absolute(&b.host.server_dir).unwrap_or_else(|_| b.host.server_dir.clone());
            Ok(file_to_url(&server_dir, &dir.join(file)))
        })?,
    )?;
    g.set(
        "dofile",
        scope.create_function(move |lua, file: String| {
            let path = b.script_dir().join(&file);
            let source = match std::fs::read(&path) {
                Ok(source) => source,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "could not find script");
                    return Ok(MultiValue::new());
                }
            };
            match lua.load(&source[..]).set_name(chunk_name(&path)).call::<MultiValue>(()) {
                Ok(values) => Ok(values),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "error running script");
                    Ok(MultiValue::new())
                }
            }
        })?,
    )?;

    // Renderers
    g.set(
        "mprint",
        scope.create_function(move |_, args: Variadic<Value>| b.write(render::markdown::to_html(&join_args(&args, "\n")?)))?,
    )?;
    g.set(
        "aprint",
        scope.create_function(move |_, args: Variadic<Value>| {
            let source = join_args(&args, "\n")?;
            let result = render::amber::render(&source, &TemplateData::default())
                .map(|html| String::from_utf8_lossy(&html).into_owned());
            b.write_rendered("Amber template", &source, result)
        })?,
    )?;
    g.set(
        "gprint",
        scope.create_function(move |_, args: Variadic<Value>| {
            let source = join_args(&args, "\n")?;
            b.write_rendered("GCSS", &source, render::gcss::compile(&source))
        })?,
    )?;
    g.set(
        "jprint",
        scope.create_function(move |_, args: Variadic<Value>| {
            let source = join_args(&args, "\n")?;
            b.write_rendered("JSX", &source, render::jsx::transform(&source))
        })?,
    )?;
    g.set(
        "hprint",
        scope.create_function(move |_, args: Variadic<Value>| {
            let source = join_args(&args, "\n")?;
            let result = render::jsx::transform(&source).map(|js| render::to_hyperapp_calls(&js));
            b.write_rendered("JSX", &source, result)
        })?,
    )?;
    g.set(
        "poprint",
        scope.create_function(move |lua, (source, table): (String, Option<Table>)| {
            let data = b.template_data(lua, table)?.unwrap_or_default();
            let result = render::pongo::render(&source, &data)
                .map(|html| String::from_utf8_lossy(&html).into_owned());
            b.write_rendered("Pongo2 template", &source, result)
        })?,
    )?;
    g.set(
        "msgpage",
        scope.create_function(move |_, args: Variadic<String>| {
            let (title, body) = match args.len() {
                0 => (String::new(), String::new()),
                1 => (String::new(), args[0].clone()),
                _ => (args[0].clone(), args[1].clone()),
            };
            let theme_name = args.get(2).map(String::as_str).unwrap_or(MESSAGE_THEME);
            let mut page = theme::message_page(&title, &body, theme_name);
            page.extend_from_slice(b"</body></html>");
            b.write(page)
        })?,
    )?;
    g.set(
        "serve",
        scope.create_function(move |lua, (file, table): (String, Option<Table>)| {
            let body = b.page(lua, &file, table)?;
            b.write(body)
        })?,
    )?;
    g.set(
        "render",
        scope.create_function(move |lua, (file, table): (String, Option<Table>)| {
            let body = b.page(lua, &file, table)?;
            lua.create_string(&body[..])
        })?,
    )?;
    Ok(())
}
