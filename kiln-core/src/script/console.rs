//! Interactive Lua console on stdin, started once the server is ready.

use super::convert::pretty;
use super::{HostInfo, ScriptError, api};
use mlua::{Lua, MultiValue, Value, Variadic};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

const PROMPT: &str = "lua> ";

const HELP: &str = "Enter Lua expressions or statements. Results are pretty printed.\n\
                    Commands: help, pwd, serverdir, exit. ctrl-d also exits.";

/// What the console does with one line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Nothing,
    Output(String),
    Exit,
}

pub struct Console {
    lua: Lua,
    host: HostInfo,
    ctrl_d_twice: bool,
}

impl Console {
    pub fn new(host: HostInfo, ctrl_d_twice: bool) -> Result<Self, ScriptError> {
        let lua = Lua::new();
        api::install_base(&lua, &host)?;
        lua.globals().set(
            "pprint",
            lua.create_function(|_, args: Variadic<Value>| {
                println!("{}", args.iter().map(pretty).collect::<Vec<_>>().join("\t"));
                Ok(())
            })?,
        )?;
        Ok(Self {
            lua,
            host,
            ctrl_d_twice,
        })
    }

    /// Handle one line. Expressions print their values, statements run for their effects.
    pub fn eval(&self, line: &str) -> Reply {
        let line = line.trim();
        match line {
            "" => return Reply::Nothing,
            "exit" | "quit" | "shutdown" | "halt" => return Reply::Exit,
            "help" => return Reply::Output(HELP.to_string()),
            "pwd" | "cwd" => {
                return Reply::Output(
                    std::env::current_dir()
                        .map(|d| d.display().to_string())
                        .unwrap_or_else(|e| e.to_string()),
                );
            }
            "serverdir" | "serverfile" => {
                let dir = std::path::absolute(&self.host.server_dir).unwrap_or_else(|_| self.host.server_dir.clone());
                return Reply::Output(dir.display().to_string());
            }
            _ => {}
        }

        if !line.starts_with("print(") {
            let expression = self.lua.load(format!("return {line}")).set_name("=console").into_function();
            if let Ok(f) = expression {
                return match f.call::<MultiValue>(()) {
                    Ok(values) if values.is_empty() => Reply::Nothing,
                    Ok(values) => Reply::Output(values.iter().map(pretty).collect::<Vec<_>>().join("\t")),
                    Err(e) => Reply::Output(ScriptError::from(e).to_string()),
                };
            }
        }
        match self.lua.load(line).set_name("=console").exec() {
            Ok(()) => Reply::Nothing,
            Err(e) => Reply::Output(ScriptError::from(e).to_string()),
        }
    }

    /// Wait for `ready`, then read lines until EOF or an exit command.
    pub async fn run(self, ready: oneshot::Receiver<()>) {
        if ready.await.is_err() {
            return;
        }
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut eof_count = 0;
        loop {
            print!("{PROMPT}");
            let _ = std::io::stdout().flush();
            match lines.next_line().await {
                Ok(Some(line)) => {
                    eof_count = 0;
                    match self.eval(&line) {
                        Reply::Nothing => {}
                        Reply::Output(text) => println!("{text}"),
                        Reply::Exit => break,
                    }
                }
                Ok(None) => {
                    if self.ctrl_d_twice && eof_count == 0 {
                        eof_count += 1;
                        eprintln!("Press ctrl-d again to exit.");
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "could not read from stdin");
                    break;
                }
            }
        }
        println!("bye");
    }
}
