use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    /// The interpreter reported a syntax or runtime error. The message is the
    /// interpreter's own text, such as `index.lua:3: boom`.
    #[error("{0}")]
    Lua(String),

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("{0} called after the response body was started")]
    HeadersSent(&'static str),

    #[error("{0} can only be called while the server is being configured")]
    WrongPhase(&'static str),

    #[error("the interpreter pool is closed")]
    PoolClosed,

    #[error("script task failed: {0}")]
    Join(String),
}

impl ScriptError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScriptError::Cancelled)
    }
}

impl From<mlua::Error> for ScriptError {
    fn from(err: mlua::Error) -> Self {
        if cancelled_cause(&err) {
            ScriptError::Cancelled
        } else {
            ScriptError::Lua(lua_message(&err))
        }
    }
}

/// The innermost interpreter message, without the traceback mlua appends to callback errors.
pub fn lua_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => lua_message(cause),
        mlua::Error::WithContext { cause, .. } => lua_message(cause),
        mlua::Error::ExternalError(e) => e.to_string(),
        other => other.to_string(),
    }
}

fn cancelled_cause(err: &mlua::Error) -> bool {
    match err {
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            cancelled_cause(cause)
        }
        mlua::Error::ExternalError(e) => e
            .downcast_ref::<ScriptError>()
            .map(ScriptError::is_cancelled)
            .unwrap_or(false),
        _ => false,
    }
}
