use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    // IO
    #[error("failed to read configuration script {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file does not exist: {path}")]
    MissingRoot { path: PathBuf },

    // Values
    #[error("invalid address '{addr}'")]
    InvalidAddress { addr: String },

    #[error("invalid duration '{value}'")]
    InvalidDuration { value: String },

    // Configuration scripts
    #[error("error in configuration script {path}: {message}")]
    Script { path: PathBuf, message: String },

    #[error("{function} can only be called while the server is being configured")]
    WrongPhase { function: &'static str },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn script(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Script {
            path: path.into(),
            message: message.into(),
        }
    }
}
