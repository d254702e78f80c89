//! Template, markup and stylesheet renderers.
//!
//! Every renderer is a plain `source -> bytes` transformation. Data scripts feed
//! templates through [`TemplateData`]; the renderers never see the interpreter.

pub mod amber;
pub mod form;
pub mod gcss;
pub mod hyperapp;
pub mod jsx;
pub mod markdown;
pub mod pongo;
pub mod scss;

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error("{0}")]
    Amber(String),

    #[error("{0}")]
    Pongo(String),

    #[error("{0}")]
    Gcss(String),

    #[error("{0}")]
    Scss(String),

    #[error("{0}")]
    Jsx(String),

    #[error("{0}")]
    Form(String),
}

impl RenderError {
    /// Language name used by error pages to pick line heuristics and titles.
    pub fn language(&self) -> &'static str {
        match self {
            RenderError::Amber(_) => "amber",
            RenderError::Pongo(_) => "pongo2",
            RenderError::Gcss(_) => "gcss",
            RenderError::Scss(_) => "scss",
            RenderError::Jsx(_) => "jsx",
            RenderError::Form(_) => "form",
        }
    }
}

/// A function exported by a data script. Arguments arrive as strings.
pub type DataFn = Arc<dyn Fn(&[String]) -> Result<Value, String> + Send + Sync>;

/// Names a data script makes available to a template.
#[derive(Clone, Default)]
pub struct TemplateData {
    pub values: BTreeMap<String, Value>,
    pub functions: BTreeMap<String, DataFn>,
}

impl TemplateData {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.functions.is_empty()
    }

    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn with_function(
        mut self,
        name: &str,
        f: impl Fn(&[String]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    /// All exported names, values first.
    pub fn names(&self) -> Vec<&str> {
        self.values
            .keys()
            .chain(self.functions.keys())
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Debug for TemplateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateData")
            .field("values", &self.values)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Text form of a value as it is printed into a page.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace `React.createElement(` with hyperapp's `h(`.
pub fn to_hyperapp_calls(js: &str) -> String {
    js.replace("React.createElement(", "h(")
}
