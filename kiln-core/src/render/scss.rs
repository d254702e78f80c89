use super::RenderError;
use std::path::Path;

/// Compile an SCSS file. The file is read by the compiler so that imports resolve
/// relative to it.
pub fn compile_file(path: &Path) -> Result<String, RenderError> {
    let options = grass::Options::default();
    let options = match path.parent() {
        Some(dir) => options.load_path(dir),
        None => options,
    };
    grass::from_path(path, &options).map_err(|e| RenderError::Scss(e.to_string()))
}

/// Compile SCSS held in memory.
pub fn compile(source: &str) -> Result<String, RenderError> {
    grass::from_string(source.to_string(), &grass::Options::default())
        .map_err(|e| RenderError::Scss(e.to_string()))
}
