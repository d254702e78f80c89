//! Zipped applications (`.alg`, or `.zip` given as the serving root).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not extract {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("could not create {path}: {source}")]
    TempDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Extract `archive` into `dest`. Entries that would land outside `dest` are skipped.
pub fn extract(archive: &Path, dest: &Path) -> Result<(), BundleError> {
    let file = File::open(archive).map_err(|source| BundleError::Open {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| BundleError::Extract {
        path: archive.to_path_buf(),
        source,
    })?;
    zip.extract(dest).map_err(|source| BundleError::Extract {
        path: archive.to_path_buf(),
        source,
    })
}

/// The directory to serve from an extracted bundle: its only directory when it holds
/// exactly one entry and that entry is a directory, otherwise the extraction itself.
pub fn bundle_root(extracted: &Path) -> PathBuf {
    let entries: Vec<_> = match std::fs::read_dir(extracted) {
        Ok(rd) => rd.filter_map(Result::ok).collect(),
        Err(_) => return extracted.to_path_buf(),
    };
    match entries.as_slice() {
        [only] if only.path().is_dir() => only.path(),
        _ => extracted.to_path_buf(),
    }
}

/// Bundles extracted below one temporary directory, each at most once.
pub struct Bundles {
    base: PathBuf,
    extracted: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl Default for Bundles {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join(format!("kiln-{}", std::process::id())))
    }
}

impl Bundles {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            extracted: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The serving root of `archive`, extracting it on first use.
    pub fn open(&self, archive: &Path) -> Result<PathBuf, BundleError> {
        let mut extracted = self.extracted.lock();
        if let Some(root) = extracted.get(archive) {
            return Ok(root.clone());
        }

        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".to_string());
        let dest = self.base.join(format!("{}-{stem}", extracted.len()));
        std::fs::create_dir_all(&dest).map_err(|source| BundleError::TempDir {
            path: dest.clone(),
            source,
        })?;
        extract(archive, &dest)?;
        let root = bundle_root(&dest);
        tracing::info!(archive = %archive.display(), root = %root.display(), "extracted application");
        extracted.insert(archive.to_path_buf(), root.clone());
        Ok(root)
    }

    /// Delete everything extracted so far.
    pub fn remove(&self) {
        self.extracted.lock().clear();
        match std::fs::remove_dir_all(&self.base) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.base.display(), error = %e, "could not remove extracted files"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in files {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn a_single_top_directory_becomes_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("app.alg");
        write_zip(&archive, &[("app/index.md", "# hi"), ("app/data.lua", "x = 1")]);

        let bundles = Bundles::new(dir.path().join("extracted"));
        let root = bundles.open(&archive).unwrap();
        assert!(root.ends_with("app"));
        assert!(root.join("index.md").is_file());
    }

    #[test]
    fn extraction_happens_once() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("site.zip");
        write_zip(&archive, &[("index.html", "<p>x</p>"), ("style.css", "p{}")]);

        let bundles = Bundles::new(dir.path().join("extracted"));
        let first = bundles.open(&archive).unwrap();
        std::fs::remove_file(first.join("style.css")).unwrap();
        let second = bundles.open(&archive).unwrap();
        assert_eq!(first, second);
        assert!(!second.join("style.css").exists());

        bundles.remove();
        assert!(!bundles.base().exists());
    }

    #[test]
    fn broken_archives_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.alg");
        std::fs::write(&archive, "not a zip").unwrap();
        let err = Bundles::new(dir.path().join("x")).open(&archive).unwrap_err();
        assert!(matches!(err, BundleError::Extract { .. }));
    }
}
