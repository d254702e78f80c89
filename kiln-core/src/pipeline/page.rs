//! Rendering one file into a response, by kind.

use super::bundle::BundleError;
use super::ext::{self, Kind};
use super::resolve::{self, Resolved};
use super::{Pipeline, body};
use crate::cache::CacheError;
use crate::render::markdown::PageOptions;
use crate::render::{self, RenderError, TemplateData};
use crate::request::RequestInfo;
use crate::response::{CSS_UTF8, HTML_UTF8, JS_UTF8, Response};
use crate::script::{FilePages, ScriptError};
use crate::{error_page, theme};
use bytes::Bytes;
use http::StatusCode;
use http::header::{ACCEPT_ENCODING, CONTENT_DISPOSITION};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Read(#[from] CacheError),

    #[error("could not stream {path}: {source}")]
    Stream {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A template or stylesheet did not compile. `file` is the one at fault.
    #[error("{source}")]
    Render {
        file: PathBuf,
        #[source]
        source: RenderError,
    },

    #[error("{source}")]
    Script {
        file: PathBuf,
        #[source]
        source: ScriptError,
    },

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

impl PageError {
    pub fn is_not_found(&self) -> bool {
        match self {
            PageError::Read(e) => e.is_not_found(),
            PageError::Stream { source, .. } => source.kind() == io::ErrorKind::NotFound,
            PageError::Script {
                source: ScriptError::Read { source, .. },
                ..
            } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    fn render(file: &Path, source: RenderError) -> Self {
        PageError::Render {
            file: file.to_path_buf(),
            source,
        }
    }

    fn script(file: &Path, source: ScriptError) -> Self {
        PageError::Script {
            file: file.to_path_buf(),
            source,
        }
    }
}

/// Read a whole body into memory.
pub async fn collect(body: crate::response::Body) -> io::Result<Bytes> {
    use crate::response::Body;
    use tokio::io::AsyncReadExt;

    match body {
        Body::Empty => Ok(Bytes::new()),
        Body::Bytes(b) => Ok(b),
        Body::File(mut file) => {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;
            Ok(buf.into())
        }
        Body::RangedFile { file, remaining } => {
            let mut buf = Vec::new();
            file.take(remaining).read_to_end(&mut buf).await?;
            Ok(buf.into())
        }
        Body::Stream(mut rx) => {
            let mut buf = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
            Ok(buf.into())
        }
    }
}

/// Lets scripts render other files through the pipeline. Scripts run on blocking
/// threads, so this blocks on the runtime that started them.
pub(super) struct Pages {
    pub(super) pipeline: Arc<Pipeline>,
    pub(super) handle: Handle,
}

impl FilePages for Pages {
    fn page(&self, path: &Path, data: Option<TemplateData>, req: &RequestInfo) -> Result<Bytes, String> {
        let mut req = req.clone();
        // The bytes end up inside another response.
        req.headers.remove(ACCEPT_ENCODING);
        self.handle.block_on(async {
            let resp = self
                .pipeline
                .render_file(path, &req, data)
                .await
                .map_err(|e| e.to_string())?;
            collect(resp.body).await.map_err(|e| e.to_string())
        })
    }
}

fn render_template(kind: Kind, source: &str, link_style: bool, data: &TemplateData) -> Result<Vec<u8>, RenderError> {
    if kind == Kind::Amber {
        let source = if link_style {
            theme::style_amber(source, theme::DEFAULT_STYLE_FILENAME)
        } else {
            source.to_string()
        };
        return render::amber::render(&source, data);
    }
    let html = render::pongo::render(source, data)?;
    if link_style && String::from_utf8_lossy(&html).contains("<html>") {
        return Ok(theme::style_html(&html, theme::DEFAULT_STYLE_FILENAME));
    }
    Ok(html)
}

impl Pipeline {
    /// Render `path`, turning failures into error pages.
    pub(super) async fn file_page(self: &Arc<Self>, path: &Path, req: &RequestInfo) -> Response {
        match self.render_file(path, req, None).await {
            Ok(resp) => resp,
            Err(e) => self.page_failure(path, e, req).await,
        }
    }

    /// Render `path` for `req`. `data` replaces the data script for templates.
    pub(super) async fn render_file(
        self: &Arc<Self>,
        path: &Path,
        req: &RequestInfo,
        data: Option<TemplateData>,
    ) -> Result<Response, PageError> {
        let kind = ext::classify(path);
        match kind {
            Kind::Lua => {
                return self
                    .executor
                    .run(path.to_path_buf(), req.clone(), Some(self.pages()))
                    .await
                    .map_err(|e| PageError::script(path, e));
            }
            Kind::Scss => {
                let file = path.to_path_buf();
                let css = tokio::task::spawn_blocking(move || render::scss::compile_file(&file))
                    .await
                    .map_err(|e| PageError::Stream {
                        path: path.to_path_buf(),
                        source: io::Error::other(e),
                    })?
                    .map_err(|e| PageError::render(path, e))?;
                return Ok(body::data_response(req, CSS_UTF8, css));
            }
            Kind::Bundle => {
                // The archive is served as a directory below its own name.
                self.bundles.open(path)?;
                let location = format!("{}/", req.path().trim_end_matches('/'));
                return Ok(Response::redirect(StatusCode::MOVED_PERMANENTLY, &location));
            }
            Kind::Text | Kind::Binary | Kind::Other => return self.static_file(path, kind, req).await,
            // Nothing to inject, so the file goes out as stored.
            Kind::Html if self.refresh.is_none() => return self.static_file(path, kind, req).await,
            _ => {}
        }

        let source = self.read(path).await?.data()?;
        let text = String::from_utf8_lossy(&source).into_owned();

        match kind {
            Kind::Html => Ok(body::data_response(req, HTML_UTF8, self.inject(&source, req))),
            Kind::Markdown => {
                let link_style = self.linked_style(path).await?;
                let page = self.markdown_page(path, source, link_style).await?;
                Ok(body::data_response(req, HTML_UTF8, self.inject(&page, req)))
            }
            Kind::Amber | Kind::Pongo => {
                let link_style = self.linked_style(path).await?;
                let rendered = match data {
                    Some(data) => render_template(kind, &text, link_style, &data),
                    None => {
                        let script = self.data_script(path);
                        let at_fault = script.clone().unwrap_or_default();
                        self.executor
                            .with_data(script, move |data| render_template(kind, &text, link_style, data))
                            .await
                            .map_err(|e| PageError::script(&at_fault, e))?
                    }
                }
                .map_err(|e| PageError::render(path, e))?;
                let page = theme::insert_doctype(&self.inject(&rendered, req));
                Ok(body::data_response(req, HTML_UTF8, page))
            }
            Kind::Gcss => {
                let css = render::gcss::compile(&text).map_err(|e| PageError::render(path, e))?;
                Ok(body::data_response(req, CSS_UTF8, css))
            }
            Kind::HyperApp => {
                let link_style = self.linked_style(path).await?;
                let page = render::hyperapp::page(&text, link_style, &self.config.theme)
                    .map_err(|e| PageError::render(path, e))?;
                Ok(body::data_response(req, HTML_UTF8, self.inject(&page, req)))
            }
            Kind::Jsx => {
                let js = render::jsx::transform(&text).map_err(|e| PageError::render(path, e))?;
                Ok(body::data_response(req, JS_UTF8, js))
            }
            Kind::Form => {
                let page = render::form::render(&text).map_err(|e| PageError::render(path, e))?;
                Ok(body::data_response(req, HTML_UTF8, self.inject(&page, req)))
            }
            other => self.static_file(path, other, req).await,
        }
    }

    async fn read(&self, path: &Path) -> Result<crate::cache::DataBlock, CacheError> {
        let ext = ext::extension(path);
        self.cache.read(path, self.config.cache_mode.should_cache(&ext)).await
    }

    async fn static_file(&self, path: &Path, kind: Kind, req: &RequestInfo) -> Result<Response, PageError> {
        let content_type = ext::content_type(path, kind);
        let stream_err = |source| PageError::Stream {
            path: path.to_path_buf(),
            source,
        };
        let mut resp = if self.stat.size(path) >= self.config.large_file_size {
            tracing::debug!(file = %path.display(), "streaming large file");
            body::stream_file(path, &content_type, req).await.map_err(stream_err)?
        } else {
            let block = self.read(path).await?;
            body::block_response(req, &content_type, &block).map_err(stream_err)?
        };
        if kind == Kind::Binary {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            resp.set_header(CONTENT_DISPOSITION, &format!("attachment; filename=\"{name}\""));
        }
        Ok(resp)
    }

    /// Render on a blocking thread, since stylesheets named by the document are read inline.
    async fn markdown_page(&self, path: &Path, source: Bytes, link_style: bool) -> Result<Vec<u8>, PageError> {
        let file = path.to_path_buf();
        let theme = self.config.theme.clone();
        tokio::task::spawn_blocking(move || {
            let dir = file.parent().unwrap_or(Path::new("."));
            let read_css = |name: &str| std::fs::read_to_string(dir.join(name)).ok();
            let filename = file.to_string_lossy();
            let opts = PageOptions {
                filename: &filename,
                theme: &theme,
                link_style_gcss: link_style,
                inline_css: Some(&read_css),
            };
            render::markdown::render_page(&source, &opts)
        })
        .await
        .map_err(|e| PageError::Stream {
            path: path.to_path_buf(),
            source: io::Error::other(e),
        })
    }

    /// Markdown mode: the document at `/`, and the local images it shows. Everything else
    /// is missing.
    pub(super) async fn markdown_site(self: &Arc<Self>, doc: &Path, req: &RequestInfo) -> Response {
        if req.path() == "/" {
            return self.file_page(doc, req).await;
        }
        let dir = doc.parent().unwrap_or(Path::new("."));
        let Resolved::File(local) = resolve::resolve(dir, req.path(), &self.stat) else {
            return self.not_found(req.path());
        };
        match self.referenced_images(doc, dir).await {
            Ok(images) if images.contains(&local) => {
                let kind = ext::classify(&local);
                match self.static_file(&local, kind, req).await {
                    Ok(resp) => resp,
                    Err(e) => self.page_failure(&local, e, req).await,
                }
            }
            Ok(_) => {
                tracing::debug!(path = %req.path(), "not an image of the served document");
                self.not_found(req.path())
            }
            Err(e) => self.page_failure(doc, e, req).await,
        }
    }

    async fn referenced_images(&self, doc: &Path, dir: &Path) -> Result<Vec<PathBuf>, PageError> {
        let source = self.read(doc).await?.data()?;
        let html = render::markdown::to_html(&String::from_utf8_lossy(&source));
        let images = render::markdown::local_image_paths(&html)
            .into_iter()
            .filter_map(|src| match resolve::resolve(dir, &format!("/{src}"), &self.stat) {
                Resolved::File(path) => Some(path),
                _ => None,
            })
            .collect();
        Ok(images)
    }

    /// Whether a `style.gcss` next to `path` should be linked. In debug mode it must
    /// also compile, so its errors show up instead of an unstyled page.
    async fn linked_style(&self, path: &Path) -> Result<bool, PageError> {
        let style = path
            .parent()
            .unwrap_or(Path::new("."))
            .join(theme::DEFAULT_STYLE_FILENAME);
        if !self.stat.exists(&style) {
            return Ok(false);
        }
        if self.config.show_errors() {
            let source = self.read(&style).await?.data()?;
            render::gcss::compile(&String::from_utf8_lossy(&source)).map_err(|e| PageError::render(&style, e))?;
        }
        Ok(true)
    }

    /// The data script for a template: the configured name in the working directory,
    /// else next to the template.
    fn data_script(&self, template: &Path) -> Option<PathBuf> {
        let name = &self.config.data_script;
        if name.is_empty() {
            return None;
        }
        let in_cwd = PathBuf::from(name);
        if self.stat.exists(&in_cwd) && !self.stat.is_dir(&in_cwd) {
            return Some(in_cwd);
        }
        let beside = template.parent()?.join(name);
        self.stat.exists(&beside).then_some(beside)
    }

    pub(super) fn inject(&self, html: &[u8], req: &RequestInfo) -> Vec<u8> {
        match &self.refresh {
            Some(refresh) => refresh.inject(html, req.domain()),
            None => html.to_vec(),
        }
    }

    pub(super) async fn page_failure(&self, path: &Path, err: PageError, req: &RequestInfo) -> Response {
        if err.is_not_found() {
            return self.not_found(req.path());
        }
        if self.config.show_errors() {
            match &err {
                PageError::Render { file, source } => {
                    return self.error_response(file, &source.to_string(), source.language(), req).await;
                }
                PageError::Script { file, source } if !source.is_cancelled() => {
                    return self.error_response(file, &source.to_string(), "lua", req).await;
                }
                _ => {}
            }
        }
        if let PageError::Script {
            source: ScriptError::Cancelled,
            ..
        } = err
        {
            tracing::debug!(file = %path.display(), "client went away");
        } else {
            tracing::error!(file = %path.display(), error = %err, "could not serve page");
        }
        self.message_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "Something went wrong while serving this page.",
        )
    }

    /// The debug error page for `file`, highlighting the line named in `message`.
    pub(super) async fn error_response(&self, file: &Path, message: &str, lang: &str, req: &RequestInfo) -> Response {
        let source = tokio::fs::read(file).await.unwrap_or_default();
        let page = error_page::render(&file.display().to_string(), &source, message, lang, &self.version);
        Response::html(StatusCode::OK, self.inject(&page, req))
    }

    pub(super) fn not_found(&self, url_path: &str) -> Response {
        let mut page = theme::no_page(url_path, theme::page_theme(&self.config.theme));
        page.extend_from_slice(b"</body></html>");
        Response::html(StatusCode::NOT_FOUND, page)
    }

    pub(super) fn message_response(&self, status: StatusCode, title: &str, body: &str) -> Response {
        let mut page = theme::message_page(title, body, theme::page_theme(&self.config.theme));
        page.extend_from_slice(b"</body></html>");
        Response::html(status, page)
    }
}
