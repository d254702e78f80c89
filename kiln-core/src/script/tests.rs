use super::*;
use crate::render;
use http::StatusCode;
use pretty_assertions::assert_eq;

fn executor(dir: &Path, debug: bool) -> ScriptExecutor {
    ScriptExecutor::new(HostInfo {
        debug,
        server_dir: dir.to_path_buf(),
        version: "kiln test".to_string(),
    })
}

fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).unwrap();
    path
}

async fn body_text(resp: Response) -> String {
    let mut out = Vec::new();
    if let Body::Stream(mut rx) = resp.body {
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
    }
    String::from_utf8(out).unwrap()
}

struct EchoPages;

impl FilePages for EchoPages {
    fn page(&self, path: &Path, data: Option<TemplateData>, _req: &RequestInfo) -> Result<Bytes, String> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let extra = data.map(|d| d.names().join(",")).unwrap_or_default();
        Ok(Bytes::from(format!("[{name}:{extra}]")))
    }
}

#[tokio::test]
async fn prints_and_sets_headers() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(
        dir.path(),
        "index.lua",
        "status(201)\ncontent('text/plain')\nsetheader('X-Kiln', 'yes')\nprint('hello', 42)\npprint({1, 2})",
    );
    let resp = executor(dir.path(), false)
        .run(script, RequestInfo::get("/"), None)
        .await
        .unwrap();

    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.headers.get("content-type").unwrap(), "text/plain");
    assert_eq!(resp.headers.get("x-kiln").unwrap(), "yes");
    assert_eq!(body_text(resp).await, "hello\t42\n{1, 2}\n");
}

#[tokio::test]
async fn request_functions_see_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(
        dir.path(),
        "index.lua",
        "print(method(), urlpath(), header('X-Test'), urldata().q)",
    );
    let req = RequestInfo::get("/page?q=rust").with_header("x-test", "value");
    let resp = executor(dir.path(), false).run(script, req, None).await.unwrap();
    assert_eq!(body_text(resp).await, "GET\t/page\tvalue\trust\n");
}

#[tokio::test]
async fn errors_before_output_are_returned() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "index.lua", "print('partial')\nerror('boom')");
    let exec = executor(dir.path(), true);
    let err = exec.run(script, RequestInfo::get("/"), None).await.unwrap_err();

    assert_eq!(err.to_string(), "index.lua:2: boom");
    assert_eq!(exec.pool().idle(), 0);
}

#[tokio::test]
async fn errors_after_flush_end_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "index.lua", "print('partial')\nflush()\nerror('boom')");
    let resp = executor(dir.path(), true)
        .run(script, RequestInfo::get("/"), None)
        .await
        .unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(body_text(resp).await, "partial\n");
}

#[tokio::test]
async fn status_after_body_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(
        dir.path(),
        "index.lua",
        "print('x')\nok, err = pcall(status, 404)\nprint(ok, tostring(err):find('after the response body') ~= nil)",
    );
    let resp = executor(dir.path(), false)
        .run(script, RequestInfo::get("/"), None)
        .await
        .unwrap();
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(body_text(resp).await, "x\nfalse\ttrue\n");
}

#[tokio::test]
async fn redirects_and_http_errors() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), false);

    let script = write(dir.path(), "a.lua", "redirect('/login')");
    let resp = exec.run(script, RequestInfo::get("/a"), None).await.unwrap();
    assert_eq!(resp.status, StatusCode::FOUND);
    assert_eq!(resp.headers.get("location").unwrap(), "/login");

    let script = write(dir.path(), "b.lua", "error(418, 'short and stout')");
    let resp = exec.run(script, RequestInfo::get("/b"), None).await.unwrap();
    assert_eq!(resp.status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body_text(resp).await, "short and stout\n");
}

#[tokio::test]
async fn error_codes_outside_u16_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), false);

    // 65936 would wrap around to 400.
    let script = write(dir.path(), "index.lua", "error(65936, 'wrapped')");
    let err = exec.run(script, RequestInfo::get("/"), None).await.unwrap_err();
    assert!(err.to_string().contains("status code out of range: 65936"), "{err}");

    let script = write(dir.path(), "neg.lua", "error(-1)");
    let err = exec.run(script, RequestInfo::get("/neg"), None).await.unwrap_err();
    assert!(err.to_string().contains("status code out of range: -1"), "{err}");
}

#[tokio::test]
async fn error_with_a_message_still_throws() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "index.lua", "error('plain failure')");
    let err = executor(dir.path(), false)
        .run(script, RequestInfo::get("/"), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("plain failure"));
}

#[tokio::test]
async fn renderer_helpers_write_output() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(
        dir.path(),
        "index.lua",
        "mprint('# Hi')\ngprint('a\\n  color: red')\npoprint('{{ name }}!', { name = 'kiln' })",
    );
    let resp = executor(dir.path(), false)
        .run(script, RequestInfo::get("/"), None)
        .await
        .unwrap();
    let body = body_text(resp).await;
    assert!(body.contains("<h1>Hi</h1>"), "{body}");
    assert!(body.contains("a{color:red;}"), "{body}");
    assert!(body.ends_with("kiln!"), "{body}");
}

#[tokio::test]
async fn serve_and_render_use_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(
        dir.path(),
        "index.lua",
        "serve('page.md')\nlocal s = render('other.po2', { a = 1 })\nprint(s)",
    );
    let pages: Arc<dyn FilePages> = Arc::new(EchoPages);
    let resp = executor(dir.path(), false)
        .run(script, RequestInfo::get("/"), Some(pages))
        .await
        .unwrap();
    assert_eq!(body_text(resp).await, "[page.md:][other.po2:a]\n");
}

#[tokio::test]
async fn states_are_reusable_after_a_request() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), false);
    let script = write(dir.path(), "index.lua", "print('one')");
    let resp = exec.run(script.clone(), RequestInfo::get("/"), None).await.unwrap();
    assert_eq!(body_text(resp).await, "one\n");

    let data = write(dir.path(), "data.lua", "ok = pcall(error, 'x')");
    let names = exec
        .with_data(Some(data), |data| data.values["ok"].clone())
        .await
        .unwrap();
    assert_eq!(names, serde_json::json!(false));
}

#[tokio::test]
async fn data_functions_feed_templates() {
    let dir = tempfile::tempdir().unwrap();
    let data = write(dir.path(), "data.lua", "title = 'Kiln'\nfunction twice(s) return s .. s end");
    let html = executor(dir.path(), false)
        .with_data(Some(data), |data| render::pongo::render("{{ title }} {{ twice('ab') }}", data))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(html).unwrap(), "Kiln abab");
}

#[tokio::test]
async fn closed_pool_refuses_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), false);
    exec.close();
    let script = write(dir.path(), "index.lua", "print('x')");
    let err = exec.run(script, RequestInfo::get("/"), None).await.unwrap_err();
    assert!(matches!(err, ScriptError::PoolClosed));
}
