use flate2::read::GzDecoder;
use integration_tests::harness::{Options, TestServer};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use std::io::Read;

/// Serves index.html from the fixture directory
#[test]
fn serves_the_index_page() {
    let srv = TestServer::start("site");

    let res = srv.get("/").send().unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "text/html;charset=utf-8"
    );
    assert!(res.headers().get("server").unwrap().to_str().unwrap().starts_with("kiln"));
    assert_eq!(res.text().unwrap().trim(), "<html><body>hi</body></html>");
}

#[test]
fn large_text_is_gzipped_and_logged_with_socket_bytes() {
    let srv = TestServer::start_with(
        "site",
        Options {
            access_log: true,
            ..Options::default()
        },
    );
    let text: String = (0..5000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    std::fs::write(srv.root().join("big.txt"), &text).unwrap();

    let res = srv.get("/big.txt").header("accept-encoding", "gzip").send().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("content-encoding").unwrap(), "gzip");
    let compressed = res.bytes().unwrap();

    let mut body = String::new();
    GzDecoder::new(&compressed[..]).read_to_string(&mut body).unwrap();
    assert_eq!(body, text);

    let lines = srv.access_log_lines(1);
    let line = lines
        .iter()
        .find(|l| l.contains("GET /big.txt"))
        .unwrap_or_else(|| panic!("no access log line for /big.txt in {lines:?}"));
    let after_request = line.split("\" ").nth(1).unwrap();
    let mut fields = after_request.split_whitespace();
    assert_eq!(fields.next(), Some("200"));
    assert_eq!(fields.next(), Some(compressed.len().to_string().as_str()));
}

#[test]
fn markdown_keywords_set_the_title() {
    let srv = TestServer::start("site");

    let res = srv.get("/post.md").send().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().unwrap();

    assert!(body.contains("<title>Hello</title>"), "{body}");
    assert!(body.contains("<h1>World</h1>"), "{body}");
    assert!(body.contains("<style>"), "{body}");
}

#[test]
fn directories_are_listed() {
    let srv = TestServer::start("site");

    let res = srv.get("/a/").send().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().unwrap();

    assert!(body.contains("<a href=\"/a/b.txt\">b.txt</a>"), "{body}");
    assert!(body.contains("<a href=\"/a/c/\">c/</a>"), "{body}");
    assert!(body.contains("<html"), "{body}");
}

#[test]
fn missing_files_are_not_found() {
    let srv = TestServer::start("site");

    let res = srv.get("/nope.html").send().unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
