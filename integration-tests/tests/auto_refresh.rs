use integration_tests::harness::{Options, TestServer};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::io::{BufRead, BufReader};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn refreshing() -> TestServer {
    TestServer::start_with(
        "site",
        Options {
            auto_refresh: true,
            ..Options::default()
        },
    )
}

#[test]
fn pages_get_the_reload_script_once() {
    let srv = refreshing();

    let res = srv.get("/").send().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().unwrap();

    assert_eq!(body.matches("<script>").count(), 1, "{body}");
    assert!(body.contains("/fs"), "{body}");
    assert!(body.contains("hi"), "{body}");
    assert!(body.trim_end().ends_with("</body></html>"), "{body}");
    let script = body.find("<script>").unwrap();
    assert!(script < body.find("</body>").unwrap(), "{body}");
}

#[test]
fn touched_files_are_announced_once_per_cycle() {
    let srv = refreshing();
    let url = format!("{}/fs", srv.event_url().unwrap());

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let client = Client::builder().timeout(Duration::from_secs(10)).build().unwrap();
        let res = client.get(url).send().unwrap();
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "text/event-stream; charset=utf-8"
        );
        tx.send(String::from("connected")).unwrap();
        for line in BufReader::new(res).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "connected");

    let foo = srv.root().join("foo.md");
    std::fs::write(&foo, "# foo\n\nchanged\n").unwrap();
    std::fs::write(&foo, "# foo\n\nchanged again\n").unwrap();

    let mut lines = Vec::new();
    while let Ok(line) = rx.recv_timeout(Duration::from_secs(2)) {
        if line.is_empty() && lines.iter().any(|l: &String| l.starts_with("data: ")) {
            break;
        }
        lines.push(line);
    }

    assert!(lines.contains(&"id: 0".to_string()), "{lines:?}");
    let foo_frames = lines.iter().filter(|l| *l == "data: foo.md").count();
    assert_eq!(foo_frames, 1, "{lines:?}");
}

#[test]
fn other_event_paths_are_not_found() {
    let srv = refreshing();
    let client = Client::new();

    let res = client
        .get(format!("{}/other", srv.event_url().unwrap()))
        .send()
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
