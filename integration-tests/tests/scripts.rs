use integration_tests::harness::{Options, TestServer};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;

fn logged_status(srv: &TestServer, request: &str) -> String {
    let lines = srv.access_log_lines(1);
    let line = lines
        .iter()
        .find(|l| l.contains(request))
        .unwrap_or_else(|| panic!("no access log line for {request} in {lines:?}"));
    let after_request = line.split("\" ").nth(1).unwrap();
    after_request.split_whitespace().next().unwrap().to_string()
}

/// A status set after the body started cannot reach the client, but the log records it.
#[test]
fn late_status_is_logged() {
    let srv = TestServer::start_with(
        "site",
        Options {
            access_log: true,
            ..Options::default()
        },
    );
    std::fs::write(
        srv.root().join("late.lua"),
        "print(\"partial\")\nflush()\nstatus(404)\n",
    )
    .unwrap();

    let res = srv.get("/late.lua").send().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().unwrap(), "partial\n");

    assert_eq!(logged_status(&srv, "GET /late.lua"), "404");
}

#[test]
fn early_status_is_sent_and_logged() {
    let srv = TestServer::start_with(
        "site",
        Options {
            access_log: true,
            ..Options::default()
        },
    );
    std::fs::write(srv.root().join("gone.lua"), "status(410)\nprint(\"gone\")\n").unwrap();

    let res = srv.get("/gone.lua").send().unwrap();
    assert_eq!(res.status(), StatusCode::GONE);

    assert_eq!(logged_status(&srv, "GET /gone.lua"), "410");
}
