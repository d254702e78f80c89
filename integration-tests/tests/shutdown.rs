use integration_tests::harness::TestServer;
use kiln_core::shutdown;
use pretty_assertions::assert_eq;
use std::net::TcpStream;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Hooks run in registration order, once, even when shutdown is requested again.
#[test]
fn hooks_run_in_order_exactly_once() {
    let srv = TestServer::start("site");
    assert!(srv.get("/").send().unwrap().status().is_success());

    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["A", "B", "C"] {
        let order = order.clone();
        shutdown::at_shutdown(move || order.lock().unwrap().push(name));
    }

    shutdown::shutdown();
    shutdown::shutdown();

    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    assert!(shutdown::coordinator().is_completed());

    let logged = srv
        .captured_events()
        .into_iter()
        .filter(|e| e.message() == "shutting down")
        .count();
    assert_eq!(logged, 1);
}

/// SIGTERM drains the listeners, runs the hooks in order, closes the logs and exits 0.
#[test]
fn sigterm_runs_hooks_then_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("index.html"), "<html><body>hi</body></html>").unwrap();
    let hooks = dir.path().join("hooks.log");
    let access = dir.path().join("access.log");
    let internal = dir.path().join("kiln.log");

    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let addr = format!("127.0.0.1:{port}");

    let mut child = Command::new(env!("CARGO_BIN_EXE_kiln-hooks"))
        .args(["--server", "--httponly", "--nolimit", "--conf", "", "--addr", &addr])
        .arg("--dir")
        .arg(&root)
        .arg("--accesslog")
        .arg(&access)
        .arg("--log")
        .arg(&internal)
        .env("KILN_HOOK_LOG", &hooks)
        .env_remove("RUST_LOG")
        .env_remove("TOKIO_CONSOLE")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start kiln-hooks");

    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect(&addr).is_err() {
        assert!(Instant::now() < deadline, "server failed to start at {addr}");
        thread::sleep(Duration::from_millis(25));
    }
    let res = reqwest::blocking::get(format!("http://{addr}/")).unwrap();
    assert!(res.status().is_success());

    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let deadline = Instant::now() + Duration::from_secs(20);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("kiln did not exit after SIGTERM");
        }
        thread::sleep(Duration::from_millis(50));
    };

    assert_eq!(status.code(), Some(0));
    assert_eq!(std::fs::read_to_string(&hooks).unwrap(), "A\nB\nC\n");
    let logged = std::fs::read_to_string(&access).unwrap();
    assert!(logged.contains("\"GET / HTTP/1.1\" 200"), "{logged}");
    let internal = std::fs::read_to_string(&internal).unwrap();
    assert!(internal.contains("shutting down"), "{internal}");
}
