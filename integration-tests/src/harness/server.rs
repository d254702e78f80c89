use crate::harness::{CapturedEvent, init_test_tracing};
use clap::Parser;
use kiln_core::cli::Cli;
use kiln_core::conf::ServerConfig;
use reqwest::blocking::{Client, RequestBuilder};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Optional server features for one test.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Watch the served copy and run the event server on its own port.
    pub auto_refresh: bool,
    /// Write a Combined access log next to the served copy.
    pub access_log: bool,
}

/// Handle to a running kiln test server.
pub struct TestServer {
    base_url: String,
    event_url: Option<String>,
    access_log: Option<PathBuf>,
    client: Client,
    site: TempDir,
}

impl TestServer {
    /// Serve a copy of `fixtures/<fixture>` on a free port.
    pub fn start(fixture: &str) -> Self {
        Self::start_with(fixture, Options::default())
    }

    pub fn start_with(fixture: &str, options: Options) -> Self {
        let events = events();
        init_test_tracing(events.clone());

        let fixture_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(fixture);
        assert!(
            fixture_dir.exists(),
            "fixture directory does not exist: {:?}",
            fixture_dir
        );

        // Tests modify the served files, so every server gets its own copy.
        let site = tempfile::tempdir().expect("failed to create temp dir");
        copy_dir(&fixture_dir, &site.path().join("root"));
        let root = site.path().join("root");

        let listen_addr = format!("127.0.0.1:{}", free_port());
        let mut args = vec![
            "kiln".to_string(),
            "--server".to_string(),
            "--httponly".to_string(),
            "--nolimit".to_string(),
            "--conf".to_string(),
            String::new(),
            "--addr".to_string(),
            listen_addr.clone(),
            "--dir".to_string(),
            root.display().to_string(),
        ];

        let mut event_url = None;
        if options.auto_refresh {
            let event_addr = format!("127.0.0.1:{}", free_port());
            args.extend(["--autorefresh".to_string(), "--eventserver".to_string(), event_addr.clone()]);
            event_url = Some(format!("http://{event_addr}"));
        }

        let mut access_log = None;
        if options.access_log {
            let path = site.path().join("access.log");
            args.extend(["--accesslog".to_string(), path.display().to_string()]);
            access_log = Some(path);
        }

        let config = ServerConfig::from_cli(&Cli::parse_from(&args));
        let kiln = kiln_core::server::build(config).expect("failed to build kiln server");

        thread::spawn(move || {
            kiln.run_forever();
        });

        let base_url = format!("http://{listen_addr}");
        wait_for_server(&listen_addr);
        if let Some(url) = &event_url {
            wait_for_server(url.trim_start_matches("http://"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build client");

        Self {
            base_url,
            event_url,
            access_log,
            client,
            site,
        }
    }

    /// Convenience helper for GET requests.
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The event server, when started with `auto_refresh`.
    pub fn event_url(&self) -> Option<&str> {
        self.event_url.as_deref()
    }

    /// The served copy of the fixture.
    pub fn root(&self) -> PathBuf {
        self.site.path().join("root")
    }

    /// Lines written to the access log so far, waiting briefly for at least `count`.
    pub fn access_log_lines(&self, count: usize) -> Vec<String> {
        let path = self.access_log.as_ref().expect("server was started without an access log");
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let text = std::fs::read_to_string(path).unwrap_or_default();
            let lines: Vec<String> = text.lines().map(str::to_string).collect();
            if lines.len() >= count || Instant::now() > deadline {
                return lines;
            }
            thread::sleep(Duration::from_millis(25));
        }
    }

    /// Log events captured so far, across every server in this test binary.
    pub fn captured_events(&self) -> Vec<CapturedEvent> {
        events().lock().unwrap().clone()
    }
}

fn copy_dir(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Poll until the server accepts connections (or panic).
fn wait_for_server(addr: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);

    loop {
        match TcpStream::connect(addr) {
            Ok(_) => return,
            Err(_) => {
                if Instant::now() > deadline {
                    panic!("server failed to start at {}", addr);
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

static EVENTS: OnceLock<Arc<Mutex<Vec<CapturedEvent>>>> = OnceLock::new();

fn events() -> Arc<Mutex<Vec<CapturedEvent>>> {
    EVENTS
        .get_or_init(|| Arc::new(Mutex::new(Vec::new())))
        .clone()
}

/// Allocate a free port on localhost.
/// This is required to avoid port collisions when running tests in parallel.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
