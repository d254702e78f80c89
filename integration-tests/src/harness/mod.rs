pub mod server;
pub mod tracing;

pub use server::{Options, TestServer};
pub use tracing::{CapturedEvent, init_test_tracing};
