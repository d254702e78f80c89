//! The network surface: pingora services for pages and file events, listener
//! setup and the process lifecycle.

mod event_stream;
mod gateway;
mod lifecycle;
mod listen;
mod setup;

pub use gateway::{KilnGateway, MAX_BODY, write_response};
pub use listen::{PORT_ATTEMPTS, free_port_from, url_for};
pub use setup::{Kiln, build, run};
