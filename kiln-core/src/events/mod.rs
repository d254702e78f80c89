//! File change events for auto-refresh. A watcher records changes in a
//! [`TimeEventMap`]; every subscriber of the event server reads it once per refresh
//! interval and receives the recent paths as server-sent events.

pub mod sse;
mod time_map;
mod watcher;

pub use time_map::{Change, FileEvent, TimeEventMap};
pub use watcher::watch;
