//! Per-site browsing time accounting. A native messaging host receives tab, focus and idle
//! events from a browser extension, attributes the time spent to the domain in front and keeps
//! daily statistics on disk. The `chronos` cli reads, exports and imports those statistics.
//!

pub mod cli;
pub mod daemon;
pub mod utils;
