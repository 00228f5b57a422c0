//! Library crate for proxy-speed-rs: concurrent latency and bandwidth probing through proxy connectors.
pub mod config;
pub mod connector;
pub mod download;
pub mod filter;
pub mod identity;
pub mod output;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod status;
pub mod transport;
pub mod types;
