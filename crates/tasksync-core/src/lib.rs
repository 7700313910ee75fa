//! Completion reconciliation between markdown notes and a remote task service.

pub mod activity;
pub mod clock;
pub mod config;
pub mod detector;
pub mod document;
pub mod entry;
pub mod gateway;
pub mod hash;
pub mod http;
pub mod ids;
pub mod instruction;
pub mod journal;
pub mod lines;
pub mod locator;
pub mod remote;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
