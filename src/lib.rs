#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod config;
pub mod data;
pub mod engine;
pub mod logging;
pub mod model;
pub mod navigation;
pub mod playback;
pub mod player;
pub mod prefetch;
pub mod source;
pub mod storage;
pub mod store;
pub mod ui;
pub mod window;

#[cfg(test)]
mod test_support;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
