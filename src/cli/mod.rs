//! Command-line interface for the `iphoto-id` binary
//!
//! Only available with the `server` feature.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, CliLogFormat};
