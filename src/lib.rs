//! The dev server core for sprig: module resolution, prebundling,
//! on-demand transform, and HMR broadcast. `main.rs` is a thin binary
//! wrapping [`cli::CliHandler`]; everything else lives here so the
//! integration suite under `tests/` can drive it directly.

pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod resolver;
pub mod server;
pub mod transform;
pub mod utils;
