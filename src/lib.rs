//! sws - Stan WASM build server core
//!
//! Tracks compilation jobs and compiles each distinct model source once,
//! sharing the resulting `main.js`/`main.wasm` pair through a
//! content-addressed build cache.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod job;
pub mod orchestrator;
pub mod toolchain;
pub mod ui;

pub use error::{SwsError, SwsResult};
pub use orchestrator::{JobReport, Orchestrator};
