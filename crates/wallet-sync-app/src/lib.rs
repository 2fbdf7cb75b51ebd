// Library root: re-exports all modules so integration tests and the binary
// can reach the crate's public API.

pub mod app;
pub mod chain;
pub mod config;
pub mod display;
pub mod protocol;
pub mod rpc;
pub mod ws_server;
