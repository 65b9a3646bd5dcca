// ABOUTME: Library root for crishim - exposes the shim's components for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod error;
pub mod io;
pub mod runtime;
pub mod server;
pub mod store;
pub mod stream;
pub mod types;
