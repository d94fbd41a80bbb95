//! Metamod plugin interface: FFI layouts and the exported entry points.

pub mod exports;
pub mod tables;
pub mod types;
