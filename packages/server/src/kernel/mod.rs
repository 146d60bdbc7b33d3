//! Kernel module - device-side infrastructure for the server.

pub mod simulated_transport;

pub use simulated_transport::*;
