// Robotic Ball Arbiter - HTTP edge
//
// Exposes the arbitration engine over JSON routes and an SSE lifecycle stream,
// and ships a simulated device so the loop can run without hardware.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
