//! Loopback tests driving the real client stack against an in-process server

pub mod fake_server;
pub mod scenarios;

pub use fake_server::{FakeServer, ServerOptions};
