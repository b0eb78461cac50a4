//! Interactive SMB2 share enumeration client
//!
//! The core is [`session::ClientSession`], a small state machine that tracks
//! authentication and owns the protocol session handle. Around it sit a TCP
//! transport, an SMB2 client with NTLMv2 authentication, DCE/RPC over named
//! pipes for SRVSVC share enumeration, and a line-oriented [`shell`].

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod dcerpc;
pub mod error;
pub mod netbios;
pub mod protocol;
pub mod session;
pub mod shell;
pub mod transport;

#[cfg(test)]
mod e2e_tests;

pub use error::{Error, Result};
