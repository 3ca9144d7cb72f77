//! A terminal chat client for hosted LLMs.
//!
//! The crate includes a CLI tool for chatting in the terminal. The pieces it
//! is assembled from, client configuration and a speech stub, can also be
//! used as a library.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod speech;

pub use config::{ClientConfig, ClientKind, ConfigError};
pub use speech::LoggingSpeaker;

/// Re-exports of [`helflinq_core`] crate.
pub mod core {
    pub use helflinq_core::*;
}
