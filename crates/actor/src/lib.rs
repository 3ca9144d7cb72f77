//! A lightweight actor runtime.
//!
//! An actor owns a piece of state and processes messages against it one at
//! a time, in the order they were sent. This gives the owner of the state a
//! single-writer discipline without locks: every mutation is a message, and
//! no message observes another one half-applied.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod handle;
mod mailbox;
mod scheduler;

pub use error::ActorDeadError;
pub use handle::Actor;
pub use mailbox::Message;
