//! The capability interface between the chat coordinator and LLM providers.
//!
//! A provider is anything that can answer a user message, either as a lazy
//! sequence of text fragments or as one complete text. The coordinator only
//! depends on the traits in this crate, so adding a provider never touches
//! the coordinator.
//!
//! Types in this crate don't define any behavior, they are the contract
//! that implementors should adhere to.

#![deny(missing_docs)]

mod client;
mod error;
mod info;
mod stream;

pub use client::*;
pub use error::*;
pub use info::*;
pub use stream::*;
