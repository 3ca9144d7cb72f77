//! Core logic of the chat client: the transcript, and the coordinator that
//! drives exchanges with an LLM client and keeps the transcript up to date.
//!
//! Presentation layers build a [`Coordinator`], post user intents to it and
//! observe the transcript through the callbacks registered on the
//! [`CoordinatorBuilder`].

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod client;
mod coordinator;
mod retry;
mod speech;
mod store;
mod transcript;

pub use client::AnyClient;
pub use coordinator::{Coordinator, CoordinatorBuilder, Stage};
pub use retry::RetryPolicy;
pub use speech::Speaker;
pub use store::{StoreChange, StoreError, TranscriptStore};
pub use transcript::{
    EntryId, ResponseContent, Segment, SegmentStyle, TranscriptEntry,
};
