mod builder;
mod exchange;
mod state;
#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;

use helflinq_actor::{Actor, ActorDeadError};
use helflinq_model::ProviderInfo;
use tokio::sync::oneshot;

use crate::client::AnyClient;
use crate::retry::RetryPolicy;
use crate::speech::Speaker;
use crate::store::TranscriptStore;
use crate::transcript::{EntryId, TranscriptEntry};
pub use builder::CoordinatorBuilder;
use exchange::Exchange;
use state::{Cancel, ClearAll, Retry, Submit, SwitchClient, WaitIdle};

/// What the coordinator is currently doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Stage {
    /// No exchange in flight.
    #[default]
    Idle,
    /// Consuming fragments from a streaming provider.
    Streaming,
    /// Waiting for a complete response from a buffered provider.
    Waiting,
}

pub(crate) struct CoordinatorState {
    client: AnyClient,
    store: TranscriptStore,
    retry_policy: RetryPolicy,
    current: Option<Exchange>,
    pending_inputs: VecDeque<String>,
    next_entry_id: u64,
    next_exchange_id: u64,
    speaker: Option<Arc<dyn Speaker>>,
    on_idle: Option<Box<dyn Fn() + Send + Sync>>,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

/// Drives exchanges with an LLM client and keeps the transcript.
///
/// The coordinator runs as an actor that owns the transcript store, so
/// every store mutation happens on one task, in the order the intents and
/// response fragments arrived. Methods on this type only post messages and
/// return immediately; the effects become visible to store observers
/// shortly after.
///
/// Only one exchange runs at a time. Messages submitted while an exchange
/// is in flight are queued and sent one after another.
///
/// Dropping the last handle stops the coordinator.
#[derive(Clone)]
pub struct Coordinator {
    handle: Actor<CoordinatorState>,
}

impl Coordinator {
    /// Sends a user message. The message gets its transcript entry as soon
    /// as the coordinator gets to it.
    #[inline]
    pub fn submit<S: Into<String>>(&self, text: S) -> Result<(), ActorDeadError> {
        self.handle.send(Submit(text.into()))
    }

    /// Removes the entry with `id` and sends its message again.
    ///
    /// Does nothing if there is no such entry, or if that entry is the one
    /// still being answered.
    #[inline]
    pub fn retry(&self, id: EntryId) -> Result<(), ActorDeadError> {
        self.handle.send(Retry(id))
    }

    /// Asks the exchange in flight to stop. The entry keeps what it has
    /// received so far and is not marked as failed.
    #[inline]
    pub fn cancel(&self) -> Result<(), ActorDeadError> {
        self.handle.send(Cancel)
    }

    /// Stops speech, asks the client to drop its history, abandons the
    /// exchange in flight and queued messages, and empties the transcript.
    #[inline]
    pub fn clear_all(&self) -> Result<(), ActorDeadError> {
        self.handle.send(ClearAll)
    }

    /// Replaces the client. This abandons the exchange in flight and queued
    /// messages, and empties the transcript.
    #[inline]
    pub fn switch_client(&self, client: AnyClient) -> Result<(), ActorDeadError> {
        self.handle.send(SwitchClient(client))
    }

    /// Returns a copy of the transcript as of now.
    pub async fn snapshot(&self) -> Result<Vec<TranscriptEntry>, ActorDeadError> {
        self.handle.ask(|state| state.store.entries().to_vec()).await
    }

    /// Returns the current stage.
    pub async fn stage(&self) -> Result<Stage, ActorDeadError> {
        self.handle
            .ask(|state| state.current.as_ref().map_or(Stage::Idle, |e| e.stage()))
            .await
    }

    /// Returns the description of the bound client's provider.
    pub async fn provider(&self) -> Result<ProviderInfo, ActorDeadError> {
        self.handle.ask(|state| state.client.provider().clone()).await
    }

    /// Returns the number of messages waiting for the current exchange to
    /// finish.
    pub async fn queued_inputs(&self) -> Result<usize, ActorDeadError> {
        self.handle.ask(|state| state.pending_inputs.len()).await
    }

    /// Waits until no exchange is in flight and no message is queued.
    pub async fn wait_idle(&self) -> Result<(), ActorDeadError> {
        let (reply, reply_rx) = oneshot::channel();
        self.handle.send(WaitIdle(reply))?;
        reply_rx.await.map_err(|_| ActorDeadError)
    }

    /// Stops the coordinator. Exchanges in flight are abandoned.
    #[inline]
    pub fn shutdown(&self) {
        self.handle.try_kill();
    }
}

impl Coordinator {
    fn spawn_from_builder(builder: CoordinatorBuilder) -> Self {
        let CoordinatorBuilder {
            client,
            retry_policy,
            speaker,
            on_idle,
            observers,
        } = builder;

        let mut store = TranscriptStore::new();
        for observer in observers {
            store.subscribe(observer);
        }

        let state = CoordinatorState {
            client,
            store,
            retry_policy,
            current: None,
            pending_inputs: Default::default(),
            next_entry_id: 1,
            next_exchange_id: 1,
            speaker,
            on_idle,
            idle_waiters: vec![],
        };
        let handle = Actor::spawn(state, Some("coordinator"));
        Self { handle }
    }
}
