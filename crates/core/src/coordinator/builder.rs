use std::sync::Arc;

use helflinq_model::LlmClient;

use super::Coordinator;
use crate::client::AnyClient;
use crate::retry::RetryPolicy;
use crate::speech::Speaker;
use crate::store::{Observer, StoreChange};
use crate::transcript::TranscriptEntry;

/// [`Coordinator`] builder.
pub struct CoordinatorBuilder {
    pub(crate) client: AnyClient,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) speaker: Option<Arc<dyn Speaker>>,
    pub(crate) on_idle: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) observers: Vec<Observer>,
}

impl CoordinatorBuilder {
    /// Creates a new builder with the specified client.
    #[inline]
    pub fn with_client<C: LlmClient + 'static>(client: C) -> Self {
        Self::with_any_client(AnyClient::new(client))
    }

    /// Creates a new builder with an already type-erased client.
    #[inline]
    pub fn with_any_client(client: AnyClient) -> Self {
        Self {
            client,
            retry_policy: RetryPolicy::default(),
            speaker: None,
            on_idle: None,
            observers: vec![],
        }
    }

    /// Sets how requests that fail to start are retried.
    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Reads settled responses aloud with `speaker`.
    #[inline]
    pub fn with_speaker<S: Speaker + 'static>(mut self, speaker: S) -> Self {
        self.speaker = Some(Arc::new(speaker));
        self
    }

    /// Attaches a callback to be invoked when the coordinator becomes idle,
    /// that is, when an exchange settled and no message is queued.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Attaches a callback to be invoked after every transcript mutation.
    ///
    /// The callback runs on the coordinator's task and must not block.
    #[inline]
    pub fn on_store_change(
        mut self,
        observer: impl Fn(&StoreChange, &[TranscriptEntry]) + Send + Sync + 'static,
    ) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Builds the coordinator.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[inline]
    pub fn build(self) -> Coordinator {
        Coordinator::spawn_from_builder(self)
    }
}
