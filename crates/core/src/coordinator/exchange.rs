use std::fmt::{self, Display};

use helflinq_actor::Actor;
use helflinq_model::ProviderKind;
use tokio::select;
use tokio_util::sync::CancellationToken;

use super::state::ExchangeEvent;
use super::{CoordinatorState, Stage};
use crate::client::{AnyClient, ClientFailure};
use crate::retry::RetryPolicy;
use crate::transcript::EntryId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeId(u64);

impl ExchangeId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// How an exchange ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The response is complete. Buffered exchanges carry the full text,
    /// streaming ones already delivered it as fragments.
    Completed(Option<String>),
    /// The client failed.
    Failed(ClientFailure),
    /// The exchange observed a cancellation request.
    Cancelled,
}

/// Bookkeeping for the exchange in flight.
pub struct Exchange {
    pub id: ExchangeId,
    pub entry_id: EntryId,
    pub kind: ProviderKind,
    pub token: CancellationToken,
    pub accumulated: String,
}

impl Exchange {
    #[inline]
    pub fn stage(&self) -> Stage {
        match self.kind {
            ProviderKind::Streaming => Stage::Streaming,
            ProviderKind::Buffered => Stage::Waiting,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct ExchangeParams {
    pub id: ExchangeId,
    pub client: AnyClient,
    pub kind: ProviderKind,
    pub text: String,
    pub token: CancellationToken,
    pub retry_policy: RetryPolicy,
    pub handle: Actor<CoordinatorState>,
}

/// Runs one exchange and reports fragments and the outcome back to the
/// coordinator.
pub async fn run_exchange(params: ExchangeParams) {
    let ExchangeParams {
        id,
        client,
        kind,
        text,
        token,
        retry_policy,
        handle,
    } = params;

    let outcome = match kind {
        ProviderKind::Streaming => {
            receive_stream(&client, &text, &token, &retry_policy, |fragment| {
                handle.send(ExchangeEvent::fragment(id, fragment)).is_ok()
            })
            .await
        }
        ProviderKind::Buffered => {
            receive_buffered(&client, &text, &token, &retry_policy).await
        }
    };
    debug!("exchange {id} finished: {outcome:?}");

    if handle.send(ExchangeEvent::settled(id, outcome)).is_err() {
        debug!("coordinator is gone, dropping outcome");
    }
}

async fn receive_stream(
    client: &AnyClient,
    text: &str,
    token: &CancellationToken,
    retry_policy: &RetryPolicy,
    mut on_fragment: impl FnMut(String) -> bool,
) -> Outcome {
    let opened = select! {
        biased;

        _ = token.cancelled() => return Outcome::Cancelled,
        opened = retry_policy.run(token, || client.send_streaming(text)) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(failure) => return Outcome::Failed(failure),
    };

    let mut count = 0usize;
    loop {
        let next = select! {
            biased;

            _ = token.cancelled() => return Outcome::Cancelled,
            next = stream.next() => next,
        };
        match next {
            Ok(Some(fragment)) => {
                count += 1;
                trace!("fragment {count}: {fragment:?}");
                if !on_fragment(fragment) {
                    return Outcome::Cancelled;
                }
            }
            Ok(None) => return Outcome::Completed(None),
            Err(failure) => {
                warn!("stream broke down after {count} fragments: {failure}");
                return Outcome::Failed(failure);
            }
        }
    }
}

async fn receive_buffered(
    client: &AnyClient,
    text: &str,
    token: &CancellationToken,
    retry_policy: &RetryPolicy,
) -> Outcome {
    // A request that has been sent cannot be taken back, so cancellation is
    // only checked once it returns. Waits between attempts end early.
    let result = retry_policy.run(token, || client.send_buffered(text)).await;
    if token.is_cancelled() {
        return Outcome::Cancelled;
    }
    match result {
        Ok(text) => Outcome::Completed(Some(text)),
        Err(failure) => Outcome::Failed(failure),
    }
}
