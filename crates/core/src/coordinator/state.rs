use std::fmt::{self, Debug};
use std::mem;

use helflinq_actor::{Actor, Message};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::CoordinatorState;
use super::exchange::{
    Exchange, ExchangeId, ExchangeParams, Outcome, run_exchange,
};
use crate::client::AnyClient;
use crate::transcript::{EntryId, TranscriptEntry};

impl CoordinatorState {
    fn submit(&mut self, text: String, handle: &Actor<Self>) {
        if self.current.is_some() {
            // One exchange at a time. The input is picked up again when the
            // current exchange settles.
            debug!("exchange in flight, queueing input");
            self.pending_inputs.push_back(text);
            return;
        }
        self.start_exchange(text, handle);
    }

    fn start_exchange(&mut self, text: String, handle: &Actor<Self>) {
        let entry_id = EntryId::from_raw(self.next_entry_id);
        self.next_entry_id += 1;
        let exchange_id = ExchangeId::new(self.next_exchange_id);
        self.next_exchange_id += 1;

        let provider = self.client.provider();
        let kind = provider.kind;
        let entry = TranscriptEntry::pending(entry_id, text.as_str())
            .with_response_image(provider.image_name.as_str());
        if let Err(err) = self.store.append(entry) {
            error!("failed to append entry: {err}");
            return;
        }

        let token = CancellationToken::new();
        self.current = Some(Exchange {
            id: exchange_id,
            entry_id,
            kind,
            token: token.clone(),
            accumulated: String::new(),
        });

        let params = ExchangeParams {
            id: exchange_id,
            client: self.client.clone(),
            kind,
            text,
            token,
            retry_policy: self.retry_policy,
            handle: handle.clone(),
        };
        tokio::spawn(run_exchange(params).instrument(debug_span!(
            "exchange",
            id = %exchange_id,
            entry = %entry_id
        )));
    }

    fn apply_fragment(&mut self, exchange_id: ExchangeId, fragment: String) {
        let Some(exchange) = self
            .current
            .as_mut()
            .filter(|e| e.id == exchange_id && !e.is_cancelled())
        else {
            trace!("ignoring fragment of stale exchange {exchange_id}");
            return;
        };
        exchange.accumulated.push_str(&fragment);
        let text = exchange.accumulated.trim().to_owned();
        let entry_id = exchange.entry_id;

        self.update_tail(entry_id, |entry| entry.set_response_text(text));
    }

    fn settle(
        &mut self,
        exchange_id: ExchangeId,
        outcome: Outcome,
        handle: &Actor<Self>,
    ) {
        let Some(exchange) = self.current.take_if(|e| e.id == exchange_id)
        else {
            trace!("ignoring outcome of stale exchange {exchange_id}");
            return;
        };
        let outcome = if exchange.is_cancelled() {
            Outcome::Cancelled
        } else {
            outcome
        };
        let Exchange {
            entry_id,
            accumulated,
            ..
        } = exchange;

        let speak = !matches!(outcome, Outcome::Cancelled);
        let mut spoken = None;
        self.update_tail(entry_id, |entry| {
            match outcome {
                Outcome::Completed(Some(text)) => entry.set_response_text(text),
                Outcome::Completed(None) => {
                    entry.set_response_text(accumulated.trim().to_owned())
                }
                Outcome::Failed(failure) => {
                    info!("exchange failed: {failure}");
                    entry.set_error(failure.message);
                }
                Outcome::Cancelled => debug!("exchange cancelled"),
            }
            entry.finish();
            if speak && !entry.response_content().is_empty() {
                spoken = Some(entry.response_text().into_owned());
            }
        });

        if let (Some(text), Some(speaker)) = (spoken, &self.speaker) {
            speaker.stop_speaking();
            speaker.speak(&text);
        }

        self.process_next_input(handle);
    }

    fn retry(&mut self, id: EntryId, handle: &Actor<Self>) {
        if self.current.as_ref().is_some_and(|e| e.entry_id == id) {
            debug!("entry {id} is still being answered, not retrying");
            return;
        }
        let Some(entry) = self.store.remove(id) else {
            debug!("entry {id} is gone, nothing to retry");
            return;
        };
        self.submit(entry.send_content().to_owned(), handle);
    }

    fn cancel(&mut self) {
        match &self.current {
            Some(exchange) => {
                debug!("cancelling exchange {}", exchange.id);
                exchange.token.cancel();
            }
            None => trace!("nothing to cancel"),
        }
    }

    fn clear_all(&mut self) {
        if let Some(speaker) = &self.speaker {
            speaker.stop_speaking();
        }
        self.client.purge_history();
        self.reset();
    }

    fn switch_client(&mut self, client: AnyClient) {
        info!("switching to {}", client.provider().display_name);
        self.client = client;
        self.reset();
    }

    /// Detaches the exchange in flight, drops queued inputs and empties the
    /// transcript.
    fn reset(&mut self) {
        let detached = self.current.take();
        if let Some(exchange) = &detached {
            debug!("detaching exchange {}", exchange.id);
            exchange.token.cancel();
        }
        self.pending_inputs.clear();
        self.store.clear();
        if detached.is_some() {
            self.become_idle();
        }
    }

    fn process_next_input(&mut self, handle: &Actor<Self>) {
        if self.current.is_some() {
            return;
        }
        match self.pending_inputs.pop_front() {
            Some(input) => self.start_exchange(input, handle),
            None => self.become_idle(),
        }
    }

    fn become_idle(&mut self) {
        if let Some(on_idle) = &self.on_idle {
            on_idle();
        }
        for waiter in mem::take(&mut self.idle_waiters) {
            waiter.send(()).ok();
        }
    }

    fn wait_idle(&mut self, reply: oneshot::Sender<()>) {
        if self.current.is_none() && self.pending_inputs.is_empty() {
            reply.send(()).ok();
        } else {
            self.idle_waiters.push(reply);
        }
    }

    /// Publishes a modified copy of the tail entry.
    fn update_tail(
        &mut self,
        entry_id: EntryId,
        f: impl FnOnce(&mut TranscriptEntry),
    ) {
        let Some(mut entry) =
            self.store.last().filter(|e| e.id() == entry_id).cloned()
        else {
            warn!("entry {entry_id} is no longer at the tail");
            return;
        };
        f(&mut entry);
        if let Err(err) = self.store.replace_tail(entry) {
            error!("failed to update entry: {err}");
        }
    }
}

#[derive(Debug)]
pub struct Submit(pub String);

impl Message<CoordinatorState> for Submit {
    fn handle(self, state: &mut CoordinatorState, handle: &Actor<CoordinatorState>) {
        state.submit(self.0, handle);
    }
}

#[derive(Debug)]
pub struct Retry(pub EntryId);

impl Message<CoordinatorState> for Retry {
    fn handle(self, state: &mut CoordinatorState, handle: &Actor<CoordinatorState>) {
        state.retry(self.0, handle);
    }
}

#[derive(Debug)]
pub struct Cancel;

impl Message<CoordinatorState> for Cancel {
    #[inline]
    fn handle(self, state: &mut CoordinatorState, _handle: &Actor<CoordinatorState>) {
        state.cancel();
    }
}

#[derive(Debug)]
pub struct ClearAll;

impl Message<CoordinatorState> for ClearAll {
    #[inline]
    fn handle(self, state: &mut CoordinatorState, _handle: &Actor<CoordinatorState>) {
        state.clear_all();
    }
}

#[derive(Debug)]
pub struct SwitchClient(pub AnyClient);

impl Message<CoordinatorState> for SwitchClient {
    #[inline]
    fn handle(self, state: &mut CoordinatorState, _handle: &Actor<CoordinatorState>) {
        state.switch_client(self.0);
    }
}

#[derive(Debug)]
pub struct WaitIdle(pub oneshot::Sender<()>);

impl Message<CoordinatorState> for WaitIdle {
    #[inline]
    fn handle(self, state: &mut CoordinatorState, _handle: &Actor<CoordinatorState>) {
        state.wait_idle(self.0);
    }
}

pub enum ExchangeEventKind {
    Fragment(String),
    Settled(Outcome),
}

/// Posted by an exchange task.
pub struct ExchangeEvent {
    exchange: ExchangeId,
    kind: ExchangeEventKind,
}

impl ExchangeEvent {
    #[inline]
    pub fn fragment(exchange: ExchangeId, fragment: String) -> Self {
        Self {
            exchange,
            kind: ExchangeEventKind::Fragment(fragment),
        }
    }

    #[inline]
    pub fn settled(exchange: ExchangeId, outcome: Outcome) -> Self {
        Self {
            exchange,
            kind: ExchangeEventKind::Settled(outcome),
        }
    }
}

impl Debug for ExchangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ExchangeEvent");
        s.field("exchange", &self.exchange);
        match &self.kind {
            ExchangeEventKind::Fragment(fragment) => {
                s.field("fragment_len", &fragment.len())
            }
            ExchangeEventKind::Settled(outcome) => s.field("outcome", outcome),
        };
        s.finish()
    }
}

impl Message<CoordinatorState> for ExchangeEvent {
    fn handle(self, state: &mut CoordinatorState, handle: &Actor<CoordinatorState>) {
        match self.kind {
            ExchangeEventKind::Fragment(fragment) => {
                state.apply_fragment(self.exchange, fragment)
            }
            ExchangeEventKind::Settled(outcome) => {
                state.settle(self.exchange, outcome, handle)
            }
        }
    }
}
