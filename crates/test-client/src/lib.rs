//! A local fake LLM client for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use helflinq_model::{
    ClientError, ErrorKind, FragmentStream, LlmClient, ProviderInfo,
    ProviderKind,
};
use tokio::sync::Notify;
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl From<PresetFailure> for Error {
    #[inline]
    fn from(failure: PresetFailure) -> Self {
        Self::new(failure.message, failure.kind)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {}

impl ClientError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

const REPLY_DELAY: Duration = Duration::from_millis(1);

type GateWait = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Fragment stream of a scripted reply.
pub struct ScriptedStream {
    fragments: VecDeque<String>,
    failure: Option<PresetFailure>,
    gate: Option<Arc<Notify>>,
    gate_wait: Option<GateWait>,
    sleep: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl FragmentStream for ScriptedStream {
    type Error = crate::Error;

    fn poll_next_fragment(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<String>, Self::Error>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Ok(None));
        }

        if !this.fragments.is_empty() {
            let sleep =
                this.sleep.get_or_insert_with(|| Box::pin(sleep(REPLY_DELAY)));
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
            return Poll::Ready(Ok(this.fragments.pop_front()));
        }

        if let Some(gate) = this.gate.take() {
            this.gate_wait = Some(Box::pin(async move {
                gate.notified().await;
            }));
        }
        if let Some(gate_wait) = &mut this.gate_wait {
            ready!(gate_wait.as_mut().poll(cx));
            this.gate_wait = None;
        }

        this.finished = true;
        match this.failure.take() {
            Some(failure) => Poll::Ready(Err(failure.into())),
            None => Poll::Ready(Ok(None)),
        }
    }
}

/// A local fake client for testing purpose.
///
/// Replies are queued with [`ScriptedClient::push_reply`] and consumed one
/// per request, in order. A request with no reply left fails with a
/// provider error.
///
/// Clones share the script and the recorded requests, so a test can keep a
/// clone around after handing the client over.
///
/// # Note
///
/// This type is not optimized for production use. You should only use it
/// for testing.
#[derive(Clone)]
pub struct ScriptedClient {
    info: ProviderInfo,
    script: Arc<Mutex<VecDeque<PresetReply>>>,
    requests: Arc<Mutex<Vec<String>>>,
    purges: Arc<AtomicUsize>,
}

impl ScriptedClient {
    /// Creates a client of the given kind with an empty script.
    pub fn new(kind: ProviderKind) -> Self {
        let info = match kind {
            ProviderKind::Streaming => {
                ProviderInfo::new(kind, "Scripted Stream", "scripted")
            }
            ProviderKind::Buffered => {
                ProviderInfo::new(kind, "Scripted Buffer", "scripted")
            }
        };
        Self {
            info,
            script: Default::default(),
            requests: Default::default(),
            purges: Default::default(),
        }
    }

    /// Creates a streaming client.
    #[inline]
    pub fn streaming() -> Self {
        Self::new(ProviderKind::Streaming)
    }

    /// Creates a buffered client.
    #[inline]
    pub fn buffered() -> Self {
        Self::new(ProviderKind::Buffered)
    }

    /// Queues a reply for a future request.
    pub fn push_reply(&self, reply: PresetReply) {
        lock(&self.script).push_back(reply);
    }

    /// Returns the texts of all requests received so far, including
    /// attempts that failed to start.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    /// Returns how many times the history was purged.
    #[inline]
    pub fn purge_count(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    fn next_reply(&self, text: &str) -> Result<PresetReply, Error> {
        lock(&self.requests).push(text.to_owned());

        let mut script = lock(&self.script);
        let Some(front) = script.front_mut() else {
            return Err(Error::new("no reply scripted", ErrorKind::Provider));
        };
        if let Some(failures) = front.initiation_failures.as_mut() {
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::new(
                    "connection refused",
                    ErrorKind::Transport,
                ));
            }
        }
        Ok(script.pop_front().unwrap_or_default())
    }
}

impl LlmClient for ScriptedClient {
    type Error = crate::Error;
    type Stream = ScriptedStream;

    fn provider(&self) -> &ProviderInfo {
        &self.info
    }

    fn send_streaming(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send + 'static
    {
        let result = self.next_reply(text).map(|mut reply| ScriptedStream {
            gate: reply.take_gate(),
            fragments: reply.fragments.into(),
            failure: reply.failure,
            gate_wait: None,
            sleep: None,
            finished: false,
        });
        std::future::ready(result)
    }

    fn send_buffered(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'static
    {
        let reply = self.next_reply(text);
        async move {
            let mut reply = reply?;
            sleep(REPLY_DELAY).await;
            if let Some(gate) = reply.take_gate() {
                gate.notified().await;
            }
            match reply.failure.take() {
                Some(failure) => Err(failure.into()),
                None => Ok(reply.joined_text()),
            }
        }
    }

    fn purge_history(&self) {
        self.purges.fetch_add(1, Ordering::SeqCst);
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
