use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use helflinq_model::{
    ClientError, ErrorKind, FragmentStream, LlmClient, ProviderInfo,
};
use tracing::Instrument;

/// A client failure with the concrete error type erased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ClientFailure {
    pub(crate) kind: ErrorKind,
    pub(crate) message: String,
}

impl ClientFailure {
    /// The failure reported for a request that was not started because the
    /// exchange was cancelled.
    pub(crate) fn interrupted() -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: "request cancelled".to_owned(),
        }
    }

    fn from_client_error<E: ClientError>(err: E) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl Display for ClientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ClientFailure {}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

trait ErasedStream: Send {
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<String>, ClientFailure>>;
}

impl<S: FragmentStream> ErasedStream for S {
    #[inline]
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<String>, ClientFailure>> {
        self.poll_next_fragment(cx)
            .map_err(ClientFailure::from_client_error)
    }
}

/// A fragment stream with the concrete type erased.
pub(crate) struct AnyStream(Pin<Box<dyn ErasedStream>>);

impl AnyStream {
    /// Waits for the next fragment.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe if the underlying stream is.
    #[inline]
    pub(crate) async fn next(
        &mut self,
    ) -> Result<Option<String>, ClientFailure> {
        poll_fn(|cx| self.0.as_mut().poll_next(cx)).await
    }
}

trait ErasedClient: Send + Sync {
    fn provider(&self) -> &ProviderInfo;

    fn send_streaming(
        &self,
        text: &str,
    ) -> BoxFuture<Result<AnyStream, ClientFailure>>;

    fn send_buffered(&self, text: &str) -> BoxFuture<Result<String, ClientFailure>>;

    fn purge_history(&self);
}

impl<C: LlmClient> ErasedClient for C {
    #[inline]
    fn provider(&self) -> &ProviderInfo {
        LlmClient::provider(self)
    }

    fn send_streaming(
        &self,
        text: &str,
    ) -> BoxFuture<Result<AnyStream, ClientFailure>> {
        let fut = LlmClient::send_streaming(self, text);
        Box::pin(
            async move {
                match fut.await {
                    Ok(stream) => {
                        trace!("stream opened");
                        Ok(AnyStream(Box::pin(stream)))
                    }
                    Err(err) => {
                        error!("failed to open stream: {err:?}");
                        Err(ClientFailure::from_client_error(err))
                    }
                }
            }
            .instrument(trace_span!("client stream req")),
        )
    }

    fn send_buffered(&self, text: &str) -> BoxFuture<Result<String, ClientFailure>> {
        let fut = LlmClient::send_buffered(self, text);
        Box::pin(
            async move {
                fut.await.map_err(|err| {
                    error!("buffered request failed: {err:?}");
                    ClientFailure::from_client_error(err)
                })
            }
            .instrument(trace_span!("client buffered req")),
        )
    }

    #[inline]
    fn purge_history(&self) {
        LlmClient::purge_history(self)
    }
}

/// A wrapper around an LLM client that erases its type, so the
/// coordinator can swap providers of different types at runtime.
#[derive(Clone)]
pub struct AnyClient {
    inner: Arc<dyn ErasedClient>,
}

impl AnyClient {
    /// Wraps a client.
    #[inline]
    pub fn new<C: LlmClient + 'static>(client: C) -> Self {
        Self {
            inner: Arc::new(client),
        }
    }

    /// Returns the description of the wrapped client's provider.
    #[inline]
    pub fn provider(&self) -> &ProviderInfo {
        self.inner.provider()
    }

    #[inline]
    pub(crate) fn send_streaming(
        &self,
        text: &str,
    ) -> BoxFuture<Result<AnyStream, ClientFailure>> {
        self.inner.send_streaming(text)
    }

    #[inline]
    pub(crate) fn send_buffered(
        &self,
        text: &str,
    ) -> BoxFuture<Result<String, ClientFailure>> {
        self.inner.send_buffered(text)
    }

    /// Asks the wrapped client to forget its conversation history.
    #[inline]
    pub fn purge_history(&self) {
        self.inner.purge_history()
    }
}

impl Debug for AnyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyClient")
            .field("provider", self.provider())
            .finish_non_exhaustive()
    }
}
