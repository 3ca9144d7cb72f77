use std::future::Future;

use crate::{ClientError, FragmentStream, ProviderInfo};

/// A client for one LLM provider.
///
/// Each request carries only the new user message. Providers that need
/// conversation context keep it themselves, and drop it when
/// [`LlmClient::purge_history`] is called.
///
/// Clients may be shared across tasks; the futures they return must not
/// borrow from the client.
pub trait LlmClient: Send + Sync {
    /// The error type that may be returned by the client.
    type Error: ClientError;

    /// The fragment stream type for streaming requests.
    type Stream: FragmentStream<Error = Self::Error>;

    /// Returns the description of this client's provider.
    fn provider(&self) -> &ProviderInfo;

    /// Sends a message and returns a lazy sequence of response fragments.
    ///
    /// Fails if the request cannot be initiated. The returned stream may
    /// itself fail later.
    fn send_streaming(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send + 'static;

    /// Sends a message and waits for the complete response.
    fn send_buffered(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'static;

    /// Asks the provider to forget the conversation so far.
    ///
    /// This is best effort and never fails. Providers without any notion of
    /// history simply do nothing, which is the default.
    fn purge_history(&self) {}
}
