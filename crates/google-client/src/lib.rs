//! A buffered LLM client for Google's `generateContent` API.

#[macro_use]
extern crate tracing;

mod config;
mod proto;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use helflinq_model::{
    ClientError, ErrorKind, FragmentStream, LlmClient, ProviderInfo, ProviderKind,
};
use reqwest::Client;

pub use config::{GoogleConfig, GoogleConfigBuilder};
use proto::{Content, GenerateContentRequest, GenerateContentResponse};

/// Error type for [`GoogleClient`].
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

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ClientError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_decode() {
            ErrorKind::Provider
        } else {
            ErrorKind::Transport
        };
        Self::new(err.to_string(), kind)
    }
}

/// A stream that delivers a complete response as a single fragment.
///
/// The API answers in one piece, so streaming requests are served this way.
pub struct WholeResponse(Option<String>);

impl FragmentStream for WholeResponse {
    type Error = Error;

    fn poll_next_fragment(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<String>, Self::Error>> {
        Poll::Ready(Ok(self.get_mut().0.take()))
    }
}

#[derive(Debug, Default)]
struct History {
    exchanges: VecDeque<(String, String)>,
}

impl History {
    fn contents_for(&self, text: &str) -> Vec<Content> {
        let mut contents = Vec::with_capacity(self.exchanges.len() * 2 + 1);
        for (user, model) in &self.exchanges {
            contents.push(Content::text("user", user));
            contents.push(Content::text("model", model));
        }
        contents.push(Content::text("user", text));
        contents
    }

    fn record(&mut self, user: String, model: String, limit: usize) {
        self.exchanges.push_back((user, model));
        while self.exchanges.len() > limit {
            self.exchanges.pop_front();
        }
    }
}

/// Client for Google's generative language API.
///
/// Responses arrive in one piece. The client keeps the conversation so far
/// and sends it along with each new message. Clones share the
/// conversation.
#[derive(Clone)]
pub struct GoogleClient {
    client: Client,
    config: Arc<GoogleConfig>,
    history: Arc<Mutex<History>>,
    info: ProviderInfo,
}

impl GoogleClient {
    /// Creates a new `GoogleClient` with the given configuration.
    pub fn new(config: GoogleConfig) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
            history: Default::default(),
            info: ProviderInfo::new(ProviderKind::Buffered, "Google PaLM", "palm")
                .with_navigation_title("XCA PaLMChat"),
        })
    }

    #[inline]
    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generate(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<String, Error>> + Send + 'static {
        let request = GenerateContentRequest {
            contents: self.history().contents_for(text),
        };
        let resp_fut = self
            .client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send();
        let history = Arc::clone(&self.history);
        let limit = self.config.history_limit;
        let user_text = text.to_owned();

        async move {
            let resp = resp_fut.await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let message = proto::error_message(&body);
                warn!("request rejected with {status}: {message}");
                return Err(Error::new(
                    format!("{status}: {message}"),
                    ErrorKind::Provider,
                ));
            }

            let resp: GenerateContentResponse = resp.json().await?;
            let text = resp
                .into_text()
                .map_err(|message| Error::new(message, ErrorKind::Provider))?;
            trace!("got {} bytes of response", text.len());

            history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(user_text, text.clone(), limit);
            Ok(text)
        }
    }
}

impl Debug for GoogleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LlmClient for GoogleClient {
    type Error = Error;
    type Stream = WholeResponse;

    fn provider(&self) -> &ProviderInfo {
        &self.info
    }

    fn send_streaming(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send + 'static
    {
        let fut = self.generate(text);
        async move { fut.await.map(|text| WholeResponse(Some(text))) }
    }

    fn send_buffered(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'static
    {
        self.generate(text)
    }

    fn purge_history(&self) {
        debug!("purging conversation history");
        self.history().exchanges.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;

    use helflinq_model::FragmentStreamExt;

    use super::*;

    fn client() -> GoogleClient {
        GoogleClient::new(GoogleConfigBuilder::with_api_key("key").build())
            .unwrap()
    }

    #[test]
    fn test_provider_info() {
        let client = client();
        let info = client.provider();
        assert_eq!(info.kind, ProviderKind::Buffered);
        assert_eq!(info.display_name, "Google PaLM");
        assert_eq!(info.image_name, "palm");
        assert_eq!(info.navigation_title, "XCA PaLMChat");
    }

    #[test]
    fn test_history_is_bounded_and_purged() {
        let client = client();
        {
            let mut history = client.history();
            history.record("a".to_owned(), "A".to_owned(), 2);
            history.record("b".to_owned(), "B".to_owned(), 2);
            history.record("c".to_owned(), "C".to_owned(), 2);
        }
        let contents = client.history().contents_for("d");
        assert_eq!(
            contents,
            [
                Content::text("user", "b"),
                Content::text("model", "B"),
                Content::text("user", "c"),
                Content::text("model", "C"),
                Content::text("user", "d"),
            ]
        );

        client.purge_history();
        assert_eq!(client.history().contents_for("e").len(), 1);
    }

    #[tokio::test]
    async fn test_whole_response_stream() {
        let mut stream = pin!(WholeResponse(Some("all at once".to_owned())));
        assert_eq!(
            stream.as_mut().next_fragment().await.unwrap().as_deref(),
            Some("all at once")
        );
        assert_eq!(stream.as_mut().next_fragment().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let config = GoogleConfigBuilder::with_api_key("key")
            .with_base_url("http://127.0.0.1:9")
            .build();
        let client = GoogleClient::new(config).unwrap();
        let err = client.send_buffered("Hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!err.message().is_empty());
        assert_eq!(err.to_string(), err.message());
    }
}
