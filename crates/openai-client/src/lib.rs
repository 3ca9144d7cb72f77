//! A streaming LLM client for OpenAI-compatible chat completion APIs.

#[macro_use]
extern crate tracing;

mod config;
mod history;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use helflinq_model::{ClientError, ErrorKind, LlmClient, ProviderInfo, ProviderKind};
use mime::Mime;
use reqwest::{Client, RequestBuilder, Response, header};

pub use config::{OpenAIConfig, OpenAIConfigBuilder};
use history::History;
use io::{Chunks, Sse};
use proto::ChatCompletion;
pub use response::OpenAIStream;
use response::Recorder;

/// Error type for [`OpenAIClient`].
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

/// Client for OpenAI-compatible chat completion APIs.
///
/// The client keeps the conversation so far and sends it along with each
/// new message. Clones share the conversation.
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    config: Arc<OpenAIConfig>,
    history: Arc<Mutex<History>>,
    info: ProviderInfo,
}

impl OpenAIClient {
    /// Creates a new `OpenAIClient` with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let history =
            History::new(config.system_prompt.clone(), config.history_budget);
        Ok(Self {
            client,
            config: Arc::new(config),
            history: Arc::new(Mutex::new(history)),
            info: ProviderInfo::new(
                ProviderKind::Streaming,
                "OpenAI ChatGPT",
                "openai",
            )
            .with_navigation_title("Back"),
        })
    }

    fn post(&self, text: &str, stream: bool) -> RequestBuilder {
        let messages = self.history().messages_for(text);
        let req = proto::create_request(messages, stream, &self.config);
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        self.client
            .post(self.config.endpoint())
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::ACCEPT, accept)
            .json(&req)
    }

    #[inline]
    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for OpenAIClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LlmClient for OpenAIClient {
    type Error = Error;
    type Stream = OpenAIStream;

    fn provider(&self) -> &ProviderInfo {
        &self.info
    }

    fn send_streaming(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send + 'static
    {
        let resp_fut = self.post(text, true).send();
        let recorder = Recorder {
            history: Arc::clone(&self.history),
            user_text: text.to_owned(),
        };

        async move {
            let resp = check_status(resp_fut.await?).await?;

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .is_some_and(|m: Mime| m.subtype() == "event-stream");
            if !is_event_stream {
                return Err(Error::new(
                    format!("unexpected content type: {content_type:?}"),
                    ErrorKind::Provider,
                ));
            }

            debug!("response stream opened");
            let sse = Sse::new(Chunks::from_response(resp));
            Ok(OpenAIStream::from_sse(sse, Some(recorder)))
        }
    }

    fn send_buffered(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'static
    {
        let resp_fut = self.post(text, false).send();
        let history = Arc::clone(&self.history);
        let user_text = text.to_owned();

        async move {
            let resp = check_status(resp_fut.await?).await?;
            let completion: ChatCompletion = resp.json().await?;
            let content = completion
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| {
                    Error::new("response has no message", ErrorKind::Provider)
                })?;

            history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(user_text, content.clone());
            Ok(content)
        }
    }

    fn purge_history(&self) {
        debug!("purging conversation history");
        self.history().clear();
    }
}

/// Turns an unsuccessful response into an error carrying the server's
/// explanation.
async fn check_status(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = proto::error_message(&body);
    warn!("request rejected with {status}: {message}");
    Err(Error::new(
        format!("{status}: {message}"),
        ErrorKind::Provider,
    ))
}
