use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};

use helflinq_model::{ErrorKind, FragmentStream};
use pin_project_lite::pin_project;

use crate::Error;
use crate::history::History;
use crate::io::{Sse, SseError};
use crate::proto::ChatCompletionChunk;

struct PartialState {
    sse: Sse,
    content: String,
    finished: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextFragment = Result<(Option<String>, PartialState), Error>;

/// Where a completed exchange is written back to.
pub struct Recorder {
    pub history: Arc<Mutex<History>>,
    pub user_text: String,
}

pin_project! {
    /// Fragments of a streamed chat completion.
    ///
    /// The exchange is added to the client's history once the stream has
    /// been read to the end.
    pub struct OpenAIStream {
        next_fragment_fut: Option<PinnedFuture<NextFragment>>,
        recorder: Option<Recorder>,
    }
}

impl OpenAIStream {
    #[inline]
    pub(crate) fn from_sse(sse: Sse, recorder: Option<Recorder>) -> Self {
        let partial_state = PartialState {
            sse,
            content: String::new(),
            finished: false,
        };
        Self {
            next_fragment_fut: Some(Box::pin(next_fragment(partial_state))),
            recorder,
        }
    }
}

impl FragmentStream for OpenAIStream {
    type Error = crate::Error;

    fn poll_next_fragment(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<String>, Self::Error>> {
        let this = self.project();
        let Some(next_fragment_fut) = this.next_fragment_fut else {
            return Poll::Ready(Ok(None));
        };
        let (fragment, partial_state) =
            match ready!(next_fragment_fut.as_mut().poll(cx)) {
                Ok((Some(fragment), partial_state)) => (fragment, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_fragment_fut = None;
                    if let Some(Recorder {
                        history,
                        user_text,
                    }) = this.recorder.take()
                    {
                        history
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .record(user_text, partial_state.content);
                    }
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_fragment_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        *this.next_fragment_fut =
            Some(Box::pin(next_fragment(partial_state)));
        Poll::Ready(Ok(Some(fragment)))
    }
}

async fn next_fragment(mut partial_state: PartialState) -> NextFragment {
    if partial_state.finished {
        return Ok((None, partial_state));
    }

    loop {
        let event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return Err(Error::new(
                    "stream ended before the response was complete",
                    ErrorKind::Transport,
                ));
            }
            Err(err) => {
                let kind = match &err {
                    SseError::Chunks(_) => ErrorKind::Transport,
                    SseError::InvalidPayload => ErrorKind::Provider,
                };
                return Err(Error::new(err.to_string(), kind));
            }
        };
        trace!("got sse event: {event}");
        if event == "[DONE]" {
            return Ok((None, partial_state));
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&event)
            .map_err(|err| {
                Error::new(format!("malformed chunk: {err}"), ErrorKind::Provider)
            })?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            // Usage reports come without choices.
            continue;
        };
        if choice.finish_reason.is_some() {
            partial_state.finished = true;
        }

        match choice.delta.content {
            Some(content) if !content.is_empty() => {
                partial_state.content.push_str(&content);
                return Ok((Some(content), partial_state));
            }
            _ if partial_state.finished => return Ok((None, partial_state)),
            _ => continue,
        }
    }
}
