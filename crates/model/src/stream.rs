use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::ClientError;

/// A lazy sequence of response text fragments.
pub trait FragmentStream: Send + 'static {
    /// The error type that may be returned mid-iteration.
    type Error: ClientError;

    /// Attempts to pull out the next fragment.
    ///
    /// # Return value
    ///
    /// - `Poll::Pending` means the next fragment has not arrived yet.
    ///   Implementations will ensure that the current task is notified
    ///   when it may be ready.
    /// - `Poll::Ready(Ok(Some(fragment)))` delivers a fragment, and more may
    ///   follow on subsequent calls.
    /// - `Poll::Ready(Ok(None))` means the response has completed.
    /// - `Poll::Ready(Err(error))` means the response broke down. Fragments
    ///   delivered before the error are still valid.
    ///
    /// Calling this method after completion or after an error should return
    /// `Ok(None)`.
    fn poll_next_fragment(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<String>, Self::Error>>;
}

/// Convenience methods for [`FragmentStream`].
pub trait FragmentStreamExt: FragmentStream {
    /// Waits for the next fragment.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe as long as the implementation of
    /// `poll_next_fragment` is: dropping the returned future never loses a
    /// fragment that has not been returned.
    fn next_fragment(
        self: Pin<&mut Self>,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send
    where
        Self: Sized,
    {
        let mut this = self;
        poll_fn(move |cx| this.as_mut().poll_next_fragment(cx))
    }
}

impl<S: FragmentStream> FragmentStreamExt for S {}
