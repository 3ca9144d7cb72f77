use std::sync::Arc;

use helflinq_model::ErrorKind;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// A failure injected into a scripted reply.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetFailure {
    /// The kind reported by the error.
    pub kind: ErrorKind,
    /// The message reported by the error.
    pub message: String,
}

impl PresetFailure {
    /// Creates a failure of the given kind.
    #[inline]
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// How the scripted client answers one request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PresetReply {
    /// Fragments delivered in order. Buffered requests get them joined.
    pub fragments: Vec<String>,
    /// If set, the reply breaks down after all fragments were delivered.
    /// Buffered requests fail with it instead of returning text.
    #[serde(default)]
    pub failure: Option<PresetFailure>,
    /// If set, the request fails to start this many times before it is
    /// accepted. Each failed attempt reports a transport error.
    #[serde(default)]
    pub initiation_failures: Option<u64>,
    #[serde(skip)]
    gate: Option<Arc<Notify>>,
}

/// Releases a gated reply, see [`PresetReply::gated`].
#[derive(Clone, Debug)]
pub struct Gate(Arc<Notify>);

impl Gate {
    /// Lets the gated reply finish. Opening a gate before the reply
    /// reaches it is fine, the permit is kept.
    #[inline]
    pub fn open(&self) {
        self.0.notify_one();
    }
}

impl PresetReply {
    /// Creates a reply delivering `fragments`.
    pub fn with_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Makes the reply break down after its fragments.
    #[inline]
    pub fn with_failure(mut self, failure: PresetFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Makes the request fail to start `times` times first.
    #[inline]
    pub fn with_initiation_failures(mut self, times: u64) -> Self {
        self.initiation_failures = Some(times);
        self
    }

    /// Holds the reply until the returned gate is opened.
    ///
    /// Streaming replies deliver their fragments and then wait before
    /// finishing. Buffered replies wait before returning anything. Dropping
    /// the gate without opening it keeps the reply waiting forever.
    pub fn gated(mut self) -> (Self, Gate) {
        let notify = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&notify));
        (self, Gate(notify))
    }

    #[inline]
    pub(crate) fn take_gate(&mut self) -> Option<Arc<Notify>> {
        self.gate.take()
    }

    pub(crate) fn joined_text(&self) -> String {
        self.fragments.concat()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_load_from_json() {
        let reply: PresetReply = serde_json::from_value(json!({
            "fragments": ["Hel", "lo"],
            "failure": { "kind": "transport", "message": "connection reset" },
        }))
        .unwrap();
        assert_eq!(reply.joined_text(), "Hello");
        assert_eq!(
            reply.failure,
            Some(PresetFailure::new(ErrorKind::Transport, "connection reset"))
        );
        assert_eq!(reply.initiation_failures, None);
    }
}
