use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred while talking to a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider could not be reached, or the connection broke down
    /// (connectivity problems, timeouts, truncated streams).
    Transport,
    /// The provider was reached but rejected the request or answered with
    /// something that could not be understood.
    Provider,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transport => f.write_str("transport error"),
            ErrorKind::Provider => f.write_str("provider error"),
        }
    }
}

/// The error type for an LLM client.
///
/// The `Display` output is shown to users as is, so it should be a
/// readable sentence rather than a debug dump.
pub trait ClientError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}
