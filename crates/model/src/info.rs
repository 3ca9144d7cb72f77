use serde::{Deserialize, Serialize};

/// Selects how the coordinator talks to a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// The provider delivers the response incrementally, the coordinator
    /// uses [`crate::LlmClient::send_streaming`].
    Streaming,
    /// The provider only delivers complete responses, the coordinator uses
    /// [`crate::LlmClient::send_buffered`].
    Buffered,
}

/// Describes a provider.
///
/// Apart from `kind`, the fields are presentation hints. The coordinator
/// copies `image_name` into transcript entries but never makes decisions
/// based on them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Which request path to use.
    pub kind: ProviderKind,
    /// Human readable provider name, e.g. "OpenAI ChatGPT".
    pub display_name: String,
    /// Name (or URL) of the avatar shown next to responses.
    pub image_name: String,
    /// Title for the chat screen.
    pub navigation_title: String,
}

impl ProviderInfo {
    /// Creates a `ProviderInfo` using `display_name` as the navigation
    /// title.
    pub fn new<S1: Into<String>, S2: Into<String>>(
        kind: ProviderKind,
        display_name: S1,
        image_name: S2,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            kind,
            navigation_title: display_name.clone(),
            display_name,
            image_name: image_name.into(),
        }
    }

    /// Overrides the navigation title.
    #[inline]
    pub fn with_navigation_title<S: Into<String>>(mut self, title: S) -> Self {
        self.navigation_title = title.into();
        self
    }

    /// Returns `true` if the provider delivers incremental fragments.
    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.kind == ProviderKind::Streaming
    }
}
