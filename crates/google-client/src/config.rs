use std::fmt::{self, Debug};
use std::time::Duration;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_HISTORY_LIMIT: usize = 20;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder for [`GoogleConfig`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GoogleConfigBuilder {
    api_key: String,
    model: Option<String>,
    base_url: Option<String>,
    history_limit: Option<usize>,
    timeout: Option<Duration>,
}

impl GoogleConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
            base_url: None,
            history_limit: None,
            timeout: None,
        }
    }

    /// Sets the model to use.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets how many earlier exchanges are sent along with a new message.
    #[inline]
    pub fn with_history_limit(mut self, exchanges: usize) -> Self {
        self.history_limit = Some(exchanges);
        self
    }

    /// Sets the request timeout.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> GoogleConfig {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        GoogleConfig {
            api_key: self.api_key,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            base_url: base_url.trim_end_matches('/').to_owned(),
            history_limit: self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl Debug for GoogleConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Configuration for the Google client.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GoogleConfig {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) base_url: String,
    pub(crate) history_limit: usize,
    pub(crate) timeout: Duration,
}

impl GoogleConfig {
    /// Returns the model name.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub(crate) fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

impl Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let config = GoogleConfigBuilder::with_api_key("key").build();
        assert_eq!(
            config.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );

        let config = GoogleConfigBuilder::with_api_key("key")
            .with_base_url("http://localhost:1234/")
            .with_model("text-bison")
            .build();
        assert_eq!(
            config.endpoint(),
            "http://localhost:1234/models/text-bison:generateContent"
        );
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = GoogleConfigBuilder::with_api_key("AIza-secret").build();
        assert!(!format!("{config:?}").contains("AIza-secret"));
    }
}
