use std::env;
use std::error::Error;
use std::fmt::{self, Debug, Display};

use helflinq_core::AnyClient;
use helflinq_google_client::{GoogleClient, GoogleConfigBuilder};
use helflinq_openai_client::{OpenAIClient, OpenAIConfigBuilder};

/// Which provider a [`ClientConfig`] talks to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// OpenAI's chat completions, streamed.
    ChatGpt {
        /// Model name.
        model: String,
        /// Base URL of an OpenAI-compatible server, if not OpenAI's own.
        base_url: Option<String>,
    },
    /// Google's generative language API, buffered.
    Palm {
        /// Model name, if not the client's default.
        model: Option<String>,
    },
}

/// Errors in the client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    Missing(&'static str),
    /// `HELFLINQ_PROVIDER` names no known provider.
    UnknownProvider(String),
    /// The client could not be created.
    Client(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => {
                write!(f, "{var} environment variable is not set")
            }
            ConfigError::UnknownProvider(name) => write!(
                f,
                "unknown provider {name:?}, expected \"openai\" or \"google\""
            ),
            ConfigError::Client(message) => {
                write!(f, "failed to create client: {message}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Credentials and provider selection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientConfig {
    /// API key of the provider.
    pub api_key: String,
    /// End-user identifier passed on to providers that accept one.
    pub user_id: String,
    /// The provider.
    pub kind: ClientKind,
}

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

impl ClientConfig {
    /// Reads the configuration from the environment. `HELFLINQ_PROVIDER`
    /// selects the provider and defaults to `openai`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider =
            env::var("HELFLINQ_PROVIDER").unwrap_or_else(|_| "openai".to_owned());
        Self::for_provider(&provider)
    }

    /// Reads the configuration of the named provider from the environment.
    pub fn for_provider(provider: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(provider, |name| {
            env::var(name).ok().filter(|v| !v.is_empty())
        })
    }

    fn from_lookup(
        provider: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let user_id = lookup("HELFLINQ_USER_ID").unwrap_or_default();
        match provider.to_ascii_lowercase().as_str() {
            "openai" | "chatgpt" => Ok(Self {
                api_key: lookup("OPENAI_API_KEY")
                    .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?,
                user_id,
                kind: ClientKind::ChatGpt {
                    model: lookup("OPENAI_MODEL")
                        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_owned()),
                    base_url: lookup("OPENAI_BASE_URL"),
                },
            }),
            "google" | "palm" => Ok(Self {
                api_key: lookup("GOOGLE_API_KEY")
                    .ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?,
                user_id,
                kind: ClientKind::Palm {
                    model: lookup("GOOGLE_MODEL"),
                },
            }),
            _ => Err(ConfigError::UnknownProvider(provider.to_owned())),
        }
    }

    /// Creates the client this configuration describes.
    pub fn create_client(&self) -> Result<AnyClient, ConfigError> {
        let client = match &self.kind {
            ClientKind::ChatGpt { model, base_url } => {
                let mut builder = OpenAIConfigBuilder::with_api_key(&self.api_key)
                    .with_model(model)
                    .with_user_id(&self.user_id);
                if let Some(base_url) = base_url {
                    builder = builder.with_base_url(base_url);
                }
                OpenAIClient::new(builder.build())
                    .map(AnyClient::new)
                    .map_err(|err| ConfigError::Client(err.to_string()))?
            }
            ClientKind::Palm { model } => {
                let mut builder = GoogleConfigBuilder::with_api_key(&self.api_key);
                if let Some(model) = model {
                    builder = builder.with_model(model);
                }
                GoogleClient::new(builder.build())
                    .map(AnyClient::new)
                    .map_err(|err| ConfigError::Client(err.to_string()))?
            }
        };
        debug!("created client for {}", client.provider().display_name);
        Ok(client)
    }
}

impl Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("kind", &self.kind)
            .finish()
    }
}
