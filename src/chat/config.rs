//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::aggregator::AggregatorConfig;
use crate::backend::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_PERSONA};
use crate::markup::ListWrapping;

/// Directory name under the platform data directory.
const DATA_DIR_NAME: &str = "majlis";

/// Command-line arguments for the majlis-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: claude-haiku-4-5)", "MODEL")]
    pub model: Option<String>,

    /// Maximum tokens per response.
    #[arrrg(optional, "Max tokens per response (default: 2048)", "TOKENS")]
    pub max_tokens: Option<u32>,

    /// Where sessions are stored.
    #[arrrg(optional, "Directory for stored sessions (default: platform data dir)", "DIR")]
    pub data_dir: Option<String>,

    /// Base URL of the generation endpoint.
    #[arrrg(optional, "Base URL of the API (default: https://api.anthropic.com/v1/)", "URL")]
    pub base_url: Option<String>,

    /// Persona text for the system instruction.
    #[arrrg(optional, "Persona for the assistant", "TEXT")]
    pub persona: Option<String>,

    /// Seconds to wait for the stream to open and between fragments.
    #[arrrg(optional, "Fail a reply after this many idle seconds (default: no limit)", "SECONDS")]
    pub timeout_secs: Option<u64>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Only wrap the first list run, as older clients did.
    #[arrrg(flag, "Render lists the legacy way (only the first run wrapped)")]
    pub legacy_lists: bool,

    /// Let the backend search the web and cite its sources.
    #[arrrg(flag, "Enable web search with citations")]
    pub web_search: bool,
}

/// Configuration for the chat application.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: String,

    /// Maximum tokens per response.
    pub max_tokens: u32,

    /// Directory holding stored sessions.
    pub data_dir: PathBuf,

    /// Override for the API base URL.
    pub base_url: Option<String>,

    /// Persona text for the system instruction.
    pub persona: String,

    /// Idle limit for a streaming reply. `None` waits forever.
    pub stream_timeout: Option<Duration>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// How list runs are wrapped.
    pub list_wrapping: ListWrapping,

    /// Whether the backend may search the web.
    pub web_search: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: claude-haiku-4-5
    /// - Max tokens: 2048
    /// - Data directory: `<platform data dir>/majlis`
    /// - Color: enabled
    /// - Stream timeout: none
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            data_dir: default_data_dir(),
            base_url: None,
            persona: DEFAULT_PERSONA.to_string(),
            stream_timeout: None,
            use_color: true,
            list_wrapping: ListWrapping::EveryRun,
            web_search: false,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the maximum tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Sets the persona.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Sets the stream timeout.
    pub fn with_stream_timeout(mut self, stream_timeout: Option<Duration>) -> Self {
        self.stream_timeout = stream_timeout;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the list wrapping policy.
    pub fn with_list_wrapping(mut self, list_wrapping: ListWrapping) -> Self {
        self.list_wrapping = list_wrapping;
        self
    }

    /// The aggregator settings implied by this configuration.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig::default()
            .with_persona(self.persona.clone())
            .with_stream_timeout(self.stream_timeout)
            .with_list_wrapping(self.list_wrapping)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let defaults = ChatConfig::new();
        ChatConfig {
            model: args.model.unwrap_or(defaults.model),
            max_tokens: args.max_tokens.unwrap_or(defaults.max_tokens),
            data_dir: args.data_dir.map(PathBuf::from).unwrap_or(defaults.data_dir),
            base_url: args.base_url,
            persona: args
                .persona
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.persona),
            stream_timeout: args
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            use_color: !args.no_color,
            list_wrapping: if args.legacy_lists {
                ListWrapping::FirstRunOnly
            } else {
                ListWrapping::EveryRun
            },
            web_search: args.web_search,
        }
    }
}

/// `<platform data dir>/majlis`, or `./.majlis` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{DATA_DIR_NAME}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert_eq!(config.model, "claude-haiku-4-5");
        assert_eq!(config.max_tokens, 2048);
        assert!(config.use_color);
        assert!(config.base_url.is_none());
        assert!(config.stream_timeout.is_none());
        assert_eq!(config.list_wrapping, ListWrapping::EveryRun);
        assert!(config.data_dir.ends_with(DATA_DIR_NAME) || config.data_dir.ends_with(".majlis"));
        assert!(!config.web_search);
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ChatConfig::from(ChatArgs::default());
        assert_eq!(config, ChatConfig::new());
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            model: Some("claude-sonnet-4-0".to_string()),
            max_tokens: Some(8192),
            data_dir: Some("/tmp/majlis-test".to_string()),
            base_url: Some("http://localhost:8080/v1/".to_string()),
            persona: Some("Be brief.".to_string()),
            timeout_secs: Some(30),
            no_color: true,
            legacy_lists: true,
            web_search: true,
        };
        let config = ChatConfig::from(args);
        assert_eq!(config.model, "claude-sonnet-4-0");
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/majlis-test"));
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080/v1/"));
        assert_eq!(config.persona, "Be brief.");
        assert_eq!(config.stream_timeout, Some(Duration::from_secs(30)));
        assert!(!config.use_color);
        assert_eq!(config.list_wrapping, ListWrapping::FirstRunOnly);
        assert!(config.web_search);
    }

    #[test]
    fn zero_timeout_means_none() {
        let args = ChatArgs {
            timeout_secs: Some(0),
            ..ChatArgs::default()
        };
        assert!(ChatConfig::from(args).stream_timeout.is_none());
    }

    #[test]
    fn config_builder_pattern() {
        let config = ChatConfig::new()
            .with_model("claude-sonnet-4-0")
            .with_max_tokens(1024)
            .with_data_dir("/var/lib/majlis")
            .with_persona("persona")
            .with_stream_timeout(Some(Duration::from_secs(5)))
            .without_color()
            .with_list_wrapping(ListWrapping::FirstRunOnly);
        assert_eq!(config.model, "claude-sonnet-4-0");
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/majlis"));
        assert!(!config.use_color);

        let aggregator = config.aggregator_config();
        assert_eq!(aggregator.persona, "persona");
        assert_eq!(aggregator.stream_timeout, Some(Duration::from_secs(5)));
        assert_eq!(aggregator.list_wrapping, ListWrapping::FirstRunOnly);
    }
}
