use thiserror::Error;

/// Settings could not be resolved; the process cannot start.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {key}")]
    Missing { key: String },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// A user query was rejected before reaching the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Query is empty")]
    Empty,
}

/// A prompt template is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Template is missing the {{{slot}}} slot")]
    MissingSlot { slot: &'static str },

    #[error("Template uses the {{{slot}}} slot more than once")]
    DuplicateSlot { slot: &'static str },
}
