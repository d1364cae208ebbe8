//! Core value types shared by the pipeline stages.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::QueryError;

/// Identifier of one conversation (one session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A user question. Never empty; surrounding whitespace is stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn new(text: impl AsRef<str>) -> Result<Self, QueryError> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Facts retrieved from the graph for one query, in retrieval order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphContext {
    facts: Vec<String>,
    degraded: bool,
}

impl GraphContext {
    pub fn new(facts: Vec<String>) -> Self {
        Self {
            facts,
            degraded: false,
        }
    }

    /// No facts were found.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Retrieval failed and the pipeline chose to continue without context.
    pub fn degraded() -> Self {
        Self {
            facts: Vec::new(),
            degraded: true,
        }
    }

    pub fn facts(&self) -> &[String] {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}
