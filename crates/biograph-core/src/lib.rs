//! biograph-core: Settings, shared types, and prompt composition for biograph.
//!
//! This crate provides the foundations used by every biograph component:
//! - `Settings`, the immutable configuration resolved once at startup
//! - Query, graph context, and conversation types
//! - The prompt composer that merges graph context into the model instruction
//! - Common error types

pub mod config;
pub mod error;
pub mod prompt;
pub mod types;

pub use config::{ContextPolicy, MaxTokens, ModelProvider, Settings};
pub use error::{ConfigError, PromptError, QueryError};
pub use prompt::{
    Message, Prompt, PromptComposer, PromptTemplate, Role, CONTEXT_UNAVAILABLE_MARKER,
    NO_CONTEXT_MARKER,
};
pub use types::{ConversationId, GraphContext, Query};
