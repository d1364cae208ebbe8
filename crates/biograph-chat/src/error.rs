//! Error types for the biograph-chat crate.

use thiserror::Error;

use biograph_core::{ConversationId, QueryError};
use biograph_graph::GraphError;
use biograph_llm::ModelError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Conversation {conversation_id} is already answering a query")]
    Busy { conversation_id: ConversationId },

    #[error("Conversation {conversation_id} is closed")]
    Closed { conversation_id: ConversationId },

    #[error("No conversation with id {conversation_id}")]
    UnknownConversation { conversation_id: ConversationId },

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("Session initialization failed: {reason}")]
    Initialization { reason: String },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl SessionError {
    /// The failure leaves the session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Closed { .. } | Self::Model(ModelError::Authentication(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
