//! biograph-chat: Graph-grounded question answering sessions.
//!
//! A [`Session`] answers one query at a time by retrieving facts from the
//! knowledge graph, composing a prompt and generating an answer, in full or
//! as a stream. [`SessionManager`] keys sessions by conversation id and is
//! the entry point used by the `biograph-chat` binary.

pub mod error;
pub mod manager;
pub mod pipeline;
pub mod session;
pub mod state;

pub use error::{Result, SessionError};
pub use manager::{Connector, LiveConnector, SessionManager};
pub use pipeline::Pipeline;
pub use session::{AnswerStream, Session, SessionInfo};
pub use state::SessionState;
