//! biograph-graph: Neo4j access for grounding answers in the knowledge graph.
//!
//! The pipeline only sees the [`GraphHandle`] trait: a liveness check, fact
//! retrieval for a question, and close. [`Neo4jGraph`] implements it over
//! neo4rs; [`memory::MemoryGraph`] is an in-process stand-in for tests.

pub mod client;
pub mod context;
pub mod memory;
pub mod queries;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use context::{ContextProvider, GraphHandle};
pub use queries::Neo4jGraph;
