//! In-process graph store for tests and offline runs.
//!
//! Facts are plain strings; retrieval is a case-insensitive keyword match
//! against the query words (three characters or longer), in insertion order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::client::GraphError;
use crate::context::GraphHandle;

#[derive(Debug, Clone)]
enum Behavior {
    Healthy,
    Unreachable,
    Failing(String),
    Hanging,
}

#[derive(Debug)]
pub struct MemoryGraph {
    facts: Vec<String>,
    behavior: Behavior,
    closed: AtomicBool,
    retrievals: AtomicUsize,
}

impl MemoryGraph {
    pub fn new<I, S>(facts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            facts: facts.into_iter().map(Into::into).collect(),
            behavior: Behavior::Healthy,
            closed: AtomicBool::new(false),
            retrievals: AtomicUsize::new(0),
        }
    }

    /// Liveness checks and retrievals fail with a connection error.
    pub fn unreachable(mut self) -> Self {
        self.behavior = Behavior::Unreachable;
        self
    }

    /// Liveness checks pass; retrievals fail with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.behavior = Behavior::Failing(reason.to_string());
        self
    }

    /// Liveness checks pass; retrievals never complete.
    pub fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hanging;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of retrieval calls made so far.
    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }
}

fn keywords(term: &str) -> Vec<String> {
    term.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl GraphHandle for MemoryGraph {
    async fn ping(&self) -> Result<(), GraphError> {
        if self.is_closed() {
            return Err(GraphError::Closed);
        }
        match self.behavior {
            Behavior::Unreachable => Err(GraphError::Connection("connection refused".into())),
            _ => Ok(()),
        }
    }

    async fn retrieve_facts(&self, term: &str, limit: usize) -> Result<Vec<String>, GraphError> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(GraphError::Closed);
        }
        match &self.behavior {
            Behavior::Unreachable => Err(GraphError::Connection("connection refused".into())),
            Behavior::Failing(reason) => Err(GraphError::Connection(reason.clone())),
            Behavior::Hanging => std::future::pending().await,
            Behavior::Healthy => {
                let words = keywords(term);
                Ok(self
                    .facts
                    .iter()
                    .filter(|fact| {
                        let fact = fact.to_lowercase();
                        words.iter().any(|w| fact.contains(w.as_str()))
                    })
                    .take(limit)
                    .cloned()
                    .collect())
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
