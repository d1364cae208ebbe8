//! Graph context retrieval for one query.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use biograph_core::{ContextPolicy, GraphContext, Query, Settings};

use crate::client::GraphError;

/// What the pipeline needs from a graph store.
#[async_trait]
pub trait GraphHandle: Send + Sync {
    /// Trivial round-trip proving the store is reachable.
    async fn ping(&self) -> Result<(), GraphError>;

    /// Facts relevant to `term`, best first, at most `limit`.
    async fn retrieve_facts(&self, term: &str, limit: usize) -> Result<Vec<String>, GraphError>;

    /// Release the connection. Calling it twice is harmless.
    async fn close(&self);
}

/// Fetches a bounded, ordered set of facts for a query and applies the
/// configured failure policy.
#[derive(Debug, Clone)]
pub struct ContextProvider {
    policy: ContextPolicy,
    limit: usize,
    timeout: Duration,
}

impl ContextProvider {
    pub fn new(policy: ContextPolicy, limit: usize, timeout: Duration) -> Self {
        Self {
            policy,
            limit: limit.max(1),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.context_policy,
            settings.context_limit,
            settings.graph_timeout,
        )
    }

    pub fn policy(&self) -> ContextPolicy {
        self.policy
    }

    /// Retrieve context for `query`.
    ///
    /// Under [`ContextPolicy::Degrade`] a failed or timed-out retrieval yields
    /// [`GraphContext::degraded`]; under [`ContextPolicy::Fatal`] the error is
    /// returned. Facts keep retrieval order; repeats are dropped.
    pub async fn fetch_context(
        &self,
        query: &Query,
        graph: &dyn GraphHandle,
    ) -> Result<GraphContext, GraphError> {
        let start = Instant::now();
        let retrieval = graph.retrieve_facts(query.as_str(), self.limit);
        let result = match tokio::time::timeout(self.timeout, retrieval).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Timeout {
                operation: "context retrieval",
                after: self.timeout,
            }),
        };

        match result {
            Ok(facts) => {
                let facts = dedupe(facts, self.limit);
                tracing::debug!(
                    facts = facts.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Graph context retrieved"
                );
                Ok(GraphContext::new(facts))
            }
            Err(e) => match self.policy {
                ContextPolicy::Degrade => {
                    tracing::warn!(error = %e, "Graph context unavailable, answering without it");
                    Ok(GraphContext::degraded())
                }
                ContextPolicy::Fatal => {
                    tracing::error!(error = %e, "Graph context unavailable");
                    Err(e)
                }
            },
        }
    }
}

fn dedupe(facts: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    facts
        .into_iter()
        .filter(|fact| !fact.trim().is_empty())
        .filter(|fact| seen.insert(fact.clone()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;

    fn provider(policy: ContextPolicy) -> ContextProvider {
        ContextProvider::new(policy, 10, Duration::from_millis(100))
    }

    fn q(text: &str) -> Query {
        Query::new(text).unwrap()
    }

    #[tokio::test]
    async fn test_facts_keep_retrieval_order() {
        let graph = MemoryGraph::new([
            "RORA -[ASSOCIATED_WITH]-> asthma",
            "IL33 -[ASSOCIATED_WITH]-> asthma",
            "BRCA1 -[ASSOCIATED_WITH]-> breast cancer",
        ]);
        let ctx = provider(ContextPolicy::Degrade)
            .fetch_context(&q("Which genes affect asthma?"), &graph)
            .await
            .unwrap();
        assert_eq!(
            ctx.facts(),
            &[
                "RORA -[ASSOCIATED_WITH]-> asthma".to_string(),
                "IL33 -[ASSOCIATED_WITH]-> asthma".to_string(),
            ]
        );
        assert!(!ctx.is_degraded());
    }

    #[tokio::test]
    async fn test_duplicates_dropped_and_limit_applied() {
        let graph = MemoryGraph::new(["a -[R]-> asthma", "a -[R]-> asthma", "b -[R]-> asthma"]);
        let ctx = ContextProvider::new(ContextPolicy::Degrade, 1, Duration::from_secs(1))
            .fetch_context(&q("asthma"), &graph)
            .await
            .unwrap();
        assert_eq!(ctx.facts(), &["a -[R]-> asthma".to_string()]);

        let ctx = provider(ContextPolicy::Degrade)
            .fetch_context(&q("asthma"), &graph)
            .await
            .unwrap();
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_dedupe_skips_blank_facts() {
        let facts = vec!["x".to_string(), "  ".to_string(), "x".to_string(), "y".to_string()];
        assert_eq!(dedupe(facts, 10), vec!["x".to_string(), "y".to_string()]);
    }

    #[tokio::test]
    async fn test_degrade_policy_returns_empty_context() {
        let graph = MemoryGraph::new(["a -[R]-> b"]).failing("connection reset");
        let ctx = provider(ContextPolicy::Degrade)
            .fetch_context(&q("a"), &graph)
            .await
            .unwrap();
        assert!(ctx.is_empty());
        assert!(ctx.is_degraded());
    }

    #[tokio::test]
    async fn test_fatal_policy_propagates() {
        let graph = MemoryGraph::new(["a -[R]-> b"]).failing("connection reset");
        let err = provider(ContextPolicy::Fatal)
            .fetch_context(&q("a"), &graph)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Connection(_)));
    }

    #[tokio::test]
    async fn test_hanging_store_times_out() {
        let graph = MemoryGraph::new(["a -[R]-> b"]).hanging();

        let err = provider(ContextPolicy::Fatal)
            .fetch_context(&q("a"), &graph)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Timeout { .. }));

        let ctx = provider(ContextPolicy::Degrade)
            .fetch_context(&q("a"), &graph)
            .await
            .unwrap();
        assert!(ctx.is_degraded());
    }
}
