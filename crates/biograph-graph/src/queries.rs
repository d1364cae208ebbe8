//! Cypher for context retrieval and the [`GraphHandle`] implementation over Neo4j.

use async_trait::async_trait;
use neo4rs::query;

use biograph_core::Settings;

use crate::client::{GraphClient, GraphConfig, GraphError};
use crate::context::GraphHandle;

/// Best-scoring full-text hits used as starting points for expansion.
const SEED_NODES: i64 = 5;

/// Full-text search for seed entities, then one hop out. Each relationship is
/// returned once, with its best seed score, and in its real direction so facts
/// read start → end.
const RELATED_FACTS: &str = "CALL db.index.fulltext.queryNodes($index, $term) YIELD node, score
     WITH node, score ORDER BY score DESC LIMIT $seeds
     MATCH (node)-[r]-()
     WITH r, max(score) AS score
     RETURN toString(coalesce(startNode(r).name, startNode(r).id, '')) AS subject,
            type(r) AS predicate,
            toString(coalesce(endNode(r).name, endNode(r).id, '')) AS object
     ORDER BY score DESC
     LIMIT $limit";

/// Characters with meaning in Lucene query syntax.
const LUCENE_SPECIAL: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
    '/',
];

/// Make free text safe to pass as a Lucene full-text query: escape operator
/// characters and lowercase the boolean keywords.
pub fn escape_lucene(term: &str) -> String {
    term.split_whitespace()
        .map(|word| {
            if matches!(word, "AND" | "OR" | "NOT") {
                return word.to_lowercase();
            }
            let mut escaped = String::with_capacity(word.len());
            for c in word.chars() {
                if LUCENE_SPECIAL.contains(&c) {
                    escaped.push('\\');
                }
                escaped.push(c);
            }
            escaped
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render one relationship as a fact line.
pub fn format_fact(subject: &str, predicate: &str, object: &str) -> Option<String> {
    let (subject, predicate, object) = (subject.trim(), predicate.trim(), object.trim());
    if subject.is_empty() || object.is_empty() || predicate.is_empty() {
        return None;
    }
    Some(format!("{subject} -[{predicate}]-> {object}"))
}

impl GraphClient {
    /// Facts around the entities matching `term` in the full-text `index`.
    pub async fn related_facts(
        &self,
        index: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<String>, GraphError> {
        let q = query(RELATED_FACTS)
            .param("index", index.to_string())
            .param("term", escape_lucene(term))
            .param("seeds", SEED_NODES)
            .param("limit", limit as i64);

        let rows = self.query_rows(q).await?;
        let mut facts = Vec::with_capacity(rows.len());
        for row in rows {
            let subject: String = row.get("subject").unwrap_or_default();
            let predicate: String = row.get("predicate").map_err(|e| {
                GraphError::Serialization(format!("Failed to read relationship type: {e}"))
            })?;
            let object: String = row.get("object").unwrap_or_default();
            if let Some(fact) = format_fact(&subject, &predicate, &object) {
                facts.push(fact);
            }
        }
        Ok(facts)
    }
}

/// A [`GraphClient`] bound to the full-text index used for retrieval.
pub struct Neo4jGraph {
    client: GraphClient,
    index: String,
}

impl Neo4jGraph {
    pub fn new(client: GraphClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }

    /// Connect using the graph section of the settings.
    pub async fn connect(settings: &Settings) -> Result<Self, GraphError> {
        let client = GraphClient::connect(&GraphConfig::from_settings(settings)).await?;
        Ok(Self::new(client, settings.graph_index.clone()))
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }
}

#[async_trait]
impl GraphHandle for Neo4jGraph {
    async fn ping(&self) -> Result<(), GraphError> {
        self.client.verify_connectivity().await
    }

    async fn retrieve_facts(&self, term: &str, limit: usize) -> Result<Vec<String>, GraphError> {
        self.client.related_facts(&self.index, term, limit).await
    }

    async fn close(&self) {
        self.client.close();
    }
}
