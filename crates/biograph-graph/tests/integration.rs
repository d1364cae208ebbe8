//! Integration tests for biograph-graph against a live Neo4j instance.
//!
//! These tests need a Neo4j 5 server on bolt://localhost:7687
//! (user `neo4j`, password `biograph-dev`).
//! Run with: cargo test --package biograph-graph --test integration -- --ignored
//!
//! Skipped automatically if Neo4j is not available.

use biograph_core::{ContextPolicy, Query};
use biograph_graph::{ContextProvider, GraphClient, GraphConfig, GraphError, GraphHandle, Neo4jGraph};
use std::time::Duration;

const TEST_INDEX: &str = "biograph_test_names";

async fn connect_or_skip() -> Option<GraphClient> {
    let config = GraphConfig::default();
    match GraphClient::connect(&config).await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test (Neo4j not available): {e}");
            None
        }
    }
}

async fn cleanup(client: &GraphClient, marker: &str) {
    let q = neo4rs::query("MATCH (n:BiographTest {marker: $marker}) DETACH DELETE n")
        .param("marker", marker.to_string());
    let _ = client.run(q).await;
}

async fn seed(client: &GraphClient, marker: &str) {
    client
        .run(neo4rs::query(
            "CREATE FULLTEXT INDEX biograph_test_names IF NOT EXISTS
             FOR (n:BiographTest) ON EACH [n.name]",
        ))
        .await
        .unwrap();

    let q = neo4rs::query(
        "CREATE (g:BiographTest {name: 'RORA', marker: $marker})
         CREATE (d:BiographTest {name: 'childhood-onset asthma', marker: $marker})
         CREATE (t:BiographTest {name: 'lung tissue', marker: $marker})
         CREATE (g)-[:ASSOCIATED_WITH]->(d)
         CREATE (d)-[:AFFECTS]->(t)",
    )
    .param("marker", marker.to_string());
    client.run(q).await.unwrap();

    client
        .run(neo4rs::query("CALL db.awaitIndexes(30)"))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires live Neo4j - run with: cargo test --package biograph-graph --test integration -- --ignored"]
async fn test_verify_connectivity() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    client.verify_connectivity().await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Neo4j - run with: cargo test --package biograph-graph --test integration -- --ignored"]
async fn test_related_facts_round_trip() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let marker = format!("it-{}", std::process::id());
    cleanup(&client, &marker).await;
    seed(&client, &marker).await;

    let facts = client
        .related_facts(TEST_INDEX, "Is RORA linked to asthma?", 10)
        .await
        .unwrap();
    assert!(
        facts.contains(&"RORA -[ASSOCIATED_WITH]-> childhood-onset asthma".to_string()),
        "unexpected facts: {facts:?}"
    );

    cleanup(&client, &marker).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j - run with: cargo test --package biograph-graph --test integration -- --ignored"]
async fn test_edge_between_two_seeds_counted_once() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let marker = format!("dup-{}", std::process::id());
    cleanup(&client, &marker).await;
    seed(&client, &marker).await;

    // RORA and asthma are both seeds, so ASSOCIATED_WITH is reachable from
    // either end. It must take a single slot of the limit.
    let facts = client
        .related_facts(TEST_INDEX, "RORA childhood-onset asthma", 2)
        .await
        .unwrap();
    assert_eq!(facts.len(), 2, "unexpected facts: {facts:?}");
    assert!(facts.contains(&"RORA -[ASSOCIATED_WITH]-> childhood-onset asthma".to_string()));
    assert!(facts.contains(&"childhood-onset asthma -[AFFECTS]-> lung tissue".to_string()));

    cleanup(&client, &marker).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j - run with: cargo test --package biograph-graph --test integration -- --ignored"]
async fn test_context_provider_over_neo4j() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let marker = format!("ctx-{}", std::process::id());
    cleanup(&client, &marker).await;
    seed(&client, &marker).await;

    let graph = Neo4jGraph::new(client, TEST_INDEX);
    let provider = ContextProvider::new(ContextPolicy::Fatal, 5, Duration::from_secs(10));
    let query = Query::new("What does childhood-onset asthma affect?").unwrap();
    let ctx = provider.fetch_context(&query, &graph).await.unwrap();
    assert!(!ctx.is_empty());
    assert!(ctx.len() <= 5);

    cleanup(graph.client(), &marker).await;
    graph.close().await;
}

#[tokio::test]
#[ignore = "requires live Neo4j - run with: cargo test --package biograph-graph --test integration -- --ignored"]
async fn test_close_is_idempotent() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let graph = Neo4jGraph::new(client, TEST_INDEX);
    graph.close().await;
    graph.close().await;
    assert!(graph.client().is_closed());
    assert!(matches!(graph.ping().await, Err(GraphError::Closed)));
}
