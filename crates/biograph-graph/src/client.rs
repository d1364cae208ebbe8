//! Neo4j connection management and shared graph client.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use neo4rs::{ConfigBuilder, Graph, Query};

use biograph_core::Settings;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Neo4j {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Unexpected result: {0}")]
    Serialization(String),

    #[error("Graph connection is closed")]
    Closed,
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
    /// Applies to connecting and to every query.
    pub timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "biograph-dev".to_string(),
            max_connections: 4,
            fetch_size: 256,
            timeout: Duration::from_secs(10),
        }
    }
}

impl GraphConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            uri: settings.graph_uri.clone(),
            user: settings.graph_user.clone(),
            password: settings.graph_password.clone(),
            timeout: settings.graph_timeout,
            ..Default::default()
        }
    }
}

/// Neo4j client owned by one session.
///
/// neo4rs pools connections beneath the `Graph`; [`GraphClient::close`]
/// drops the pool so the connections are released even while other
/// references to the client are alive.
pub struct GraphClient {
    graph: RwLock<Option<Graph>>,
    uri: String,
    timeout: Duration,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = match tokio::time::timeout(config.timeout, Graph::connect(neo_config)).await {
            Ok(Ok(graph)) => graph,
            Ok(Err(e)) => return Err(GraphError::Connection(e.to_string())),
            Err(_) => {
                return Err(GraphError::Timeout {
                    operation: "connect",
                    after: config.timeout,
                })
            }
        };

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self {
            graph: RwLock::new(Some(graph)),
            uri: config.uri.clone(),
            timeout: config.timeout,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Round-trip a trivial query to prove the server answers.
    pub async fn verify_connectivity(&self) -> Result<(), GraphError> {
        let row = self
            .query_one(neo4rs::query("RETURN 1 AS num"))
            .await?
            .ok_or_else(|| GraphError::Serialization("liveness query returned no rows".into()))?;
        match row.get::<i64>("num") {
            Ok(1) => Ok(()),
            Ok(other) => Err(GraphError::Serialization(format!(
                "liveness query returned {other}"
            ))),
            Err(e) => Err(GraphError::Serialization(format!(
                "liveness query returned an unreadable row: {e}"
            ))),
        }
    }

    /// Execute a write-only query (CREATE, MERGE, DELETE, SET).
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        let graph = self.graph()?;
        self.bounded("write", async move {
            graph.run(query).await?;
            Ok(())
        })
        .await
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let graph = self.graph()?;
        self.bounded("read", async move {
            let mut stream = graph.execute(query).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await? {
                rows.push(row);
            }
            Ok(rows)
        })
        .await
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let graph = self.graph()?;
        self.bounded("read", async move {
            let mut stream = graph.execute(query).await?;
            Ok(stream.next().await?)
        })
        .await
    }

    /// Drop the connection pool. Later calls fail with [`GraphError::Closed`].
    pub fn close(&self) {
        let released = match self.graph.write() {
            Ok(mut guard) => guard.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        };
        if released {
            tracing::info!(uri = %self.uri, "Neo4j connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.graph.read() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Clone the pooled handle out of the lock so no guard lives across an await.
    fn graph(&self) -> Result<Graph, GraphError> {
        let guard = match self.graph.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().ok_or(GraphError::Closed)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, GraphError>>,
    ) -> Result<T, GraphError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}
