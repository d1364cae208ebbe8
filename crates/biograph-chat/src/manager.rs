//! Registry of open conversations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use biograph_core::{ConversationId, Settings};
use biograph_graph::{GraphHandle, Neo4jGraph};
use biograph_llm::ModelHandle;

use crate::error::{Result, SessionError};
use crate::session::{AnswerStream, Session, SessionInfo};

/// Creates the graph and model handles for a new session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        settings: &Settings,
    ) -> Result<(Arc<dyn GraphHandle>, Arc<dyn ModelHandle>)>;
}

/// Connects to Neo4j and the configured model provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveConnector;

#[async_trait]
impl Connector for LiveConnector {
    async fn connect(
        &self,
        settings: &Settings,
    ) -> Result<(Arc<dyn GraphHandle>, Arc<dyn ModelHandle>)> {
        let graph = Neo4jGraph::connect(settings)
            .await
            .map_err(|e| SessionError::Initialization {
                reason: format!("graph store connection failed: {e}"),
            })?;
        let graph: Arc<dyn GraphHandle> = Arc::new(graph);

        match biograph_llm::connect_model(settings) {
            Ok(model) => Ok((graph, model)),
            Err(e) => {
                graph.close().await;
                Err(SessionError::Initialization {
                    reason: format!("model client setup failed: {e}"),
                })
            }
        }
    }
}

/// Opens, looks up and shuts down sessions by conversation id.
///
/// The registry lock only guards the map; it is never held across a
/// session call.
pub struct SessionManager {
    settings: Arc<Settings>,
    connector: Arc<dyn Connector>,
    sessions: RwLock<HashMap<ConversationId, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(settings: Arc<Settings>, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// A manager backed by live Neo4j and model connections.
    pub fn live(settings: Arc<Settings>) -> Self {
        Self::new(settings, Arc::new(LiveConnector))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Open a session for `conversation_id`, or return the one already open.
    pub async fn start(&self, conversation_id: ConversationId) -> Result<Arc<Session>> {
        let existing = self.read().get(&conversation_id).cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let (graph, model) = self.connector.connect(&self.settings).await?;
        let session = Arc::new(Session::open(conversation_id, Arc::clone(&self.settings), graph, model).await?);

        let raced = {
            let mut sessions = self.write();
            match sessions.get(&conversation_id) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    sessions.insert(conversation_id, Arc::clone(&session));
                    None
                }
            }
        };
        if let Some(existing) = raced {
            session.close().await;
            return Ok(existing);
        }

        tracing::info!(conversation_id = %conversation_id, "Conversation started");
        Ok(session)
    }

    pub fn session(&self, conversation_id: ConversationId) -> Result<Arc<Session>> {
        self.read()
            .get(&conversation_id)
            .cloned()
            .ok_or(SessionError::UnknownConversation { conversation_id })
    }

    pub async fn ask(&self, conversation_id: ConversationId, query: &str) -> Result<String> {
        let session = self.session(conversation_id)?;
        session.ask(query).await
    }

    pub async fn ask_stream(
        &self,
        conversation_id: ConversationId,
        query: &str,
    ) -> Result<AnswerStream> {
        let session = self.session(conversation_id)?;
        session.ask_stream(query).await
    }

    pub fn info(&self, conversation_id: ConversationId) -> Result<SessionInfo> {
        Ok(self.session(conversation_id)?.info())
    }

    pub fn conversations(&self) -> Vec<ConversationId> {
        self.read().keys().copied().collect()
    }

    /// Close and forget a conversation. Unknown ids are ignored.
    pub async fn shutdown(&self, conversation_id: ConversationId) {
        let removed = self.write().remove(&conversation_id);
        if let Some(session) = removed {
            session.close().await;
            tracing::info!(conversation_id = %conversation_id, "Conversation shut down");
        }
    }

    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = self.write().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        for session in sessions {
            session.close().await;
        }
        if count > 0 {
            tracing::info!(sessions = count, "All conversations shut down");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConversationId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConversationId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use biograph_graph::memory::MemoryGraph;
    use biograph_llm::mock::ScriptedModel;

    use crate::state::SessionState;

    /// Hands out prepared handle pairs in order.
    struct QueuedConnector {
        pairs: Mutex<Vec<(Arc<MemoryGraph>, Arc<ScriptedModel>)>>,
    }

    impl QueuedConnector {
        fn new(pairs: Vec<(Arc<MemoryGraph>, Arc<ScriptedModel>)>) -> Self {
            Self {
                pairs: Mutex::new(pairs.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl Connector for QueuedConnector {
        async fn connect(
            &self,
            _settings: &Settings,
        ) -> Result<(Arc<dyn GraphHandle>, Arc<dyn ModelHandle>)> {
            let (graph, model) = self.pairs.lock().unwrap().pop().ok_or_else(|| {
                SessionError::Initialization {
                    reason: "no handles left".into(),
                }
            })?;
            let graph: Arc<dyn GraphHandle> = graph;
            let model: Arc<dyn ModelHandle> = model;
            Ok((graph, model))
        }
    }

    fn settings() -> Arc<Settings> {
        let vars = [
            ("BIOGRAPH_NEO4J__URI", "bolt://localhost:7687"),
            ("BIOGRAPH_NEO4J__USER", "neo4j"),
            ("BIOGRAPH_NEO4J__PASSWORD", "test"),
            ("BIOGRAPH_MODEL__NAME", "gpt-4o"),
            ("BIOGRAPH_MODEL__API_KEY", "sk-test"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Arc::new(Settings::from_env_map(vars).unwrap())
    }

    fn pair(model: ScriptedModel) -> (Arc<MemoryGraph>, Arc<ScriptedModel>) {
        (Arc::new(MemoryGraph::new(Vec::<String>::new())), Arc::new(model))
    }

    #[tokio::test]
    async fn test_start_and_ask() {
        let manager = SessionManager::new(
            settings(),
            Arc::new(QueuedConnector::new(vec![pair(ScriptedModel::new("gpt-4o").reply("hello"))])),
        );
        let id = ConversationId::new();
        manager.start(id).await.unwrap();
        assert_eq!(manager.ask(id, "hi there").await.unwrap(), "hello");
        assert_eq!(manager.conversations(), vec![id]);
        assert_eq!(manager.info(id).unwrap().queries_processed, 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let manager = SessionManager::new(
            settings(),
            Arc::new(QueuedConnector::new(vec![pair(ScriptedModel::new("gpt-4o"))])),
        );
        let id = ConversationId::new();
        let first = manager.start(id).await.unwrap();
        let second = manager.start(id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let manager = SessionManager::new(settings(), Arc::new(QueuedConnector::new(vec![])));
        let id = ConversationId::new();
        assert!(matches!(
            manager.ask(id, "q").await,
            Err(SessionError::UnknownConversation { conversation_id }) if conversation_id == id
        ));
        assert!(matches!(
            manager.ask_stream(id, "q").await,
            Err(SessionError::UnknownConversation { .. })
        ));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (graph_a, model_a) = pair(ScriptedModel::new("gpt-4o").chunks(["slow"]));
        let (graph_b, model_b) = pair(ScriptedModel::new("gpt-4o").reply("fast"));
        let manager = SessionManager::new(
            settings(),
            Arc::new(QueuedConnector::new(vec![(graph_a, model_a), (graph_b, model_b)])),
        );
        let a = ConversationId::new();
        let b = ConversationId::new();
        manager.start(a).await.unwrap();
        manager.start(b).await.unwrap();

        let stream = manager.ask_stream(a, "question a").await.unwrap();
        assert_eq!(manager.ask(b, "question b").await.unwrap(), "fast");
        assert_eq!(stream.collect_text().await.unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_forgets() {
        let (graph, model) = pair(ScriptedModel::new("gpt-4o"));
        let manager = SessionManager::new(
            settings(),
            Arc::new(QueuedConnector::new(vec![(graph.clone(), model.clone())])),
        );
        let id = ConversationId::new();
        let session = manager.start(id).await.unwrap();

        manager.shutdown(id).await;
        manager.shutdown(id).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(graph.is_closed());
        assert!(model.is_closed());
        assert!(manager.conversations().is_empty());
        assert!(matches!(
            manager.ask(id, "q").await,
            Err(SessionError::UnknownConversation { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let (graph_a, model_a) = pair(ScriptedModel::new("gpt-4o"));
        let (graph_b, model_b) = pair(ScriptedModel::new("gpt-4o"));
        let manager = SessionManager::new(
            settings(),
            Arc::new(QueuedConnector::new(vec![
                (graph_a.clone(), model_a),
                (graph_b.clone(), model_b),
            ])),
        );
        manager.start(ConversationId::new()).await.unwrap();
        manager.start(ConversationId::new()).await.unwrap();

        manager.shutdown_all().await;
        assert!(graph_a.is_closed());
        assert!(graph_b.is_closed());
        assert!(manager.conversations().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_is_not_registered() {
        let graph = Arc::new(MemoryGraph::new(Vec::<String>::new()).unreachable());
        let model = Arc::new(ScriptedModel::new("gpt-4o"));
        let manager = SessionManager::new(
            settings(),
            Arc::new(QueuedConnector::new(vec![(graph, model)])),
        );
        let id = ConversationId::new();
        assert!(matches!(
            manager.start(id).await,
            Err(SessionError::Initialization { .. })
        ));
        assert!(manager.conversations().is_empty());
    }
}
