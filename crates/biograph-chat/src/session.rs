//! A conversation session.
//!
//! A session owns one graph handle and one model handle and answers one
//! query at a time. Its state moves `Uninitialized → Verifying → Ready`
//! while opening, `Ready → Processing → Ready` per query, and ends in
//! `Closed`. A query that arrives while another is in flight is rejected
//! with [`SessionError::Busy`] rather than queued.
//!
//! The `Processing` state is held by a guard owned by the running query (or
//! by the [`AnswerStream`] it returned), so dropping the query future or the
//! stream always returns the session to `Ready`.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};

use biograph_core::{ConversationId, Query, Settings};
use biograph_graph::GraphHandle;
use biograph_llm::{ModelError, ModelHandle, TokenStream};

use crate::error::{Result, SessionError};
use crate::pipeline::Pipeline;
use crate::state::SessionState;

/// State shared between a session and its in-flight answer streams.
struct Shared {
    id: ConversationId,
    state: Mutex<SessionState>,
    graph: Arc<dyn GraphHandle>,
    model: Arc<dyn ModelHandle>,
    released: AtomicBool,
    queries: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        *self.state() = next;
    }

    /// Move to `Closed`, returning the previous state.
    fn mark_closed(&self) -> SessionState {
        std::mem::replace(&mut *self.state(), SessionState::Closed)
    }

    /// Close both handles once.
    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.graph.close().await;
        self.model.close().await;
        tracing::debug!(conversation_id = %self.id, "Session handles released");
    }
}

/// Holds the session in `Processing`; dropping it returns the session to
/// `Ready` unless it was closed in the meantime.
struct ProcessingGuard {
    shared: Arc<Shared>,
    started: Instant,
}

impl ProcessingGuard {
    fn acquire(shared: &Arc<Shared>) -> Result<Self> {
        {
            let mut state = shared.state();
            match *state {
                SessionState::Ready => *state = SessionState::Processing,
                SessionState::Processing => {
                    return Err(SessionError::Busy {
                        conversation_id: shared.id,
                    })
                }
                SessionState::Uninitialized | SessionState::Verifying | SessionState::Closed => {
                    return Err(SessionError::Closed {
                        conversation_id: shared.id,
                    })
                }
            }
        }
        Ok(Self {
            shared: Arc::clone(shared),
            started: Instant::now(),
        })
    }

    fn complete(self) {
        let processed = self.shared.queries.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            conversation_id = %self.shared.id,
            queries_processed = processed,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Query answered"
        );
    }

    /// Close the session from a synchronous context. Handles are released on
    /// the runtime in the background.
    fn close_session(self) {
        self.shared.mark_closed();
        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { shared.release().await });
            }
            Err(_) => {
                tracing::warn!(conversation_id = %shared.id, "No runtime to release session handles");
            }
        }
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        if *state == SessionState::Processing {
            *state = SessionState::Ready;
        }
    }
}

/// Bookkeeping exposed by [`Session::info`].
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub conversation_id: ConversationId,
    pub state: SessionState,
    pub opened_at: DateTime<Utc>,
    pub queries_processed: u64,
    /// Queries answered without graph context because retrieval failed.
    pub degraded_contexts: u64,
    pub model: String,
}

pub struct Session {
    shared: Arc<Shared>,
    settings: Arc<Settings>,
    pipeline: Pipeline,
    opened_at: DateTime<Utc>,
}

impl Session {
    /// Verify both handles and return a `Ready` session.
    ///
    /// Each liveness check is bounded by the matching timeout in `settings`.
    /// On failure both handles are closed and the session never becomes
    /// usable.
    pub async fn open(
        id: ConversationId,
        settings: Arc<Settings>,
        graph: Arc<dyn GraphHandle>,
        model: Arc<dyn ModelHandle>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(SessionState::Uninitialized),
            graph: Arc::clone(&graph),
            model: Arc::clone(&model),
            released: AtomicBool::new(false),
            queries: AtomicU64::new(0),
        });

        shared.set_state(SessionState::Verifying);
        tracing::info!(conversation_id = %id, model = model.name(), "Verifying session resources");

        if let Err(reason) = verify(&settings, graph.as_ref(), model.as_ref()).await {
            tracing::error!(conversation_id = %id, reason = %reason, "Session initialization failed");
            shared.mark_closed();
            shared.release().await;
            return Err(SessionError::Initialization { reason });
        }

        let pipeline = Pipeline::from_settings(&settings, graph, model);
        shared.set_state(SessionState::Ready);
        tracing::info!(conversation_id = %id, "Session ready");

        Ok(Self {
            shared,
            settings,
            pipeline,
            opened_at: Utc::now(),
        })
    }

    pub fn id(&self) -> ConversationId {
        self.shared.id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            conversation_id: self.shared.id,
            state: self.state(),
            opened_at: self.opened_at,
            queries_processed: self.shared.queries.load(Ordering::SeqCst),
            degraded_contexts: self.pipeline.degraded_contexts(),
            model: self.shared.model.name().to_string(),
        }
    }

    /// Answer `text` in full.
    pub async fn ask(&self, text: &str) -> Result<String> {
        let guard = ProcessingGuard::acquire(&self.shared)?;
        let query = Query::new(text)?;
        tracing::info!(conversation_id = %self.id(), chars = query.as_str().len(), "Answering query");

        match self.pipeline.answer(&query).await {
            Ok(answer) => {
                guard.complete();
                Ok(answer)
            }
            Err(e) => self.fail(guard, e).await,
        }
    }

    /// Answer `text` as a stream of chunks.
    ///
    /// The session stays `Processing` until the returned stream ends, fails,
    /// is cancelled, or is dropped.
    pub async fn ask_stream(&self, text: &str) -> Result<AnswerStream> {
        let guard = ProcessingGuard::acquire(&self.shared)?;
        let query = Query::new(text)?;
        tracing::info!(conversation_id = %self.id(), chars = query.as_str().len(), "Streaming answer");

        match self.pipeline.answer_stream(&query).await {
            Ok(tokens) => Ok(AnswerStream {
                tokens,
                guard: Some(guard),
            }),
            Err(e) => self.fail(guard, e).await,
        }
    }

    /// Close the session and release both handles. Idempotent.
    pub async fn close(&self) {
        let previous = self.shared.mark_closed();
        if previous != SessionState::Closed {
            tracing::info!(conversation_id = %self.id(), from = %previous, "Session closed");
        }
        self.shared.release().await;
    }

    async fn fail<T>(&self, guard: ProcessingGuard, err: SessionError) -> Result<T> {
        if matches!(err, SessionError::Model(ModelError::Authentication(_))) {
            tracing::error!(conversation_id = %self.id(), error = %err, "Model rejected credentials, closing session");
            self.shared.mark_closed();
            drop(guard);
            self.shared.release().await;
            return Err(err);
        }
        drop(guard);
        if self.state().is_closed() {
            // Closed while the query was in flight.
            return Err(SessionError::Closed {
                conversation_id: self.id(),
            });
        }
        tracing::warn!(conversation_id = %self.id(), error = %err, "Query failed");
        Err(err)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

async fn verify(
    settings: &Settings,
    graph: &dyn GraphHandle,
    model: &dyn ModelHandle,
) -> std::result::Result<(), String> {
    match tokio::time::timeout(settings.graph_timeout, graph.ping()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("graph store unreachable: {e}")),
        Err(_) => {
            return Err(format!(
                "graph store did not respond within {:?}",
                settings.graph_timeout
            ))
        }
    }
    match tokio::time::timeout(settings.model_timeout, model.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("model {} unreachable: {e}", model.name())),
        Err(_) => Err(format!(
            "model {} did not respond within {:?}",
            model.name(),
            settings.model_timeout
        )),
    }
}

/// A streamed answer bound to its session.
///
/// Yields text chunks in order. A failure is the final item; chunks received
/// before it are not a complete answer.
pub struct AnswerStream {
    tokens: TokenStream,
    guard: Option<ProcessingGuard>,
}

impl AnswerStream {
    /// Stop the answer and return the session to `Ready`.
    pub fn cancel(&mut self) {
        self.tokens.cancel();
        if let Some(guard) = self.guard.take() {
            tracing::info!(
                conversation_id = %guard.shared.id,
                delivered = self.tokens.delivered(),
                "Answer cancelled"
            );
        }
    }

    pub fn is_finished(&self) -> bool {
        self.guard.is_none()
    }

    /// Drain into the full answer.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.tokens.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                if let Some(guard) = this.guard.take() {
                    tracing::warn!(
                        conversation_id = %guard.shared.id,
                        delivered = this.tokens.delivered(),
                        error = %e,
                        "Answer stream failed"
                    );
                    if matches!(e, ModelError::Authentication(_)) {
                        guard.close_session();
                    }
                }
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                if let Some(guard) = this.guard.take() {
                    guard.complete();
                }
                Poll::Ready(None)
            }
        }
    }
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("tokens", &self.tokens)
            .field("finished", &self.is_finished())
            .finish()
    }
}
