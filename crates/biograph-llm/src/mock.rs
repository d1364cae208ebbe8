//! Scripted in-process model for tests and offline runs.
//!
//! Each `complete` or `stream` call consumes the next [`Step`]. Once the
//! script is exhausted every call returns [`ScriptedModel::fallback`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;

use biograph_core::Prompt;

use crate::error::ModelError;
use crate::handle::{ChunkStream, GenerationParams, ModelHandle};

#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(ModelError),
    /// Streamed chunks, optionally followed by a failure.
    Chunks {
        chunks: Vec<String>,
        then: Option<ModelError>,
    },
    /// Never responds.
    Hang,
}

pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    ping_error: Option<ModelError>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<Prompt>>,
    closed: AtomicBool,
}

impl ScriptedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Fail(ModelError::Unavailable("script exhausted".to_string())),
            ping_error: None,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// A model whose ping fails, for initialization tests.
    pub fn unreachable(name: impl Into<String>, err: ModelError) -> Self {
        let mut model = Self::new(name);
        model.ping_error = Some(err);
        model
    }

    pub fn then(self, step: Step) -> Self {
        lock(&self.script).push_back(step);
        self
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.then(Step::Reply(text.into()))
    }

    pub fn fail(self, err: ModelError) -> Self {
        self.then(Step::Fail(err))
    }

    pub fn chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Step::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            then: None,
        })
    }

    pub fn chunks_then_fail<I, S>(self, chunks: I, err: ModelError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Step::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            then: Some(err),
        })
    }

    pub fn hang(self) -> Self {
        self.then(Step::Hang)
    }

    /// Step used after the script runs out.
    pub fn fallback(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    /// Number of `complete` and `stream` calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        lock(&self.last_prompt).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_step(&self, prompt: &Prompt) -> Result<Step, ModelError> {
        if self.is_closed() {
            return Err(ModelError::Unavailable("model client closed".to_string()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_prompt) = Some(prompt.clone());
        Ok(lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ModelHandle for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<(), ModelError> {
        match &self.ping_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        _params: &GenerationParams,
    ) -> Result<String, ModelError> {
        match self.next_step(prompt)? {
            Step::Reply(text) => Ok(text),
            Step::Fail(err) => Err(err),
            Step::Chunks { chunks, then } => match then {
                Some(err) => Err(err),
                None => Ok(chunks.concat()),
            },
            Step::Hang => futures::future::pending().await,
        }
    }

    async fn stream(
        &self,
        prompt: &Prompt,
        _params: &GenerationParams,
    ) -> Result<ChunkStream, ModelError> {
        match self.next_step(prompt)? {
            Step::Reply(text) => Ok(futures::stream::iter(vec![Ok(text)]).boxed()),
            Step::Fail(err) => Err(err),
            Step::Chunks { chunks, then } => {
                let items = chunks.into_iter().map(Ok).chain(then.map(Err));
                Ok(futures::stream::iter(items.collect::<Vec<_>>()).boxed())
            }
            Step::Hang => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
