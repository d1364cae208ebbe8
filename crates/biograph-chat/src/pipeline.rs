//! The query pipeline: graph context, then prompt, then answer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use biograph_core::{Prompt, PromptComposer, Query, Settings};
use biograph_graph::{ContextProvider, GraphHandle};
use biograph_llm::{AnswerGenerator, ModelHandle, TokenStream};

use crate::error::Result;

/// Runs one query through context retrieval, prompt composition and
/// generation. Holds no per-query state beyond a count of queries that
/// went ahead without graph context.
pub struct Pipeline {
    graph: Arc<dyn GraphHandle>,
    context: ContextProvider,
    composer: PromptComposer,
    generator: AnswerGenerator,
    degraded: AtomicU64,
}

impl Pipeline {
    pub fn new(
        graph: Arc<dyn GraphHandle>,
        context: ContextProvider,
        composer: PromptComposer,
        generator: AnswerGenerator,
    ) -> Self {
        Self {
            graph,
            context,
            composer,
            generator,
            degraded: AtomicU64::new(0),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        graph: Arc<dyn GraphHandle>,
        model: Arc<dyn ModelHandle>,
    ) -> Self {
        Self::new(
            graph,
            ContextProvider::from_settings(settings),
            PromptComposer::default(),
            AnswerGenerator::from_settings(model, settings),
        )
    }

    pub fn generator(&self) -> &AnswerGenerator {
        &self.generator
    }

    /// Queries whose prompt was composed after graph retrieval failed.
    pub fn degraded_contexts(&self) -> u64 {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Retrieve context for `query` and compose the prompt.
    pub async fn prepare(&self, query: &Query) -> Result<Prompt> {
        let context = self.context.fetch_context(query, self.graph.as_ref()).await?;
        if context.is_degraded() {
            self.degraded.fetch_add(1, Ordering::SeqCst);
        }
        tracing::debug!(
            facts = context.len(),
            degraded = context.is_degraded(),
            "Prompt composed"
        );
        Ok(self.composer.compose(query, &context))
    }

    pub async fn answer(&self, query: &Query) -> Result<String> {
        let prompt = self.prepare(query).await?;
        Ok(self.generator.generate(&prompt).await?)
    }

    pub async fn answer_stream(&self, query: &Query) -> Result<TokenStream> {
        let prompt = self.prepare(query).await?;
        Ok(self.generator.generate_stream(&prompt).await?)
    }
}
