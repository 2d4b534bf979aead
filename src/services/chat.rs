//! Retrieval-augmented question answering scoped to the caller's roles.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ChatError;
use crate::models::{ChatAnswer, ChatConfig, MAX_TOP_K, RequestContext, RetrievedChunk};
use crate::services::cache::{CacheManager, Fetched, cache_key_for_chat};
use crate::services::document_store::DocumentStore;
use crate::services::embedding::Embedder;
use crate::services::llm::LanguageModel;

const CONTEXT_SEPARATOR: &str = "\n\n";

const PROMPT_TEMPLATE: &str = "\
You are an assistant for an internal knowledge base.
Answer the question using only the information in the context below.
If the context does not contain the answer, reply exactly \"I don't know\" and do not make anything up.

Context:
{context}

Question:
{question}

Answer:";

/// Fill the answer template with retrieved context and the question.
pub fn render_prompt(chunks: &[RetrievedChunk], question: &str) -> String {
    let context = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    PROMPT_TEMPLATE
        .replace("{context}", &context)
        .replace("{question}", question)
}

pub struct ChatService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    llm: Arc<dyn LanguageModel>,
    cache: CacheManager,
    top_k: usize,
    cache_ttl: Duration,
}

impl ChatService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn LanguageModel>,
        cache: CacheManager,
        config: &ChatConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            cache,
            top_k: config.top_k.clamp(1, MAX_TOP_K),
            cache_ttl: config.cache_ttl(),
        }
    }

    /// Answer `question` from documents in the caller's permission groups.
    ///
    /// A caller without roles gets [`ChatAnswer::Unauthorized`]; an empty
    /// retrieval gets [`ChatAnswer::NoRelevantContent`] without a model call.
    /// Only generated answers are cached.
    pub async fn ask(&self, ctx: &RequestContext, question: &str) -> Result<ChatAnswer, ChatError> {
        if !ctx.has_roles() {
            tracing::info!(user_id = ?ctx.user_id(), "question refused: caller has no roles");
            return Ok(ChatAnswer::Unauthorized);
        }

        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidQuery("question is empty".to_string()));
        }

        let cache_key = cache_key_for_chat(ctx, question);
        let fetched = self
            .cache
            .get_or_load(&cache_key, self.cache_ttl, || self.generate(ctx, question))
            .await?;

        Ok(match fetched {
            Some(Fetched {
                value,
                from_cache: true,
            }) => {
                tracing::info!(cache_key = %cache_key, "answer served from cache");
                ChatAnswer::Answered {
                    answer: value,
                    cached: true,
                }
            }
            Some(Fetched { value, .. }) => ChatAnswer::Answered {
                answer: value,
                cached: false,
            },
            None => ChatAnswer::NoRelevantContent,
        })
    }

    /// Retrieve and call the model. `None` when nothing relevant was found.
    async fn generate(&self, ctx: &RequestContext, question: &str) -> Result<Option<String>, ChatError> {
        let groups: Vec<String> = ctx.role_set().into_iter().map(str::to_string).collect();
        let vector = self.embedder.embed(question).await?;
        let chunks = self
            .store
            .nearest_chunks(&vector, &groups, self.top_k)
            .await?;

        if chunks.is_empty() {
            tracing::info!(groups = ?groups, "no relevant chunks for question");
            return Ok(None);
        }

        tracing::debug!(
            retrieved = chunks.len(),
            nearest_distance = chunks[0].distance,
            "chunks retrieved"
        );

        let prompt = render_prompt(&chunks, question);
        Ok(Some(self.llm.complete(&prompt).await?))
    }
}
