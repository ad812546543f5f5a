//! Conversational retrieval engine.
//!
//! One operation, [`Engine::answer`], runs a stateless pass:
//!
//! ```text
//! START ─▶ REWRITING ─▶ RETRIEVING ─▶ GENERATING ─▶ DONE
//!   │          (skipped when        │
//!   └──────────history is empty)    └─ RETRY_WITH_ORIGINAL on failure
//! ```
//!
//! - **Rewriting** turns a follow-up into a standalone question. A model
//!   error or a degenerate rewrite (under two characters once trimmed)
//!   falls back to the raw question. The fallback is logged and counted
//!   in [`EngineStats`], never surfaced.
//! - **Retrieving** fetches the top-k passages. With non-empty history a
//!   failed search is retried once with the raw question.
//! - **Generating** answers from the history, the raw question and the
//!   retrieved passages joined by blank lines.
//!
//! The whole pass is retried with exponential backoff; once attempts run
//! out the last error surfaces as [`Error::Generation`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docqa_core::generation::{GenerationModel, GenerationRequest};
use docqa_core::models::{Answer, ChatMessage};
use docqa_core::rag::{
    accept_rewrite, build_context, collect_sources, passage_contents, ANSWER_SYSTEM_PROMPT,
    REWRITE_SYSTEM_PROMPT,
};
use docqa_core::store::DEFAULT_TOP_K;
use docqa_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::retry::{retry_with, Backoff};
use crate::store::Retriever;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Passages retrieved per question.
    pub k: usize,
    /// Schedule for retrying a whole answering pass.
    pub backoff: Backoff,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_TOP_K,
            backoff: Backoff::exponential(5, Duration::from_secs(2), Duration::from_secs(15)),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            backoff: config.answer.backoff(),
        }
    }
}

/// Counters for recovered failures.
#[derive(Debug, Default)]
pub struct EngineStats {
    rewrite_fallbacks: AtomicU64,
    retrieval_fallbacks: AtomicU64,
    retried_passes: AtomicU64,
}

impl EngineStats {
    /// Rewrites that failed or were degenerate and fell back to the raw question.
    pub fn rewrite_fallbacks(&self) -> u64 {
        self.rewrite_fallbacks.load(Ordering::Relaxed)
    }

    /// Searches retried with the raw question.
    pub fn retrieval_fallbacks(&self) -> u64 {
        self.retrieval_fallbacks.load(Ordering::Relaxed)
    }

    /// Answering passes that failed and were retried.
    pub fn retried_passes(&self) -> u64 {
        self.retried_passes.load(Ordering::Relaxed)
    }
}

pub struct Engine {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn GenerationModel>,
    options: EngineOptions,
    stats: EngineStats,
}

impl Engine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn GenerationModel>,
        options: EngineOptions,
    ) -> Self {
        Self {
            retriever,
            model,
            options,
            stats: EngineStats::default(),
        }
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Answer `question` in the context of `history`.
    ///
    /// # Errors
    ///
    /// [`Error::Generation`] once every attempt has failed.
    pub async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<Answer> {
        let max_attempts = self.options.backoff.max_attempts();
        let result = retry_with(
            &self.options.backoff,
            "answer",
            |_: &Error| {
                self.stats.retried_passes.fetch_add(1, Ordering::Relaxed);
                true
            },
            |attempt| async move {
                debug!(attempt, "answering pass");
                self.answer_once(question, history).await
            },
        )
        .await;

        match result {
            Ok(answer) => {
                info!(
                    sources = answer.sources.len(),
                    chunks = answer.chunks.len(),
                    "answer generated"
                );
                Ok(answer)
            }
            Err(e) => Err(Error::Generation(format!(
                "gave up after {} attempts: {}",
                max_attempts, e
            ))),
        }
    }

    async fn answer_once(&self, question: &str, history: &[ChatMessage]) -> Result<Answer> {
        let standalone = if history.is_empty() {
            None
        } else {
            self.rewrite(question, history).await
        };
        let query = standalone.as_deref().unwrap_or(question);

        let hits = match self.retriever.retrieve(query, self.options.k).await {
            Ok(hits) => hits,
            Err(e) if !history.is_empty() => {
                self.stats.retrieval_fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "retrieval failed; retrying with the original question");
                self.retriever
                    .retrieve(question, self.options.k)
                    .await
                    .map_err(|e| Error::Retrieval(e.to_string()))?
            }
            Err(e) => return Err(Error::Retrieval(e.to_string())),
        };

        let chunks = passage_contents(&hits);
        let context = build_context(&chunks);
        let answer = self
            .model
            .generate(GenerationRequest {
                system_prompt: ANSWER_SYSTEM_PROMPT,
                history,
                user_message: question,
                context: Some(&context),
            })
            .await?;

        Ok(Answer {
            answer,
            sources: collect_sources(&hits),
            chunks,
        })
    }

    /// Standalone form of `question`, or `None` to use it unchanged.
    async fn rewrite(&self, question: &str, history: &[ChatMessage]) -> Option<String> {
        let request = GenerationRequest {
            system_prompt: REWRITE_SYSTEM_PROMPT,
            history,
            user_message: question,
            context: None,
        };
        match self.model.generate(request).await {
            Ok(text) => match accept_rewrite(&text) {
                Some(rewritten) => {
                    debug!(original = question, rewritten, "question rewritten");
                    Some(rewritten.to_string())
                }
                None => {
                    self.stats.rewrite_fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(output = %text, "degenerate rewrite; using the original question");
                    None
                }
            },
            Err(e) => {
                self.stats.rewrite_fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "query rewrite failed; using the original question");
                None
            }
        }
    }
}

/// History after one completed turn.
pub fn extend_history(
    mut history: Vec<ChatMessage>,
    question: &str,
    answer: &Answer,
) -> Vec<ChatMessage> {
    history.push(ChatMessage::user(question));
    history.push(ChatMessage::assistant(
        answer.answer.clone(),
        answer.sources.clone(),
    ));
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docqa_core::models::{Metadata, Passage, ScoredPassage};
    use docqa_core::ProviderError;
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::Mutex;

    /// Scripted generation model. Rewrite and answer calls are told apart
    /// by the system prompt.
    #[derive(Default)]
    struct ScriptedModel {
        rewrites: Mutex<VecDeque<std::result::Result<String, ProviderError>>>,
        answers: Mutex<VecDeque<std::result::Result<String, ProviderError>>>,
        rewrite_calls: Mutex<Vec<String>>,
        answer_calls: Mutex<Vec<(String, usize, String)>>,
    }

    impl ScriptedModel {
        fn rewrite_with(self, r: std::result::Result<&str, ProviderError>) -> Self {
            self.rewrites
                .lock()
                .unwrap()
                .push_back(r.map(String::from));
            self
        }

        fn answer_with(self, r: std::result::Result<&str, ProviderError>) -> Self {
            self.answers.lock().unwrap().push_back(r.map(String::from));
            self
        }
    }

    #[async_trait]
    impl GenerationModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            request: GenerationRequest<'_>,
        ) -> std::result::Result<String, ProviderError> {
            if request.system_prompt == REWRITE_SYSTEM_PROMPT {
                self.rewrite_calls
                    .lock()
                    .unwrap()
                    .push(request.user_message.to_string());
                self.rewrites
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(request.user_message.to_string()))
            } else {
                self.answer_calls.lock().unwrap().push((
                    request.user_message.to_string(),
                    request.history.len(),
                    request.context.unwrap_or_default().to_string(),
                ));
                self.answers
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok("final answer".to_string()))
            }
        }
    }

    /// Returns fixed hits; fails for queries listed in `fail_on`.
    struct FakeRetriever {
        hits: Vec<ScoredPassage>,
        fail_on: Vec<String>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeRetriever {
        fn new(hits: Vec<ScoredPassage>) -> Self {
            Self {
                hits,
                fail_on: Vec::new(),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(mut self, query: &str) -> Self {
            self.fail_on.push(query.to_string());
            self
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Retriever for FakeRetriever {
        async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail_on.iter().any(|q| q == query) {
                return Err(Error::Provider(ProviderError::transient("search down")));
            }
            Ok(self.hits.iter().take(k).cloned().collect())
        }
    }

    fn hit(content: &str, source: &str) -> ScoredPassage {
        ScoredPassage {
            passage: Passage {
                content: content.into(),
                metadata: Metadata {
                    source: Some(source.into()),
                    ..Metadata::default()
                },
            },
            score: 0.9,
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("Who wrote the safety manual?"),
            ChatMessage::assistant("The operations team.", BTreeSet::new()),
        ]
    }

    fn engine(retriever: Arc<FakeRetriever>, model: Arc<ScriptedModel>) -> Engine {
        Engine::new(retriever, model, EngineOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_history_skips_rewrite() {
        let retriever = Arc::new(FakeRetriever::new(vec![hit("p1", "a.pdf")]));
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(retriever.clone(), model.clone());

        let answer = engine.answer("What is the policy?", &[]).await.unwrap();

        assert_eq!(answer.answer, "final answer");
        assert!(model.rewrite_calls.lock().unwrap().is_empty());
        assert_eq!(retriever.queries(), vec!["What is the policy?"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewritten_question_used_for_retrieval_only() {
        let retriever = Arc::new(FakeRetriever::new(vec![hit("p1", "a.pdf")]));
        let model = Arc::new(
            ScriptedModel::default().rewrite_with(Ok("  When was the safety manual revised?  ")),
        );
        let engine = engine(retriever.clone(), model.clone());

        engine.answer("When was it revised?", &history()).await.unwrap();

        assert_eq!(retriever.queries(), vec!["When was the safety manual revised?"]);
        let calls = model.answer_calls.lock().unwrap();
        assert_eq!(calls[0].0, "When was it revised?");
        assert_eq!(calls[0].1, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_rewrite_falls_back_to_original() {
        let retriever = Arc::new(FakeRetriever::new(vec![hit("p1", "a.pdf")]));
        let model = Arc::new(ScriptedModel::default().rewrite_with(Ok("")));
        let engine = engine(retriever.clone(), model);

        engine.answer("And the second rule?", &history()).await.unwrap();

        assert_eq!(retriever.queries(), vec!["And the second rule?"]);
        assert_eq!(engine.stats().rewrite_fallbacks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_error_is_swallowed() {
        let retriever = Arc::new(FakeRetriever::new(vec![hit("p1", "a.pdf")]));
        let model = Arc::new(
            ScriptedModel::default().rewrite_with(Err(ProviderError::fatal("model exploded"))),
        );
        let engine = engine(retriever.clone(), model);

        let answer = engine.answer("And then?", &history()).await.unwrap();

        assert_eq!(answer.answer, "final answer");
        assert_eq!(retriever.queries(), vec!["And then?"]);
        assert_eq!(engine.stats().rewrite_fallbacks(), 1);
        assert_eq!(engine.stats().retried_passes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retrieval_retries_with_original_question() {
        let retriever = Arc::new(
            FakeRetriever::new(vec![hit("p1", "a.pdf")]).failing_on("standalone version"),
        );
        let model = Arc::new(ScriptedModel::default().rewrite_with(Ok("standalone version")));
        let engine = engine(retriever.clone(), model);

        let answer = engine.answer("it?", &history()).await.unwrap();

        assert_eq!(retriever.queries(), vec!["standalone version", "it?"]);
        assert_eq!(answer.chunks, vec!["p1"]);
        assert_eq!(engine.stats().retrieval_fallbacks(), 1);
        assert_eq!(engine.stats().retried_passes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieval_failure_without_history_has_no_inner_fallback() {
        let retriever = Arc::new(FakeRetriever::new(vec![]).failing_on("q"));
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(retriever.clone(), model);

        let err = engine.answer("q", &[]).await.unwrap_err();

        assert!(matches!(err, Error::Generation(_)));
        assert_eq!(retriever.queries().len(), 5);
        assert_eq!(engine.stats().retrieval_fallbacks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_deduplicated_and_context_joined() {
        let retriever = Arc::new(FakeRetriever::new(vec![
            hit("first passage", "manual.pdf"),
            hit("second passage", "manual.pdf"),
            hit("third passage", "faq.txt"),
        ]));
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(retriever, model.clone());

        let answer = engine.answer("q", &[]).await.unwrap();

        let expected: BTreeSet<String> =
            ["manual.pdf", "faq.txt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(answer.sources, expected);
        assert_eq!(
            answer.chunks,
            vec!["first passage", "second passage", "third passage"]
        );
        let calls = model.answer_calls.lock().unwrap();
        assert_eq!(calls[0].2, "first passage\n\nsecond passage\n\nthird passage");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_retried_with_backoff() {
        let retriever = Arc::new(FakeRetriever::new(vec![hit("p", "a.pdf")]));
        let model = Arc::new(
            ScriptedModel::default()
                .answer_with(Err(ProviderError::transient("429")))
                .answer_with(Err(ProviderError::transient("429")))
                .answer_with(Ok("finally")),
        );
        let engine = engine(retriever, model);
        let start = tokio::time::Instant::now();

        let answer = engine.answer("q", &[]).await.unwrap();

        assert_eq!(answer.answer, "finally");
        assert_eq!(engine.stats().retried_passes(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_five_attempts() {
        let retriever = Arc::new(FakeRetriever::new(vec![hit("p", "a.pdf")]));
        let mut model = ScriptedModel::default();
        for _ in 0..5 {
            model = model.answer_with(Err(ProviderError::fatal("boom")));
        }
        let model = Arc::new(model);
        let engine = engine(retriever, model.clone());
        let start = tokio::time::Instant::now();

        let err = engine.answer("q", &[]).await.unwrap_err();

        assert!(matches!(err, Error::Generation(_)));
        assert!(err.to_string().contains("boom"));
        assert_eq!(model.answer_calls.lock().unwrap().len(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(2 + 4 + 8 + 15));
    }

    #[test]
    fn test_extend_history_appends_turn() {
        let answer = Answer {
            answer: "42".into(),
            sources: ["a.pdf".to_string()].into_iter().collect(),
            chunks: vec![],
        };
        let history = extend_history(Vec::new(), "meaning?", &answer);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("meaning?"));
        assert_eq!(history[1].sources.as_ref().unwrap().len(), 1);
    }
}
