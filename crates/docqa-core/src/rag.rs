//! Prompt constants and the pure steps of answering a question.

use std::collections::BTreeSet;

use crate::models::ScoredPassage;

/// System instruction for turning a follow-up into a standalone question.
pub const REWRITE_SYSTEM_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can \
be understood without the chat history. Do NOT answer the question, just reformulate it if \
needed and otherwise return it as is.";

/// System instruction for grounded answering. `{context}` is replaced by
/// the retrieved passages.
pub const ANSWER_SYSTEM_PROMPT: &str = "You are an AI Knowledge Assistant. Use the following \
pieces of retrieved context to answer the question. If you don't know the answer, just say \
that you don't know, don't try to make up an answer. Keep the answer concise and \
professional.\n\nContext:\n{context}";

/// Rewrites shorter than this (after trimming, in characters) are discarded.
pub const MIN_REWRITE_CHARS: usize = 2;

/// Separator between passages in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// The usable rewrite, or `None` when it is empty or degenerate.
pub fn accept_rewrite(rewritten: &str) -> Option<&str> {
    let trimmed = rewritten.trim();
    if trimmed.chars().count() < MIN_REWRITE_CHARS {
        None
    } else {
        Some(trimmed)
    }
}

/// Passage contents in retrieval order.
pub fn passage_contents(hits: &[ScoredPassage]) -> Vec<String> {
    hits.iter().map(|h| h.passage.content.clone()).collect()
}

/// Join passage contents with blank lines.
pub fn build_context(chunks: &[String]) -> String {
    chunks.join(CONTEXT_SEPARATOR)
}

/// Deduplicated `source` labels of the hits.
pub fn collect_sources(hits: &[ScoredPassage]) -> BTreeSet<String> {
    hits.iter().map(|h| h.passage.source().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, Passage, UNKNOWN_SOURCE};

    fn hit(content: &str, source: Option<&str>) -> ScoredPassage {
        ScoredPassage {
            passage: Passage {
                content: content.into(),
                metadata: Metadata {
                    source: source.map(String::from),
                    ..Metadata::default()
                },
            },
            score: 0.5,
        }
    }

    #[test]
    fn test_accept_rewrite() {
        assert_eq!(accept_rewrite("  What is X?  "), Some("What is X?"));
        assert_eq!(accept_rewrite(""), None);
        assert_eq!(accept_rewrite("   "), None);
        assert_eq!(accept_rewrite(" ? "), None);
        assert_eq!(accept_rewrite("ok"), Some("ok"));
    }

    #[test]
    fn test_build_context_order() {
        let hits = vec![hit("first", Some("a")), hit("second", Some("b"))];
        let chunks = passage_contents(&hits);
        assert_eq!(build_context(&chunks), "first\n\nsecond");
    }

    #[test]
    fn test_collect_sources_dedupes() {
        let hits = vec![
            hit("1", Some("a.pdf")),
            hit("2", Some("a.pdf")),
            hit("3", Some("b.pdf")),
            hit("4", None),
        ];
        let sources = collect_sources(&hits);
        assert_eq!(sources.len(), 3);
        assert!(sources.contains("a.pdf"));
        assert!(sources.contains(UNKNOWN_SOURCE));
    }

    #[test]
    fn test_answer_prompt_has_context_placeholder() {
        assert!(ANSWER_SYSTEM_PROMPT.ends_with("Context:\n{context}"));
        assert!(!REWRITE_SYSTEM_PROMPT.contains("{context}"));
    }
}
