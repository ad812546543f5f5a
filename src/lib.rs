//! # docqa
//!
//! Conversational question answering over a private document collection.
//!
//! Documents (PDF, plain text, Markdown) are split into overlapping
//! passages, embedded by a remote provider and written to a vector index.
//! Questions are rewritten against the chat history, matched against the
//! index and answered by a chat model grounded in the retrieved passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Loader  │──▶│  Ingestion  │──▶│ Vector store │
//! │ PDF/text │   │ split+embed │   │ local/qdrant │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │
//!                ┌────────────────────────┤
//!                ▼                        ▼
//!          ┌──────────┐            ┌─────────────┐
//!          │  Engine  │◀──────────▶│   History   │
//!          │ rewrite→ │            │ JSON/session│
//!          │ retrieve→│            └─────────────┘
//!          │ generate │
//!          └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`commands`] | CLI command handlers |
//! | [`embedding`] | Gemini and OpenAI embedding clients |
//! | [`engine`] | Conversational retrieval engine |
//! | [`generation`] | Gemini and OpenAI chat clients |
//! | [`history`] | Per-session chat history files |
//! | [`http`] | Shared HTTP client and error classification |
//! | [`ingest`] | Batched embedding and index build |
//! | [`loader`] | File discovery and text extraction |
//! | [`logging`] | Tracing subscriber setup |
//! | [`retry`] | Backoff schedules |
//! | [`store`] | Vector store backends |
//!
//! Pure domain types and algorithms live in the `docqa-core` crate.

pub mod commands;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod history;
pub mod http;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod retry;
pub mod store;
