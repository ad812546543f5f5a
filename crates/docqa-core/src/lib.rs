//! # docqa core
//!
//! Pure logic for the document question-answering pipeline: the data
//! model, the error taxonomy, the recursive segmenter, the collaborator
//! traits (embedding, generation, vector storage) and the prompt and
//! context assembly used by the answering engine.
//!
//! This crate performs no network or filesystem I/O. Concrete providers,
//! persistent stores and orchestration live in the `docqa` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod rag;
pub mod store;

pub use error::{Error, ErrorKind, ProviderError, Result};
