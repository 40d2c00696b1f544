// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! DocumentStore trait.

pub mod memory;

pub use memory::MemoryStore;

use std::pin::Pin;

use core_types::{Document, DocumentError, MutationEvent};
use doc_query::{Filter, QuerySpec};
use futures::Stream;
use thiserror::Error;

/// Live change feed. Dropping the stream ends the subscription.
pub type ListenStream = Pin<Box<dyn Stream<Item = Result<MutationEvent, StoreError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("change stream closed")]
    Closed,
    #[error("unsupported predicate: {0}")]
    Unsupported(String),
    #[error("invalid document: {0}")]
    Document(#[from] DocumentError),
}

/// Remote ordered collection the window engine reads from.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Runs a paginated, filtered, sorted query.
    async fn fetch(&self, query: &QuerySpec) -> Result<Vec<Document>, StoreError>;

    /// Opens a change feed for every document matching `filter`, regardless of
    /// pagination or order. The first item is [`MutationEvent::Welcome`] once the
    /// feed is live.
    async fn subscribe(&self, filter: &Filter) -> Result<ListenStream, StoreError>;
}
