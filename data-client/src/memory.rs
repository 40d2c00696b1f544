// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! In-process [`DocumentStore`] for tests and demos.
//!
//! Evaluates structured predicates only; opaque `Expr` predicates belong to a
//! real store's filter language and are rejected.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use core_types::{Document, Mutation, MutationEvent, DEFAULT_ID_FIELD};
use doc_query::{compare_values, sort_documents, Filter, Predicate, QuerySpec};
use futures::{stream, StreamExt};
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{DocumentStore, ListenStream, StoreError};

const FEED_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
enum FeedItem {
    Change {
        id: String,
        before: Option<Document>,
        after: Option<Document>,
    },
    Raw(MutationEvent),
}

#[derive(Default)]
struct MemoryInner {
    documents: HashMap<String, Document>,
    fetch_delay: Option<Duration>,
    failing_fetches: usize,
    failing_subscribes: usize,
    fetch_log: Vec<QuerySpec>,
}

pub struct MemoryStore {
    id_field: String,
    inner: Mutex<MemoryInner>,
    feed: broadcast::Sender<FeedItem>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_id_field(DEFAULT_ID_FIELD)
    }

    pub fn with_id_field(id_field: impl Into<String>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            id_field: id_field.into(),
            inner: Mutex::new(MemoryInner::default()),
            feed,
        }
    }

    /// Loads documents without notifying subscribers.
    pub fn seed<I>(&self, values: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Value>,
    {
        let docs = values
            .into_iter()
            .map(|value| Document::with_id_field(value, &self.id_field))
            .collect::<Result<Vec<_>, _>>()?;
        let mut guard = self.inner.lock();
        for doc in docs {
            guard.documents.insert(doc.id().to_string(), doc);
        }
        Ok(())
    }

    /// Creates or replaces a document and notifies subscribers.
    pub fn insert(&self, value: Value) -> Result<Document, StoreError> {
        let doc = Document::with_id_field(value, &self.id_field)?;
        let before = self
            .inner
            .lock()
            .documents
            .insert(doc.id().to_string(), doc.clone());
        self.publish(FeedItem::Change {
            id: doc.id().to_string(),
            before,
            after: Some(doc.clone()),
        });
        Ok(doc)
    }

    /// Deletes a document and notifies subscribers.
    pub fn remove(&self, id: &str) -> Option<Document> {
        let before = self.inner.lock().documents.remove(id)?;
        self.publish(FeedItem::Change {
            id: id.to_string(),
            before: Some(before.clone()),
            after: None,
        });
        Some(before)
    }

    /// Delivers `event` verbatim to every open subscription.
    pub fn inject(&self, event: MutationEvent) {
        self.publish(FeedItem::Raw(event));
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.inner.lock().documents.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.inner.lock().fetch_delay = delay;
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.inner.lock().failing_fetches = count;
    }

    pub fn fail_next_subscribes(&self, count: usize) {
        self.inner.lock().failing_subscribes = count;
    }

    /// Every query received by `fetch`, oldest first.
    pub fn fetch_log(&self) -> Vec<QuerySpec> {
        self.inner.lock().fetch_log.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.lock().fetch_log.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.receiver_count()
    }

    fn publish(&self, item: FeedItem) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.feed.send(item);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch(&self, query: &QuerySpec) -> Result<Vec<Document>, StoreError> {
        let delay = {
            let mut guard = self.inner.lock();
            guard.fetch_log.push(query.clone());
            if guard.failing_fetches > 0 {
                guard.failing_fetches -= 1;
                return Err(StoreError::Transport("injected fetch failure".into()));
            }
            guard.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let candidates: Vec<Document> = self.inner.lock().documents.values().cloned().collect();
        let mut matched = Vec::with_capacity(candidates.len());
        for doc in candidates {
            if matches_all(query.constraints(), &doc)? {
                matched.push(doc);
            }
        }
        sort_documents(&mut matched, query.order());
        let limit = query.to() - query.from();
        let page: Vec<Document> = matched.into_iter().skip(query.from()).take(limit).collect();
        debug!("memory store answered {} with {} documents", query, page.len());
        Ok(page)
    }

    async fn subscribe(&self, filter: &Filter) -> Result<ListenStream, StoreError> {
        {
            let mut guard = self.inner.lock();
            if guard.failing_subscribes > 0 {
                guard.failing_subscribes -= 1;
                return Err(StoreError::Transport("injected subscribe failure".into()));
            }
        }
        for constraint in &filter.constraints {
            ensure_supported(constraint)?;
        }
        let receiver = self.feed.subscribe();
        let filter = filter.clone();
        let welcome = stream::once(async { Ok(MutationEvent::Welcome) });
        let changes = stream::unfold(receiver, move |mut receiver| {
            let filter = filter.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(item) => {
                            if let Some(event) = translate(&filter, item) {
                                return Some((Ok(event), receiver));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            let err = StoreError::Transport(format!(
                                "change feed lagged, {skipped} events dropped"
                            ));
                            return Some((Err(err), receiver));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Box::pin(welcome.chain(changes)))
    }
}

fn translate(filter: &Filter, item: FeedItem) -> Option<MutationEvent> {
    let (id, before, after) = match item {
        FeedItem::Raw(event) => return Some(event),
        FeedItem::Change { id, before, after } => (id, before, after),
    };
    let matched = |doc: &Option<Document>| {
        doc.as_ref()
            .map(|doc| matches_all(&filter.constraints, doc).unwrap_or(false))
            .unwrap_or(false)
    };
    let mutation = match (matched(&before), matched(&after), after) {
        (false, true, Some(doc)) => Mutation::appear(doc),
        (true, true, Some(doc)) => Mutation::update(doc),
        (true, false, Some(doc)) => Mutation::left(doc),
        (true, false, None) => Mutation::deleted(id),
        _ => return None,
    };
    Some(MutationEvent::Mutation(mutation))
}

fn ensure_supported(predicate: &Predicate) -> Result<(), StoreError> {
    match predicate {
        Predicate::Expr(expression) => Err(StoreError::Unsupported(expression.clone())),
        Predicate::Compare { .. } => Ok(()),
        Predicate::All(operands) | Predicate::Any(operands) => {
            operands.iter().try_for_each(ensure_supported)
        }
    }
}

fn matches_all(constraints: &[Predicate], doc: &Document) -> Result<bool, StoreError> {
    for constraint in constraints {
        if !evaluate(constraint, doc)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate(predicate: &Predicate, doc: &Document) -> Result<bool, StoreError> {
    match predicate {
        Predicate::Expr(expression) => Err(StoreError::Unsupported(expression.clone())),
        Predicate::Compare { field, op, value } => {
            Ok(op.holds(compare_values(doc.get_path(field), Some(value))))
        }
        Predicate::All(operands) => {
            for operand in operands {
                if !evaluate(operand, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Any(operands) => {
            for operand in operands {
                if evaluate(operand, doc)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}
