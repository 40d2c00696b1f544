// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Change-stream events delivered by a store subscription.

use serde::Serialize;

use crate::document::Document;

/// How a mutated document relates to the subscribed result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Appear,
    Update,
    Disappear,
}

/// Why a document is leaving the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    /// Still exists in the store but no longer matches the filter.
    LeftResultSet,
    /// Deleted from the store.
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Mutation {
    pub document_id: String,
    pub transition: Transition,
    pub result: Option<Document>,
}

impl Mutation {
    pub fn appear(document: Document) -> Self {
        Self {
            document_id: document.id().to_string(),
            transition: Transition::Appear,
            result: Some(document),
        }
    }

    pub fn update(document: Document) -> Self {
        Self {
            document_id: document.id().to_string(),
            transition: Transition::Update,
            result: Some(document),
        }
    }

    /// The document stopped matching; `result` carries its current state.
    pub fn left(document: Document) -> Self {
        Self {
            document_id: document.id().to_string(),
            transition: Transition::Disappear,
            result: Some(document),
        }
    }

    pub fn deleted(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            transition: Transition::Disappear,
            result: None,
        }
    }

    /// Classifies the event when it takes the document out of consideration.
    ///
    /// A missing result always means deletion, whatever the transition says.
    pub fn removal(&self) -> Option<Removal> {
        match (&self.result, self.transition) {
            (None, _) => Some(Removal::Deleted),
            (Some(_), Transition::Disappear) => Some(Removal::LeftResultSet),
            (Some(_), _) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MutationEvent {
    /// The subscription is live; events after this one are not missed.
    Welcome,
    Mutation(Mutation),
}
