// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::collections::HashSet;

use core_types::Document;
use doc_query::Side;

/// Joins `incoming` onto `existing`, skipping identifiers already present.
///
/// Front merges prepend, rear merges append. The result is not re-sorted.
pub fn merge(existing: &[Document], incoming: Vec<Document>, side: Side) -> Vec<Document> {
    let known: HashSet<&str> = existing.iter().map(Document::id).collect();
    let mut added: HashSet<String> = HashSet::new();
    let fresh: Vec<Document> = incoming
        .into_iter()
        .filter(|doc| !known.contains(doc.id()) && added.insert(doc.id().to_string()))
        .collect();
    let mut merged = Vec::with_capacity(existing.len() + fresh.len());
    match side {
        Side::Front => {
            merged.extend(fresh);
            merged.extend_from_slice(existing);
        }
        Side::Rear => {
            merged.extend_from_slice(existing);
            merged.extend(fresh);
        }
    }
    merged
}
