// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Buffer bookkeeping for one window, free of I/O.
//!
//! [`WindowState`] tracks the sorted buffer, its offset in the full collection
//! (`origin`) and the caller's `[from, to)` bounds. Every method runs to
//! completion synchronously; the engine decides when to call them and what to
//! fetch based on [`WindowState::plan_backfill`].
//!
//! Coordinates: the document at `buffer[i]` sits at position `origin + i` of
//! the full ordered collection. The window maps to buffer indices
//! `[from - origin, to - origin)`, clamped to the buffer.

use std::{cmp::Ordering, sync::Arc};

use core_types::{validate_range, Document, Mutation, RangeError, Removal, MAX_RANGE};
use doc_query::{compare, sort_documents, OrderTerm, Side};

use crate::merge::merge;

/// Documents missing on each side of the buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deficits {
    pub front: usize,
    pub rear: usize,
}

impl Deficits {
    pub fn any(&self) -> bool {
        self.front > 0 || self.rear > 0
    }
}

/// The next fetch needed to restore the buffer margins.
#[derive(Clone, Debug, PartialEq)]
pub enum FillPlan {
    /// Re-read a range from scratch; the buffer cannot be extended from a pivot.
    Range { from: usize, to: usize },
    Pivot {
        side: Side,
        pivot: Document,
        count: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Became the first document of the collection.
    Prepended,
    Inserted,
    /// Became the last document of the collection.
    Appended,
    /// Sorts before the buffer; only `origin` moved.
    BeforeBuffer,
    /// Sorts after the buffer; dropped.
    AfterBuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    Removed(Removal),
    Updated,
    /// Updated document moved beyond the given end of the buffer and was dropped.
    Displaced(Side),
    Placed(Placement),
    Ignored,
}

/// Buffer split around the window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Regions {
    pub pre: Vec<Document>,
    pub window: Vec<Document>,
    pub post: Vec<Document>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillOutcome {
    pub added: usize,
    pub trimmed: usize,
}

#[derive(Clone, Debug)]
pub struct WindowState {
    order: Vec<OrderTerm>,
    from: usize,
    to: usize,
    buffer_factor: usize,
    origin: usize,
    buffer: Arc<Vec<Document>>,
    has_snapshot: bool,
    reached_end: bool,
}

impl WindowState {
    /// `order` must end in a unique tie-breaker for placement to be exact.
    pub fn new(
        order: Vec<OrderTerm>,
        from: usize,
        to: usize,
        buffer_factor: usize,
    ) -> Result<Self, RangeError> {
        validate_range(from, to)?;
        Ok(Self {
            order,
            from,
            to,
            buffer_factor,
            origin: 0,
            buffer: Arc::new(Vec::new()),
            has_snapshot: false,
            reached_end: false,
        })
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn from(&self) -> usize {
        self.from
    }

    pub fn to(&self) -> usize {
        self.to
    }

    pub fn size(&self) -> usize {
        self.to - self.from
    }

    /// Documents wanted on each side of the window.
    pub fn budget(&self) -> usize {
        self.size().saturating_mul(self.buffer_factor)
    }

    pub fn optimal_len(&self) -> usize {
        self.budget()
            .saturating_mul(2)
            .saturating_add(self.size())
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    pub fn reached_end(&self) -> bool {
        self.reached_end
    }

    /// Read-only view; later changes swap in a new vector instead of touching this one.
    pub fn buffer(&self) -> Arc<Vec<Document>> {
        Arc::clone(&self.buffer)
    }

    /// Validates before touching anything.
    pub fn set_range(&mut self, from: usize, to: usize) -> Result<(), RangeError> {
        validate_range(from, to)?;
        self.from = from;
        self.to = to;
        Ok(())
    }

    fn wanted_from(&self) -> usize {
        self.from.saturating_sub(self.budget())
    }

    fn wanted_end(&self) -> usize {
        self.to.saturating_add(self.budget())
    }

    fn current_end(&self) -> usize {
        self.origin + self.buffer.len()
    }

    pub fn deficits(&self) -> Deficits {
        if !self.has_snapshot {
            return Deficits::default();
        }
        let front = self.origin.saturating_sub(self.wanted_from());
        let rear = if self.reached_end {
            0
        } else {
            self.wanted_end().saturating_sub(self.current_end())
        };
        Deficits { front, rear }
    }

    /// Range for a fresh snapshot: the window plus both budgets, narrowed to
    /// [`MAX_RANGE`] documents around the window when larger.
    pub fn snapshot_range(&self) -> (usize, usize) {
        let wanted_from = self.wanted_from();
        let wanted_end = self.wanted_end();
        if wanted_end - wanted_from <= MAX_RANGE {
            return (wanted_from, wanted_end);
        }
        let slack = MAX_RANGE - self.size();
        let lead = (self.from - wanted_from).min(slack / 2);
        let start = self.from - lead;
        (start, start.saturating_add(MAX_RANGE).min(wanted_end))
    }

    /// Buffer indices of the window, clamped.
    fn window_bounds(&self) -> (usize, usize) {
        let len = self.buffer.len();
        let start = self.from.saturating_sub(self.origin).min(len);
        let end = self.to.saturating_sub(self.origin).min(len);
        (start, end)
    }

    pub fn window(&self) -> Vec<Document> {
        let (start, end) = self.window_bounds();
        self.buffer[start..end].to_vec()
    }

    pub fn regions(&self) -> Regions {
        let (start, end) = self.window_bounds();
        Regions {
            pre: self.buffer[..start].to_vec(),
            window: self.buffer[start..end].to_vec(),
            post: self.buffer[end..].to_vec(),
        }
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.buffer.iter().position(|doc| doc.id() == id)
    }

    /// Replaces the buffer with a fetched range starting at `origin`.
    pub fn apply_snapshot(&mut self, origin: usize, documents: Vec<Document>, requested: usize) {
        let received = documents.len();
        let mut docs = merge(&[], documents, Side::Rear);
        sort_documents(&mut docs, &self.order);
        self.origin = origin;
        self.buffer = Arc::new(docs);
        self.has_snapshot = true;
        self.reached_end = received < requested;
    }

    /// Extends one side with documents fetched beyond its pivot.
    ///
    /// Front results arrive closest-first and are reversed here.
    pub fn apply_fill(
        &mut self,
        side: Side,
        mut documents: Vec<Document>,
        requested: usize,
    ) -> FillOutcome {
        let received = documents.len();
        if side == Side::Front {
            documents.reverse();
        }
        let before = self.buffer.len();
        let mut merged = merge(&self.buffer, documents, side);
        sort_documents(&mut merged, &self.order);
        let added = merged.len() - before;
        match side {
            Side::Front if received < requested => self.origin = 0,
            Side::Front => self.origin = self.origin.saturating_sub(added),
            Side::Rear => {
                if received < requested {
                    self.reached_end = true;
                }
            }
        }
        let trimmed = self.trim_excess(&mut merged);
        self.buffer = Arc::new(merged);
        FillOutcome { added, trimmed }
    }

    /// Cuts whichever side exceeds its budget, front first.
    fn trim_excess(&mut self, docs: &mut Vec<Document>) -> usize {
        if docs.len() <= self.optimal_len() {
            return 0;
        }
        let budget = self.budget();
        let len = docs.len();
        let pre = self.from.saturating_sub(self.origin).min(len);
        let window_end = self.to.saturating_sub(self.origin).min(len);
        let post = len - window_end;
        if pre > budget {
            let cut = pre - budget;
            docs.drain(..cut);
            self.origin += cut;
            cut
        } else if post > budget {
            docs.truncate(window_end + budget);
            self.reached_end = false;
            post - budget
        } else {
            0
        }
    }

    pub fn apply_mutation(&mut self, mutation: &Mutation) -> MutationOutcome {
        if !self.has_snapshot {
            return MutationOutcome::Ignored;
        }
        let existing = self.position_of(&mutation.document_id);
        if let Some(removal) = mutation.removal() {
            return match existing {
                Some(idx) => {
                    Arc::make_mut(&mut self.buffer).remove(idx);
                    MutationOutcome::Removed(removal)
                }
                None => MutationOutcome::Ignored,
            };
        }
        let Some(doc) = mutation.result.clone() else {
            return MutationOutcome::Ignored;
        };
        match existing {
            Some(idx) => self.replace(idx, doc),
            None => MutationOutcome::Placed(self.place(doc)),
        }
    }

    /// Swaps in the new version and re-sorts.
    ///
    /// A document that moved onto an open end of the buffer may belong beyond
    /// it, so it is dropped and left to the next backfill.
    fn replace(&mut self, idx: usize, doc: Document) -> MutationOutcome {
        let id = doc.id().to_string();
        let buf = Arc::make_mut(&mut self.buffer);
        buf[idx] = doc;
        sort_documents(buf, &self.order);
        let len = buf.len();
        let Some(pos) = buf.iter().position(|d| d.id() == id) else {
            return MutationOutcome::Updated;
        };
        if len > 1 && pos != idx {
            if pos == 0 && self.origin > 0 {
                buf.remove(0);
                self.origin += 1;
                return MutationOutcome::Displaced(Side::Front);
            }
            if pos == len - 1 && !self.reached_end {
                buf.pop();
                return MutationOutcome::Displaced(Side::Rear);
            }
        }
        MutationOutcome::Updated
    }

    /// Positions a document that is not buffered yet.
    pub fn place(&mut self, doc: Document) -> Placement {
        let optimal = self.optimal_len();
        let budget = self.budget();
        let (window_start, window_end) = self.window_bounds();
        let pre = window_start;
        let post = self.buffer.len() - window_end;
        let order = &self.order;
        let buf = Arc::make_mut(&mut self.buffer);

        if buf.is_empty() {
            if self.origin == 0 {
                buf.push(doc);
                return Placement::Prepended;
            }
            self.origin += 1;
            return Placement::BeforeBuffer;
        }

        if compare(&doc, &buf[0], order) == Ordering::Less {
            if self.origin > 0 {
                self.origin += 1;
                return Placement::BeforeBuffer;
            }
            if buf.len() >= optimal {
                buf.pop();
                self.reached_end = false;
            }
            buf.insert(0, doc);
            return Placement::Prepended;
        }

        if compare(&doc, &buf[buf.len() - 1], order) == Ordering::Greater {
            if self.reached_end && buf.len() < optimal {
                buf.push(doc);
                return Placement::Appended;
            }
            self.reached_end = false;
            return Placement::AfterBuffer;
        }

        if post > 0 && post >= budget {
            buf.pop();
            self.reached_end = false;
        } else if pre > 0 && pre >= budget {
            buf.remove(0);
            self.origin += 1;
        }
        let pos = buf.partition_point(|existing| compare(existing, &doc, order) == Ordering::Less);
        buf.insert(pos, doc);
        Placement::Inserted
    }

    /// Decides the next fetch, or `None` when both margins are satisfied.
    pub fn plan_backfill(&self) -> Option<FillPlan> {
        let deficits = self.deficits();
        if !deficits.any() {
            return None;
        }
        let (side, count) = if deficits.front > 0 {
            (Side::Front, deficits.front)
        } else {
            (Side::Rear, deficits.rear)
        };
        let disjoint = self.to <= self.origin || self.from >= self.current_end();
        if self.buffer.is_empty() || (disjoint && count > MAX_RANGE) {
            let (from, to) = self.snapshot_range();
            return Some(FillPlan::Range { from, to });
        }
        let pivot = match side {
            Side::Front => self.buffer[0].clone(),
            Side::Rear => self.buffer[self.buffer.len() - 1].clone(),
        };
        Some(FillPlan::Pivot {
            side,
            pivot,
            count: count.min(MAX_RANGE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_query::is_sorted;
    use serde_json::json;

    fn order() -> Vec<OrderTerm> {
        vec![OrderTerm::desc("ts"), OrderTerm::asc("_id")]
    }

    /// Documents `d000..` with descending timestamps starting at `top`.
    fn stamped(count: usize, top: i64) -> Vec<Document> {
        (0..count)
            .map(|i| doc(&format!("d{i:03}"), top - i as i64 * 10))
            .collect()
    }

    fn doc(id: &str, ts: i64) -> Document {
        Document::from_value(json!({"_id": id, "ts": ts})).unwrap()
    }

    fn ids(docs: &[Document]) -> Vec<String> {
        docs.iter().map(|d| d.id().to_string()).collect()
    }

    fn state(from: usize, to: usize, factor: usize) -> WindowState {
        WindowState::new(order(), from, to, factor).unwrap()
    }

    fn assert_invariants(state: &WindowState) {
        let buffer = state.buffer();
        assert!(is_sorted(&buffer, state.order()), "buffer out of order");
        let mut seen = std::collections::HashSet::new();
        assert!(buffer.iter().all(|d| seen.insert(d.id().to_string())), "duplicate ids");
    }

    #[test]
    fn huge_buffer_factor_saturates() {
        let s = state(10, 15, usize::MAX);
        assert_eq!(s.budget(), usize::MAX);
        assert_eq!(s.optimal_len(), usize::MAX);
        assert_eq!(s.snapshot_range(), (0, MAX_RANGE));
    }

    #[test]
    fn sizing_follows_buffer_factor() {
        let s = state(10, 15, 3);
        assert_eq!(s.size(), 5);
        assert_eq!(s.budget(), 15);
        assert_eq!(s.optimal_len(), 35);
        assert_eq!(s.snapshot_range(), (0, 30));
        assert!(!s.deficits().any());
    }

    #[test]
    fn oversized_snapshot_is_narrowed_around_window() {
        let s = state(5000, 5400, 3);
        let (from, to) = s.snapshot_range();
        assert_eq!(to - from, MAX_RANGE);
        assert!(from <= 5000 && to >= 5400);
        assert_eq!(from, 5000 - (MAX_RANGE - 400) / 2);
    }

    #[test]
    fn set_range_failure_leaves_bounds_untouched() {
        let mut s = state(0, 5, 3);
        assert!(s.set_range(0, MAX_RANGE + 1).is_err());
        assert!(s.set_range(9, 4).is_err());
        assert_eq!((s.from(), s.to()), (0, 5));
    }

    #[test]
    fn short_snapshot_marks_collection_end() {
        let mut s = state(0, 5, 3);
        s.apply_snapshot(0, stamped(10, 1000), 20);
        assert!(s.reached_end());
        assert_eq!(s.deficits(), Deficits::default());
        assert_eq!(ids(&s.window()), vec!["d000", "d001", "d002", "d003", "d004"]);
    }

    #[test]
    fn old_document_is_appended_when_end_is_known() {
        let mut s = state(0, 5, 3);
        s.apply_snapshot(0, stamped(10, 1000), 20);
        let before = s.window();
        let placement = s.place(doc("old", 0));
        assert_eq!(placement, Placement::Appended);
        assert_eq!(s.len(), 11);
        assert_eq!(s.buffer().last().unwrap().id(), "old");
        assert_eq!(s.window(), before);
        assert!(!s.deficits().any());
        assert_invariants(&s);
    }

    #[test]
    fn document_after_open_buffer_is_ignored() {
        let mut s = state(0, 5, 3);
        s.apply_snapshot(0, stamped(20, 1000), 20);
        assert!(!s.reached_end());
        assert_eq!(s.place(doc("old", 0)), Placement::AfterBuffer);
        assert_eq!(s.len(), 20);
    }

    #[test]
    fn insert_before_window_evicts_full_rear() {
        let mut s = state(12, 17, 3);
        s.apply_snapshot(0, stamped(32, 1000), 32);
        let placement = s.place(doc("new", 995));
        assert_eq!(placement, Placement::Inserted);
        assert_eq!(s.origin(), 0);
        assert_eq!(s.len(), 32);
        assert_eq!(s.buffer()[1].id(), "new");
        assert_eq!(s.buffer().last().unwrap().id(), "d030");
        assert!(!s.deficits().any());
        assert_invariants(&s);
    }

    #[test]
    fn insert_with_open_rear_evicts_full_front() {
        let mut s = state(15, 20, 3);
        // pre = 15 (full), post = 5 (short, end not reached)
        s.apply_snapshot(0, stamped(25, 1000), 25);
        let placement = s.place(doc("new", 835));
        assert_eq!(placement, Placement::Inserted);
        assert_eq!(s.origin(), 1);
        assert_eq!(s.len(), 25);
        assert_eq!(s.buffer()[0].id(), "d001");
        assert_invariants(&s);
    }

    #[test]
    fn document_before_offset_buffer_only_shifts_origin() {
        let mut s = state(8, 10, 3);
        s.apply_snapshot(2, stamped(14, 1000), 14);
        assert!(!s.deficits().any());
        let placement = s.place(doc("newest", 5000));
        assert_eq!(placement, Placement::BeforeBuffer);
        assert_eq!(s.origin(), 3);
        assert_eq!(s.len(), 14);
        assert_eq!(s.deficits().front, 1);
        match s.plan_backfill() {
            Some(FillPlan::Pivot { side, pivot, count }) => {
                assert_eq!(side, Side::Front);
                assert_eq!(pivot.id(), "d000");
                assert_eq!(count, 1);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn first_document_into_empty_collection() {
        let mut s = state(0, 5, 3);
        s.apply_snapshot(0, Vec::new(), 20);
        assert!(s.window().is_empty());
        assert_eq!(s.place(doc("only", 1)), Placement::Prepended);
        assert_eq!(ids(&s.window()), vec!["only"]);
        assert!(!s.deficits().any());
    }

    #[test]
    fn prepend_at_collection_start_drops_tail_when_full() {
        let mut s = state(0, 1, 1);
        s.apply_snapshot(0, stamped(3, 1000), 2);
        assert_eq!(s.len(), 3);
        assert_eq!(s.place(doc("top", 5000)), Placement::Prepended);
        assert_eq!(ids(&s.buffer()), vec!["top", "d000", "d001"]);
    }

    #[test]
    fn removal_and_update_keep_invariants() {
        let mut s = state(0, 5, 1);
        s.apply_snapshot(0, stamped(10, 1000), 10);
        let outcome = s.apply_mutation(&Mutation::deleted("d003"));
        assert_eq!(outcome, MutationOutcome::Removed(Removal::Deleted));
        assert_eq!(s.len(), 9);

        let outcome = s.apply_mutation(&Mutation::update(doc("d001", 975)));
        assert_eq!(outcome, MutationOutcome::Updated);
        assert_eq!(ids(&s.window()), vec!["d000", "d002", "d001", "d004", "d005"]);
        assert_invariants(&s);

        let outcome = s.apply_mutation(&Mutation::deleted("missing"));
        assert_eq!(outcome, MutationOutcome::Ignored);
    }

    #[test]
    fn update_moving_past_open_end_is_displaced() {
        let mut s = state(0, 2, 1);
        s.apply_snapshot(0, stamped(4, 1000), 4);
        assert!(!s.reached_end());
        let outcome = s.apply_mutation(&Mutation::update(doc("d001", -50)));
        assert_eq!(outcome, MutationOutcome::Displaced(Side::Rear));
        assert_eq!(ids(&s.buffer()), vec!["d000", "d002", "d003"]);
        assert_eq!(s.deficits().rear, 1);
    }

    #[test]
    fn update_moving_before_offset_start_is_displaced() {
        let mut s = state(4, 6, 1);
        s.apply_snapshot(2, stamped(6, 1000), 6);
        let outcome = s.apply_mutation(&Mutation::update(doc("d003", 5000)));
        assert_eq!(outcome, MutationOutcome::Displaced(Side::Front));
        assert_eq!(s.origin(), 3);
        assert_eq!(s.position_of("d003"), None);
    }

    #[test]
    fn mutations_before_snapshot_are_ignored() {
        let mut s = state(0, 5, 1);
        assert_eq!(
            s.apply_mutation(&Mutation::appear(doc("x", 1))),
            MutationOutcome::Ignored
        );
        assert!(s.is_empty());
    }

    #[test]
    fn rear_fill_appends_and_detects_end() {
        let mut s = state(0, 5, 1);
        let all = stamped(12, 1000);
        s.apply_snapshot(0, all[..6].to_vec(), 10);
        // pretend the short snapshot was a partial answer
        s.reached_end = false;
        assert_eq!(s.deficits().rear, 4);
        let outcome = s.apply_fill(Side::Rear, all[5..8].to_vec(), 4);
        assert_eq!(outcome.added, 2);
        assert!(s.reached_end());
        assert_eq!(s.len(), 8);
        assert_invariants(&s);
    }

    #[test]
    fn front_fill_reverses_and_moves_origin() {
        let mut s = state(10, 12, 2);
        let all = stamped(30, 1000);
        s.apply_snapshot(8, all[8..16].to_vec(), 8);
        s.set_range(6, 8).unwrap();
        assert_eq!(s.deficits().front, 6);
        // closest-first, as a reversed query returns them
        let incoming: Vec<Document> = all[2..8].iter().rev().cloned().collect();
        let outcome = s.apply_fill(Side::Front, incoming, 6);
        assert_eq!(outcome.added, 6);
        assert_eq!(s.origin(), 2);
        assert_eq!(s.buffer()[0].id(), "d002");
        assert_eq!(ids(&s.window()), vec!["d006", "d007"]);
        assert_invariants(&s);
    }

    #[test]
    fn short_front_fill_pins_origin_to_zero() {
        let mut s = state(2, 4, 1);
        let all = stamped(10, 1000);
        s.apply_snapshot(5, all[3..8].to_vec(), 4);
        let incoming: Vec<Document> = all[..3].iter().rev().cloned().collect();
        s.apply_fill(Side::Front, incoming, 4);
        assert_eq!(s.origin(), 0);
        assert_eq!(s.buffer()[0].id(), "d000");
    }

    #[test]
    fn overfull_fill_trims_only_the_excess_side() {
        let mut s = state(4, 6, 1);
        let all = stamped(20, 1000);
        s.apply_snapshot(3, all[3..7].to_vec(), 4);
        s.reached_end = false;
        let outcome = s.apply_fill(Side::Rear, all[7..12].to_vec(), 5);
        assert_eq!(outcome.trimmed, 5);
        assert_eq!(s.len(), s.optimal_len());
        assert_eq!(s.origin(), 3);
        assert_eq!(ids(&s.regions().post), vec!["d006"]);
        assert!(!s.reached_end());
    }

    #[test]
    fn regions_partition_the_buffer() {
        let mut s = state(3, 5, 1);
        s.apply_snapshot(2, stamped(5, 1000), 4);
        let regions = s.regions();
        assert_eq!(ids(&regions.pre), vec!["d000"]);
        assert_eq!(ids(&regions.window), vec!["d001", "d002"]);
        assert_eq!(ids(&regions.post), vec!["d003", "d004"]);
    }

    #[test]
    fn distant_jump_plans_a_range_refetch() {
        let mut s = state(0, 10, 1);
        s.apply_snapshot(0, stamped(20, 100_000), 20);
        s.set_range(5000, 5010).unwrap();
        assert_eq!(
            s.plan_backfill(),
            Some(FillPlan::Range {
                from: 4990,
                to: 5020
            })
        );
        s.set_range(15, 25).unwrap();
        assert!(matches!(
            s.plan_backfill(),
            Some(FillPlan::Pivot {
                side: Side::Rear,
                count: 15,
                ..
            })
        ));
    }
}
