// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Query descriptions for windowed document fetches.
//!
//! - [`QuerySpec`]: immutable range/filter/order builder with full and filter-only
//!   serialization.
//! - [`ordering`]: the multi-key comparator shared by the buffer and the stores.
//! - [`pivot`]: cursor predicates used to fetch documents beyond a boundary document.

pub mod ordering;
pub mod pivot;
pub mod predicate;
pub mod spec;

pub use ordering::{compare, compare_values, is_sorted, sort_documents, Direction, OrderTerm};
pub use pivot::{pivot_constraints, pivot_query, Side};
pub use predicate::{Operator, Predicate};
pub use spec::{Filter, Params, QueryError, QuerySpec};
