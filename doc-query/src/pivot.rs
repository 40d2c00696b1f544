// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Cursor constraints for "the next N documents before/after this one".

use core_types::Document;
use serde::Serialize;
use serde_json::Value;

use crate::{
    ordering::{Direction, OrderTerm},
    predicate::{Operator, Predicate},
    spec::{QueryError, QuerySpec},
};

/// End of the buffer being extended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Before the first buffered document.
    Front,
    /// After the last buffered document.
    Rear,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Rear => "rear",
        }
    }
}

fn strict_operator(direction: Direction, side: Side) -> Operator {
    let op = match direction {
        Direction::Asc => Operator::Gt,
        Direction::Desc => Operator::Lt,
    };
    match side {
        Side::Rear => op,
        Side::Front => op.inverted(),
    }
}

fn pivot_value(pivot: &Document, field: &str) -> Value {
    pivot.get_path(field).cloned().unwrap_or(Value::Null)
}

/// Predicates matching exactly the documents strictly beyond `pivot` on `side`.
///
/// Expands the ordering into a lexicographic cursor
/// `t0 > p0 || (t0 == p0 && t1 > p1) || ...`. Every disjunct ends in a strict
/// comparison, so the pivot itself never matches as long as the last term is a
/// unique tie-breaker.
pub fn pivot_constraints(order: &[OrderTerm], pivot: &Document, side: Side) -> Vec<Predicate> {
    if order.is_empty() {
        return Vec::new();
    }
    let disjuncts = (0..order.len())
        .map(|idx| {
            let mut operands: Vec<Predicate> = order[..idx]
                .iter()
                .map(|term| {
                    Predicate::compare(
                        term.field.clone(),
                        Operator::Eq,
                        pivot_value(pivot, &term.field),
                    )
                })
                .collect();
            let term = &order[idx];
            operands.push(Predicate::compare(
                term.field.clone(),
                strict_operator(term.direction, side),
                pivot_value(pivot, &term.field),
            ));
            Predicate::all(operands)
        })
        .collect();
    vec![Predicate::any(disjuncts)]
}

/// Query for the `count` documents nearest to `pivot` on `side`.
///
/// Front queries run in reversed order so the closest documents come first;
/// callers must reverse the results back before merging.
pub fn pivot_query(
    base: &QuerySpec,
    pivot: &Document,
    side: Side,
    count: usize,
) -> Result<QuerySpec, QueryError> {
    let constraints = pivot_constraints(base.order(), pivot, side);
    let order: Vec<OrderTerm> = match side {
        Side::Rear => base.order().to_vec(),
        Side::Front => base.order().iter().map(OrderTerm::reversed).collect(),
    };
    base.clone()
        .with_constraints(constraints)
        .with_order(order)
        .with_range(0, count)
}
