// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Immutable range + filter + sort query description.
//!
//! [`QuerySpec`] is built by value: every `with_*` call consumes the query and
//! returns the updated one, so a query handed to a fetch can never change under
//! it. Two textual forms exist: the full paginated query
//! (`*[filter]|order(..)[from...to]`) and the filter-only expression used by
//! change-stream subscriptions, which must see every matching document
//! regardless of pagination.

use std::{collections::BTreeMap, fmt};

use core_types::{validate_range, RangeError};
use serde_json::Value;
use thiserror::Error;

use crate::{ordering::OrderTerm, predicate::Predicate};

pub type Params = BTreeMap<String, Value>;

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid query range: {0}")]
    Range(#[from] RangeError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuerySpec {
    from: usize,
    to: usize,
    constraints: Vec<Predicate>,
    order: Vec<OrderTerm>,
    params: Params,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            from: 0,
            to: DEFAULT_LIMIT,
            constraints: Vec::new(),
            order: Vec::new(),
            params: Params::new(),
        }
    }
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(&self) -> usize {
        self.from
    }

    pub fn to(&self) -> usize {
        self.to
    }

    pub fn constraints(&self) -> &[Predicate] {
        &self.constraints
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn with_range(mut self, from: usize, to: usize) -> Result<Self, QueryError> {
        validate_range(from, to)?;
        self.from = from;
        self.to = to;
        Ok(self)
    }

    pub fn with_constraint(mut self, constraint: impl Into<Predicate>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_constraints<I>(mut self, constraints: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Predicate>,
    {
        self.constraints
            .extend(constraints.into_iter().map(Into::into));
        self
    }

    /// Replaces the ordering.
    pub fn with_order<I>(mut self, order: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<OrderTerm>,
    {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }

    /// Appends `field asc` unless the ordering already uses `field`.
    ///
    /// `field` must be unique per document for the resulting order to be total.
    pub fn with_tie_breaker(mut self, field: &str) -> Self {
        if !self.order.iter().any(|term| term.field == field) {
            self.order.push(OrderTerm::asc(field));
        }
        self
    }

    /// Merges `params` into the bound parameters, overriding existing names.
    pub fn with_params<I, K>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(name, value)| (name.into(), value)));
        self
    }

    pub fn filter(&self) -> Filter {
        Filter {
            constraints: self.constraints.clone(),
            params: self.params.clone(),
        }
    }

    /// `full_query = false` yields the filter expression alone.
    pub fn serialize(&self, full_query: bool) -> String {
        let filter = constraint_expression(&self.constraints);
        if !full_query {
            return filter;
        }
        let mut out = if filter.is_empty() {
            "*".to_string()
        } else {
            format!("*[{filter}]")
        };
        if !self.order.is_empty() {
            let terms: Vec<String> = self.order.iter().map(ToString::to_string).collect();
            out.push_str(&format!("|order({})", terms.join(", ")));
        }
        out.push_str(&format!("[{}...{}]", self.from, self.to));
        out
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize(true))
    }
}

/// Filter-only view of a query, independent of pagination and order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    pub constraints: Vec<Predicate>,
    pub params: Params,
}

impl Filter {
    pub fn expression(&self) -> String {
        constraint_expression(&self.constraints)
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}

fn constraint_expression(constraints: &[Predicate]) -> String {
    match constraints {
        [] => String::new(),
        [single] => single.to_string(),
        many => many
            .iter()
            .map(|constraint| format!("({constraint})"))
            .collect::<Vec<_>>()
            .join(" && "),
    }
}
