// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Multi-key document ordering.

use std::{cmp::Ordering, fmt};

use core_types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderTerm {
    pub field: String,
    pub direction: Direction,
}

impl OrderTerm {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, Direction::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, Direction::Desc)
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.field.clone(), self.direction.reversed())
    }
}

impl fmt::Display for OrderTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.direction.as_str())
    }
}

impl<F: Into<String>> From<(F, Direction)> for OrderTerm {
    fn from((field, direction): (F, Direction)) -> Self {
        Self::new(field, direction)
    }
}

/// Compares two documents term by term; the first non-equal term decides.
pub fn compare(a: &Document, b: &Document, order: &[OrderTerm]) -> Ordering {
    for term in order {
        let ord = compare_values(a.get_path(&term.field), b.get_path(&term.field));
        let ord = match term.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

static NULL: Value = Value::Null;

/// Ascending comparison of two field values.
///
/// Absent and `null` values are the smallest values, so they lead ascending
/// sorts and trail descending ones. Values of different kinds order by kind:
/// null < bool < number < string < array < object.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&NULL);
    let b = b.unwrap_or(&NULL);
    kind_rank(a).cmp(&kind_rank(b)).then_with(|| match (a, b) {
        (Value::String(x), Value::String(y)) => collate(x, y),
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(Some(x), Some(y)))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => Ordering::Equal,
    })
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Case-insensitive comparison with lowercase first on ties.
fn collate(a: &str, b: &str) -> Ordering {
    let folded_a = a.chars().flat_map(char::to_lowercase);
    let folded_b = b.chars().flat_map(char::to_lowercase);
    folded_a.cmp(folded_b).then_with(|| b.cmp(a))
}

/// Stable sort by `order`.
pub fn sort_documents(docs: &mut [Document], order: &[OrderTerm]) {
    docs.sort_by(|a, b| compare(a, b, order));
}

pub fn is_sorted(docs: &[Document], order: &[OrderTerm]) -> bool {
    docs.windows(2)
        .all(|pair| compare(&pair[0], &pair[1], order) != Ordering::Greater)
}
