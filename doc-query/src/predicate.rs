// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Filter predicates and their textual form.

use std::{cmp::Ordering, fmt};

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        }
    }

    /// Swaps the comparison sense, keeping strictness.
    pub fn inverted(self) -> Self {
        match self {
            Operator::Eq => Operator::Eq,
            Operator::Gt => Operator::Lt,
            Operator::Gte => Operator::Lte,
            Operator::Lt => Operator::Gt,
            Operator::Lte => Operator::Gte,
        }
    }

    /// Whether `lhs <op> rhs` holds given `lhs.cmp(rhs)`.
    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Gte => ord != Ordering::Less,
            Operator::Lt => ord == Ordering::Less,
            Operator::Lte => ord != Ordering::Greater,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Store-native expression, passed through verbatim.
    Expr(String),
    Compare {
        field: String,
        op: Operator,
        value: Value,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn expr(expression: impl Into<String>) -> Self {
        Predicate::Expr(expression.into())
    }

    pub fn compare(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// Conjunction; a single operand is returned unwrapped.
    pub fn all(mut operands: Vec<Predicate>) -> Self {
        if operands.len() == 1 {
            return operands.remove(0);
        }
        Predicate::All(operands)
    }

    /// Disjunction; a single operand is returned unwrapped.
    pub fn any(mut operands: Vec<Predicate>) -> Self {
        if operands.len() == 1 {
            return operands.remove(0);
        }
        Predicate::Any(operands)
    }

    fn is_compound(&self) -> bool {
        matches!(self, Predicate::All(_) | Predicate::Any(_) | Predicate::Expr(_))
    }
}

impl From<&str> for Predicate {
    fn from(expression: &str) -> Self {
        Predicate::expr(expression)
    }
}

impl From<String> for Predicate {
    fn from(expression: String) -> Self {
        Predicate::Expr(expression)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Expr(expression) => f.write_str(expression),
            Predicate::Compare { field, op, value } => write!(f, "{field} {op} {value}"),
            Predicate::All(operands) => write_joined(f, operands, " && ", "true", |p| {
                matches!(p, Predicate::Any(_) | Predicate::Expr(_))
            }),
            Predicate::Any(operands) => {
                write_joined(f, operands, " || ", "false", Predicate::is_compound)
            }
        }
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    operands: &[Predicate],
    separator: &str,
    empty: &str,
    needs_parens: impl Fn(&Predicate) -> bool,
) -> fmt::Result {
    if operands.is_empty() {
        return f.write_str(empty);
    }
    for (idx, operand) in operands.iter().enumerate() {
        if idx > 0 {
            f.write_str(separator)?;
        }
        if needs_parens(operand) {
            write!(f, "({operand})")?;
        } else {
            write!(f, "{operand}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comparisons_render_json_literals() {
        let p = Predicate::compare("title", Operator::Gte, json!("Dune"));
        assert_eq!(p.to_string(), r#"title >= "Dune""#);
        let p = Predicate::compare("year", Operator::Lt, json!(1999));
        assert_eq!(p.to_string(), "year < 1999");
    }

    #[test]
    fn nested_logic_is_parenthesized() {
        let p = Predicate::any(vec![
            Predicate::compare("a", Operator::Gt, json!(1)),
            Predicate::all(vec![
                Predicate::compare("a", Operator::Eq, json!(1)),
                Predicate::compare("_id", Operator::Gt, json!("x")),
            ]),
        ]);
        assert_eq!(p.to_string(), r#"a > 1 || (a == 1 && _id > "x")"#);
    }

    #[test]
    fn single_operand_collapses() {
        let inner = Predicate::expr("_type == \"post\"");
        assert_eq!(Predicate::all(vec![inner.clone()]), inner);
        assert_eq!(Predicate::All(vec![]).to_string(), "true");
    }

    #[test]
    fn operator_inversion_and_evaluation() {
        assert_eq!(Operator::Gt.inverted(), Operator::Lt);
        assert_eq!(Operator::Lte.inverted(), Operator::Gte);
        assert!(Operator::Gte.holds(Ordering::Equal));
        assert!(!Operator::Gt.holds(Ordering::Equal));
        assert!(Operator::Lt.holds(Ordering::Less));
    }
}
