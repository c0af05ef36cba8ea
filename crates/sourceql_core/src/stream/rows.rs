//! Operators over sequences of [`Row`]s driven by expressions.

use std::cmp::Ordering;

use crate::ast::query::{OrderByTerm, OrderDirection, SelectItem};
use crate::ast::{FieldRef, NodeRef};
use crate::errors::Result;
use crate::eval::Evaluator;
use crate::row::Row;
use crate::scalar::ScalarValue;

use super::RowSequence;

impl RowSequence<Row> {
    /// Qualify every column with a source alias.
    pub fn qualify(self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.map(move |row| {
            Ok(Row::new(
                row.columns
                    .into_iter()
                    .map(|(field, value)| (FieldRef::qualified(alias.clone(), field.name), value))
                    .collect(),
            ))
        })
    }

    /// Keep rows for which `predicate` evaluates to true.
    pub fn filter_rows(self, evaluator: Evaluator, predicate: NodeRef) -> Self {
        self.filter(move |row| evaluator.evaluate_predicate(&predicate, row))
    }

    /// Sort rows by a list of order-by terms. Nulls sort first.
    pub fn order_rows(self, evaluator: Evaluator, terms: Vec<OrderByTerm>) -> Self {
        let directions: Vec<_> = terms.iter().map(|term| term.direction).collect();
        self.order_by(
            move |row| {
                terms
                    .iter()
                    .map(|term| evaluator.evaluate(&term.expr, row))
                    .collect::<Result<Vec<_>>>()
            },
            move |a: &Vec<ScalarValue>, b: &Vec<ScalarValue>| compare_keys(&directions, a, b),
        )
    }

    /// Evaluate a select list against each row.
    pub fn project(self, evaluator: Evaluator, items: Vec<SelectItem>) -> Self {
        self.map(move |row| project_row(&evaluator, &items, &row))
    }
}

fn compare_keys(directions: &[OrderDirection], a: &[ScalarValue], b: &[ScalarValue]) -> Ordering {
    for ((direction, a), b) in directions.iter().zip(a).zip(b) {
        let ord = match direction {
            OrderDirection::Ascending => a.sort_cmp(b),
            OrderDirection::Descending => b.sort_cmp(a),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Produce the output row for a select list.
pub fn project_row(evaluator: &Evaluator, items: &[SelectItem], row: &Row) -> Result<Row> {
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::Expr { expr, .. } => {
                let value = evaluator.evaluate(expr, row)?;
                // Expression items always produce a name.
                let name = item.output_name().unwrap_or_default();
                columns.push((FieldRef::bare(name), value));
            }
            SelectItem::Wildcard { source: None } => {
                columns.extend(row.columns.iter().cloned());
            }
            SelectItem::Wildcard {
                source: Some(alias),
            } => {
                columns.extend(row.columns_for(alias).cloned());
            }
        }
    }
    Ok(Row::new(columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{add, field, gt, lit, qualified};

    fn rows() -> Vec<Row> {
        vec![
            Row::from_pairs("p", [("name", "b".into()), ("age", ScalarValue::Int64(40))]),
            Row::from_pairs("p", [("name", "a".into()), ("age", ScalarValue::Null)]),
            Row::from_pairs("p", [("name", "c".into()), ("age", ScalarValue::Int64(20))]),
        ]
    }

    #[tokio::test]
    async fn filter_and_project() {
        let out = RowSequence::from_rows(rows())
            .filter_rows(Evaluator::default(), gt(field("age"), lit(30)))
            .project(
                Evaluator::default(),
                vec![
                    SelectItem::expr(qualified("p", "name")),
                    SelectItem::aliased(add(field("age"), lit(1)), "next_age"),
                ],
            )
            .materialize()
            .await
            .unwrap();
        assert_eq!(1, out.len());
        assert_eq!("{name: b, next_age: 41}", out[0].to_string());
    }

    #[tokio::test]
    async fn order_rows_desc_nulls_last() {
        let out = RowSequence::from_rows(rows())
            .order_rows(Evaluator::default(), vec![OrderByTerm::desc(field("age"))])
            .materialize()
            .await
            .unwrap();
        let names: Vec<_> = out
            .iter()
            .map(|row| row.value("name").cloned().unwrap_or(ScalarValue::Null))
            .collect();
        assert_eq!(
            vec![ScalarValue::from("b"), "c".into(), "a".into()],
            names
        );
    }

    #[tokio::test]
    async fn order_rows_mixed_numerics() {
        let values: Vec<ScalarValue> = (0..200)
            .map(|i| match i % 3 {
                0 => ScalarValue::Int64(100 - i),
                1 => ScalarValue::Float64(f64::from(i as i32) * 0.5 - 30.0),
                _ => ScalarValue::Float64(f64::NAN),
            })
            .collect();
        let input: Vec<Row> = values
            .into_iter()
            .map(|v| Row::from_pairs("t", [("v", v)]))
            .collect();

        let out = RowSequence::from_rows(input)
            .order_rows(Evaluator::default(), vec![OrderByTerm::asc(field("v"))])
            .materialize()
            .await
            .unwrap();
        assert_eq!(200, out.len());

        let numbers: Vec<f64> = out
            .iter()
            .filter_map(|row| row.value("v").and_then(ScalarValue::try_as_f64))
            .collect();
        let (ordered, nans): (Vec<f64>, Vec<f64>) = numbers.iter().partition(|v| !v.is_nan());
        assert_eq!(66, nans.len());
        assert!(ordered.windows(2).all(|w| w[0] <= w[1]), "{ordered:?}");
        // NaN sorts after every number.
        assert!(numbers[..ordered.len()].iter().all(|v| !v.is_nan()));
    }

    #[tokio::test]
    async fn qualify_and_wildcard() {
        let row = Row::new(vec![(FieldRef::bare("id"), 1.into())]);
        let left = RowSequence::from_rows(vec![row.clone()]).qualify("l");
        let right = RowSequence::from_rows(vec![row]).qualify("r");
        let out = left
            .join(right, |l, r| Ok(Some(l.concat(r))))
            .project(
                Evaluator::default(),
                vec![SelectItem::Wildcard {
                    source: Some("r".to_string()),
                }],
            )
            .materialize()
            .await
            .unwrap();
        assert_eq!("{r.id: 1}", out[0].to_string());
    }
}
