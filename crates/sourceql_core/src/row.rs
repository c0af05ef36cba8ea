use std::fmt;

use crate::ast::FieldRef;
use crate::errors::{Result, eval_err};
use crate::eval::FieldResolver;
use crate::scalar::ScalarValue;

/// A single row flowing through a pipeline.
///
/// Columns keep the order they were produced in. Rows from joined sources are
/// concatenated so that every column keeps its source alias.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub columns: Vec<(FieldRef, ScalarValue)>,
}

impl Row {
    pub fn new(columns: Vec<(FieldRef, ScalarValue)>) -> Self {
        Row { columns }
    }

    /// Build a row for a single source from `(name, value)` pairs.
    pub fn from_pairs<I, S, V>(source: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<ScalarValue>,
    {
        Row {
            columns: pairs
                .into_iter()
                .map(|(name, value)| (FieldRef::qualified(source, name), value.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Find the value for a field reference.
    ///
    /// Returns an error if a bare reference matches columns from more than one
    /// source.
    pub fn get(&self, field: &FieldRef) -> Result<Option<&ScalarValue>> {
        let mut found: Option<&(FieldRef, ScalarValue)> = None;
        for column in &self.columns {
            if !field.matches(&column.0) {
                continue;
            }
            match found {
                Some((existing, _)) if existing.source != column.0.source => {
                    return Err(eval_err!("Field reference '{field}' is ambiguous"));
                }
                Some(_) => (),
                None => found = Some(column),
            }
        }
        Ok(found.map(|(_, value)| value))
    }

    /// Get a value by bare column name.
    pub fn value(&self, name: &str) -> Option<&ScalarValue> {
        self.columns
            .iter()
            .find(|(field, _)| field.name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Concatenate two rows, used for joins.
    pub fn concat(&self, other: &Row) -> Row {
        let mut columns = Vec::with_capacity(self.len() + other.len());
        columns.extend_from_slice(&self.columns);
        columns.extend_from_slice(&other.columns);
        Row { columns }
    }

    /// Columns belonging to one source alias.
    pub fn columns_for<'a>(
        &'a self,
        alias: &'a str,
    ) -> impl Iterator<Item = &'a (FieldRef, ScalarValue)> + 'a {
        self.columns.iter().filter(move |(field, _)| {
            field
                .source
                .as_deref()
                .is_some_and(|source| source.eq_ignore_ascii_case(alias))
        })
    }

    /// Keep only columns whose name is in `names`, or all columns if `names`
    /// is empty.
    pub fn retain_names<S: AsRef<str>>(&self, names: &[S]) -> Row {
        if names.is_empty() {
            return self.clone();
        }
        Row {
            columns: self
                .columns
                .iter()
                .filter(|(field, _)| {
                    names
                        .iter()
                        .any(|name| field.name.eq_ignore_ascii_case(name.as_ref()))
                })
                .cloned()
                .collect(),
        }
    }
}

impl FieldResolver for Row {
    fn resolve_field(&self, field: &FieldRef) -> Result<ScalarValue> {
        match self.get(field)? {
            Some(value) => Ok(value.clone()),
            None => Err(eval_err!("Unknown field '{field}'")),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (field, value)) in self.columns.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {value}")?;
        }
        write!(f, "}}")
    }
}
