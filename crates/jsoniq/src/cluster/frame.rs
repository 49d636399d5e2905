use super::Dataset;
use crate::bridge::RowFunction;
use crate::engine::runtime::Error;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::trace;

/// Ordered column names of a [`DataFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One row: a serialized item sequence per schema column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    columns: SmallVec<[Vec<u8>; 4]>,
}

impl Row {
    pub fn new(columns: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    pub fn push(&mut self, column: Vec<u8>) {
        self.columns.push(column);
    }

    pub fn column(&self, index: usize) -> Option<&[u8]> {
        self.columns.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A [`Dataset`] of rows sharing one schema.
#[derive(Debug, Clone)]
pub struct DataFrame {
    schema: Arc<Schema>,
    rows: Dataset<Row>,
}

impl DataFrame {
    pub fn new(schema: Arc<Schema>, rows: Dataset<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &Dataset<Row> {
        &self.rows
    }

    pub fn into_rows(self) -> Dataset<Row> {
        self.rows
    }

    pub fn count(&self) -> usize {
        self.rows.count()
    }

    /// Keep the rows for which `predicate` returns true.
    ///
    /// Every partition works on its own rehydrated copy of the predicate.
    pub fn filter_rows<F>(self, predicate: &F) -> Result<DataFrame, Error>
    where
        F: RowFunction<Output = bool>,
    {
        let schema = self.schema;
        let rows = self.rows.map_partitions(|partition, rows| {
            let mut worker = predicate.rehydrate();
            trace!(partition, rows = rows.len(), "filtering partition");
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if worker.call(&row)? {
                    kept.push(row);
                }
            }
            Ok(kept)
        })?;
        Ok(DataFrame { schema, rows })
    }

    /// Apply `function` to every row, one output element per row.
    pub fn map_rows<F>(self, function: &F) -> Result<Dataset<F::Output>, Error>
    where
        F: RowFunction,
    {
        self.rows.map_partitions(|partition, rows| {
            let mut worker = function.rehydrate();
            trace!(partition, rows = rows.len(), "mapping partition");
            rows.iter().map(|row| worker.call(row)).collect()
        })
    }
}
