//! Row-level evaluation of iterator subtrees on cluster workers.
//!
//! Clause iterators ship their inputs to workers as [`DataFrame`] rows: one
//! column holds the serialized item bound to the clause variable, further
//! columns hold the serialized values of other variables the subtree reads.
//! A [`RowPredicate`] or [`RowMapper`] carries a structural copy of the
//! subtree, decodes only the columns it depends on into a private context
//! and evaluates the copy against it.

use crate::cluster::{DataFrame, Dataset, Row, Schema};
use crate::consts::ITEM_PAYLOAD_VERSION;
use crate::engine::iterator::RuntimeIterator;
use crate::engine::runtime::{
    DynamicContext, Error, ErrorCode, RuntimeConfiguration, SourceLocation,
};
use crate::xdm::{Item, Sequence};
use core::fmt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Serializes item sequences into row columns.
///
/// Codec instances are not shared between workers: each rehydrated row
/// function calls [`ItemCodec::reinitialize`] on its own copy.
pub trait ItemCodec: Clone + fmt::Debug + Send + Sync {
    fn encode(&mut self, items: &[Item]) -> Result<Vec<u8>, Error>;
    fn decode(&mut self, bytes: &[u8]) -> Result<Sequence, Error>;
    /// Drop state that must not survive a move to another worker.
    fn reinitialize(&mut self);
}

/// Versioned bincode payload: one version byte followed by the encoded
/// sequence.
#[derive(Debug, Default)]
pub struct BincodeCodec {
    scratch: Vec<u8>,
}

impl Clone for BincodeCodec {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl ItemCodec for BincodeCodec {
    fn encode(&mut self, items: &[Item]) -> Result<Vec<u8>, Error> {
        self.scratch.clear();
        self.scratch.push(ITEM_PAYLOAD_VERSION);
        bincode::serialize_into(&mut self.scratch, items)?;
        Ok(self.scratch.clone())
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<Sequence, Error> {
        match bytes.split_first() {
            Some((&ITEM_PAYLOAD_VERSION, payload)) => Ok(bincode::deserialize(payload)?),
            Some((version, _)) => Err(Error::from_code(
                ErrorCode::JQRT0004,
                format!("unsupported item payload version {version}"),
            )),
            None => Err(Error::from_code(ErrorCode::JQRT0004, "empty item payload")),
        }
    }

    fn reinitialize(&mut self) {
        self.scratch = Vec::new();
    }
}

/// A function applied to every row of a [`DataFrame`].
pub trait RowFunction: Send + Sync {
    type Output: Send;

    /// Fresh per-worker copy with empty context and reinitialized codec.
    fn rehydrate(&self) -> Self;

    fn call(&mut self, row: &Row) -> Result<Self::Output, Error>;
}

#[derive(Debug, Clone)]
struct RowEvaluator<C> {
    expression: Box<dyn RuntimeIterator>,
    schema: Arc<Schema>,
    dependencies: BTreeSet<String>,
    context: DynamicContext,
    codec: C,
}

impl<C: ItemCodec> RowEvaluator<C> {
    fn new(
        expression: Box<dyn RuntimeIterator>,
        schema: Arc<Schema>,
        configuration: Arc<RuntimeConfiguration>,
        codec: C,
    ) -> Self {
        let dependencies = expression.variable_dependencies();
        Self {
            expression,
            schema,
            dependencies,
            context: DynamicContext::new(configuration),
            codec,
        }
    }

    fn rehydrate(&self) -> Self {
        let mut copy = self.clone();
        copy.context.remove_all_variables();
        copy.codec.reinitialize();
        trace!(iterator = copy.expression.name(), "row function rehydrated");
        copy
    }

    fn bind(&mut self, row: &Row) -> Result<(), Error> {
        self.context.remove_all_variables();
        if row.len() != self.schema.len() {
            return Err(Error::from_code(
                ErrorCode::JQRT0004,
                format!(
                    "row has {} columns but the schema declares {}",
                    row.len(),
                    self.schema.len()
                ),
            ));
        }
        for (index, name) in self.schema.columns().iter().enumerate() {
            if !self.dependencies.contains(name) {
                continue;
            }
            let bytes = row.column(index).unwrap_or_default();
            let value = self.codec.decode(bytes)?;
            self.context.add_variable_value(name.clone(), value);
        }
        Ok(())
    }

    fn location(&self) -> SourceLocation {
        self.expression.location()
    }
}

/// Evaluates a boolean expression per row.
///
/// The expression must produce exactly one boolean; anything else,
/// including the empty sequence, is a type fault.
#[derive(Debug, Clone)]
pub struct RowPredicate<C: ItemCodec = BincodeCodec> {
    evaluator: RowEvaluator<C>,
}

impl RowPredicate<BincodeCodec> {
    pub fn new(
        expression: Box<dyn RuntimeIterator>,
        schema: Arc<Schema>,
        configuration: Arc<RuntimeConfiguration>,
    ) -> Self {
        Self::with_codec(expression, schema, configuration, BincodeCodec::default())
    }
}

impl<C: ItemCodec> RowPredicate<C> {
    pub fn with_codec(
        expression: Box<dyn RuntimeIterator>,
        schema: Arc<Schema>,
        configuration: Arc<RuntimeConfiguration>,
        codec: C,
    ) -> Self {
        Self {
            evaluator: RowEvaluator::new(expression, schema, configuration, codec),
        }
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.evaluator.dependencies
    }

    pub fn codec(&self) -> &C {
        &self.evaluator.codec
    }
}

impl<C: ItemCodec> RowFunction for RowPredicate<C> {
    type Output = bool;

    fn rehydrate(&self) -> Self {
        Self {
            evaluator: self.evaluator.rehydrate(),
        }
    }

    fn call(&mut self, row: &Row) -> Result<bool, Error> {
        self.evaluator.bind(row)?;
        let evaluator = &mut self.evaluator;
        let result = evaluator
            .expression
            .materialize_first_item_or_null(&evaluator.context)?;
        match result {
            Some(Item::Boolean(b)) => Ok(b),
            Some(other) => Err(Error::unexpected_type(
                format!("where clause must evaluate to a boolean, got {}", other.item_type()),
                evaluator.location(),
            )),
            None => Err(Error::unexpected_type(
                "where clause must evaluate to a boolean, got the empty sequence",
                evaluator.location(),
            )),
        }
    }
}

/// Evaluates an expression per row and returns its whole result sequence.
#[derive(Debug, Clone)]
pub struct RowMapper<C: ItemCodec = BincodeCodec> {
    evaluator: RowEvaluator<C>,
}

impl RowMapper<BincodeCodec> {
    pub fn new(
        expression: Box<dyn RuntimeIterator>,
        schema: Arc<Schema>,
        configuration: Arc<RuntimeConfiguration>,
    ) -> Self {
        Self::with_codec(expression, schema, configuration, BincodeCodec::default())
    }
}

impl<C: ItemCodec> RowMapper<C> {
    pub fn with_codec(
        expression: Box<dyn RuntimeIterator>,
        schema: Arc<Schema>,
        configuration: Arc<RuntimeConfiguration>,
        codec: C,
    ) -> Self {
        Self {
            evaluator: RowEvaluator::new(expression, schema, configuration, codec),
        }
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.evaluator.dependencies
    }

    pub fn codec(&self) -> &C {
        &self.evaluator.codec
    }
}

impl<C: ItemCodec> RowFunction for RowMapper<C> {
    type Output = Sequence;

    fn rehydrate(&self) -> Self {
        Self {
            evaluator: self.evaluator.rehydrate(),
        }
    }

    fn call(&mut self, row: &Row) -> Result<Sequence, Error> {
        self.evaluator.bind(row)?;
        let evaluator = &mut self.evaluator;
        evaluator.expression.materialize(&evaluator.context)
    }
}

/// Whether `items` can be written to a row column. Function items cannot.
pub fn transferable(items: &[Item]) -> bool {
    !items.iter().any(Item::contains_function)
}

/// Whether every variable in `dependencies` that `context` binds is
/// [`transferable`].
pub fn bindings_transferable(dependencies: &BTreeSet<String>, context: &DynamicContext) -> bool {
    dependencies
        .iter()
        .filter_map(|name| context.variable_value(name))
        .all(|value| transferable(value))
}

/// Build the rows a clause ships to workers.
///
/// Column 0 holds each item of `items` bound to `variable`. Every other
/// variable in `dependencies` that `context` binds gets its own column,
/// repeated on every row.
pub fn frame_for_variable(
    items: Dataset<Item>,
    variable: &str,
    dependencies: &BTreeSet<String>,
    context: &DynamicContext,
) -> Result<DataFrame, Error> {
    let mut codec = BincodeCodec::default();
    let mut columns = vec![variable.to_string()];
    let mut shared = Vec::new();
    for name in dependencies {
        if name == variable {
            continue;
        }
        if let Some(value) = context.variable_value(name) {
            columns.push(name.clone());
            shared.push(codec.encode(value)?);
        }
    }
    let schema = Arc::new(Schema::new(columns));
    let rows = items.map_partitions(|_, partition| {
        let mut codec = BincodeCodec::default();
        partition
            .into_iter()
            .map(|item| -> Result<Row, Error> {
                let mut row = Row::new([codec.encode(core::slice::from_ref(&item))?]);
                for column in &shared {
                    row.push(column.clone());
                }
                Ok(row)
            })
            .collect()
    })?;
    debug!(
        columns = ?schema.columns(),
        partitions = rows.num_partitions(),
        "data frame built for row evaluation"
    );
    Ok(DataFrame::new(schema, rows))
}

/// Decode column `index` of every row back into items, flattening the
/// per-row sequences in order.
pub fn items_from_column(rows: Dataset<Row>, index: usize) -> Result<Dataset<Item>, Error> {
    rows.map_partitions(|_, rows| {
        let mut codec = BincodeCodec::default();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let bytes = row.column(index).ok_or_else(|| {
                Error::from_code(ErrorCode::JQRT0004, format!("row has no column {index}"))
            })?;
            out.extend(codec.decode(bytes)?);
        }
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::iterator::{
        ComparisonIterator, ConstantIterator, ExecutionMode, VariableReferenceIterator,
    };
    use crate::engine::comparison::ComparisonOperator;
    use crate::engine::runtime::FaultKind;

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    fn var(name: &str) -> Box<dyn RuntimeIterator> {
        Box::new(VariableReferenceIterator::new(name, ExecutionMode::Local, loc()))
    }

    fn encode(items: &[Item]) -> Vec<u8> {
        BincodeCodec::default().encode(items).unwrap()
    }

    #[test]
    fn codec_prefixes_version_byte() {
        let mut codec = BincodeCodec::default();
        let bytes = codec.encode(&[Item::Integer(1), Item::string("a")]).unwrap();
        assert_eq!(bytes[0], ITEM_PAYLOAD_VERSION);
        assert_eq!(codec.decode(&bytes).unwrap(), vec![Item::Integer(1), Item::string("a")]);
    }

    #[test]
    fn codec_rejects_unknown_version() {
        let mut bytes = encode(&[Item::Null]);
        bytes[0] = ITEM_PAYLOAD_VERSION.wrapping_add(1);
        let err = BincodeCodec::default().decode(&bytes).unwrap_err();
        assert_eq!(err.code, ErrorCode::JQRT0004);
        assert_eq!(err.kind(), FaultKind::Internal);
    }

    #[test]
    fn predicate_only_binds_dependencies() {
        let schema = Arc::new(Schema::new(vec!["x".into(), "unused".into()]));
        let expression = Box::new(ComparisonIterator::new(
            ComparisonOperator::Gt,
            var("x"),
            Box::new(ConstantIterator::new(vec![Item::Integer(2)], ExecutionMode::Local, loc())),
            ExecutionMode::Local,
            loc(),
        ));
        let predicate = RowPredicate::new(expression, schema, Arc::default());
        assert_eq!(predicate.dependencies().iter().collect::<Vec<_>>(), ["x"]);
        let mut worker = predicate.rehydrate();
        // the unused column is garbage: decoding it would fail
        let row = Row::new([encode(&[Item::Integer(3)]), vec![0xff]]);
        assert!(worker.call(&row).unwrap());
        let row = Row::new([encode(&[Item::Integer(1)]), vec![0xff]]);
        assert!(!worker.call(&row).unwrap());
    }

    #[test]
    fn predicate_requires_boolean() {
        let schema = Arc::new(Schema::new(vec!["x".into()]));
        let mut predicate = RowPredicate::new(var("x"), schema, Arc::default());
        let err = predicate.call(&Row::new([encode(&[Item::Integer(1)])])).unwrap_err();
        assert_eq!(err.kind(), FaultKind::Type);
        let err = predicate.call(&Row::new([encode(&[])])).unwrap_err();
        assert_eq!(err.kind(), FaultKind::Type);
    }

    #[test]
    fn rows_do_not_leak_bindings() {
        let schema = Arc::new(Schema::new(vec!["x".into(), "y".into()]));
        let mut mapper = RowMapper::new(var("y"), schema, Arc::default());
        let row = Row::new([encode(&[Item::Integer(1)]), encode(&[Item::Integer(9)])]);
        assert_eq!(mapper.call(&row).unwrap(), vec![Item::Integer(9)]);
        // a short row is rejected instead of reusing the previous binding
        let err = mapper.call(&Row::new([encode(&[Item::Integer(1)])])).unwrap_err();
        assert_eq!(err.code, ErrorCode::JQRT0004);
    }
}
