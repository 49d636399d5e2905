//! Runtime evaluation engine for a JSONiq-style query language.
//!
//! Compiled queries are trees of [`RuntimeIterator`]s evaluated with a
//! pull protocol against a [`DynamicContext`]. Iterators run locally, on a
//! [`ClusterEngine`] as partitioned [`Dataset`]s, or pick one of the two at
//! open time depending on their inputs.

pub mod bridge;
pub mod cluster;
pub mod consts;
pub mod engine;
pub mod io;
pub mod types;
pub mod xdm;

pub use bridge::{BincodeCodec, ItemCodec, RowFunction, RowMapper, RowPredicate};
pub use cluster::{ClusterEngine, DataFrame, Dataset, LocalCluster, Row, Schema};
pub use engine::casting::cast_item;
pub use engine::comparison::{ComparisonOperator, value_compare};
pub use engine::iterator::{
    CastIterator, CommaIterator, ComparisonIterator, ConstantIterator, Distributed,
    DistributedEvaluation, DynamicFunctionCallIterator, ExecutionMode, Hybrid, HybridEvaluation,
    InlineFunctionIterator, InsertBeforeIterator, IteratorBase, IteratorState, IteratorVisitor,
    JsonFileIterator, JsonFileSource, ObjectLookupIterator, ParallelizeIterator,
    ParallelizeSource, ReturnClause, ReturnIterator, RuntimeIterator, SequenceLookupIterator,
    SharedIterator, Strategy, VariableReferenceIterator, WhereClause, WhereIterator,
};
pub use engine::runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCode, FaultKind, RuntimeConfiguration,
    RuntimeConfigurationBuilder, SourceLocation,
};
pub use io::{FileSystemResolver, JsonLineParser, ResourceResolver, resolve_locator};
pub use types::ItemType;
pub use xdm::{DurationValue, FunctionItem, Item, Sequence};
