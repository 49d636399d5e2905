//! Filter a JSON Lines file on the local cluster.
//!
//! ```text
//! cargo run --example jsoniq_ingest -- data.json amount 40
//! ```
//!
//! Evaluates `for $o in json-file($path) where $o.$key ge $min return $o`.
//! `JSONIQ_WORKERS`, `JSONIQ_DEFAULT_PARTITIONS` and `JSONIQ_BASE_URI` tune the
//! runtime; `RUST_LOG=jsoniq_engine=debug` shows the strategy decisions.

use jsoniq_engine::{
    ComparisonIterator, ComparisonOperator, ConstantIterator, DynamicContextBuilder, ExecutionMode,
    Item, JsonFileSource, ObjectLookupIterator, ReturnClause, RuntimeConfigurationBuilder,
    RuntimeIterator, SourceLocation, VariableReferenceIterator, WhereClause,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn constant(item: Item) -> Box<dyn RuntimeIterator> {
    Box::new(ConstantIterator::new(vec![item], ExecutionMode::Local, SourceLocation::default()))
}

fn var(name: &str) -> Box<dyn RuntimeIterator> {
    Box::new(VariableReferenceIterator::new(name, ExecutionMode::Local, SourceLocation::default()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: jsoniq_ingest <file.json> [key] [min]");
        std::process::exit(2);
    };
    let key = args.next().unwrap_or_else(|| "amount".into());
    let min: i64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0);

    let config = RuntimeConfigurationBuilder::from_env()?.build()?;
    let context = DynamicContextBuilder::new()
        .with_configuration(Arc::new(config))
        .with_variable("min", vec![Item::Integer(min)])
        .build();

    let location = SourceLocation::new(1, 10);
    let source = JsonFileSource::new(constant(Item::string(path)), None, location);
    let field = Box::new(ObjectLookupIterator::new(
        var("o"),
        constant(Item::string(key)),
        ExecutionMode::Local,
        location,
    ));
    let predicate = Box::new(ComparisonIterator::new(
        ComparisonOperator::Ge,
        field,
        var("min"),
        ExecutionMode::Local,
        location,
    ));
    let filtered =
        WhereClause::new(Box::new(source.iterator()), "o", predicate, ExecutionMode::Unset, location);
    let mut query = ReturnClause::new(
        Box::new(filtered.iterator()),
        "o",
        var("o"),
        ExecutionMode::Unset,
        location,
    )
    .iterator();

    let started = std::time::Instant::now();
    let items = query.materialize(&context)?;
    for item in &items {
        println!("{item}");
    }
    eprintln!("{} items in {:?}", items.len(), started.elapsed());
    Ok(())
}
