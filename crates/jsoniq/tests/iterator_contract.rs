use jsoniq_engine::{
    CastIterator, CommaIterator, ComparisonIterator, ComparisonOperator, ConstantIterator,
    DynamicContext, DynamicContextBuilder, DynamicFunctionCallIterator, ExecutionMode, FaultKind,
    InlineFunctionIterator, InsertBeforeIterator, Item, ItemType, JsonFileSource,
    ObjectLookupIterator, ParallelizeSource, ReturnClause, RuntimeIterator,
    SequenceLookupIterator, SourceLocation, VariableReferenceIterator, WhereClause,
};
use rstest::rstest;
use std::io::Write;
use tempfile::NamedTempFile;
use url::Url;

const LOC: SourceLocation = SourceLocation::new(1, 1);
const LOCAL: ExecutionMode = ExecutionMode::Local;

fn ctx() -> DynamicContext {
    DynamicContextBuilder::new()
        .with_variable("xs", vec![Item::Integer(1), Item::Integer(2), Item::Integer(3)])
        .build()
}

fn constant(items: Vec<Item>) -> Box<dyn RuntimeIterator> {
    Box::new(ConstantIterator::new(items, LOCAL, LOC))
}

fn int(i: i64) -> Box<dyn RuntimeIterator> {
    constant(vec![Item::Integer(i)])
}

fn var(name: &str) -> Box<dyn RuntimeIterator> {
    Box::new(VariableReferenceIterator::new(name, LOCAL, LOC))
}

fn greater_than_one(name: &str) -> Box<dyn RuntimeIterator> {
    Box::new(ComparisonIterator::new(ComparisonOperator::Gt, var(name), int(1), LOCAL, LOC))
}

fn lines_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

/// A fresh iterator of the given kind and the rendering of its result.
/// The file, if any, backs the iterator and must outlive it.
fn build(kind: &str) -> (Box<dyn RuntimeIterator>, Vec<&'static str>, Option<NamedTempFile>) {
    if kind == "json-file" {
        let file = lines_file(&["1", "{\"a\": true}", "", "[2]"]);
        let url = Url::from_file_path(file.path()).unwrap();
        let url = constant(vec![Item::string(url.as_str())]);
        let source = JsonFileSource::new(url, Some(int(2)), LOC);
        return (
            Box::new(source.iterator()),
            vec!["1", "{ \"a\" : true }", "[ 2 ]"],
            Some(file),
        );
    }
    let (it, expected) = build_local(kind);
    (it, expected, None)
}

fn build_local(kind: &str) -> (Box<dyn RuntimeIterator>, Vec<&'static str>) {
    match kind {
        "constant" => (constant(vec![Item::Integer(1), Item::string("a")]), vec!["1", "\"a\""]),
        "variable" => (var("xs"), vec!["1", "2", "3"]),
        "comma" => (
            Box::new(CommaIterator::new(vec![int(1), constant(vec![]), var("xs")], LOCAL, LOC)),
            vec!["1", "1", "2", "3"],
        ),
        "comparison" => (
            Box::new(ComparisonIterator::new(ComparisonOperator::Le, int(1), int(2), LOCAL, LOC)),
            vec!["true"],
        ),
        "cast" => (
            Box::new(CastIterator::new(
                constant(vec![Item::string("12")]),
                ItemType::Integer,
                false,
                LOCAL,
                LOC,
            )),
            vec!["12"],
        ),
        "object-lookup" => (
            Box::new(ObjectLookupIterator::new(
                constant(vec![
                    Item::object([("k", Item::Integer(5))]),
                    Item::object([("k", Item::Null)]),
                ]),
                constant(vec![Item::string("k")]),
                LOCAL,
                LOC,
            )),
            vec!["5", "null"],
        ),
        "sequence-lookup" => (
            Box::new(SequenceLookupIterator::new(var("xs"), 2, LOCAL, LOC)),
            vec!["2"],
        ),
        "insert-before" => (
            Box::new(InsertBeforeIterator::new(
                var("xs"),
                int(2),
                constant(vec![Item::string("x")]),
                LOCAL,
                LOC,
            )),
            vec!["1", "\"x\"", "2", "3"],
        ),
        "inline-function" => (
            Box::new(InlineFunctionIterator::new(
                Some("f".into()),
                vec!["a".into()],
                var("a"),
                LOCAL,
                LOC,
            )),
            vec!["\"f#1\""],
        ),
        "dynamic-call" => {
            let function = Box::new(InlineFunctionIterator::new(
                None,
                vec!["a".into()],
                var("a"),
                LOCAL,
                LOC,
            ));
            (
                Box::new(DynamicFunctionCallIterator::new(function, vec![var("xs")], LOCAL, LOC)),
                vec!["1", "2", "3"],
            )
        }
        "where-local" => {
            let clause = WhereClause::new(var("xs"), "x", greater_than_one("x"), LOCAL, LOC);
            (Box::new(clause.iterator()), vec!["2", "3"])
        }
        "where-distributed" => {
            let mode = ExecutionMode::Distributed;
            let clause = WhereClause::new(var("xs"), "x", greater_than_one("x"), mode, LOC);
            (Box::new(clause.iterator()), vec!["2", "3"])
        }
        "return" => {
            let clause = ReturnClause::new(var("xs"), "x", greater_than_one("x"), LOCAL, LOC);
            (Box::new(clause.iterator()), vec!["false", "true", "true"])
        }
        "return-distributed" => {
            let mode = ExecutionMode::Distributed;
            let clause = ReturnClause::new(var("xs"), "x", greater_than_one("x"), mode, LOC);
            (Box::new(clause.iterator()), vec!["false", "true", "true"])
        }
        "parallelize" => (
            Box::new(ParallelizeSource::new(var("xs"), Some(int(2)), LOC).iterator()),
            vec!["1", "2", "3"],
        ),
        other => panic!("unknown iterator kind {other}"),
    }
}

fn drain(it: &mut dyn RuntimeIterator) -> Vec<String> {
    let mut out = Vec::new();
    while it.has_next() {
        out.push(it.next().unwrap().to_string());
    }
    out
}

#[rstest]
fn next_after_exhaustion_is_flow_fault(
    #[values(
        "constant",
        "variable",
        "comma",
        "comparison",
        "cast",
        "object-lookup",
        "sequence-lookup",
        "insert-before",
        "inline-function",
        "dynamic-call",
        "where-local",
        "where-distributed",
        "return",
        "return-distributed",
        "parallelize",
        "json-file"
    )]
    kind: &str,
) {
    let (mut it, expected, _file) = build(kind);
    let ctx = ctx();
    assert!(!it.has_next(), "{kind}: has_next before open");
    it.open(&ctx).unwrap();
    assert_eq!(drain(it.as_mut()), expected, "{kind}");
    let err = it.next().unwrap_err();
    assert_eq!(err.kind(), FaultKind::Flow, "{kind}: {err}");
    it.close();
    it.close();
}

#[rstest]
fn open_twice_is_flow_fault(
    #[values(
        "constant",
        "variable",
        "comma",
        "comparison",
        "cast",
        "object-lookup",
        "sequence-lookup",
        "insert-before",
        "inline-function",
        "dynamic-call",
        "where-local",
        "where-distributed",
        "return",
        "return-distributed",
        "parallelize",
        "json-file"
    )]
    kind: &str,
) {
    let (mut it, _, _file) = build(kind);
    let ctx = ctx();
    it.open(&ctx).unwrap();
    assert_eq!(it.open(&ctx).unwrap_err().kind(), FaultKind::Flow, "{kind}");
    it.close();
    // reopening after close is allowed
    it.open(&ctx).unwrap();
    it.close();
}

#[rstest]
fn reset_restarts_the_sequence(
    #[values(
        "constant",
        "variable",
        "comma",
        "comparison",
        "cast",
        "object-lookup",
        "sequence-lookup",
        "insert-before",
        "inline-function",
        "dynamic-call",
        "where-local",
        "where-distributed",
        "return",
        "return-distributed",
        "parallelize",
        "json-file"
    )]
    kind: &str,
) {
    let (mut it, expected, _file) = build(kind);
    let ctx = ctx();
    it.open(&ctx).unwrap();
    if it.has_next() {
        it.next().unwrap();
    }
    it.reset(&ctx).unwrap();
    assert_eq!(drain(it.as_mut()), expected, "{kind}: after first reset");
    it.reset(&ctx).unwrap();
    it.reset(&ctx).unwrap();
    assert_eq!(drain(it.as_mut()), expected, "{kind}: after repeated reset");
    it.close();
    assert_eq!(it.reset(&ctx).unwrap_err().kind(), FaultKind::Flow, "{kind}: reset after close");
}

#[rstest]
fn structural_copies_evaluate_independently(
    #[values(
        "comma",
        "insert-before",
        "where-local",
        "where-distributed",
        "return",
        "return-distributed"
    )]
    kind: &str,
) {
    let (mut it, expected, _file) = build(kind);
    let ctx = ctx();
    it.open(&ctx).unwrap();
    it.next().unwrap();
    let mut copy = it.boxed_clone();
    assert!(!copy.has_next());
    let items = copy.materialize(&ctx).unwrap();
    assert_eq!(items.iter().map(Item::to_string).collect::<Vec<_>>(), expected);
    // the original continues where it was
    assert_eq!(drain(it.as_mut()), expected[1..].to_vec());
    it.close();
}

#[rstest]
fn materialize_closes_on_error() {
    let ctx = DynamicContext::default();
    let input = constant(vec![Item::string("x")]);
    let mut it = CastIterator::new(input, ItemType::Integer, false, LOCAL, LOC);
    assert!(it.materialize(&ctx).is_err());
    // a failed evaluation leaves the iterator re-openable
    assert!(it.materialize(&ctx).is_err());
}
