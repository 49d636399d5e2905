use jsoniq_engine::{
    CommaIterator, ComparisonIterator, ComparisonOperator, ConstantIterator, DynamicContext,
    DynamicContextBuilder, DynamicFunctionCallIterator, ExecutionMode, FunctionItem, Item,
    ObjectLookupIterator, ParallelizeSource, ReturnClause, RuntimeConfigurationBuilder,
    RuntimeIterator, SourceLocation, Strategy, VariableReferenceIterator, WhereClause,
};
use rstest::{fixture, rstest};
use std::sync::Arc;

const LOC: SourceLocation = SourceLocation::new(10, 1);

fn constant(items: Vec<Item>) -> Box<dyn RuntimeIterator> {
    Box::new(ConstantIterator::new(items, ExecutionMode::Local, LOC))
}

fn var(name: &str) -> Box<dyn RuntimeIterator> {
    Box::new(VariableReferenceIterator::new(name, ExecutionMode::Local, LOC))
}

fn lookup(object: Box<dyn RuntimeIterator>, key: &str) -> Box<dyn RuntimeIterator> {
    Box::new(ObjectLookupIterator::new(
        object,
        constant(vec![Item::string(key)]),
        ExecutionMode::Local,
        LOC,
    ))
}

fn compare(
    op: ComparisonOperator,
    left: Box<dyn RuntimeIterator>,
    right: Box<dyn RuntimeIterator>,
) -> Box<dyn RuntimeIterator> {
    Box::new(ComparisonIterator::new(op, left, right, ExecutionMode::Local, LOC))
}

fn orders(n: i64) -> Vec<Item> {
    (1..=n)
        .map(|i| {
            Item::object([
                ("id", Item::Integer(i)),
                ("amount", Item::Integer((i * 37) % 100)),
                ("region", Item::string(if i % 3 == 0 { "north" } else { "south" })),
            ])
        })
        .collect()
}

#[fixture]
fn context() -> DynamicContext {
    let config = RuntimeConfigurationBuilder::new().with_workers(3).build().unwrap();
    DynamicContextBuilder::new()
        .with_configuration(Arc::new(config))
        .with_variable("threshold", vec![Item::Integer(40)])
        .with_variable("region", vec![Item::string("south")])
        .build()
}

/// `for $o in $input where $o.amount gt $threshold where $o.region eq $region
/// return ($o.id, $o.region)`
fn pipeline(input: Box<dyn RuntimeIterator>, mode: ExecutionMode) -> Box<dyn RuntimeIterator> {
    let above = WhereClause::new(
        input,
        "o",
        compare(ComparisonOperator::Gt, lookup(var("o"), "amount"), var("threshold")),
        mode,
        LOC,
    );
    let in_region = WhereClause::new(
        Box::new(above.iterator()),
        "o",
        compare(ComparisonOperator::Eq, lookup(var("o"), "region"), var("region")),
        mode,
        LOC,
    );
    let projection = Box::new(CommaIterator::new(
        vec![lookup(var("o"), "id"), lookup(var("o"), "region")],
        ExecutionMode::Local,
        LOC,
    ));
    Box::new(ReturnClause::new(Box::new(in_region.iterator()), "o", projection, mode, LOC).iterator())
}

fn expected(n: i64) -> Vec<Item> {
    orders(n)
        .into_iter()
        .filter_map(|order| {
            let fields = order.as_object()?.clone();
            let amount = fields["amount"].as_integer()?;
            let south = fields["region"].as_str() == Some("south");
            (amount > 40 && south).then(|| vec![fields["id"].clone(), fields["region"].clone()])
        })
        .flatten()
        .collect()
}

#[rstest]
fn local_and_distributed_strategies_agree(
    context: DynamicContext,
    #[values(0, 1, 7, 50)] n: i64,
) {
    let mut local = pipeline(constant(orders(n)), ExecutionMode::Local);
    let mut forced = pipeline(constant(orders(n)), ExecutionMode::Distributed);
    let parallel_input =
        ParallelizeSource::new(constant(orders(n)), Some(constant(vec![Item::Integer(4)])), LOC);
    let mut inferred = pipeline(Box::new(parallel_input.iterator()), ExecutionMode::Unset);

    let expected = expected(n);
    assert_eq!(local.materialize(&context).unwrap(), expected);
    assert_eq!(forced.materialize(&context).unwrap(), expected);
    assert_eq!(inferred.materialize(&context).unwrap(), expected);
}

#[rstest]
fn distributed_input_propagates_strategy(context: DynamicContext) {
    let input = ParallelizeSource::new(constant(orders(5)), None, LOC);
    let inner = WhereClause::new(
        Box::new(input.iterator()),
        "o",
        compare(ComparisonOperator::Gt, lookup(var("o"), "amount"), var("threshold")),
        ExecutionMode::Unset,
        LOC,
    )
    .iterator();
    assert!(inner.is_distributed());
    let mut outer = ReturnClause::new(
        Box::new(inner),
        "o",
        lookup(var("o"), "id"),
        ExecutionMode::Unset,
        LOC,
    )
    .iterator();
    assert!(outer.is_distributed());
    assert_eq!(
        outer.variable_dependencies().into_iter().collect::<Vec<_>>(),
        ["threshold"]
    );
    outer.open(&context).unwrap();
    assert_eq!(outer.strategy(), Some(Strategy::Distributed));
    outer.close();
}

#[rstest]
fn strategy_is_kept_across_reset(context: DynamicContext) {
    let mut it = WhereClause::new(
        constant(orders(6)),
        "o",
        compare(ComparisonOperator::Gt, lookup(var("o"), "amount"), var("threshold")),
        ExecutionMode::Unset,
        LOC,
    )
    .iterator();
    it.open(&context).unwrap();
    assert_eq!(it.strategy(), Some(Strategy::Local));
    let mut first = Vec::new();
    while it.has_next() {
        first.push(it.next().unwrap());
    }
    let rebound = DynamicContextBuilder::new()
        .with_variable("threshold", vec![Item::Integer(90)])
        .build();
    it.reset(&rebound).unwrap();
    assert_eq!(it.strategy(), Some(Strategy::Local));
    let mut second = Vec::new();
    while it.has_next() {
        second.push(it.next().unwrap());
    }
    it.close();
    assert_eq!(it.strategy(), None);
    // reset re-evaluates against the new bindings
    assert!(second.len() < first.len());
}

#[rstest]
fn distributed_return_keeps_input_order(context: DynamicContext) {
    let mut it = ReturnClause::new(
        constant((1..=4).map(Item::Integer).collect()),
        "x",
        compare(ComparisonOperator::Le, var("x"), constant(vec![Item::Integer(2)])),
        ExecutionMode::Distributed,
        LOC,
    )
    .iterator();
    let rendered: Vec<_> = it
        .materialize(&context)
        .unwrap()
        .iter()
        .map(Item::string_value)
        .collect();
    assert_eq!(rendered, ["true", "true", "false", "false"]);
}

/// `function($a) { $a gt 1 }`
fn above_one() -> Item {
    let body = compare(ComparisonOperator::Gt, var("a"), constant(vec![Item::Integer(1)]));
    Item::Function(FunctionItem::new(None, vec!["a".into()], Arc::from(body)))
}

fn call(function: &str, argument: Box<dyn RuntimeIterator>) -> Box<dyn RuntimeIterator> {
    Box::new(DynamicFunctionCallIterator::new(
        var(function),
        vec![argument],
        ExecutionMode::Local,
        LOC,
    ))
}

fn with_function(mut context: DynamicContext) -> DynamicContext {
    context.add_variable_value("f", vec![above_one()]);
    context
}

#[rstest]
#[case::local(ExecutionMode::Local)]
#[case::forced(ExecutionMode::Distributed)]
#[case::inferred(ExecutionMode::Unset)]
fn function_valued_bindings_evaluate_the_same_everywhere(
    context: DynamicContext,
    #[case] mode: ExecutionMode,
) {
    let xs = constant((1..=3).map(Item::Integer).collect());
    let input: Box<dyn RuntimeIterator> = match mode {
        ExecutionMode::Unset => Box::new(ParallelizeSource::new(xs, None, LOC).iterator()),
        _ => xs,
    };
    let context = with_function(context);
    let mut it = WhereClause::new(input, "x", call("f", var("x")), mode, LOC).iterator();
    it.open(&context).unwrap();
    assert_eq!(it.strategy(), Some(Strategy::Local));
    let mut kept = Vec::new();
    while it.has_next() {
        kept.push(it.next().unwrap());
    }
    it.close();
    assert_eq!(kept, [Item::Integer(2), Item::Integer(3)]);
}

#[rstest]
fn function_valued_bindings_still_yield_a_dataset(context: DynamicContext) {
    let input = ParallelizeSource::new(
        constant((1..=3).map(Item::Integer).collect()),
        Some(constant(vec![Item::Integer(2)])),
        LOC,
    );
    let context = with_function(context);
    let mut it = WhereClause::new(
        Box::new(input.iterator()),
        "x",
        call("f", var("x")),
        ExecutionMode::Unset,
        LOC,
    )
    .iterator();
    let dataset = it.distributed(&context).unwrap();
    assert_eq!(dataset.num_partitions(), 2);
    assert_eq!(dataset.collect(), [Item::Integer(2), Item::Integer(3)]);
}

#[rstest]
fn function_items_as_input_are_mapped_in_order(context: DynamicContext) {
    let functions = ParallelizeSource::new(constant(vec![above_one(), above_one()]), None, LOC);
    let mut it = ReturnClause::new(
        Box::new(functions.iterator()),
        "g",
        call("g", constant(vec![Item::Integer(5)])),
        ExecutionMode::Distributed,
        LOC,
    )
    .iterator();
    assert_eq!(
        it.materialize(&context).unwrap(),
        [Item::Boolean(true), Item::Boolean(true)]
    );
}
