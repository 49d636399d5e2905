use jsoniq_engine::{
    ConstantIterator, DynamicContext, Error, ExecutionMode, FaultKind, InsertBeforeIterator, Item,
    IteratorBase, RuntimeIterator, SequenceLookupIterator, SourceLocation,
};
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const LOC: SourceLocation = SourceLocation::new(7, 3);

fn constant(items: Vec<Item>) -> Box<dyn RuntimeIterator> {
    Box::new(ConstantIterator::new(items, ExecutionMode::Local, LOC))
}

fn strings(values: &[&str]) -> Vec<Item> {
    values.iter().map(|s| Item::string(*s)).collect()
}

fn rendered(items: &[Item]) -> Vec<String> {
    items.iter().map(Item::string_value).collect()
}

/// 1, 2, 3, ... without end; counts how many items were pulled.
#[derive(Debug, Clone)]
struct Naturals {
    base: IteratorBase,
    current: i64,
    pulled: Arc<AtomicUsize>,
}

impl Naturals {
    fn new(pulled: Arc<AtomicUsize>) -> Self {
        Self {
            base: IteratorBase::new("naturals", Vec::new(), ExecutionMode::Local, LOC),
            current: 0,
            pulled,
        }
    }
}

impl RuntimeIterator for Naturals {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.current = 0;
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.base.is_open()
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.base.is_open() {
            return Err(self.base.exhausted());
        }
        self.pulled.fetch_add(1, Ordering::SeqCst);
        self.current += 1;
        Ok(Item::Integer(self.current))
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.reset(context)?;
        self.current = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.base.close();
    }

    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(self.clone())
    }
}

#[rstest]
#[case(0, &["x", "y", "a", "b", "c"])]
#[case(1, &["x", "y", "a", "b", "c"])]
#[case(-5, &["x", "y", "a", "b", "c"])]
#[case(2, &["a", "x", "y", "b", "c"])]
#[case(3, &["a", "b", "x", "y", "c"])]
#[case(4, &["a", "b", "c", "x", "y"])]
#[case(100, &["a", "b", "c", "x", "y"])]
fn insert_before_positions(#[case] position: i64, #[case] expected: &[&str]) {
    let mut it = InsertBeforeIterator::new(
        constant(strings(&["a", "b", "c"])),
        constant(vec![Item::Integer(position)]),
        constant(strings(&["x", "y"])),
        ExecutionMode::Local,
        LOC,
    );
    let items = it.materialize(&DynamicContext::default()).unwrap();
    assert_eq!(rendered(&items), expected);
}

#[rstest]
#[case(&[], &["x"], &["x"])]
#[case(&["a", "b"], &[], &["a", "b"])]
#[case(&[], &[], &[])]
fn insert_before_with_empty_inputs(
    #[case] sequence: &[&str],
    #[case] inserts: &[&str],
    #[case] expected: &[&str],
) {
    let mut it = InsertBeforeIterator::new(
        constant(strings(sequence)),
        constant(vec![Item::Integer(2)]),
        constant(strings(inserts)),
        ExecutionMode::Local,
        LOC,
    );
    let items = it.materialize(&DynamicContext::default()).unwrap();
    assert_eq!(rendered(&items), expected);
}

#[rstest]
#[case(vec![Item::string("2")])]
#[case(vec![Item::Double(2.0)])]
#[case(vec![])]
#[case(vec![Item::Integer(1), Item::Integer(2)])]
fn insert_before_position_must_be_one_integer(#[case] position: Vec<Item>) {
    let mut it = InsertBeforeIterator::new(
        constant(strings(&["a"])),
        constant(position),
        constant(strings(&["x"])),
        ExecutionMode::Local,
        LOC,
    );
    let err = it.materialize(&DynamicContext::default()).unwrap_err();
    assert_eq!(err.kind(), FaultKind::Type);
    assert_eq!(err.location, Some(LOC));
}

#[rstest]
#[case(1, Some(1))]
#[case(3, Some(3))]
#[case(4, None)]
#[case(0, None)]
#[case(-1, None)]
fn sequence_lookup_positions(#[case] position: i64, #[case] expected: Option<i64>) {
    let mut it = SequenceLookupIterator::new(
        constant((1..=3).map(Item::Integer).collect()),
        position,
        ExecutionMode::Local,
        LOC,
    );
    let items = it.materialize(&DynamicContext::default()).unwrap();
    assert_eq!(items, expected.map(Item::Integer).into_iter().collect::<Vec<_>>());
}

#[rstest]
fn sequence_lookup_pulls_only_the_prefix() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let mut it = SequenceLookupIterator::new(
        Box::new(Naturals::new(Arc::clone(&pulled))),
        5,
        ExecutionMode::Local,
        LOC,
    );
    let items = it.materialize(&DynamicContext::default()).unwrap();
    assert_eq!(items, vec![Item::Integer(5)]);
    assert_eq!(pulled.load(Ordering::SeqCst), 5);
}

#[rstest]
fn insert_before_streams_unbounded_sequences() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let mut it = InsertBeforeIterator::new(
        Box::new(Naturals::new(Arc::clone(&pulled))),
        constant(vec![Item::Integer(2)]),
        constant(strings(&["x"])),
        ExecutionMode::Local,
        LOC,
    );
    let mut head = Vec::new();
    it.materialize_n_first_items(&DynamicContext::default(), &mut head, 3)
        .unwrap();
    assert_eq!(rendered(&head), ["1", "x", "2"]);
    // one item of lookahead
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
}
