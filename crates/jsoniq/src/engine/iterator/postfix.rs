use super::{ExecutionMode, IteratorBase, RuntimeIterator};
use crate::engine::runtime::{DynamicContext, Error, SourceLocation};
use crate::xdm::Item;

/// `$seq[[n]]`: the item at 1-based position `n`, or the empty sequence.
///
/// Only the first `n` items of the input are ever pulled.
#[derive(Debug, Clone)]
pub struct SequenceLookupIterator {
    base: IteratorBase,
    position: i64,
    result: Option<Item>,
}

impl SequenceLookupIterator {
    pub fn new(
        sequence: Box<dyn RuntimeIterator>,
        position: i64,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("sequence-lookup", vec![sequence], mode, location),
            position,
            result: None,
        }
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    fn lookup(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.result = None;
        let Ok(position) = usize::try_from(self.position) else {
            return Ok(());
        };
        if position == 0 {
            return Ok(());
        }
        let mut items = Vec::with_capacity(position.min(64));
        self.base.children[0].materialize_n_first_items(context, &mut items, position)?;
        if items.len() == position {
            self.result = items.pop();
        }
        Ok(())
    }
}

impl RuntimeIterator for SequenceLookupIterator {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.lookup(context)
    }

    fn has_next(&self) -> bool {
        self.base.is_open() && self.result.is_some()
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.base.is_open() {
            return Err(self.base.exhausted());
        }
        self.result.take().ok_or_else(|| self.base.exhausted())
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.reset(context)?;
        self.lookup(context)
    }

    fn close(&mut self) {
        self.result = None;
        self.base.close();
    }

    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(self.clone())
    }
}
