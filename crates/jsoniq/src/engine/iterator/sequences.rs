use super::{ExecutionMode, IteratorBase, RuntimeIterator, materialize_optional_item};
use crate::engine::runtime::{DynamicContext, Error, SourceLocation};
use crate::xdm::Item;

const SEQUENCE: usize = 0;
const POSITION: usize = 1;
const INSERTS: usize = 2;

/// `insert-before($seq, $pos, $inserts)`.
///
/// Streams `$seq`, splicing `$inserts` in front of the item at 1-based
/// position `$pos`. A position at or below 1 inserts first; a position past
/// the end appends.
#[derive(Debug, Clone)]
pub struct InsertBeforeIterator {
    base: IteratorBase,
    insert_position: i64,
    // number of sequence items emitted so far, plus one
    current_position: i64,
    inserting_now: bool,
    inserting_completed: bool,
    next_result: Option<Item>,
}

impl InsertBeforeIterator {
    pub fn new(
        sequence: Box<dyn RuntimeIterator>,
        position: Box<dyn RuntimeIterator>,
        inserts: Box<dyn RuntimeIterator>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("insert-before", vec![sequence, position, inserts], mode, location),
            insert_position: 0,
            current_position: 1,
            inserting_now: false,
            inserting_completed: false,
            next_result: None,
        }
    }

    fn start(&mut self) -> Result<(), Error> {
        let location = self.base.location();
        let (context, children) = self.base.split()?;
        let position =
            materialize_optional_item(children[POSITION].as_mut(), context, "insert-before position")?;
        self.insert_position = match position {
            Some(Item::Integer(p)) => p,
            Some(other) => {
                return Err(Error::unexpected_type(
                    format!("insert-before position must be an integer, got {}", other.item_type()),
                    location,
                ));
            }
            None => {
                return Err(Error::unexpected_type(
                    "insert-before position must not be the empty sequence",
                    location,
                ));
            }
        };
        for index in [SEQUENCE, INSERTS] {
            let child = &mut children[index];
            if child.base().is_open() {
                child.close();
            }
            child.open(context)?;
        }
        self.current_position = 1;
        self.inserting_now = false;
        self.inserting_completed = false;
        self.set_next_result()
    }

    fn set_next_result(&mut self) -> Result<(), Error> {
        self.next_result = None;
        let children = &mut self.base.children;

        if !self.inserting_completed {
            if !self.inserting_now {
                if self.insert_position <= self.current_position {
                    if children[INSERTS].has_next() {
                        self.inserting_now = true;
                        self.next_result = Some(children[INSERTS].next()?);
                    } else {
                        self.inserting_completed = true;
                    }
                }
            } else if children[INSERTS].has_next() {
                self.next_result = Some(children[INSERTS].next()?);
            } else {
                self.inserting_now = false;
                self.inserting_completed = true;
            }
        }

        if !self.inserting_now {
            if children[SEQUENCE].has_next() {
                self.next_result = Some(children[SEQUENCE].next()?);
                self.current_position += 1;
            } else if children[INSERTS].has_next() {
                // position past the end of the sequence
                self.next_result = Some(children[INSERTS].next()?);
            }
        }

        if self.next_result.is_none() {
            children[SEQUENCE].close();
            children[INSERTS].close();
        }
        Ok(())
    }
}

impl RuntimeIterator for InsertBeforeIterator {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.start()
    }

    fn has_next(&self) -> bool {
        self.base.is_open() && self.next_result.is_some()
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.has_next() {
            return Err(self.base.exhausted());
        }
        let item = self.next_result.take().ok_or_else(|| self.base.exhausted())?;
        self.set_next_result()?;
        Ok(item)
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.reset(context)?;
        self.start()
    }

    fn close(&mut self) {
        self.next_result = None;
        self.base.close();
    }

    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(self.clone())
    }
}
