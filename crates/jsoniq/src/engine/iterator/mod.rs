//! Pull-iteration protocol shared by every runtime iterator.
//!
//! An iterator tree is evaluated by opening the root, pulling items with
//! `has_next`/`next` and closing it. Every iterator follows the same state
//! machine:
//!
//! ```text
//! Unopened --open--> Open --close--> Closed --open--> Open ...
//!                     |  ^
//!                     +--+ reset
//! ```
//!
//! `next`/`has_next` are only meaningful while open. Protocol misuse
//! (`next` past the end, `open` twice, `reset` on a closed iterator) is a
//! flow fault (`JQRT0001`).
//!
//! Three strategies implement the protocol:
//! - local iterators implement [`RuntimeIterator`] directly,
//! - [`Distributed`] adapts a [`DistributedEvaluation`] that builds a
//!   partitioned [`Dataset`],
//! - [`Hybrid`] adapts a [`HybridEvaluation`] that can run either way and
//!   picks a strategy once per `open`.

use crate::cluster::Dataset;
use crate::engine::runtime::{DynamicContext, Error, SourceLocation};
use crate::xdm::{Item, Sequence};
use core::fmt;
use std::collections::BTreeSet;
use std::sync::Arc;

mod clauses;
mod input;
mod operators;
mod postfix;
mod primary;
mod sequences;
mod strategy;

pub use clauses::{ReturnClause, ReturnIterator, WhereClause, WhereIterator};
pub use input::{JsonFileIterator, JsonFileSource, ParallelizeIterator, ParallelizeSource};
pub use operators::{
    CastIterator, ComparisonIterator, DynamicFunctionCallIterator, ObjectLookupIterator,
};
pub use postfix::SequenceLookupIterator;
pub use primary::{CommaIterator, ConstantIterator, InlineFunctionIterator, VariableReferenceIterator};
pub use sequences::InsertBeforeIterator;
pub use strategy::{Distributed, DistributedEvaluation, Hybrid, HybridEvaluation, Strategy};

/// A never-opened iterator prototype shared between owners (function bodies).
pub type SharedIterator = Arc<dyn RuntimeIterator>;

/// Execution-mode hint attached to an iterator by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    #[default]
    Unset,
    Local,
    Distributed,
}

impl ExecutionMode {
    pub fn is_distributed(&self) -> bool {
        matches!(self, ExecutionMode::Distributed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    Unopened,
    Open,
    Closed,
}

pub trait RuntimeIterator: Send + Sync + fmt::Debug {
    /// Short kind name used in diagnostics.
    fn name(&self) -> &'static str;

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error>;

    /// True iff the following `next()` yields an item. Never has side effects.
    fn has_next(&self) -> bool;

    fn next(&mut self) -> Result<Item, Error>;

    /// Rewind to the start of the sequence, evaluating against `context`.
    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error>;

    /// Release children and buffers. Idempotent.
    fn close(&mut self);

    fn base(&self) -> &IteratorBase;

    /// Structural copy in the `Unopened` state, used to ship a subtree to a
    /// worker or to run a function body re-entrantly.
    fn boxed_clone(&self) -> Box<dyn RuntimeIterator>;

    /// Whether this iterator hands out a partitioned collection.
    fn is_distributed(&self) -> bool {
        false
    }

    fn distributed(&mut self, _context: &DynamicContext) -> Result<Dataset<Item>, Error> {
        Err(Error::flow(
            format!("{} does not produce a distributed collection", self.name()),
            self.location(),
        ))
    }

    /// Names of the variables the subtree reads from its context.
    fn variable_dependencies(&self) -> BTreeSet<String> {
        self.base().variable_dependencies()
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.base().mode()
    }

    fn location(&self) -> SourceLocation {
        self.base().location()
    }

    fn children(&self) -> Vec<&dyn RuntimeIterator> {
        self.base().children()
    }

    /// Open, pull at most one item, close.
    fn materialize_first_item_or_null(
        &mut self,
        context: &DynamicContext,
    ) -> Result<Option<Item>, Error> {
        if let Err(err) = self.open(context) {
            self.close();
            return Err(err);
        }
        let result = if self.has_next() { self.next().map(Some) } else { Ok(None) };
        self.close();
        result
    }

    /// Open, append up to `n` items to `out`, close. Stops early when the
    /// sequence is exhausted, so unbounded inputs are never drained.
    fn materialize_n_first_items(
        &mut self,
        context: &DynamicContext,
        out: &mut Vec<Item>,
        n: usize,
    ) -> Result<(), Error> {
        if let Err(err) = self.open(context) {
            self.close();
            return Err(err);
        }
        let mut outcome = Ok(());
        let mut pulled = 0usize;
        while pulled < n && self.has_next() {
            match self.next() {
                Ok(item) => {
                    out.push(item);
                    pulled += 1;
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        self.close();
        outcome
    }

    /// Open, drain, close.
    fn materialize(&mut self, context: &DynamicContext) -> Result<Sequence, Error> {
        let mut out = Vec::new();
        self.materialize_n_first_items(context, &mut out, usize::MAX)?;
        Ok(out)
    }
}

/// Evaluate `iterator` expecting zero or one item; more is a type fault.
pub(crate) fn materialize_optional_item(
    iterator: &mut dyn RuntimeIterator,
    context: &DynamicContext,
    what: &str,
) -> Result<Option<Item>, Error> {
    let mut items = Vec::with_capacity(2);
    iterator.materialize_n_first_items(context, &mut items, 2)?;
    if items.len() > 1 {
        return Err(Error::unexpected_type(
            format!("{what} must be a single item, got a sequence of more than one item"),
            iterator.location(),
        ));
    }
    Ok(items.pop())
}

impl Clone for Box<dyn RuntimeIterator> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

impl<'a> dyn RuntimeIterator + 'a {
    /// Double-dispatch entry point for tree walks.
    pub fn accept(&self, visitor: &mut dyn IteratorVisitor) {
        visitor.visit(self);
    }
}

/// Walks an iterator tree. The default visits children depth-first.
pub trait IteratorVisitor {
    fn visit(&mut self, iterator: &dyn RuntimeIterator) {
        for child in iterator.children() {
            self.visit(child);
        }
    }
}

/// Child management and protocol state shared by all iterator variants.
///
/// Variants embed a base and delegate the state-machine checks to it instead
/// of re-implementing them.
#[derive(Debug)]
pub struct IteratorBase {
    name: &'static str,
    pub(crate) children: Vec<Box<dyn RuntimeIterator>>,
    pub(crate) context: Option<DynamicContext>,
    state: IteratorState,
    mode: ExecutionMode,
    location: SourceLocation,
}

impl IteratorBase {
    pub fn new(
        name: &'static str,
        children: Vec<Box<dyn RuntimeIterator>>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            name,
            children,
            context: None,
            state: IteratorState::Unopened,
            mode,
            location,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == IteratorState::Open
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    pub fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        if self.is_open() {
            return Err(Error::flow(
                format!("{}: open() called on an iterator that is already open", self.name),
                self.location,
            ));
        }
        self.context = Some(context.clone());
        self.state = IteratorState::Open;
        Ok(())
    }

    pub fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::flow(
                format!("{}: reset() requires an open iterator", self.name),
                self.location,
            ));
        }
        self.context = Some(context.clone());
        Ok(())
    }

    pub fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        self.context = None;
        if self.state != IteratorState::Unopened {
            self.state = IteratorState::Closed;
        }
    }

    pub fn context(&self) -> Result<&DynamicContext, Error> {
        self.context.as_ref().ok_or_else(|| self.not_open())
    }

    /// Borrow the activation context and the children at the same time.
    pub(crate) fn split(
        &mut self,
    ) -> Result<(&DynamicContext, &mut [Box<dyn RuntimeIterator>]), Error> {
        match self.context.as_ref() {
            Some(context) => Ok((context, &mut self.children)),
            None => Err(Error::flow(
                format!("{}: iterator used before open()", self.name),
                self.location,
            )),
        }
    }

    pub fn children(&self) -> Vec<&dyn RuntimeIterator> {
        self.children.iter().map(|c| &**c as &dyn RuntimeIterator).collect()
    }

    pub fn any_child_distributed(&self) -> bool {
        self.children.iter().any(|c| c.is_distributed())
    }

    pub fn variable_dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        for child in &self.children {
            deps.extend(child.variable_dependencies());
        }
        deps
    }

    /// Flow fault for `next()` without a pending item.
    pub fn exhausted(&self) -> Error {
        Error::flow(format!("invalid next() call in {}", self.name), self.location)
    }

    fn not_open(&self) -> Error {
        Error::flow(format!("{}: iterator used before open()", self.name), self.location)
    }
}

/// Copies are structural: children are copied, iteration state is not.
impl Clone for IteratorBase {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            children: self.children.clone(),
            context: None,
            state: IteratorState::Unopened,
            mode: self.mode,
            location: self.location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::{DynamicContextBuilder, FaultKind};

    fn constant(items: Vec<Item>) -> Box<dyn RuntimeIterator> {
        Box::new(ConstantIterator::new(items, ExecutionMode::Local, SourceLocation::default()))
    }

    #[test]
    fn open_twice_is_flow_fault() {
        let ctx = DynamicContextBuilder::new().build();
        let mut it = constant(vec![Item::Integer(1)]);
        it.open(&ctx).unwrap();
        let err = it.open(&ctx).unwrap_err();
        assert_eq!(err.kind(), FaultKind::Flow);
        it.close();
        it.open(&ctx).unwrap();
        it.close();
    }

    #[test]
    fn reset_requires_open_iterator() {
        let ctx = DynamicContextBuilder::new().build();
        let mut it = constant(vec![Item::Integer(1)]);
        assert_eq!(it.reset(&ctx).unwrap_err().kind(), FaultKind::Flow);
    }

    #[test]
    fn materialize_n_stops_early() {
        let ctx = DynamicContextBuilder::new().build();
        let mut it = constant((1..=10).map(Item::Integer).collect());
        let mut out = vec![Item::Null];
        it.materialize_n_first_items(&ctx, &mut out, 3).unwrap();
        assert_eq!(out, vec![Item::Null, Item::Integer(1), Item::Integer(2), Item::Integer(3)]);
        assert_eq!(it.base().state(), IteratorState::Closed);
    }

    #[test]
    fn boxed_clone_is_unopened() {
        let ctx = DynamicContextBuilder::new().build();
        let mut it = constant(vec![Item::Integer(1)]);
        it.open(&ctx).unwrap();
        let copy = it.boxed_clone();
        assert_eq!(copy.base().state(), IteratorState::Unopened);
        assert!(!copy.has_next());
    }

    #[derive(Default)]
    struct NameCollector(Vec<&'static str>);

    impl IteratorVisitor for NameCollector {
        fn visit(&mut self, iterator: &dyn RuntimeIterator) {
            self.0.push(iterator.name());
            for child in iterator.children() {
                self.visit(child);
            }
        }
    }

    #[test]
    fn visitor_walks_tree_depth_first() {
        let tree: Box<dyn RuntimeIterator> = Box::new(CommaIterator::new(
            vec![
                constant(vec![]),
                Box::new(VariableReferenceIterator::new(
                    "x",
                    ExecutionMode::Local,
                    SourceLocation::default(),
                )),
            ],
            ExecutionMode::Local,
            SourceLocation::default(),
        ));
        let mut collector = NameCollector::default();
        tree.accept(&mut collector);
        assert_eq!(collector.0, ["comma", "constant", "variable-reference"]);
        assert_eq!(tree.variable_dependencies().into_iter().collect::<Vec<_>>(), ["x"]);
    }
}
