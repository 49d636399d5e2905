//! Clause iterators that bind a variable to each input item.
//!
//! Both clauses stream locally when their input is local and switch to
//! row-wise evaluation on the cluster when the input is a distributed
//! collection (or the compiler marked them distributed).

use super::{ExecutionMode, Hybrid, HybridEvaluation, IteratorBase, RuntimeIterator};
use crate::bridge::{
    RowMapper, RowPredicate, bindings_transferable, frame_for_variable, items_from_column,
    transferable,
};
use crate::cluster::Dataset;
use crate::engine::runtime::{DynamicContext, Error, SourceLocation};
use crate::xdm::Item;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

const INPUT: usize = 0;
const EXPRESSION: usize = 1;

pub type WhereIterator = Hybrid<WhereClause>;
pub type ReturnIterator = Hybrid<ReturnClause>;

/// Keep the input items for which the predicate, evaluated with the item
/// bound to the clause variable, returns `true`.
#[derive(Debug, Clone)]
pub struct WhereClause {
    base: IteratorBase,
    variable: String,
    row_context: Option<DynamicContext>,
    next_result: Option<Item>,
}

impl WhereClause {
    pub fn new(
        input: Box<dyn RuntimeIterator>,
        variable: impl Into<String>,
        predicate: Box<dyn RuntimeIterator>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("where", vec![input, predicate], mode, location),
            variable: variable.into(),
            row_context: None,
            next_result: None,
        }
    }

    pub fn iterator(self) -> WhereIterator {
        Hybrid::new(self)
    }

    fn start(&mut self) -> Result<(), Error> {
        let (context, children) = self.base.split()?;
        self.row_context = Some(context.clone());
        let input = &mut children[INPUT];
        if input.base().is_open() {
            input.close();
        }
        input.open(context)?;
        self.set_next_result()
    }

    fn set_next_result(&mut self) -> Result<(), Error> {
        self.next_result = None;
        let location = self.base.location();
        let Some(row_context) = self.row_context.as_mut() else {
            return Err(self.base.exhausted());
        };
        let [input, predicate] = &mut self.base.children[..] else {
            return Err(Error::flow("where clause expects two children", location));
        };
        while input.has_next() {
            let item = input.next()?;
            row_context.add_variable_value(self.variable.clone(), vec![item.clone()]);
            if predicate_holds(predicate.as_mut(), row_context, location)? {
                self.next_result = Some(item);
                return Ok(());
            }
        }
        input.close();
        Ok(())
    }

    /// Controller-side evaluation over a dataset whose rows cannot be
    /// shipped. Keeps the partition count and item order.
    fn filter_in_place(
        &mut self,
        input: Dataset<Item>,
        context: &DynamicContext,
    ) -> Result<Dataset<Item>, Error> {
        let location = self.base.location();
        let partitions = input.num_partitions();
        let predicate = self.base.children[EXPRESSION].as_mut();
        let mut row_context = context.clone();
        let mut kept = Vec::new();
        for item in input.collect() {
            row_context.add_variable_value(self.variable.clone(), vec![item.clone()]);
            if predicate_holds(predicate, &row_context, location)? {
                kept.push(item);
            }
        }
        Ok(context.configuration().cluster.parallelize(kept, Some(partitions)))
    }
}

fn predicate_holds(
    predicate: &mut dyn RuntimeIterator,
    context: &DynamicContext,
    location: SourceLocation,
) -> Result<bool, Error> {
    match predicate.materialize_first_item_or_null(context)? {
        Some(Item::Boolean(b)) => Ok(b),
        Some(other) => Err(Error::unexpected_type(
            format!("where clause must evaluate to a boolean, got {}", other.item_type()),
            location,
        )),
        None => Err(Error::unexpected_type(
            "where clause must evaluate to a boolean, got the empty sequence",
            location,
        )),
    }
}

/// Input as a dataset: taken over from a distributed child, or the local
/// child's items spread over the cluster.
fn input_dataset(
    input: &mut dyn RuntimeIterator,
    context: &DynamicContext,
) -> Result<Dataset<Item>, Error> {
    if input.is_distributed() {
        input.distributed(context)
    } else {
        let items = input.materialize(context)?;
        Ok(context.configuration().cluster.parallelize(items, None))
    }
}

/// Whether a clause over `input` can run row-wise on workers: neither the
/// input items nor the outer bindings the expression reads hold function
/// items.
fn rows_transferable(
    input: &Dataset<Item>,
    expression: &dyn RuntimeIterator,
    context: &DynamicContext,
) -> bool {
    input.partitions().iter().all(|partition| transferable(partition))
        && bindings_transferable(&expression.variable_dependencies(), context)
}

/// Free variables of a clause: the input's plus the expression's, minus the
/// clause variable.
fn clause_dependencies(base: &IteratorBase, variable: &str) -> BTreeSet<String> {
    let mut deps = base.children[EXPRESSION].variable_dependencies();
    deps.remove(variable);
    deps.extend(base.children[INPUT].variable_dependencies());
    deps
}

impl HybridEvaluation for WhereClause {
    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IteratorBase {
        &mut self.base
    }

    fn open_local(&mut self) -> Result<(), Error> {
        self.start()
    }

    fn has_next_local(&self) -> bool {
        self.next_result.is_some()
    }

    fn next_local(&mut self) -> Result<Item, Error> {
        let item = self.next_result.take().ok_or_else(|| self.base.exhausted())?;
        self.set_next_result()?;
        Ok(item)
    }

    fn reset_local(&mut self) -> Result<(), Error> {
        self.start()
    }

    fn close_local(&mut self) {
        self.next_result = None;
        self.row_context = None;
    }

    fn distributed_aux(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error> {
        let input = input_dataset(self.base.children[INPUT].as_mut(), context)?;
        if !rows_transferable(&input, &*self.base.children[EXPRESSION], context) {
            return self.filter_in_place(input, context);
        }
        let predicate_tree = &self.base.children[EXPRESSION];
        let frame = frame_for_variable(
            input,
            &self.variable,
            &predicate_tree.variable_dependencies(),
            context,
        )?;
        let predicate = RowPredicate::new(
            predicate_tree.boxed_clone(),
            Arc::clone(frame.schema()),
            Arc::clone(context.configuration()),
        );
        let kept = frame.filter_rows(&predicate)?;
        items_from_column(kept.into_rows(), 0)
    }

    fn dependencies(&self) -> BTreeSet<String> {
        clause_dependencies(&self.base, &self.variable)
    }
}

/// Evaluate the expression once per input item, with the item bound to the
/// clause variable, and concatenate the results in input order.
#[derive(Debug, Clone)]
pub struct ReturnClause {
    base: IteratorBase,
    variable: String,
    row_context: Option<DynamicContext>,
    buffer: VecDeque<Item>,
}

impl ReturnClause {
    pub fn new(
        input: Box<dyn RuntimeIterator>,
        variable: impl Into<String>,
        expression: Box<dyn RuntimeIterator>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("return", vec![input, expression], mode, location),
            variable: variable.into(),
            row_context: None,
            buffer: VecDeque::new(),
        }
    }

    pub fn iterator(self) -> ReturnIterator {
        Hybrid::new(self)
    }

    fn start(&mut self) -> Result<(), Error> {
        let (context, children) = self.base.split()?;
        self.row_context = Some(context.clone());
        let input = &mut children[INPUT];
        if input.base().is_open() {
            input.close();
        }
        input.open(context)?;
        self.buffer.clear();
        self.fill()
    }

    /// Pull input items until one produces a non-empty result.
    fn fill(&mut self) -> Result<(), Error> {
        let location = self.base.location();
        let Some(row_context) = self.row_context.as_mut() else {
            return Err(self.base.exhausted());
        };
        let [input, expression] = &mut self.base.children[..] else {
            return Err(Error::flow("return clause expects two children", location));
        };
        while self.buffer.is_empty() && input.has_next() {
            let item = input.next()?;
            row_context.add_variable_value(self.variable.clone(), vec![item]);
            self.buffer.extend(expression.materialize(row_context)?);
        }
        if self.buffer.is_empty() {
            input.close();
        }
        Ok(())
    }

    fn map_in_place(
        &mut self,
        input: Dataset<Item>,
        context: &DynamicContext,
    ) -> Result<Dataset<Item>, Error> {
        let partitions = input.num_partitions();
        let expression = self.base.children[EXPRESSION].as_mut();
        let mut row_context = context.clone();
        let mut results = Vec::new();
        for item in input.collect() {
            row_context.add_variable_value(self.variable.clone(), vec![item]);
            results.extend(expression.materialize(&row_context)?);
        }
        Ok(context.configuration().cluster.parallelize(results, Some(partitions)))
    }
}

impl HybridEvaluation for ReturnClause {
    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IteratorBase {
        &mut self.base
    }

    fn open_local(&mut self) -> Result<(), Error> {
        self.start()
    }

    fn has_next_local(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn next_local(&mut self) -> Result<Item, Error> {
        let item = self.buffer.pop_front().ok_or_else(|| self.base.exhausted())?;
        if self.buffer.is_empty() {
            self.fill()?;
        }
        Ok(item)
    }

    fn reset_local(&mut self) -> Result<(), Error> {
        self.start()
    }

    fn close_local(&mut self) {
        self.buffer.clear();
        self.row_context = None;
    }

    fn distributed_aux(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error> {
        let input = input_dataset(self.base.children[INPUT].as_mut(), context)?;
        if !rows_transferable(&input, &*self.base.children[EXPRESSION], context) {
            return self.map_in_place(input, context);
        }
        let expression = &self.base.children[EXPRESSION];
        let frame = frame_for_variable(
            input,
            &self.variable,
            &expression.variable_dependencies(),
            context,
        )?;
        let mapper = RowMapper::new(
            expression.boxed_clone(),
            Arc::clone(frame.schema()),
            Arc::clone(context.configuration()),
        );
        frame
            .map_rows(&mapper)?
            .map_partitions(|_, sequences| Ok(sequences.into_iter().flatten().collect()))
    }

    fn dependencies(&self) -> BTreeSet<String> {
        clause_dependencies(&self.base, &self.variable)
    }
}
