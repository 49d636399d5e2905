//! Leaf and structural iterators: literals, variables, the comma operator and
//! inline function declarations.

use super::{ExecutionMode, IteratorBase, RuntimeIterator};
use crate::engine::runtime::{DynamicContext, Error, ErrorCode, SourceLocation};
use crate::xdm::{FunctionItem, Item, Sequence};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Yields a fixed sequence of items.
#[derive(Debug, Clone)]
pub struct ConstantIterator {
    base: IteratorBase,
    items: Arc<[Item]>,
    position: usize,
}

impl ConstantIterator {
    pub fn new(items: Sequence, mode: ExecutionMode, location: SourceLocation) -> Self {
        Self {
            base: IteratorBase::new("constant", Vec::new(), mode, location),
            items: items.into(),
            position: 0,
        }
    }
}

impl RuntimeIterator for ConstantIterator {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.position = 0;
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.base.is_open() && self.position < self.items.len()
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.has_next() {
            return Err(self.base.exhausted());
        }
        let item = self.items[self.position].clone();
        self.position += 1;
        Ok(item)
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.reset(context)?;
        self.position = 0;
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

/// Yields the sequence bound to `$name` in the activation context.
#[derive(Debug, Clone)]
pub struct VariableReferenceIterator {
    base: IteratorBase,
    variable: String,
    items: Sequence,
    position: usize,
}

impl VariableReferenceIterator {
    pub fn new(variable: impl Into<String>, mode: ExecutionMode, location: SourceLocation) -> Self {
        Self {
            base: IteratorBase::new("variable-reference", Vec::new(), mode, location),
            variable: variable.into(),
            items: Vec::new(),
            position: 0,
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    fn load(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.position = 0;
        self.items = context.variable_value(&self.variable).cloned().ok_or_else(|| {
            Error::from_code(
                ErrorCode::XPDY0002,
                format!("variable ${} is not bound", self.variable),
            )
            .at(self.base.location())
        })?;
        Ok(())
    }
}

impl RuntimeIterator for VariableReferenceIterator {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.load(context)
    }

    fn has_next(&self) -> bool {
        self.base.is_open() && self.position < self.items.len()
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.has_next() {
            return Err(self.base.exhausted());
        }
        let item = self.items[self.position].clone();
        self.position += 1;
        Ok(item)
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.reset(context)?;
        self.load(context)
    }

    fn close(&mut self) {
        self.items.clear();
        self.base.close();
    }

    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(self.clone())
    }

    fn variable_dependencies(&self) -> BTreeSet<String> {
        BTreeSet::from([self.variable.clone()])
    }
}

/// Concatenates the sequences of its children, opening each child lazily.
#[derive(Debug, Clone)]
pub struct CommaIterator {
    base: IteratorBase,
    current: usize,
}

impl CommaIterator {
    pub fn new(
        children: Vec<Box<dyn RuntimeIterator>>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("comma", children, mode, location),
            current: 0,
        }
    }

    /// Move `current` to the first child (from `current` on) with an item.
    fn advance(&mut self) -> Result<(), Error> {
        let (context, children) = self.base.split()?;
        while let Some(child) = children.get_mut(self.current) {
            if !child.base().is_open() {
                child.open(context)?;
            }
            if child.has_next() {
                return Ok(());
            }
            child.close();
            self.current += 1;
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<(), Error> {
        for child in &mut self.base.children {
            child.close();
        }
        self.current = 0;
        self.advance()
    }
}

impl RuntimeIterator for CommaIterator {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.restart()
    }

    fn has_next(&self) -> bool {
        self.base.is_open()
            && self
                .base
                .children
                .get(self.current)
                .is_some_and(|child| child.has_next())
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.has_next() {
            return Err(self.base.exhausted());
        }
        let child = &mut self.base.children[self.current];
        let item = child.next()?;
        if !child.has_next() {
            child.close();
            self.current += 1;
            self.advance()?;
        }
        Ok(item)
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.reset(context)?;
        self.restart()
    }

    fn close(&mut self) {
        self.current = 0;
        self.base.close();
    }

    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(self.clone())
    }
}

/// Produces a single function item closing over the free variables of `body`.
#[derive(Debug, Clone)]
pub struct InlineFunctionIterator {
    base: IteratorBase,
    function_name: Option<String>,
    parameters: Vec<String>,
    result: Option<Item>,
}

impl InlineFunctionIterator {
    pub fn new(
        function_name: Option<String>,
        parameters: Vec<String>,
        body: Box<dyn RuntimeIterator>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("inline-function", vec![body], mode, location),
            function_name,
            parameters,
            result: None,
        }
    }

    fn build(&mut self, context: &DynamicContext) {
        let body = &self.base.children[0];
        let closure = self
            .variable_dependencies()
            .into_iter()
            .filter_map(|name| {
                let value = context.variable_value(&name)?.clone();
                Some((name, value))
            })
            .collect();
        let function = FunctionItem::new(
            self.function_name.clone(),
            self.parameters.clone(),
            Arc::from(body.boxed_clone()),
        )
        .with_closure(closure);
        self.result = Some(Item::Function(function));
    }
}

impl RuntimeIterator for InlineFunctionIterator {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.build(context);
        Ok(())
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
        self.build(context);
        Ok(())
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

    fn variable_dependencies(&self) -> BTreeSet<String> {
        let mut deps = self.base.variable_dependencies();
        for parameter in &self.parameters {
            deps.remove(parameter);
        }
        deps
    }
}
