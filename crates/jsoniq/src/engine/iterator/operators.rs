use super::{ExecutionMode, IteratorBase, RuntimeIterator, materialize_optional_item};
use crate::engine::casting::cast_item;
use crate::engine::comparison::{ComparisonOperator, value_compare};
use crate::engine::runtime::{DynamicContext, Error, ErrorCode, SourceLocation};
use crate::types::ItemType;
use crate::xdm::{Item, Sequence};
use std::collections::VecDeque;

/// Implements the protocol for iterators that compute a single optional
/// result at open time.
macro_rules! single_result_protocol {
    ($compute:ident) => {
        fn name(&self) -> &'static str {
            self.base.name()
        }

        fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
            self.base.open(context)?;
            self.result = self.$compute(context)?;
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
            self.result = self.$compute(context)?;
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
    };
}

/// Value comparison (`eq`, `ne`, `lt`, `le`, `gt`, `ge`) of two singletons.
/// An empty operand yields the empty sequence.
#[derive(Debug, Clone)]
pub struct ComparisonIterator {
    base: IteratorBase,
    operator: ComparisonOperator,
    result: Option<Item>,
}

impl ComparisonIterator {
    pub fn new(
        operator: ComparisonOperator,
        left: Box<dyn RuntimeIterator>,
        right: Box<dyn RuntimeIterator>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("comparison", vec![left, right], mode, location),
            operator,
            result: None,
        }
    }

    fn compute(&mut self, context: &DynamicContext) -> Result<Option<Item>, Error> {
        let location = self.base.location();
        let symbol = self.operator.symbol();
        let [left, right] = &mut self.base.children[..] else {
            return Err(Error::flow("comparison expects two operands", location));
        };
        let Some(left) = materialize_optional_item(left.as_mut(), context, symbol)? else {
            return Ok(None);
        };
        let Some(right) = materialize_optional_item(right.as_mut(), context, symbol)? else {
            return Ok(None);
        };
        for operand in [&left, &right] {
            if !operand.is_atomic() {
                return Err(Error::unexpected_type(
                    format!("{symbol} cannot compare a non-atomic {} item", operand.item_type()),
                    location,
                ));
            }
        }
        value_compare(self.operator, &left, &right, location).map(|b| Some(Item::Boolean(b)))
    }
}

impl RuntimeIterator for ComparisonIterator {
    single_result_protocol!(compute);
}

/// `expr cast as T` and `expr cast as T?`.
#[derive(Debug, Clone)]
pub struct CastIterator {
    base: IteratorBase,
    target: ItemType,
    allow_empty: bool,
    result: Option<Item>,
}

impl CastIterator {
    pub fn new(
        child: Box<dyn RuntimeIterator>,
        target: ItemType,
        allow_empty: bool,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("cast", vec![child], mode, location),
            target,
            allow_empty,
            result: None,
        }
    }

    fn compute(&mut self, context: &DynamicContext) -> Result<Option<Item>, Error> {
        let location = self.base.location();
        let child = self.base.children[0].as_mut();
        match materialize_optional_item(child, context, "cast operand")? {
            Some(item) => cast_item(&item, self.target, location).map(Some),
            None if self.allow_empty => Ok(None),
            None => Err(Error::unexpected_type(
                format!("empty sequence cannot be cast to {}", self.target),
                location,
            )),
        }
    }
}

impl RuntimeIterator for CastIterator {
    single_result_protocol!(compute);
}

/// `$objects.key`: the value of `key` in every object of the input sequence.
/// Items that are not objects, and objects without the key, are skipped.
#[derive(Debug, Clone)]
pub struct ObjectLookupIterator {
    base: IteratorBase,
    key: Option<String>,
    next_result: Option<Item>,
}

const OBJECTS: usize = 0;
const KEY: usize = 1;

impl ObjectLookupIterator {
    pub fn new(
        objects: Box<dyn RuntimeIterator>,
        key: Box<dyn RuntimeIterator>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        Self {
            base: IteratorBase::new("object-lookup", vec![objects, key], mode, location),
            key: None,
            next_result: None,
        }
    }

    fn start(&mut self) -> Result<(), Error> {
        let location = self.base.location();
        let (context, children) = self.base.split()?;
        let key = materialize_optional_item(children[KEY].as_mut(), context, "object lookup key")?
            .ok_or_else(|| {
                Error::unexpected_type("object lookup key must not be the empty sequence", location)
            })?;
        if !key.is_atomic() {
            return Err(Error::from_code(
                ErrorCode::JNTY0004,
                format!("object lookup key must be atomic, got {}", key.item_type()),
            )
            .at(location));
        }
        let objects = &mut children[OBJECTS];
        if objects.base().is_open() {
            objects.close();
        }
        objects.open(context)?;
        self.key = Some(key.string_value());
        self.set_next_result()
    }

    fn set_next_result(&mut self) -> Result<(), Error> {
        self.next_result = None;
        let Some(key) = self.key.as_deref() else {
            return Ok(());
        };
        let objects = &mut self.base.children[OBJECTS];
        while objects.has_next() {
            if let Item::Object(map) = objects.next()?
                && let Some(value) = map.get(key)
            {
                self.next_result = Some(value.clone());
                return Ok(());
            }
        }
        objects.close();
        Ok(())
    }
}

impl RuntimeIterator for ObjectLookupIterator {
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
        self.key = None;
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

/// `$f(args...)`: calls the function item produced by the first child with
/// the sequences produced by the remaining children.
#[derive(Debug, Clone)]
pub struct DynamicFunctionCallIterator {
    base: IteratorBase,
    results: VecDeque<Item>,
}

impl DynamicFunctionCallIterator {
    pub fn new(
        callee: Box<dyn RuntimeIterator>,
        arguments: Vec<Box<dyn RuntimeIterator>>,
        mode: ExecutionMode,
        location: SourceLocation,
    ) -> Self {
        let mut children = Vec::with_capacity(arguments.len() + 1);
        children.push(callee);
        children.extend(arguments);
        Self {
            base: IteratorBase::new("dynamic-function-call", children, mode, location),
            results: VecDeque::new(),
        }
    }

    fn call(&mut self) -> Result<(), Error> {
        let location = self.base.location();
        let (context, children) = self.base.split()?;
        let Some((callee, arguments)) = children.split_first_mut() else {
            return Err(Error::flow("function call without a callee", location));
        };
        let function = match materialize_optional_item(callee.as_mut(), context, "callee")? {
            Some(Item::Function(function)) => function,
            Some(other) => {
                return Err(Error::unexpected_type(
                    format!("{} item is not a function", other.item_type()),
                    location,
                ));
            }
            None => {
                return Err(Error::unexpected_type(
                    "the empty sequence is not a function",
                    location,
                ));
            }
        };
        let arguments = arguments
            .iter_mut()
            .map(|argument| argument.materialize(context))
            .collect::<Result<Vec<Sequence>, Error>>()?;
        let results = function.invoke(arguments, context, location)?;
        self.results = results.into();
        Ok(())
    }
}

impl RuntimeIterator for DynamicFunctionCallIterator {
    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.open(context)?;
        self.call()
    }

    fn has_next(&self) -> bool {
        self.base.is_open() && !self.results.is_empty()
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.base.is_open() {
            return Err(self.base.exhausted());
        }
        self.results.pop_front().ok_or_else(|| self.base.exhausted())
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.base.reset(context)?;
        self.call()
    }

    fn close(&mut self) {
        self.results.clear();
        self.base.close();
    }

    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::iterator::{ConstantIterator, InlineFunctionIterator, VariableReferenceIterator};
    use crate::engine::runtime::FaultKind;

    fn loc() -> SourceLocation {
        SourceLocation::new(2, 5)
    }

    fn constant(items: Vec<Item>) -> Box<dyn RuntimeIterator> {
        Box::new(ConstantIterator::new(items, ExecutionMode::Local, loc()))
    }

    #[test]
    fn comparison_with_empty_operand_is_empty() {
        let ctx = DynamicContext::default();
        let mut it = ComparisonIterator::new(
            ComparisonOperator::Eq,
            constant(vec![]),
            constant(vec![Item::Integer(1)]),
            ExecutionMode::Local,
            loc(),
        );
        assert!(it.materialize(&ctx).unwrap().is_empty());
    }

    #[test]
    fn comparison_of_sequences_is_type_fault() {
        let ctx = DynamicContext::default();
        let mut it = ComparisonIterator::new(
            ComparisonOperator::Lt,
            constant(vec![Item::Integer(1), Item::Integer(2)]),
            constant(vec![Item::Integer(3)]),
            ExecutionMode::Local,
            loc(),
        );
        assert_eq!(it.materialize(&ctx).unwrap_err().kind(), FaultKind::Type);
    }

    #[test]
    fn cast_of_empty_depends_on_optional_marker() {
        let ctx = DynamicContext::default();
        let mut optional =
            CastIterator::new(constant(vec![]), ItemType::Integer, true, ExecutionMode::Local, loc());
        assert!(optional.materialize(&ctx).unwrap().is_empty());
        let mut strict =
            CastIterator::new(constant(vec![]), ItemType::Integer, false, ExecutionMode::Local, loc());
        assert_eq!(strict.materialize(&ctx).unwrap_err().code, ErrorCode::XPTY0004);
    }

    #[test]
    fn object_lookup_skips_non_objects_and_missing_keys() {
        let ctx = DynamicContext::default();
        let mut it = ObjectLookupIterator::new(
            constant(vec![
                Item::object([("a", Item::Integer(1))]),
                Item::Integer(7),
                Item::object([("b", Item::Integer(2))]),
                Item::object([("a", Item::string("x"))]),
            ]),
            constant(vec![Item::string("a")]),
            ExecutionMode::Local,
            loc(),
        );
        assert_eq!(it.materialize(&ctx).unwrap(), vec![Item::Integer(1), Item::string("x")]);
    }

    #[test]
    fn object_lookup_rejects_structured_key() {
        let ctx = DynamicContext::default();
        let mut it = ObjectLookupIterator::new(
            constant(vec![Item::object([("a", Item::Null)])]),
            constant(vec![Item::array([Item::string("a")])]),
            ExecutionMode::Local,
            loc(),
        );
        assert_eq!(it.materialize(&ctx).unwrap_err().code, ErrorCode::JNTY0004);
    }

    #[test]
    fn dynamic_call_invokes_inline_function() {
        let ctx = DynamicContext::default();
        let body = Box::new(ComparisonIterator::new(
            ComparisonOperator::Gt,
            Box::new(VariableReferenceIterator::new("a", ExecutionMode::Local, loc())),
            Box::new(VariableReferenceIterator::new("b", ExecutionMode::Local, loc())),
            ExecutionMode::Local,
            loc(),
        ));
        let inline = Box::new(InlineFunctionIterator::new(
            Some("greater".into()),
            vec!["a".into(), "b".into()],
            body,
            ExecutionMode::Local,
            loc(),
        ));
        let mut call = DynamicFunctionCallIterator::new(
            inline,
            vec![constant(vec![Item::Integer(3)]), constant(vec![Item::Integer(2)])],
            ExecutionMode::Local,
            loc(),
        );
        assert_eq!(call.materialize(&ctx).unwrap(), vec![Item::Boolean(true)]);
    }

    #[test]
    fn calling_a_non_function_is_type_fault() {
        let ctx = DynamicContext::default();
        let mut call = DynamicFunctionCallIterator::new(
            constant(vec![Item::Integer(1)]),
            vec![],
            ExecutionMode::Local,
            loc(),
        );
        assert_eq!(call.materialize(&ctx).unwrap_err().kind(), FaultKind::Type);
    }
}
