use super::{ExecutionMode, IteratorBase, RuntimeIterator};
use crate::bridge::bindings_transferable;
use crate::cluster::Dataset;
use crate::engine::runtime::{DynamicContext, Error};
use crate::xdm::Item;
use core::fmt;
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Evaluation strategy chosen by a [`Hybrid`] iterator at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Local,
    Distributed,
}

/// An iterator that can either stream locally or build a partitioned
/// collection, depending on its inputs.
///
/// Implementors provide both halves; [`Hybrid`] owns the protocol state and
/// the strategy decision.
pub trait HybridEvaluation: Clone + fmt::Debug + Send + Sync + 'static {
    fn base(&self) -> &IteratorBase;
    fn base_mut(&mut self) -> &mut IteratorBase;

    /// Called after the base is open; the activation context is available
    /// through `base().context()`.
    fn open_local(&mut self) -> Result<(), Error>;
    fn has_next_local(&self) -> bool;
    fn next_local(&mut self) -> Result<Item, Error>;
    fn reset_local(&mut self) -> Result<(), Error>;
    fn close_local(&mut self);

    fn distributed_aux(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error>;

    fn dependencies(&self) -> BTreeSet<String> {
        self.base().variable_dependencies()
    }

    /// Whether the outer bindings this iterator reads can be shipped to
    /// workers.
    fn can_distribute(&self, context: &DynamicContext) -> bool {
        bindings_transferable(&self.dependencies(), context)
    }
}

#[derive(Debug, Clone)]
pub struct Hybrid<T> {
    inner: T,
    strategy: Option<Strategy>,
    collected: VecDeque<Item>,
}

impl<T: HybridEvaluation> Hybrid<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            strategy: None,
            collected: VecDeque::new(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Strategy of the current activation, `None` while not open.
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    fn prefers_distributed(&self) -> bool {
        self.inner.base().mode().is_distributed() || self.inner.base().any_child_distributed()
    }

    fn collect_distributed(&mut self, context: &DynamicContext) -> Result<(), Error> {
        let dataset = self.inner.distributed_aux(context)?;
        self.collected = dataset.collect().into();
        Ok(())
    }
}

impl<T: HybridEvaluation> RuntimeIterator for Hybrid<T> {
    fn name(&self) -> &'static str {
        self.inner.base().name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.inner.base_mut().open(context)?;
        let strategy = if !self.prefers_distributed() {
            Strategy::Local
        } else if self.inner.can_distribute(context) {
            Strategy::Distributed
        } else {
            debug!(iterator = self.name(), "function-valued bindings keep evaluation local");
            Strategy::Local
        };
        debug!(iterator = self.name(), ?strategy, "hybrid strategy selected");
        self.strategy = Some(strategy);
        match strategy {
            Strategy::Local => self.inner.open_local(),
            Strategy::Distributed => self.collect_distributed(context),
        }
    }

    fn has_next(&self) -> bool {
        if !self.inner.base().is_open() {
            return false;
        }
        match self.strategy {
            Some(Strategy::Local) => self.inner.has_next_local(),
            Some(Strategy::Distributed) => !self.collected.is_empty(),
            None => false,
        }
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.inner.base().is_open() {
            return Err(self.inner.base().exhausted());
        }
        match self.strategy {
            Some(Strategy::Local) => self.inner.next_local(),
            Some(Strategy::Distributed) => self
                .collected
                .pop_front()
                .ok_or_else(|| self.inner.base().exhausted()),
            None => Err(self.inner.base().exhausted()),
        }
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.inner.base_mut().reset(context)?;
        // the strategy is kept for the lifetime of the activation
        match self.strategy {
            Some(Strategy::Distributed) => self.collect_distributed(context),
            _ => self.inner.reset_local(),
        }
    }

    fn close(&mut self) {
        if self.strategy == Some(Strategy::Local) {
            self.inner.close_local();
        }
        self.collected.clear();
        self.strategy = None;
        self.inner.base_mut().close();
    }

    fn base(&self) -> &IteratorBase {
        self.inner.base()
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(Hybrid::new(self.inner.clone()))
    }

    fn is_distributed(&self) -> bool {
        self.prefers_distributed()
    }

    fn distributed(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error> {
        self.inner.distributed_aux(context)
    }

    fn variable_dependencies(&self) -> BTreeSet<String> {
        self.inner.dependencies()
    }
}

/// An iterator whose result is always a partitioned collection.
pub trait DistributedEvaluation: Clone + fmt::Debug + Send + Sync + 'static {
    fn base(&self) -> &IteratorBase;
    fn base_mut(&mut self) -> &mut IteratorBase;

    fn distributed_aux(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error>;

    fn dependencies(&self) -> BTreeSet<String> {
        self.base().variable_dependencies()
    }
}

/// Adapts a [`DistributedEvaluation`] to the pull protocol by collecting the
/// dataset on open. Consumers that understand datasets call
/// [`RuntimeIterator::distributed`] instead and never pull.
#[derive(Debug, Clone)]
pub struct Distributed<T> {
    inner: T,
    collected: VecDeque<Item>,
}

impl<T: DistributedEvaluation> Distributed<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            collected: VecDeque::new(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn collect(&mut self, context: &DynamicContext) -> Result<(), Error> {
        let dataset = self.inner.distributed_aux(context)?;
        debug!(
            iterator = self.name(),
            partitions = dataset.num_partitions(),
            "collecting distributed result"
        );
        self.collected = dataset.collect().into();
        Ok(())
    }
}

impl<T: DistributedEvaluation> RuntimeIterator for Distributed<T> {
    fn name(&self) -> &'static str {
        self.inner.base().name()
    }

    fn open(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.inner.base_mut().open(context)?;
        self.collect(context)
    }

    fn has_next(&self) -> bool {
        self.inner.base().is_open() && !self.collected.is_empty()
    }

    fn next(&mut self) -> Result<Item, Error> {
        if !self.inner.base().is_open() {
            return Err(self.inner.base().exhausted());
        }
        self.collected
            .pop_front()
            .ok_or_else(|| self.inner.base().exhausted())
    }

    fn reset(&mut self, context: &DynamicContext) -> Result<(), Error> {
        self.inner.base_mut().reset(context)?;
        self.collect(context)
    }

    fn close(&mut self) {
        self.collected.clear();
        self.inner.base_mut().close();
    }

    fn base(&self) -> &IteratorBase {
        self.inner.base()
    }

    fn boxed_clone(&self) -> Box<dyn RuntimeIterator> {
        Box::new(Distributed::new(self.inner.clone()))
    }

    fn is_distributed(&self) -> bool {
        true
    }

    fn distributed(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error> {
        self.inner.distributed_aux(context)
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Distributed
    }

    fn variable_dependencies(&self) -> BTreeSet<String> {
        self.inner.dependencies()
    }
}
