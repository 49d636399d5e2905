//! Partitioned collections and the execution engine that runs them.
//!
//! The runtime only relies on the narrow [`ClusterEngine`] surface: turning
//! local items or text lines into a [`Dataset`] and reading a file as
//! partitioned lines. [`LocalCluster`] implements it in-process on a rayon
//! pool; partitions are processed in parallel while their order is kept.

use crate::engine::runtime::{Error, ErrorCode, SourceLocation};
use crate::io::unreadable;
use crate::xdm::Item;
use core::fmt;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::debug;
use url::Url;

mod frame;

pub use frame::{DataFrame, Row, Schema};

/// An ordered collection split into partitions.
///
/// Concatenating the partitions in index order gives the collection order.
#[derive(Debug, Clone)]
pub struct Dataset<T> {
    partitions: Vec<Vec<T>>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl<T> Dataset<T> {
    pub fn from_partitions(partitions: Vec<Vec<T>>) -> Self {
        Self {
            partitions,
            pool: None,
        }
    }

    /// Split `items` into `partitions` contiguous, near-equal slices.
    pub fn partitioned(items: Vec<T>, partitions: usize) -> Self {
        Self::from_partitions(split_contiguous(items, partitions))
    }

    fn on_pool(mut self, pool: Option<Arc<rayon::ThreadPool>>) -> Self {
        self.pool = pool;
        self
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn count(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn partitions(&self) -> &[Vec<T>] {
        &self.partitions
    }

    /// Bring every element back in collection order.
    pub fn collect(self) -> Vec<T> {
        self.partitions.into_iter().flatten().collect()
    }
}

impl<T: Send> Dataset<T> {
    /// Run `f` once per partition, in parallel. `f` receives the partition
    /// index and its elements. The first error aborts the job.
    pub fn map_partitions<U, F>(self, f: F) -> Result<Dataset<U>, Error>
    where
        U: Send,
        F: Fn(usize, Vec<T>) -> Result<Vec<U>, Error> + Send + Sync,
    {
        let Dataset { partitions, pool } = self;
        let run = || {
            partitions
                .into_par_iter()
                .enumerate()
                .map(|(index, partition)| f(index, partition))
                .collect::<Result<Vec<_>, Error>>()
        };
        let mapped = match &pool {
            Some(pool) => pool.install(run)?,
            None => run()?,
        };
        Ok(Dataset::from_partitions(mapped).on_pool(pool))
    }

    pub fn filter<F>(self, predicate: F) -> Result<Dataset<T>, Error>
    where
        F: Fn(&T) -> Result<bool, Error> + Send + Sync,
    {
        self.map_partitions(|_, partition| {
            let mut kept = Vec::with_capacity(partition.len());
            for element in partition {
                if predicate(&element)? {
                    kept.push(element);
                }
            }
            Ok(kept)
        })
    }
}

fn split_contiguous<T>(items: Vec<T>, partitions: usize) -> Vec<Vec<T>> {
    let partitions = partitions.max(1);
    let base = items.len() / partitions;
    let extra = items.len() % partitions;
    let mut out = Vec::with_capacity(partitions);
    let mut rest = items.into_iter();
    for index in 0..partitions {
        let size = base + usize::from(index < extra);
        out.push(rest.by_ref().take(size).collect());
    }
    out
}

/// Entry point for building partitioned collections.
pub trait ClusterEngine: Send + Sync + fmt::Debug {
    /// Partition count used when neither the query nor the configuration
    /// requests one.
    fn default_parallelism(&self) -> usize;

    fn parallelize(&self, items: Vec<Item>, partitions: Option<usize>) -> Dataset<Item>;

    fn parallelize_text(&self, lines: Vec<String>, partitions: Option<usize>) -> Dataset<String>;

    /// Read the file at `uri` as a collection of text lines.
    fn read_partitioned_file(
        &self,
        uri: &Url,
        partitions: Option<usize>,
    ) -> Result<Dataset<String>, Error>;
}

/// In-process cluster backed by a rayon thread pool.
#[derive(Debug, Clone)]
pub struct LocalCluster {
    pool: Option<Arc<rayon::ThreadPool>>,
    parallelism: usize,
}

impl Default for LocalCluster {
    /// Runs on rayon's global pool.
    fn default() -> Self {
        Self {
            pool: None,
            parallelism: rayon::current_num_threads(),
        }
    }
}

impl LocalCluster {
    /// Runs on a dedicated pool of `workers` threads.
    pub fn with_workers(workers: usize) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("jsoniq-worker-{i}"))
            .build()
            .map_err(|e| {
                Error::from_code(
                    ErrorCode::JQRT0003,
                    format!("cannot start a pool of {workers} workers"),
                )
                .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
            })?;
        debug!(workers, "local cluster pool started");
        Ok(Self {
            parallelism: pool.current_num_threads(),
            pool: Some(Arc::new(pool)),
        })
    }

    fn partitions(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.parallelism).max(1)
    }
}

impl ClusterEngine for LocalCluster {
    fn default_parallelism(&self) -> usize {
        self.parallelism.max(1)
    }

    fn parallelize(&self, items: Vec<Item>, partitions: Option<usize>) -> Dataset<Item> {
        Dataset::partitioned(items, self.partitions(partitions)).on_pool(self.pool.clone())
    }

    fn parallelize_text(&self, lines: Vec<String>, partitions: Option<usize>) -> Dataset<String> {
        Dataset::partitioned(lines, self.partitions(partitions)).on_pool(self.pool.clone())
    }

    fn read_partitioned_file(
        &self,
        uri: &Url,
        partitions: Option<usize>,
    ) -> Result<Dataset<String>, Error> {
        if uri.scheme() != "file" {
            return Err(Error::from_code(
                ErrorCode::FODC0002,
                format!("the local cluster cannot read {} resources: {uri}", uri.scheme()),
            ));
        }
        let path = uri.to_file_path().map_err(|()| {
            Error::from_code(ErrorCode::FODC0005, format!("not a local file path: {uri}"))
        })?;
        let file = File::open(&path).map_err(|e| unreadable(uri, e))?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| unreadable(uri, e))?;
        let partitions = self.partitions(partitions);
        debug!(%uri, lines = lines.len(), partitions, "file split into partitions");
        Ok(Dataset::partitioned(lines, partitions).on_pool(self.pool.clone()))
    }
}

/// Attach `location` to an error raised by a cluster call that has none.
pub(crate) fn locate(err: Error, location: SourceLocation) -> Error {
    match err.location {
        Some(_) => err,
        None => err.at(location),
    }
}
