//! Iterators that create distributed collections.

use super::{
    Distributed, DistributedEvaluation, ExecutionMode, IteratorBase, RuntimeIterator,
    materialize_optional_item,
};
use crate::cluster::{Dataset, locate};
use crate::consts::NETWORK_SCHEMES;
use crate::engine::runtime::{DynamicContext, Error, SourceLocation};
use crate::io::{JsonLineParser, unreadable};
use crate::xdm::Item;
use std::io::{BufRead, BufReader};
use tracing::debug;
use url::Url;

pub type JsonFileIterator = Distributed<JsonFileSource>;
pub type ParallelizeIterator = Distributed<ParallelizeSource>;

/// Optional partition-count argument: a positive integer.
fn requested_partitions(
    child: Option<&mut Box<dyn RuntimeIterator>>,
    context: &DynamicContext,
    location: SourceLocation,
) -> Result<Option<usize>, Error> {
    let Some(child) = child else {
        return Ok(None);
    };
    match materialize_optional_item(child.as_mut(), context, "partition count")? {
        Some(Item::Integer(n)) if n > 0 => Ok(usize::try_from(n).ok()),
        Some(other) => Err(Error::unexpected_type(
            format!("partition count must be a positive integer, got {}", other.string_value()),
            location,
        )),
        None => Ok(None),
    }
}

/// `json-file($url[, $partitions])`: one item per line of a JSON Lines
/// resource.
///
/// Network resources (`http`, `https`) are streamed through the configured
/// resolver and then spread over the cluster; any other URL must exist and
/// is read by the cluster directly.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    base: IteratorBase,
    static_base_uri: Option<Url>,
}

impl JsonFileSource {
    pub fn new(
        url: Box<dyn RuntimeIterator>,
        partitions: Option<Box<dyn RuntimeIterator>>,
        location: SourceLocation,
    ) -> Self {
        let mut children = vec![url];
        children.extend(partitions);
        Self {
            base: IteratorBase::new("json-file", children, ExecutionMode::Distributed, location),
            static_base_uri: None,
        }
    }

    /// Base URI of the query module; takes precedence over the configured one.
    pub fn with_static_base_uri(mut self, base: Url) -> Self {
        self.static_base_uri = Some(base);
        self
    }

    pub fn iterator(self) -> JsonFileIterator {
        Distributed::new(self)
    }

    fn read_lines(
        &self,
        uri: &Url,
        partitions: usize,
        context: &DynamicContext,
    ) -> Result<Dataset<String>, Error> {
        let config = context.configuration();
        let location = self.base.location();
        if NETWORK_SCHEMES.contains(&uri.scheme()) {
            let stream = config.resolver.open_stream(uri).map_err(|e| locate(e, location))?;
            let lines = BufReader::new(stream)
                .lines()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| unreadable(uri, e).at(location))?;
            debug!(%uri, lines = lines.len(), "network resource fetched");
            return Ok(config.cluster.parallelize_text(lines, Some(partitions)));
        }
        if !config.resolver.exists(uri).map_err(|e| locate(e, location))? {
            return Err(Error::resource(format!("File {uri} not found."), location));
        }
        config
            .cluster
            .read_partitioned_file(uri, Some(partitions))
            .map_err(|e| locate(e, location))
    }
}

impl DistributedEvaluation for JsonFileSource {
    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IteratorBase {
        &mut self.base
    }

    fn distributed_aux(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error> {
        let location = self.base.location();
        let (url_child, rest) = self
            .base
            .children
            .split_first_mut()
            .ok_or_else(|| Error::flow("json-file expects a URL argument", location))?;
        let raw = match materialize_optional_item(url_child.as_mut(), context, "json-file URL")? {
            Some(Item::String(s) | Item::AnyUri(s)) => s,
            Some(other) => {
                return Err(Error::unexpected_type(
                    format!("json-file expects a string URL, got {}", other.item_type()),
                    location,
                ));
            }
            None => {
                return Err(Error::unexpected_type(
                    "json-file expects a string URL, got the empty sequence",
                    location,
                ));
            }
        };
        let requested = requested_partitions(rest.first_mut(), context, location)?;

        let config = context.configuration();
        let base = self.static_base_uri.as_ref().or(config.base_uri.as_ref());
        let uri = config
            .resolver
            .resolve_locator(base, &raw)
            .map_err(|e| locate(e, location))?;
        let partitions = config.partitions_or_default(requested);
        debug!(%uri, partitions, "reading JSON lines");

        let lines = self.read_lines(&uri, partitions, context)?;
        lines.map_partitions(|partition, lines| {
            JsonLineParser::new(partition, location).parse_partition(lines)
        })
    }
}

/// `parallelize($seq[, $partitions])`: spreads a local sequence over the
/// cluster.
#[derive(Debug, Clone)]
pub struct ParallelizeSource {
    base: IteratorBase,
}

impl ParallelizeSource {
    pub fn new(
        sequence: Box<dyn RuntimeIterator>,
        partitions: Option<Box<dyn RuntimeIterator>>,
        location: SourceLocation,
    ) -> Self {
        let mut children = vec![sequence];
        children.extend(partitions);
        Self {
            base: IteratorBase::new("parallelize", children, ExecutionMode::Distributed, location),
        }
    }

    pub fn iterator(self) -> ParallelizeIterator {
        Distributed::new(self)
    }
}

impl DistributedEvaluation for ParallelizeSource {
    fn base(&self) -> &IteratorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IteratorBase {
        &mut self.base
    }

    fn distributed_aux(&mut self, context: &DynamicContext) -> Result<Dataset<Item>, Error> {
        let location = self.base.location();
        let (sequence, rest) = self
            .base
            .children
            .split_first_mut()
            .ok_or_else(|| Error::flow("parallelize expects a sequence argument", location))?;
        let items = sequence.materialize(context)?;
        let requested = requested_partitions(rest.first_mut(), context, location)?;
        let config = context.configuration();
        Ok(config.cluster.parallelize(items, Some(config.partitions_or_default(requested))))
    }
}
