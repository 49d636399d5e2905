//! Resource locators and JSON Lines decoding.

use crate::consts::NETWORK_SCHEMES;
use crate::engine::runtime::{Error, ErrorCode, SourceLocation};
use crate::xdm::Item;
use core::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;
use url::Url;

/// Resolves and opens the resources named by queries.
///
/// The runtime asks the resolver whether a resource exists and, for network
/// resources, for a byte stream; reading local files in partitions is left
/// to the [`ClusterEngine`](crate::cluster::ClusterEngine).
pub trait ResourceResolver: Send + Sync + fmt::Debug {
    fn resolve_locator(&self, base: Option<&Url>, raw: &str) -> Result<Url, Error> {
        resolve_locator(base, raw)
    }

    fn exists(&self, uri: &Url) -> Result<bool, Error>;

    fn open_stream(&self, uri: &Url) -> Result<Box<dyn Read + Send>, Error>;
}

/// Resource fault for a locator that exists but cannot be read.
pub(crate) fn unreadable(uri: &Url, err: std::io::Error) -> Error {
    Error::from_code(ErrorCode::FODC0002, format!("cannot read {uri}: {err}"))
        .with_source(Some(Arc::new(err) as Arc<dyn std::error::Error + Send + Sync>))
}

/// Resolver for `file:` URLs. Network schemes are reported as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemResolver;

impl FileSystemResolver {
    fn local_path(uri: &Url) -> Result<std::path::PathBuf, Error> {
        if NETWORK_SCHEMES.contains(&uri.scheme()) {
            return Err(Error::from_code(
                ErrorCode::FODC0002,
                format!("no network access is configured, cannot retrieve {uri}"),
            ));
        }
        if uri.scheme() != "file" {
            return Err(Error::from_code(
                ErrorCode::FODC0002,
                format!("unsupported scheme {}: {uri}", uri.scheme()),
            ));
        }
        uri.to_file_path().map_err(|()| {
            Error::from_code(ErrorCode::FODC0005, format!("not a local file path: {uri}"))
        })
    }
}

impl ResourceResolver for FileSystemResolver {
    fn exists(&self, uri: &Url) -> Result<bool, Error> {
        Ok(Self::local_path(uri)?.exists())
    }

    fn open_stream(&self, uri: &Url) -> Result<Box<dyn Read + Send>, Error> {
        let file = File::open(Self::local_path(uri)?).map_err(|e| unreadable(uri, e))?;
        Ok(Box::new(file))
    }
}

/// Resolve `raw` to an absolute URL.
///
/// Spaces are escaped first. An absolute URL is taken as is; a relative
/// reference is joined onto `base` when there is one, otherwise it is a
/// file path relative to the working directory.
pub fn resolve_locator(base: Option<&Url>, raw: &str) -> Result<Url, Error> {
    let escaped = raw.replace(' ', "%20");
    let invalid = |detail: String| {
        Error::from_code(ErrorCode::FODC0005, format!("invalid resource locator {raw:?}: {detail}"))
    };
    match Url::parse(&escaped) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(&escaped).map_err(|e| invalid(e.to_string())),
            None => {
                let path = Path::new(raw);
                let absolute = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    std::env::current_dir()?.join(path)
                };
                Url::from_file_path(&absolute)
                    .map_err(|()| invalid(format!("{} is not an absolute path", absolute.display())))
            }
        },
        Err(e) => Err(invalid(e.to_string())),
    }
}

/// Parses the lines of one partition into items, one JSON value per line.
///
/// Blank lines are skipped. A malformed line fails the partition with
/// `JNDY0021`, naming the partition and line.
#[derive(Debug)]
pub struct JsonLineParser {
    partition: usize,
    location: SourceLocation,
}

impl JsonLineParser {
    pub fn new(partition: usize, location: SourceLocation) -> Self {
        Self {
            partition,
            location,
        }
    }

    pub fn parse_partition(&self, lines: Vec<String>) -> Result<Vec<Item>, Error> {
        let mut items = Vec::with_capacity(lines.len());
        for (line_index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value = serde_json::from_str::<serde_json::Value>(line).map_err(|e| {
                Error::from_code(
                    ErrorCode::JNDY0021,
                    format!(
                        "invalid JSON in partition {} line {}: {e}",
                        self.partition,
                        line_index + 1
                    ),
                )
                .at(self.location)
                .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
            })?;
            items.push(Item::from_json_value(value).map_err(|e| e.at(self.location))?);
        }
        trace!(partition = self.partition, items = items.len(), "partition parsed");
        Ok(items)
    }
}
