use crate::cluster::{ClusterEngine, LocalCluster};
use crate::io::{FileSystemResolver, ResourceResolver};
use crate::xdm::Sequence;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Error codes emitted by the runtime.
///
/// W3C / JSONiq codes are used where a standard code exists; the `JQRT*` codes
/// are project specific and cover protocol and infrastructure defects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    JQRT0001, // iterator protocol misuse (flow fault)
    JQRT0002, // unrecognized item type name
    JQRT0003, // cluster / worker pool failure
    JQRT0004, // bridge codec failure
    XPTY0004, // unexpected type
    JNTY0004, // non-atomic key
    XPDY0002, // unbound variable
    FORG0001, // invalid lexical form
    FOCA0002, // invalid value for cast
    FODC0002, // resource cannot be retrieved
    FODC0005, // invalid resource locator
    JNDY0021, // JSON syntax error
}

/// Coarse classification of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Protocol misuse; a defect in the caller, never recovered.
    Flow,
    /// An operand has the wrong item type.
    Type,
    /// A referenced resource is missing or unreadable.
    Resource,
    /// A type name outside the fixed enumeration.
    UnrecognizedType,
    /// Any other dynamic error raised while evaluating a query.
    Dynamic,
    /// Infrastructure failure (worker pool, codec).
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::JQRT0001 => "JQRT0001",
            ErrorCode::JQRT0002 => "JQRT0002",
            ErrorCode::JQRT0003 => "JQRT0003",
            ErrorCode::JQRT0004 => "JQRT0004",
            ErrorCode::XPTY0004 => "XPTY0004",
            ErrorCode::JNTY0004 => "JNTY0004",
            ErrorCode::XPDY0002 => "XPDY0002",
            ErrorCode::FORG0001 => "FORG0001",
            ErrorCode::FOCA0002 => "FOCA0002",
            ErrorCode::FODC0002 => "FODC0002",
            ErrorCode::FODC0005 => "FODC0005",
            ErrorCode::JNDY0021 => "JNDY0021",
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            ErrorCode::JQRT0001 => FaultKind::Flow,
            ErrorCode::JQRT0002 => FaultKind::UnrecognizedType,
            ErrorCode::JQRT0003 | ErrorCode::JQRT0004 => FaultKind::Internal,
            ErrorCode::XPTY0004 | ErrorCode::JNTY0004 => FaultKind::Type,
            ErrorCode::FODC0002 | ErrorCode::FODC0005 => FaultKind::Resource,
            ErrorCode::XPDY0002
            | ErrorCode::FORG0001
            | ErrorCode::FOCA0002
            | ErrorCode::JNDY0021 => FaultKind::Dynamic,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the expression an iterator was compiled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub location: Option<SourceLocation>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>, // optional chained cause
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            location: None,
            source: None,
        }
    }

    pub fn kind(&self) -> FaultKind {
        self.code.kind()
    }

    /// Protocol misuse such as `next()` on an exhausted iterator.
    pub fn flow(msg: impl Into<String>, location: SourceLocation) -> Self {
        Self::from_code(ErrorCode::JQRT0001, msg).at(location)
    }

    pub fn unexpected_type(msg: impl Into<String>, location: SourceLocation) -> Self {
        Self::from_code(ErrorCode::XPTY0004, msg).at(location)
    }

    pub fn resource(msg: impl Into<String>, location: SourceLocation) -> Self {
        Self::from_code(ErrorCode::FODC0002, msg).at(location)
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Compose an error with a source cause.
    pub fn with_source(
        mut self,
        source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>,
    ) -> Self {
        self.source = source.into();
        self
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::from_code(ErrorCode::FODC0002, e.to_string())
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::from_code(ErrorCode::JNDY0021, format!("invalid JSON: {e}"))
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::from_code(ErrorCode::JQRT0004, format!("item payload codec failed: {e}"))
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "error: {} ({}, {})", self.message, self.code, loc),
            None => write!(f, "error: {} ({})", self.message, self.code),
        }
    }
}

/// Process-wide settings shared by every context of one query run.
///
/// The configuration is immutable once built and handed around as
/// `Arc<RuntimeConfiguration>`, so worker copies of a context see the same
/// cluster handle and resolver as the controlling node.
#[derive(Debug, Clone)]
pub struct RuntimeConfiguration {
    pub cluster: Arc<dyn ClusterEngine>,
    pub resolver: Arc<dyn ResourceResolver>,
    pub base_uri: Option<Url>,
    pub default_partitions: Option<usize>,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        Self {
            cluster: Arc::new(LocalCluster::default()),
            resolver: Arc::new(FileSystemResolver),
            base_uri: None,
            default_partitions: None,
        }
    }
}

impl RuntimeConfiguration {
    /// Partition count used when a query does not request one explicitly.
    pub fn partitions_or_default(&self, requested: Option<usize>) -> usize {
        requested
            .or(self.default_partitions)
            .unwrap_or_else(|| self.cluster.default_parallelism())
            .max(1)
    }
}

pub struct RuntimeConfigurationBuilder {
    config: RuntimeConfiguration,
    workers: Option<usize>,
}

impl Default for RuntimeConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfiguration::default(),
            workers: None,
        }
    }

    /// Reads `JSONIQ_BASE_URI`, `JSONIQ_DEFAULT_PARTITIONS` and `JSONIQ_WORKERS`
    /// from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] but with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut builder = Self::new();
        if let Some(raw) = lookup(crate::consts::ENV_BASE_URI) {
            let url = Url::parse(raw.trim()).map_err(|e| {
                Error::from_code(
                    ErrorCode::FORG0001,
                    format!("{} is not a valid URI: {raw}", crate::consts::ENV_BASE_URI),
                )
                .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
            })?;
            builder = builder.with_base_uri(url);
        }
        if let Some(raw) = lookup(crate::consts::ENV_DEFAULT_PARTITIONS) {
            builder = builder
                .with_default_partitions(parse_count(crate::consts::ENV_DEFAULT_PARTITIONS, &raw)?);
        }
        if let Some(raw) = lookup(crate::consts::ENV_WORKERS) {
            builder = builder.with_workers(parse_count(crate::consts::ENV_WORKERS, &raw)?);
        }
        Ok(builder)
    }

    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterEngine>) -> Self {
        self.config.cluster = cluster;
        self.workers = None;
        self
    }

    /// Run the built-in [`LocalCluster`] on a dedicated pool of `workers` threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.config.resolver = resolver;
        self
    }

    pub fn with_base_uri(mut self, uri: Url) -> Self {
        self.config.base_uri = Some(uri);
        self
    }

    pub fn with_default_partitions(mut self, partitions: usize) -> Self {
        self.config.default_partitions = Some(partitions);
        self
    }

    pub fn build(self) -> Result<RuntimeConfiguration, Error> {
        let mut config = self.config;
        if let Some(workers) = self.workers {
            config.cluster = Arc::new(LocalCluster::with_workers(workers)?);
        }
        Ok(config)
    }
}

fn parse_count(key: &str, raw: &str) -> Result<usize, Error> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::from_code(
            ErrorCode::FORG0001,
            format!("{key} must be a positive integer, got {raw:?}"),
        )),
    }
}

/// Variable bindings of one evaluation activation.
///
/// A context is owned by exactly one iterator frame or worker task. Contexts
/// that are reused across rows must be cleared with
/// [`DynamicContext::remove_all_variables`] before every reuse, otherwise
/// bindings of the previous row stay visible.
#[derive(Debug, Clone)]
pub struct DynamicContext {
    variables: HashMap<String, Sequence>,
    configuration: Arc<RuntimeConfiguration>,
}

impl Default for DynamicContext {
    fn default() -> Self {
        Self::new(Arc::new(RuntimeConfiguration::default()))
    }
}

impl DynamicContext {
    pub fn new(configuration: Arc<RuntimeConfiguration>) -> Self {
        Self {
            variables: HashMap::new(),
            configuration,
        }
    }

    pub fn configuration(&self) -> &Arc<RuntimeConfiguration> {
        &self.configuration
    }

    /// Bind (or rebind) `name` to `value`.
    pub fn add_variable_value(&mut self, name: impl Into<String>, value: Sequence) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable_value(&self, name: &str) -> Option<&Sequence> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Drop every binding but keep the allocated table for the next row.
    pub fn remove_all_variables(&mut self) {
        self.variables.clear();
    }
}

pub struct DynamicContextBuilder {
    ctx: DynamicContext,
}

impl Default for DynamicContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: DynamicContext::default(),
        }
    }

    pub fn with_configuration(mut self, configuration: Arc<RuntimeConfiguration>) -> Self {
        self.ctx.configuration = configuration;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Sequence>) -> Self {
        self.ctx.add_variable_value(name, value.into());
        self
    }

    pub fn build(self) -> DynamicContext {
        self.ctx
    }
}
