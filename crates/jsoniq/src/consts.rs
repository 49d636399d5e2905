/// Environment variable holding the static base URI used to resolve relative locators.
pub const ENV_BASE_URI: &str = "JSONIQ_BASE_URI";
/// Environment variable holding the default partition count for distributed reads.
pub const ENV_DEFAULT_PARTITIONS: &str = "JSONIQ_DEFAULT_PARTITIONS";
/// Environment variable holding the worker count of the built-in local cluster.
pub const ENV_WORKERS: &str = "JSONIQ_WORKERS";

/// Leading byte of every item payload written by the bridge codec.
pub const ITEM_PAYLOAD_VERSION: u8 = 1;

/// Schemes that are streamed through the resolver instead of being read by the cluster.
pub const NETWORK_SCHEMES: [&str; 2] = ["http", "https"];
