//! Driver configuration shared by all services.

use std::time::Duration;

/// Driver name registered with the orchestrator unless overridden
pub const DEFAULT_DRIVER_NAME: &str = "vultrbs.csi.driver.com";
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bound on every provider request and poll
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// First delay between two reads of an in-progress operation
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How long the node waits for an attached disk to appear
pub const DEFAULT_DEVICE_WAIT: Duration = Duration::from_secs(30);
/// Block storage volumes a single instance can hold
pub const MAX_VOLUMES_PER_NODE: i64 = 11;

/// Immutable configuration built once at startup.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Plugin name reported by the identity service
    pub name: String,
    pub version: String,
    /// Provider instance id of this node
    pub node_id: String,
    /// Provider region of this node, used when a request names none
    pub region: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub device_wait: Duration,
    pub max_volumes_per_node: i64,
}

impl DriverConfig {
    pub fn new(node_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_DRIVER_NAME.to_string(),
            version: DRIVER_VERSION.to_string(),
            node_id: node_id.into(),
            region: region.into(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            device_wait: DEFAULT_DEVICE_WAIT,
            max_volumes_per_node: MAX_VOLUMES_PER_NODE,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_device_wait(mut self, wait: Duration) -> Self {
        self.device_wait = wait;
        self
    }
}
