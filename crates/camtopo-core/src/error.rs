//! Error taxonomy for registry, handle, and subscription operations

use thiserror::Error;

use crate::node::NodeError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The transport layer could not be queried. The previous snapshot stays authoritative.
    #[error("Enumeration failed on {transport} transport: {reason}")]
    Enumeration { transport: String, reason: String },
    /// The handle (or a subscription made through it) belongs to a superseded snapshot.
    #[error("Stale handle for interface {interface}: issued by snapshot {generation}, current is {current}")]
    StaleHandle {
        interface: String,
        generation: u64,
        current: u64,
    },
    #[error("Topology registry has already been released")]
    AlreadyReleased,
    #[error("Device {serial} is outside the adapter subnet: {reason}")]
    InvalidAddress { serial: u64, reason: String },
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),
    #[error("{0} subscription(s) still registered")]
    SubscriptionsOutstanding(usize),
    #[error("Topology registry is already initialized for this process")]
    AlreadyInitialized,
    #[error("Node access failed: {0}")]
    Node(#[from] NodeError),
}

impl TopologyError {
    /// Whether the caller should refresh and retry with new handles
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleHandle { .. })
    }
}
