use std::net::SocketAddr;

use thiserror::Error;

use crate::blockwise::StreamKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{resource} capacity exceeded ({capacity} in use)")]
    CapacityExceeded {
        resource: &'static str,
        capacity: usize,
    },

    #[error("Topic too long ({len}/{max})")]
    TopicTooLong { len: usize, max: usize },

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Unknown or evicted subscription slot")]
    UnknownSlot,

    #[error("Unexpected topic name '{0}'")]
    UnexpectedTopic(String),

    #[error("Invalid block count: {0}")]
    InvalidBlockCount(String),

    #[error("Received unexpected block {received}, expected {expected}")]
    OutOfOrder { expected: usize, received: usize },

    #[error("Duplicate block {index}")]
    Duplicate { index: usize },

    #[error("Block {index} has length {len}, expected {expected}")]
    BlockLength {
        index: usize,
        len: usize,
        expected: usize,
    },

    #[error("Manifest buffer overflow: end offset {end} exceeds capacity {capacity}")]
    BufferOverflow { end: usize, capacity: usize },

    #[error("Manifest invalid: {0}")]
    ManifestInvalid(#[source] ParseError),

    #[error("Component {0} has no storage location")]
    ComponentIncomplete(usize),

    #[error("Image size of component {component} unavailable")]
    SizeUnavailable { component: usize },

    #[error("Image beyond size, offset + len={end}, image_size={image_size}")]
    ImageOverrun { end: u64, image_size: u64 },

    #[error("Incorrect size received, got {received}, expected {image_size}")]
    SizeMismatch { received: u64, image_size: u64 },

    #[error("Error writing firmware block to storage: {0}")]
    StorageWriteFailed(#[source] StorageError),

    #[error("Header of slot {slot} invalid, refusing to reboot")]
    SlotHeaderInvalid { slot: usize },

    #[error("Timed out waiting for {stream} block {expected}")]
    BlockTimeout { stream: StreamKind, expected: usize },

    #[error("Subscribe error: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No update session in progress")]
    NoSession,

    #[error("Update worker stopped")]
    WorkerStopped,

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("usage: {0}")]
    Usage(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the pub/sub transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("gateway disconnected")]
    GatewayDisconnected,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("timeout")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("topic '{topic}' exceeds maximum length ({len}/{max})")]
    TopicTooLong { topic: String, len: usize, max: usize },

    #[error("no free subscription slot ({capacity} in use)")]
    CapacityExceeded { capacity: usize },

    #[error("rejected by transport: {0}")]
    Rejected(TransportError),

    #[error("gateway unreachable")]
    GatewayUnreachable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unable to connect to gateway at {gateway}: {source}")]
pub struct ConnectError {
    pub gateway: SocketAddr,
    #[source]
    pub source: TransportError,
}

/// Rejection reported by the manifest parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parser returned {code}: {reason}")]
pub struct ParseError {
    pub code: i32,
    pub reason: String,
}

impl ParseError {
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("storage '{location}': {reason}")]
pub struct StorageError {
    pub location: String,
    pub reason: String,
}

impl StorageError {
    pub fn new(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
