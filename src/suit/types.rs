use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::blockwise::StreamKind;
use crate::error::Error;
use crate::subscription::{EvictionPolicy, SlotRef};
use crate::transport::{QoS, TopicId};

/// Stages of one update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    AwaitManifestCount,
    ReceivingManifest,
    ParsingManifest,
    AwaitFirmwareCount,
    ReceivingFirmware,
    Finalizing,
    ValidatingSlot,
    Rebooting,
    Aborted,
}

impl State {
    /// States that block on a publish from the network.
    pub fn awaits_network(&self) -> bool {
        matches!(
            self,
            State::AwaitManifestCount
                | State::ReceivingManifest
                | State::AwaitFirmwareCount
                | State::ReceivingFirmware
        )
    }

    pub(crate) fn stream(&self) -> Option<StreamKind> {
        match self {
            State::AwaitManifestCount | State::ReceivingManifest => Some(StreamKind::Manifest),
            State::AwaitFirmwareCount | State::ReceivingFirmware => Some(StreamKind::Firmware),
            _ => None,
        }
    }
}

/// Everything the update worker reacts to, in arrival order.
#[derive(Debug)]
pub enum Event {
    /// Payload names the manifest topic, optionally scheme-prefixed.
    Trigger(Bytes),
    CountAnnounced {
        stream: StreamKind,
        generation: u64,
        total: usize,
    },
    BlockReceived {
        stream: StreamKind,
        generation: u64,
        index: usize,
        payload: Bytes,
    },
    Registered {
        slot: SlotRef,
        alias: TopicId,
        name: String,
    },
    Error {
        generation: u64,
        error: Error,
    },
}

/// Size and checksum of one stored component image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSummary {
    pub component: usize,
    pub bytes: u64,
    pub crc32: u32,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Rebooted { images: Vec<ImageSummary> },
    Aborted(Arc<Error>),
}

#[derive(Debug, Clone, Default)]
pub struct Status {
    pub state: State,
    /// Generation of the latest session, 0 before the first trigger.
    pub session: u64,
    pub last_outcome: Option<SessionOutcome>,
}

#[derive(Debug, Clone)]
pub struct SuitConfig {
    pub block_size: usize,
    pub manifest_capacity: usize,
    pub trigger_max_len: usize,
    pub topic_max_len: usize,
    pub subscription_slots: usize,
    pub aliases_per_slot: usize,
    pub eviction: EvictionPolicy,
    pub block_timeout: Option<Duration>,
    pub drop_duplicates: bool,
    pub event_queue_depth: usize,
    pub gateway_port: u16,
    pub scheme: String,
    pub qos: QoS,
    pub slot_active_topic: String,
    pub slot_inactive_topic: String,
    pub version_topic: String,
}
