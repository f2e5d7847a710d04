use std::time::Duration;

use super::types::SuitConfig;
use crate::error::{Error, Result};
use crate::subscription::EvictionPolicy;
use crate::transport::QoS;

impl Default for SuitConfig {
    fn default() -> Self {
        Self {
            block_size: 64,
            manifest_capacity: 640,
            trigger_max_len: 128,
            topic_max_len: 64,
            subscription_slots: 3,
            aliases_per_slot: 5,
            eviction: EvictionPolicy::LeastRecentlyUsed,
            block_timeout: Some(Duration::from_secs(30)),
            drop_duplicates: false,
            event_queue_depth: 8,
            gateway_port: 10000,
            scheme: "mqtt://".to_string(),
            qos: QoS::AtLeastOnce,
            slot_active_topic: "suit/slot/active".to_string(),
            slot_inactive_topic: "suit/slot/inactive".to_string(),
            version_topic: "suit/ver".to_string(),
        }
    }
}

impl SuitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_manifest_capacity(mut self, capacity: usize) -> Self {
        self.manifest_capacity = capacity;
        self
    }

    pub fn with_trigger_max_len(mut self, len: usize) -> Self {
        self.trigger_max_len = len;
        self
    }

    pub fn with_topic_max_len(mut self, len: usize) -> Self {
        self.topic_max_len = len;
        self
    }

    pub fn with_subscription_slots(mut self, slots: usize) -> Self {
        self.subscription_slots = slots;
        self
    }

    pub fn with_aliases_per_slot(mut self, aliases: usize) -> Self {
        self.aliases_per_slot = aliases;
        self
    }

    pub fn with_eviction(mut self, policy: EvictionPolicy) -> Self {
        self.eviction = policy;
        self
    }

    /// `None` waits forever for the next count or block.
    pub fn with_block_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.block_timeout = timeout;
        self
    }

    pub fn drop_duplicates(mut self) -> Self {
        self.drop_duplicates = true;
        self
    }

    pub fn with_event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth;
        self
    }

    pub fn with_gateway_port(mut self, port: u16) -> Self {
        self.gateway_port = port;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_status_topics(
        mut self,
        slot_active: impl Into<String>,
        slot_inactive: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.slot_active_topic = slot_active.into();
        self.slot_inactive_topic = slot_inactive.into();
        self.version_topic = version.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Configuration(msg.to_string()));

        if self.block_size == 0 {
            return invalid("block size must be non-zero");
        }
        if self.manifest_capacity < self.block_size {
            return invalid("manifest buffer must hold at least one block");
        }
        if self.subscription_slots < 2 {
            return invalid("at least two subscription slots are required");
        }
        if self.aliases_per_slot == 0 {
            return invalid("alias table must hold at least one entry");
        }
        if self.topic_max_len == 0 || self.trigger_max_len == 0 {
            return invalid("topic length limits must be non-zero");
        }
        if self.event_queue_depth == 0 {
            return invalid("event queue depth must be non-zero");
        }

        Ok(())
    }
}
