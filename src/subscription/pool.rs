use crate::error::{Error, Result};
use crate::transport::TopicId;

/// What happens when every subscription slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Replace the least recently used slot that is not pinned.
    #[default]
    LeastRecentlyUsed,
    RejectWhenFull,
}

/// Handle to a pool slot. Stale once the slot is released or evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    index: usize,
    epoch: u64,
}

impl SlotRef {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub id: TopicId,
    pub name: String,
}

#[derive(Debug)]
struct Slot {
    topic: String,
    aliases: Vec<Alias>,
    pinned: bool,
    epoch: u64,
    last_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub slot: SlotRef,
    /// Topic whose slot was taken over, still subscribed at the transport.
    pub evicted: Option<String>,
    pub reused: bool,
}

/// Fixed-capacity table of subscribed topics and their aliases.
#[derive(Debug)]
pub struct TopicPool {
    slots: Vec<Option<Slot>>,
    topic_max_len: usize,
    aliases_per_slot: usize,
    policy: EvictionPolicy,
    clock: u64,
    epochs: u64,
}

impl TopicPool {
    pub fn new(
        capacity: usize,
        topic_max_len: usize,
        aliases_per_slot: usize,
        policy: EvictionPolicy,
    ) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            topic_max_len,
            aliases_per_slot,
            policy,
            clock: 0,
            epochs: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn topic_max_len(&self) -> usize {
        self.topic_max_len
    }

    pub fn allocate_or_reuse(&mut self, topic: &str, pinned: bool) -> Result<Allocation> {
        if topic.len() > self.topic_max_len {
            return Err(Error::TopicTooLong {
                len: topic.len(),
                max: self.topic_max_len,
            });
        }
        self.clock += 1;
        let now = self.clock;

        if let Some(index) = self.position(topic) {
            if let Some(slot) = self.slots[index].as_mut() {
                slot.last_used = now;
                slot.pinned |= pinned;
                return Ok(Allocation {
                    slot: SlotRef {
                        index,
                        epoch: slot.epoch,
                    },
                    evicted: None,
                    reused: true,
                });
            }
        }

        let (index, evicted) = match self.slots.iter().position(Option::is_none) {
            Some(index) => (index, None),
            None => {
                let index = self.victim().ok_or(Error::CapacityExceeded {
                    resource: "subscription slot",
                    capacity: self.slots.len(),
                })?;
                let evicted = self.slots[index].take().map(|slot| slot.topic);
                (index, evicted)
            }
        };

        self.epochs += 1;
        self.slots[index] = Some(Slot {
            topic: topic.to_string(),
            aliases: Vec::with_capacity(self.aliases_per_slot),
            pinned,
            epoch: self.epochs,
            last_used: now,
        });

        Ok(Allocation {
            slot: SlotRef {
                index,
                epoch: self.epochs,
            },
            evicted,
            reused: false,
        })
    }

    /// Frees `slot`, returning its topic unless the handle was stale.
    pub fn release(&mut self, slot: SlotRef) -> Option<String> {
        self.get(slot)?;
        self.slots[slot.index].take().map(|s| s.topic)
    }

    pub fn topic(&self, slot: SlotRef) -> Option<&str> {
        self.get(slot).map(|s| s.topic.as_str())
    }

    pub fn aliases(&self, slot: SlotRef) -> Option<&[Alias]> {
        self.get(slot).map(|s| s.aliases.as_slice())
    }

    /// Binds a transport-assigned alias to a sub-topic name within `slot`.
    pub fn register_alias(&mut self, slot: SlotRef, id: TopicId, name: &str) -> Result<()> {
        if name.len() > self.topic_max_len {
            return Err(Error::TopicTooLong {
                len: name.len(),
                max: self.topic_max_len,
            });
        }
        let capacity = self.aliases_per_slot;
        self.clock += 1;
        let now = self.clock;
        let entry = self.get_mut(slot).ok_or(Error::UnknownSlot)?;
        entry.last_used = now;

        if let Some(alias) = entry.aliases.iter_mut().find(|a| a.id == id) {
            alias.name = name.to_string();
            return Ok(());
        }
        if entry.aliases.len() >= capacity {
            return Err(Error::CapacityExceeded {
                resource: "topic alias",
                capacity,
            });
        }
        entry.aliases.push(Alias {
            id,
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn lookup_alias(&self, id: TopicId) -> Option<&str> {
        self.slots
            .iter()
            .flatten()
            .flat_map(|s| s.aliases.iter())
            .find(|a| a.id == id)
            .map(|a| a.name.as_str())
    }

    fn position(&self, topic: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.topic == topic))
    }

    fn victim(&self) -> Option<usize> {
        match self.policy {
            EvictionPolicy::RejectWhenFull => None,
            EvictionPolicy::LeastRecentlyUsed => self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.as_ref().filter(|s| !s.pinned).map(|s| (i, s.last_used)))
                .min_by_key(|&(_, used)| used)
                .map(|(i, _)| i),
        }
    }

    fn get(&self, slot: SlotRef) -> Option<&Slot> {
        self.slots
            .get(slot.index)?
            .as_ref()
            .filter(|s| s.epoch == slot.epoch)
    }

    fn get_mut(&mut self, slot: SlotRef) -> Option<&mut Slot> {
        self.slots
            .get_mut(slot.index)?
            .as_mut()
            .filter(|s| s.epoch == slot.epoch)
    }
}
