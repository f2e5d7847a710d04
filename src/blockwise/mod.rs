//! Blockwise transfer over indexed sub-topics.
//!
//! A payload published to `base` is split into fixed-size blocks: the block
//! count is published to `base` itself as ASCII decimal, block `i` to
//! `base/i`. Blocks must be consumed strictly in order since the
//! destination offset is derived from the index.

mod types;
pub use self::types::{BlockEvent, Outcome, StreamKind};

use crate::error::{Error, Result};

/// Ordering and duplication guard for one block stream.
#[derive(Debug, Clone)]
pub struct Reassembler {
    kind: StreamKind,
    expected: usize,
    total: usize,
    complete: bool,
}

impl Reassembler {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            expected: 0,
            total: 0,
            complete: false,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Index the next accepted block must carry.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Announced block count, 0 while unknown.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Whether the final block has been accepted.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn reset(&mut self) {
        self.expected = 0;
        self.total = 0;
        self.complete = false;
    }

    pub fn on_count_announced(&mut self, total: usize) {
        self.total = total;
        self.expected = 0;
        self.complete = false;
    }

    /// Rejected blocks leave the state untouched.
    pub fn on_block(&mut self, index: usize) -> Outcome {
        if self.total == 0 || index >= self.total {
            return Outcome::OutOfOrder {
                expected: self.expected,
            };
        }
        if self.complete || index < self.expected {
            return Outcome::Duplicate;
        }
        if index != self.expected {
            return Outcome::OutOfOrder {
                expected: self.expected,
            };
        }

        if index == self.total - 1 {
            self.expected = 0;
            self.complete = true;
        } else {
            self.expected = index + 1;
        }
        Outcome::Accepted(index)
    }

    /// [`on_block`](Self::on_block) with rejections mapped onto [`Error`].
    pub fn accept(&mut self, index: usize) -> Result<usize> {
        match self.on_block(index) {
            Outcome::Accepted(index) => Ok(index),
            Outcome::Duplicate => Err(Error::Duplicate { index }),
            Outcome::OutOfOrder { expected } => Err(Error::OutOfOrder {
                expected,
                received: index,
            }),
        }
    }
}

/// Classifies a publish received under a subscription for `base`.
pub fn classify(base: &str, topic: &str, payload: &[u8]) -> Result<BlockEvent> {
    let unexpected = || Error::UnexpectedTopic(topic.to_string());

    let rest = topic.strip_prefix(base).ok_or_else(unexpected)?;
    if rest.is_empty() || rest == "/" {
        return parse_count(payload).map(BlockEvent::Count);
    }

    let suffix = rest.strip_prefix('/').ok_or_else(unexpected)?;
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unexpected());
    }
    suffix
        .parse::<usize>()
        .map(BlockEvent::Block)
        .map_err(|_| unexpected())
}

fn parse_count(payload: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| Error::InvalidBlockCount("payload is not ASCII".to_string()))?;
    let text = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

    match text.parse::<usize>() {
        Ok(0) => Err(Error::InvalidBlockCount("0".to_string())),
        Ok(total) => Ok(total),
        Err(_) => Err(Error::InvalidBlockCount(text.to_string())),
    }
}

/// Builds `base/index`, refusing names longer than `max_len`.
pub fn block_topic(base: &str, index: usize, max_len: usize) -> Result<String> {
    let digits = index.checked_ilog10().map_or(1, |d| d as usize + 1);
    let len = base.len() + 1 + digits;
    if len > max_len {
        return Err(Error::CapacityExceeded {
            resource: "topic name",
            capacity: max_len,
        });
    }

    let mut topic = String::with_capacity(len);
    topic.push_str(base);
    topic.push('/');
    topic.push_str(&index.to_string());
    Ok(topic)
}
