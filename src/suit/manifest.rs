use log::debug;

use crate::blockwise::{Reassembler, StreamKind};
use crate::error::{Error, Result};

/// Reassembles the manifest into a fixed-capacity buffer.
pub struct ManifestPipeline {
    buffer: Vec<u8>,
    block_size: usize,
    stream: Reassembler,
}

impl ManifestPipeline {
    pub fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            block_size,
            stream: Reassembler::new(StreamKind::Manifest),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn stream(&self) -> &Reassembler {
        &self.stream
    }

    /// Starts over and discards whatever was assembled so far.
    pub fn reset(&mut self) {
        self.stream.reset();
        self.buffer.fill(0);
    }

    /// Refuses counts that cannot fit even with a one-byte final block.
    pub fn on_count_announced(&mut self, total: usize) -> Result<()> {
        if total == 0 {
            return Err(Error::InvalidBlockCount("0".to_string()));
        }
        let min_end = (total - 1)
            .checked_mul(self.block_size)
            .and_then(|offset| offset.checked_add(1))
            .unwrap_or(usize::MAX);
        if min_end > self.capacity() {
            return Err(Error::BufferOverflow {
                end: min_end,
                capacity: self.capacity(),
            });
        }

        self.stream.on_count_announced(total);
        Ok(())
    }

    /// Copies one block into place.
    ///
    /// Returns the assembled length once the final block is in.
    pub fn feed(&mut self, index: usize, payload: &[u8]) -> Result<Option<usize>> {
        let index = self.stream.accept(index)?;
        let last = self.stream.is_complete();
        check_block_len(index, payload.len(), self.block_size, last)?;

        let offset = index * self.block_size;
        let end = offset + payload.len();
        if end > self.capacity() {
            return Err(Error::BufferOverflow {
                end,
                capacity: self.capacity(),
            });
        }

        self.buffer[offset..end].copy_from_slice(payload);
        debug!("received manifest block {} ({} bytes)", index, payload.len());

        Ok(last.then_some(end))
    }

    pub fn contents(&self, len: usize) -> &[u8] {
        &self.buffer[..len.min(self.buffer.len())]
    }
}

/// Every block but the last fills a whole block; none may exceed one.
pub(crate) fn check_block_len(index: usize, len: usize, block_size: usize, last: bool) -> Result<()> {
    let ok = if last {
        len > 0 && len <= block_size
    } else {
        len == block_size
    };
    if ok {
        Ok(())
    } else {
        Err(Error::BlockLength {
            index,
            len,
            expected: block_size,
        })
    }
}
