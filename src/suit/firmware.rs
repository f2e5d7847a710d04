use log::{debug, info};

use super::manifest::check_block_len;
use super::platform::{Manifest, StorageBackend};
use super::types::ImageSummary;
use crate::blockwise::{Reassembler, StreamKind};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    More,
    /// Final block written, storage still needs [`FirmwarePipeline::finalize`].
    Complete,
}

/// Streams one component's blocks straight into storage.
pub struct FirmwarePipeline {
    component: usize,
    location: String,
    block_size: usize,
    stream: Reassembler,
    written: u64,
    crc: crc32fast::Hasher,
}

impl FirmwarePipeline {
    pub fn new(component: usize, location: impl Into<String>, block_size: usize) -> Self {
        Self {
            component,
            location: location.into(),
            block_size,
            stream: Reassembler::new(StreamKind::Firmware),
            written: 0,
            crc: crc32fast::Hasher::new(),
        }
    }

    pub fn component(&self) -> usize {
        self.component
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn stream(&self) -> &Reassembler {
        &self.stream
    }

    pub fn on_count_announced(&mut self, total: usize) {
        info!("expecting {} firmware blocks for component {}", total, self.component);
        self.stream.on_count_announced(total);
    }

    /// Validates one block against the declared image size and writes it.
    ///
    /// Nothing reaches storage unless `offset + len <= image_size`, and the
    /// final block must land exactly on `image_size`. A non-final block
    /// that leaves no room for the remaining ones is refused up front.
    pub fn feed<M, S>(
        &mut self,
        manifest: &M,
        storage: &mut S,
        index: usize,
        payload: &[u8],
    ) -> Result<Progress>
    where
        M: Manifest + ?Sized,
        S: StorageBackend + ?Sized,
    {
        let index = self.stream.accept(index)?;
        let last = self.stream.is_complete();
        check_block_len(index, payload.len(), self.block_size, last)?;

        let image_size = manifest
            .image_size(self.component)
            .ok_or(Error::SizeUnavailable {
                component: self.component,
            })?;

        let block_size = self.block_size as u64;
        let offset = (index as u64).saturating_mul(block_size);
        let end = offset.saturating_add(payload.len() as u64);
        if last {
            if end != image_size {
                return Err(Error::SizeMismatch {
                    received: end,
                    image_size,
                });
            }
        } else {
            // every later block carries at least one byte
            let min_end = (self.stream.total() as u64 - 1)
                .saturating_mul(block_size)
                .saturating_add(1);
            if end.max(min_end) > image_size {
                return Err(Error::ImageOverrun {
                    end: end.max(min_end),
                    image_size,
                });
            }
        }

        debug!("writing {} bytes at pos {}", payload.len(), offset);
        storage
            .write(&self.location, offset as usize, payload)
            .map_err(Error::StorageWriteFailed)?;
        self.crc.update(payload);
        self.written = end;

        if image_size != 0 {
            info!("Fetching firmware {:3}%", 100 * end / image_size);
        }

        Ok(if last { Progress::Complete } else { Progress::More })
    }

    /// Finalizes the payload store after the last block.
    pub fn finalize<S>(&mut self, storage: &mut S) -> Result<ImageSummary>
    where
        S: StorageBackend + ?Sized,
    {
        info!("Finalizing payload store '{}'", self.location);
        storage
            .finish(&self.location)
            .map_err(Error::StorageWriteFailed)?;

        Ok(ImageSummary {
            component: self.component,
            bytes: self.written,
            crc32: self.crc.clone().finalize(),
        })
    }
}
