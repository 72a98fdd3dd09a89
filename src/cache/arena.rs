//! Fixed-size record arena backing the embedding cache.
//!
//! # Storage Format
//!
//! The binary file has no header. Record `n` holds one vector as
//! `dimension` little-endian f32 values at byte offset
//! `n * dimension * 4`. Which key owns which record lives in the JSON index.
//!
//! In memory the arena is one contiguous `Vec<f32>` grown in batches of
//! [`ALLOCATION_BATCH`] slots. Growth never moves a slot's logical offset.

use crate::vector::VectorDimension;
use memmap2::MmapOptions;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Slots added per growth step, and the initial allocation.
pub const ALLOCATION_BATCH: usize = 1000;

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

#[derive(Debug)]
pub struct SlotArena {
    dimension: VectorDimension,
    data: Vec<f32>,
    /// Upper bound on useful slots (the cache capacity).
    max_slots: usize,
}

impl SlotArena {
    /// Empty arena pre-allocated for the first batch of slots.
    pub fn new(dimension: VectorDimension, max_slots: usize) -> Self {
        let initial = ALLOCATION_BATCH.min(max_slots.max(1));
        Self {
            dimension,
            data: vec![0.0; initial * dimension.get()],
            max_slots,
        }
    }

    /// Load the first `used_slots` records from a slot file.
    ///
    /// Fails if the file is shorter than `used_slots` records. Bytes past
    /// the last used record are ignored.
    pub fn load(
        path: &Path,
        dimension: VectorDimension,
        used_slots: usize,
        max_slots: usize,
    ) -> io::Result<Self> {
        let mut arena = Self::new(dimension, max_slots);
        if used_slots == 0 {
            return Ok(arena);
        }

        let file = File::open(path)?;
        let required = used_slots * dimension.byte_len();
        if (file.metadata()?.len() as usize) < required {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "slot file holds fewer than {used_slots} records of {} bytes",
                    dimension.byte_len()
                ),
            ));
        }

        // The file is only read here and copied out before the map is dropped.
        let mmap = unsafe { MmapOptions::new().len(required).map(&file)? };

        arena.ensure_slot(used_slots - 1);
        for (value, bytes) in arena
            .data
            .iter_mut()
            .zip(mmap[..required].chunks_exact(BYTES_PER_F32))
        {
            *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }

        Ok(arena)
    }

    /// Number of slots currently backed by memory.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len() / self.dimension.get()
    }

    /// Grow in whole batches until `slot` is addressable.
    pub fn ensure_slot(&mut self, slot: usize) {
        let mut capacity = self.capacity();
        if slot < capacity {
            return;
        }
        while slot >= capacity {
            capacity += ALLOCATION_BATCH;
        }
        self.data.resize(capacity * self.dimension.get(), 0.0);
    }

    /// Vector stored in `slot`.
    ///
    /// # Panics
    /// Panics if `slot` has never been allocated. The cache only reads slots
    /// it handed out.
    #[must_use]
    pub fn read(&self, slot: usize) -> &[f32] {
        let dim = self.dimension.get();
        &self.data[slot * dim..(slot + 1) * dim]
    }

    /// Overwrite `slot`, growing the arena if needed.
    pub fn write(&mut self, slot: usize, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dimension.get());
        self.ensure_slot(slot);
        let dim = self.dimension.get();
        self.data[slot * dim..(slot + 1) * dim].copy_from_slice(vector);
    }

    /// Encode the first `used_slots` records in file layout.
    #[must_use]
    pub fn to_bytes(&self, used_slots: usize) -> Vec<u8> {
        let values = &self.data[..(used_slots * self.dimension.get()).min(self.data.len())];
        let mut bytes = Vec::with_capacity(values.len() * BYTES_PER_F32);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Hex SHA-256 of the first `used_slots` records in their file encoding.
    #[must_use]
    pub fn checksum(&self, used_slots: usize) -> String {
        let values = &self.data[..(used_slots * self.dimension.get()).min(self.data.len())];
        let mut hasher = Sha256::new();
        for value in values {
            hasher.update(value.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Drop all records and return to the initial allocation.
    pub fn clear(&mut self) {
        *self = Self::new(self.dimension, self.max_slots);
    }

    #[must_use]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }
}
