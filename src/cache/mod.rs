// Bounded-memory source block cache.
//
// `BlockArena` holds the bytes, `LruDirectory` holds the recency order, and
// `BlockCache` ties them to a block-number index. Memory is fixed at
// construction: `capacity * block_size` bytes, whatever the source size.

pub mod arena;
pub mod lru;

use std::collections::HashMap;
use std::num::NonZeroUsize;

pub use arena::BlockArena;
pub use lru::LruDirectory;

use crate::engine::SourceBlock;

/// Index of a cache slot, `0..capacity`.
pub type SlotId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache capacity must be at least one block")]
    ZeroCapacity,
    #[error("cache block size must be non-zero")]
    ZeroBlockSize,
    #[error("cannot allocate {bytes} bytes for the block cache")]
    OutOfMemory { bytes: u64 },
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Source bytes read into slots on misses.
    pub bytes_read: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotMeta {
    /// `None` marks an unused slot.
    block: Option<u64>,
    valid: usize,
}

/// Fixed-capacity LRU cache of source blocks.
///
/// At most one slot holds a given block. A slot's valid length may be
/// shorter than the block size for the final block of a source.
#[derive(Debug)]
pub struct BlockCache {
    arena: BlockArena,
    lru: LruDirectory,
    meta: Vec<SlotMeta>,
    index: HashMap<u64, SlotId>,
    stats: CacheStats,
}

impl BlockCache {
    pub fn new(block_size: usize, capacity: usize) -> Result<Self, CacheError> {
        let arena = BlockArena::new(block_size, capacity)?;
        let slots = NonZeroUsize::new(capacity).ok_or(CacheError::ZeroCapacity)?;
        log::debug!(
            "block cache: {capacity} x {block_size} bytes ({} total)",
            arena.total_bytes()
        );
        Ok(Self {
            arena,
            lru: LruDirectory::new(slots),
            meta: vec![SlotMeta::default(); capacity],
            index: HashMap::with_capacity(capacity),
            stats: CacheStats::default(),
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.arena.block_size()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Whether `block` is resident. Does not affect recency.
    pub fn contains(&self, block: u64) -> bool {
        self.index.contains_key(&block)
    }

    /// Find `block`; a hit becomes the most recently used slot.
    pub fn lookup(&mut self, block: u64) -> Option<SlotId> {
        match self.index.get(&block) {
            Some(&slot) => {
                self.lru.touch(slot);
                self.stats.hits += 1;
                log::trace!("cache hit: block {block} in slot {slot}");
                Some(slot)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Take the least recently used slot and drop its binding.
    ///
    /// The slot stays in the directory at the front until it is rebound
    /// with [`bind`](Self::bind) or returned with
    /// [`release`](Self::release).
    pub fn evict_one(&mut self) -> SlotId {
        let slot = self.lru.lru();
        if let Some(old) = self.meta[slot].block.take() {
            self.index.remove(&old);
            log::trace!("cache evict: block {old} from slot {slot}");
        }
        self.meta[slot].valid = 0;
        slot
    }

    /// Buffer of `slot` for refilling.
    pub fn slot_mut(&mut self, slot: SlotId) -> &mut [u8] {
        self.arena.slot_mut(slot)
    }

    /// Bind `slot` to `block` with `valid` filled bytes and mark it most
    /// recently used.
    pub fn bind(&mut self, slot: SlotId, block: u64, valid: usize) {
        let valid = valid.min(self.block_size());
        if let Some(old) = self.meta[slot].block.replace(block) {
            self.index.remove(&old);
        }
        if let Some(prev) = self.index.insert(block, slot)
            && prev != slot
        {
            self.meta[prev] = SlotMeta::default();
            self.lru.demote(prev);
        }
        self.meta[slot].valid = valid;
        self.lru.touch(slot);
        self.stats.bytes_read += valid as u64;
    }

    /// Return `slot` as empty and first in line for eviction.
    pub fn release(&mut self, slot: SlotId) {
        if let Some(old) = self.meta[slot].block.take() {
            self.index.remove(&old);
        }
        self.meta[slot].valid = 0;
        self.lru.demote(slot);
    }

    /// Evict a slot, fill it with `read` and bind it to `block`.
    ///
    /// `read` receives the full slot buffer and returns the number of valid
    /// bytes. If it fails the slot is released and the error returned.
    pub fn fill<E>(
        &mut self,
        block: u64,
        read: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<SlotId, E> {
        let slot = self.evict_one();
        match read(self.arena.slot_mut(slot)) {
            Ok(valid) => {
                log::trace!("cache fill: block {block} into slot {slot} ({valid} bytes)");
                self.bind(slot, block, valid);
                Ok(slot)
            }
            Err(e) => {
                self.release(slot);
                Err(e)
            }
        }
    }

    /// The valid bytes of `slot`, or `None` if it holds no block.
    pub fn block(&self, slot: SlotId) -> Option<SourceBlock<'_>> {
        let meta = self.meta.get(slot)?;
        let number = meta.block?;
        Some(SourceBlock::new(number, &self.arena.slot(slot)[..meta.valid]))
    }

    /// Resident block numbers from least to most recently used.
    pub fn resident(&self) -> impl Iterator<Item = u64> + '_ {
        self.lru.iter().filter_map(|slot| self.meta[slot].block)
    }
}
