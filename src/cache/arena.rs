// Contiguous backing store for cache slots.
//
// One allocation of `capacity * block_size` bytes, carved into fixed-size
// per-slot views. No replacement policy lives here.

use super::{CacheError, SlotId};

/// Fixed-size storage for `capacity` blocks of `block_size` bytes.
pub struct BlockArena {
    buf: Box<[u8]>,
    block_size: usize,
    capacity: usize,
}

impl BlockArena {
    /// Allocate the arena up front.
    ///
    /// Allocation goes through `try_reserve_exact`, so a request the system
    /// cannot satisfy (or whose size overflows) is reported as
    /// [`CacheError::OutOfMemory`] instead of aborting.
    pub fn new(block_size: usize, capacity: usize) -> Result<Self, CacheError> {
        if block_size == 0 {
            return Err(CacheError::ZeroBlockSize);
        }
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }

        let bytes = block_size
            .checked_mul(capacity)
            .ok_or(CacheError::OutOfMemory { bytes: u64::MAX })?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes)
            .map_err(|_| CacheError::OutOfMemory {
                bytes: bytes as u64,
            })?;
        buf.resize(bytes, 0);

        Ok(Self {
            buf: buf.into_boxed_slice(),
            block_size,
            capacity,
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes held by the arena.
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.buf.len()
    }

    /// The full `block_size` view of one slot.
    #[inline]
    pub fn slot(&self, id: SlotId) -> &[u8] {
        let start = id * self.block_size;
        &self.buf[start..start + self.block_size]
    }

    #[inline]
    pub fn slot_mut(&mut self, id: SlotId) -> &mut [u8] {
        let start = id * self.block_size;
        &mut self.buf[start..start + self.block_size]
    }
}

impl std::fmt::Debug for BlockArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockArena")
            .field("block_size", &self.block_size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_disjoint_views() {
        let mut arena = BlockArena::new(4, 3).unwrap();
        assert_eq!(arena.total_bytes(), 12);
        arena.slot_mut(1).copy_from_slice(b"abcd");
        assert_eq!(arena.slot(0), &[0; 4]);
        assert_eq!(arena.slot(1), b"abcd");
        assert_eq!(arena.slot(2), &[0; 4]);
    }

    #[test]
    fn zero_sizes_rejected() {
        assert_eq!(BlockArena::new(0, 4).unwrap_err(), CacheError::ZeroBlockSize);
        assert_eq!(BlockArena::new(4, 0).unwrap_err(), CacheError::ZeroCapacity);
    }

    #[test]
    fn overflowing_size_is_out_of_memory() {
        assert!(matches!(
            BlockArena::new(usize::MAX, 2),
            Err(CacheError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn impossible_allocation_is_out_of_memory() {
        // Larger than isize::MAX, so the allocator refuses without aborting.
        let err = BlockArena::new(usize::MAX / 2 + 1, 1).unwrap_err();
        assert!(matches!(err, CacheError::OutOfMemory { .. }));
    }

    #[test]
    #[should_panic]
    fn out_of_range_slot_panics() {
        let arena = BlockArena::new(4, 2).unwrap();
        let _ = arena.slot(2);
    }
}
