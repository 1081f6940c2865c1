// VCDIFF address cache (RFC 3284, Section 5.3).
//
// NEAR and SAME caches used to compactly encode COPY addresses. The decode
// side matches xdelta3's `xd3_decode_address` / `xd3_update_cache`.

use super::varint;

/// Absolute address.
pub const VCD_SELF: u8 = 0;
/// Address relative to "here" (current position in address space).
pub const VCD_HERE: u8 = 1;

/// NEAR/SAME address cache.
///
/// Default configuration (s_near=4, s_same=3) gives 9 address modes:
///   0      VCD_SELF  : absolute
///   1      VCD_HERE  : here - value
///   2..5   NEAR      : near\[mode-2\] + value
///   6..8   SAME      : same\[(mode-6)*256 + byte\]
#[derive(Clone)]
pub struct AddressCache {
    s_near: usize,
    s_same: usize,
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    /// Default RFC 3284 cache: s_near=4, s_same=3.
    pub fn new() -> Self {
        let (s_near, s_same) = (4, 3);
        Self {
            s_near,
            s_same,
            near: vec![0; s_near],
            same: vec![0; s_same * 256],
            next_slot: 0,
        }
    }

    /// Reset to the all-zero state. Called at the start of each window.
    pub fn init(&mut self) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
    }

    /// Total number of address modes (2 + s_near + s_same).
    #[inline]
    pub fn mode_count(&self) -> usize {
        2 + self.s_near + self.s_same
    }

    #[inline]
    fn same_start(&self) -> usize {
        2 + self.s_near
    }

    /// Record a decoded address.
    #[inline]
    pub fn update(&mut self, addr: u64) {
        if self.s_near > 0 {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % self.s_near;
        }
        if self.s_same > 0 {
            let idx = (addr % (self.s_same as u64 * 256)) as usize;
            self.same[idx] = addr;
        }
    }

    /// Decode an address given the mode and the remaining address section.
    ///
    /// `here` is the current position in the address space (copy window
    /// length plus target bytes produced so far in this window).
    ///
    /// Returns `(address, bytes_consumed)`.
    pub fn decode(
        &mut self,
        mode: u8,
        addr_data: &[u8],
        here: u64,
    ) -> Result<(u64, usize), AddressCacheError> {
        let mode = mode as usize;
        if mode >= self.mode_count() {
            return Err(AddressCacheError::InvalidMode(mode as u8));
        }
        let same_start = self.same_start();

        let (addr, consumed) = if mode < same_start {
            let (raw, consumed) =
                varint::read_u64(addr_data).map_err(|_| AddressCacheError::AddrUnderflow)?;

            let addr = match mode {
                0 => raw,
                1 => here
                    .checked_sub(raw)
                    .ok_or(AddressCacheError::InvalidAddr)?,
                _ => self.near[mode - 2]
                    .checked_add(raw)
                    .ok_or(AddressCacheError::InvalidAddr)?,
            };
            (addr, consumed)
        } else {
            let Some(&byte) = addr_data.first() else {
                return Err(AddressCacheError::AddrUnderflow);
            };
            let slot = mode - same_start;
            (self.same[slot * 256 + byte as usize], 1)
        };

        if addr >= here {
            return Err(AddressCacheError::InvalidAddr);
        }

        self.update(addr);
        Ok((addr, consumed))
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressCacheError {
    /// Not enough bytes in the address section.
    #[error("address section underflow")]
    AddrUnderflow,
    /// Decoded address is out of range or overflowed.
    #[error("invalid COPY address")]
    InvalidAddr,
    #[error("invalid address mode {0}")]
    InvalidMode(u8),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cache_params() {
        let c = AddressCache::new();
        assert_eq!(c.mode_count(), 9);
        assert_eq!(c.same_start(), 6);
    }

    #[test]
    fn self_and_here_modes() {
        let mut c = AddressCache::new();
        assert_eq!(c.decode(VCD_SELF, &[42], 1000).unwrap(), (42, 1));
        // here - 10
        assert_eq!(c.decode(VCD_HERE, &[10], 1000).unwrap(), (990, 1));
    }

    #[test]
    fn near_mode_uses_previous_addresses() {
        let mut c = AddressCache::new();
        c.update(500_000);
        // near[0] = 500_000, so mode 2 + 5 => 500_005
        let (addr, _) = c.decode(2, &[5], 1_000_000).unwrap();
        assert_eq!(addr, 500_005);
    }

    #[test]
    fn same_mode_reads_single_byte() {
        let mut c = AddressCache::new();
        let addr = 12_345u64;
        c.update(addr);
        let idx = (addr % (3 * 256)) as usize;
        let mode = 6 + (idx / 256) as u8;
        let byte = (idx % 256) as u8;
        assert_eq!(c.decode(mode, &[byte], 20_000).unwrap(), (addr, 1));
    }

    #[test]
    fn address_must_precede_here() {
        let mut c = AddressCache::new();
        assert_eq!(
            c.decode(VCD_SELF, &[100], 100),
            Err(AddressCacheError::InvalidAddr)
        );
        assert_eq!(
            c.decode(VCD_HERE, &[101], 100),
            Err(AddressCacheError::InvalidAddr)
        );
    }

    #[test]
    fn truncated_and_bad_mode_rejected() {
        let mut c = AddressCache::new();
        assert_eq!(c.decode(VCD_SELF, &[], 10), Err(AddressCacheError::AddrUnderflow));
        assert_eq!(c.decode(7, &[], 10), Err(AddressCacheError::AddrUnderflow));
        assert_eq!(c.decode(9, &[0], 10), Err(AddressCacheError::InvalidMode(9)));
    }

    #[test]
    fn init_resets_and_near_is_circular() {
        let mut c = AddressCache::new();
        for i in 0..5u64 {
            c.update(i * 100);
        }
        assert_eq!(c.near, vec![400, 100, 200, 300]);
        c.init();
        assert!(c.near.iter().all(|&x| x == 0));
        assert!(c.same.iter().all(|&x| x == 0));
        assert_eq!(c.next_slot, 0);
    }
}
