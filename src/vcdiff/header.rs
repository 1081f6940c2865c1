// VCDIFF file header and per-window header parsing (RFC 3284).
//
// Parsing and validation follow xdelta3's decoder states DEC_VCHEAD
// through DEC_CKSUM. Both parsers read from any `Read`; a truncated header
// surfaces as `io::ErrorKind::UnexpectedEof`.

use std::io::{self, Read};

use super::varint;

// ---------------------------------------------------------------------------
// VCDIFF magic and version
// ---------------------------------------------------------------------------

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

// ---------------------------------------------------------------------------
// Header indicator flags (hdr_ind)
// ---------------------------------------------------------------------------

pub const VCD_SECONDARY: u8 = 1 << 0;
pub const VCD_CODETABLE: u8 = 1 << 1;
pub const VCD_APPHEADER: u8 = 1 << 2;
/// Mask for invalid header indicator bits.
pub const VCD_INVHDR: u8 = !0x07;

// ---------------------------------------------------------------------------
// Window indicator flags (win_ind)
// ---------------------------------------------------------------------------

pub const VCD_SOURCE: u8 = 1 << 0;
pub const VCD_TARGET: u8 = 1 << 1;
pub const VCD_ADLER32: u8 = 1 << 2;
/// Mask for invalid window indicator bits.
pub const VCD_INVWIN: u8 = !0x07;

// ---------------------------------------------------------------------------
// Delta indicator flags (del_ind)
// ---------------------------------------------------------------------------

pub const VCD_DATACOMP: u8 = 1 << 0;
pub const VCD_INSTCOMP: u8 = 1 << 1;
pub const VCD_ADDRCOMP: u8 = 1 << 2;
/// Mask for invalid delta indicator bits.
pub const VCD_INVDEL: u8 = !0x07;

// ---------------------------------------------------------------------------
// Secondary compressor IDs
// ---------------------------------------------------------------------------

pub const VCD_DJW_ID: u8 = 1;
pub const VCD_LZMA_ID: u8 = 2;
pub const VCD_FGK_ID: u8 = 16;

/// Maximum decoded window size (matches xdelta3 XD3_HARDMAXWINSIZE).
pub const HARD_MAX_WINSIZE: u64 = 1 << 24; // 16 MiB

/// Longest application header accepted in a file header.
pub const MAX_APPHEADER_LEN: usize = 1 << 20; // 1 MiB

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF file header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    /// Header indicator byte.
    pub hdr_ind: u8,
    /// Secondary compressor ID (if VCD_SECONDARY is set).
    pub secondary_id: Option<u8>,
    /// Application-defined header data (if VCD_APPHEADER is set).
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    /// Decode a VCDIFF file header from a reader.
    pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        // DEC_VCHEAD
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic[..3] != VCDIFF_MAGIC[..3] {
            return Err(invalid(format!(
                "invalid VCDIFF magic: expected {:02X} {:02X} {:02X}, got {:02X} {:02X} {:02X}",
                VCDIFF_MAGIC[0], VCDIFF_MAGIC[1], VCDIFF_MAGIC[2], magic[0], magic[1], magic[2]
            )));
        }
        if magic[3] != 0x00 {
            return Err(invalid(format!(
                "unsupported VCDIFF version: {:#04X}",
                magic[3]
            )));
        }

        // DEC_HDRIND
        let mut buf1 = [0u8; 1];
        r.read_exact(&mut buf1)?;
        let hdr_ind = buf1[0];
        if hdr_ind & VCD_INVHDR != 0 {
            return Err(invalid(format!(
                "invalid header indicator bits: {hdr_ind:#04X}"
            )));
        }

        // DEC_SECONDID
        let secondary_id = if hdr_ind & VCD_SECONDARY != 0 {
            r.read_exact(&mut buf1)?;
            Some(buf1[0])
        } else {
            None
        };

        if hdr_ind & VCD_CODETABLE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "VCD_CODETABLE is not supported",
            ));
        }

        // DEC_APPLEN / DEC_APPDAT
        let app_header = if hdr_ind & VCD_APPHEADER != 0 {
            let len = varint::stream_read_usize(r)?;
            if len > MAX_APPHEADER_LEN {
                return Err(invalid(format!(
                    "application header of {len} bytes exceeds the limit of {MAX_APPHEADER_LEN} bytes"
                )));
            }
            let mut data = Vec::new();
            r.take(len as u64).read_to_end(&mut data)?;
            if data.len() != len {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Some(data)
        } else {
            None
        };

        Ok(Self {
            hdr_ind,
            secondary_id,
            app_header,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-window header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF per-window header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowHeader {
    /// Window indicator byte.
    pub win_ind: u8,
    /// Length of the source/target copy window.
    pub copy_window_len: u64,
    /// Offset into the source/target for the copy window.
    pub copy_window_offset: u64,
    /// Total length of the delta encoding (redundancy check field).
    pub enc_len: u64,
    /// Length of the target window to reconstruct.
    pub target_window_len: u64,
    /// Delta indicator (secondary compression flags).
    pub del_ind: u8,
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    /// Adler-32 checksum of the target window (if VCD_ADLER32).
    pub adler32: Option<u32>,
}

impl WindowHeader {
    #[inline]
    pub fn has_source(&self) -> bool {
        self.win_ind & VCD_SOURCE != 0
    }

    #[inline]
    pub fn has_target(&self) -> bool {
        self.win_ind & VCD_TARGET != 0
    }

    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.win_ind & VCD_ADLER32 != 0
    }

    /// Combined length of the DATA, INST and ADDR sections.
    pub fn sections_len(&self) -> Option<u64> {
        self.data_len
            .checked_add(self.inst_len)?
            .checked_add(self.addr_len)
    }

    /// Compute the expected `enc_len` from the current field values.
    ///
    /// `enc_len` covers everything after itself: the target window length,
    /// del_ind, the three section lengths, the optional checksum and the
    /// sections.
    pub fn compute_enc_len(&self) -> u64 {
        let mut len = 0u64;
        len += varint::sizeof_u64(self.target_window_len) as u64;
        len += 1; // del_ind
        len += varint::sizeof_u64(self.data_len) as u64;
        len += varint::sizeof_u64(self.inst_len) as u64;
        len += varint::sizeof_u64(self.addr_len) as u64;
        len = len.saturating_add(self.sections_len().unwrap_or(u64::MAX));
        if self.has_checksum() {
            len = len.saturating_add(4);
        }
        len
    }

    /// Decode a per-window header.
    ///
    /// Returns `None` on clean EOF (no more windows).
    pub fn decode<R: Read>(r: &mut R) -> io::Result<Option<Self>> {
        // DEC_WININD
        let mut buf1 = [0u8; 1];
        match r.read_exact(&mut buf1) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let win_ind = buf1[0];
        if win_ind & VCD_INVWIN != 0 {
            return Err(invalid(format!(
                "invalid window indicator bits: {win_ind:#04X}"
            )));
        }
        if win_ind & VCD_SOURCE != 0 && win_ind & VCD_TARGET != 0 {
            return Err(invalid("VCD_SOURCE and VCD_TARGET are mutually exclusive"));
        }

        // DEC_CPYLEN / DEC_CPYOFF
        let (copy_window_len, copy_window_offset) = if win_ind & (VCD_SOURCE | VCD_TARGET) != 0 {
            let len = varint::stream_read_u64(r)?;
            let off = varint::stream_read_u64(r)?;
            if off.checked_add(len).is_none() {
                return Err(invalid("copy window overflows the address space"));
            }
            (len, off)
        } else {
            (0, 0)
        };

        // DEC_ENCLEN / DEC_TGTLEN
        let enc_len = varint::stream_read_u64(r)?;
        let target_window_len = varint::stream_read_u64(r)?;

        if target_window_len > HARD_MAX_WINSIZE {
            return Err(invalid(format!(
                "target window too large: {target_window_len} exceeds max {HARD_MAX_WINSIZE}"
            )));
        }

        // DEC_DELIND
        r.read_exact(&mut buf1)?;
        let del_ind = buf1[0];
        if del_ind & VCD_INVDEL != 0 {
            return Err(invalid(format!(
                "invalid delta indicator bits: {del_ind:#04X}"
            )));
        }

        // DEC_DATALEN / DEC_INSTLEN / DEC_ADDRLEN
        let data_len = varint::stream_read_u64(r)?;
        let inst_len = varint::stream_read_u64(r)?;
        let addr_len = varint::stream_read_u64(r)?;

        // DEC_CKSUM
        let adler32 = if win_ind & VCD_ADLER32 != 0 {
            let mut cksum_buf = [0u8; 4];
            r.read_exact(&mut cksum_buf)?;
            Some(u32::from_be_bytes(cksum_buf))
        } else {
            None
        };

        let hdr = WindowHeader {
            win_ind,
            copy_window_len,
            copy_window_offset,
            enc_len,
            target_window_len,
            del_ind,
            data_len,
            inst_len,
            addr_len,
            adler32,
        };

        let expected = hdr.compute_enc_len();
        if enc_len != expected {
            return Err(invalid(format!(
                "enc_len mismatch: header says {enc_len}, computed {expected}"
            )));
        }

        Ok(Some(hdr))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
