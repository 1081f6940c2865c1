// Shared helpers for integration tests: deterministic data and a small
// VCDIFF writer for patches xdelta3 would never produce on its own.

#![allow(dead_code)]

use oxipatch::vcdiff::header::{VCD_ADLER32, VCD_SOURCE};
use oxipatch::vcdiff::{VCDIFF_MAGIC, WindowHeader, compute_adler32, varint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// Opcodes in the default code table.
pub const RUN: u8 = 0;
pub const ADD: u8 = 1;
/// COPY, explicit size, VCD_SELF address mode.
pub const COPY_SELF: u8 = 19;

pub fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = vec![0u8; size];
    rng.fill(&mut out[..]);
    out
}

pub fn mutate(base: &[u8], stride: usize) -> Vec<u8> {
    let mut out = base.to_vec();
    for i in (0..out.len()).step_by(stride.max(1)) {
        out[i] = out[i].wrapping_add(1);
    }
    out
}

/// One window's instruction stream.
#[derive(Default)]
pub struct Window {
    source: Option<(u64, u64)>,
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    target: Vec<u8>,
    checksum: bool,
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a source segment of `len` bytes at `offset`.
    pub fn source(mut self, offset: u64, len: u64) -> Self {
        self.source = Some((len, offset));
        self
    }

    pub fn with_checksum(mut self) -> Self {
        self.checksum = true;
        self
    }

    pub fn add(mut self, bytes: &[u8]) -> Self {
        self.inst.push(ADD);
        varint::write_u64(&mut self.inst, bytes.len() as u64).unwrap();
        self.data.extend_from_slice(bytes);
        self.target.extend_from_slice(bytes);
        self
    }

    pub fn run(mut self, len: u64, byte: u8) -> Self {
        self.inst.push(RUN);
        varint::write_u64(&mut self.inst, len).unwrap();
        self.data.push(byte);
        self.target.extend(std::iter::repeat_n(byte, len as usize));
        self
    }

    /// COPY of `len` bytes from address `addr` in the combined
    /// source-segment + target address space. `expected` is what the copy
    /// produces; it feeds the window checksum.
    pub fn copy(mut self, len: u64, addr: u64, expected: &[u8]) -> Self {
        self.inst.push(COPY_SELF);
        varint::write_u64(&mut self.inst, len).unwrap();
        varint::write_u64(&mut self.addr, addr).unwrap();
        self.target.extend_from_slice(expected);
        self
    }

    /// Bytes this window produces.
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut win_ind = 0;
        if self.source.is_some() {
            win_ind |= VCD_SOURCE;
        }
        let adler32 = self.checksum.then(|| compute_adler32(&self.target));
        if adler32.is_some() {
            win_ind |= VCD_ADLER32;
        }
        let (copy_window_len, copy_window_offset) = self.source.unwrap_or((0, 0));
        let wh = WindowHeader {
            win_ind,
            copy_window_len,
            copy_window_offset,
            target_window_len: self.target.len() as u64,
            data_len: self.data.len() as u64,
            inst_len: self.inst.len() as u64,
            addr_len: self.addr.len() as u64,
            adler32,
            ..Default::default()
        };
        out.push(win_ind);
        if self.source.is_some() {
            varint::write_u64(out, copy_window_len).unwrap();
            varint::write_u64(out, copy_window_offset).unwrap();
        }
        varint::write_u64(out, wh.compute_enc_len()).unwrap();
        varint::write_u64(out, wh.target_window_len).unwrap();
        out.push(0);
        varint::write_u64(out, wh.data_len).unwrap();
        varint::write_u64(out, wh.inst_len).unwrap();
        varint::write_u64(out, wh.addr_len).unwrap();
        if let Some(cksum) = adler32 {
            out.extend_from_slice(&cksum.to_be_bytes());
        }
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.inst);
        out.extend_from_slice(&self.addr);
    }
}

/// Serialize a patch: file header followed by `windows`.
pub fn patch(windows: &[Window]) -> Vec<u8> {
    let mut out = VCDIFF_MAGIC.to_vec();
    out.push(0);
    for w in windows {
        w.write(&mut out);
    }
    out
}
