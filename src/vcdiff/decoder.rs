// VCDIFF decoder: a resumable, push-driven window reconstructor.
//
// Byte-for-byte compatible with xdelta3's decoder. Follows the same state
// progression: parse the file header, then for each window parse the window
// header, buffer the sections, execute instructions.
//
// Unlike a pull decoder, this one owns no reader and no source. Patch bytes
// arrive through `feed_input`; source bytes arrive one block at a time on
// each poll. When a COPY reaches into a block other than the one lent,
// the decoder parks the copy and returns `NeedSourceBlock(n)`, resuming
// exactly where it stopped on the next poll.

use std::io::{self, Cursor};

use super::address_cache::AddressCache;
use super::code_table::{self, XD3_ADD, XD3_CPY, XD3_NOOP, XD3_RUN};
use super::header::{FileHeader, HARD_MAX_WINSIZE, WindowHeader};
use super::secondary;
use super::varint;
use crate::engine::{Boundary, DeltaEngine, Event, SourceBlock};

// ---------------------------------------------------------------------------
// Decoder error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The patch ended inside a header or a window.
    #[error("unexpected end of patch in {state}")]
    UnexpectedEof { state: &'static str },
    #[error("target window of {len} bytes exceeds the limit of {max} bytes")]
    WindowTooLarge { len: u64, max: u64 },
    /// A COPY addressed source bytes past the end of the source.
    #[error("source underflow: COPY reads past end of source at offset {offset}")]
    SourceUnderflow { offset: u64 },
}

fn header_error(e: io::Error) -> DecodeError {
    match e.kind() {
        io::ErrorKind::Unsupported => DecodeError::Unsupported(e.to_string()),
        _ => DecodeError::InvalidInput(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Decoder state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FileHeader,
    WindowHeader,
    Sections,
    Instructions,
    Output,
    WindowFinish,
    Failed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::FileHeader => "file header",
            Self::WindowHeader => "window header",
            Self::Sections => "window sections",
            Self::Instructions => "window instructions",
            Self::Output => "window output",
            Self::WindowFinish => "window finish",
            Self::Failed => "failed decoder",
        }
    }
}

/// A source COPY parked between block requests.
#[derive(Debug, Clone, Copy)]
struct SourceCopy {
    /// Absolute source offset of the next byte to copy.
    offset: u64,
    remaining: usize,
}

/// Streaming VCDIFF decoder implementing [`DeltaEngine`].
///
/// Memory is bounded by one window: the largest target window accepted
/// (see [`DeltaEngine::configure`]) plus that window's sections and one
/// chunk of unparsed input. An application header may not exceed
/// [`MAX_APPHEADER_LEN`](super::header::MAX_APPHEADER_LEN), and a
/// decompressed section may not exceed the window limit.
pub struct StreamDecoder {
    state: State,
    verify_checksum: bool,
    max_window: u64,

    /// Buffered patch bytes; `input[pos..]` is not yet parsed.
    input: Vec<u8>,
    pos: usize,

    block_size: u64,
    /// Upper bound on the source length, learned from short blocks.
    source_len: Option<u64>,

    file_header: Option<FileHeader>,
    window: WindowHeader,
    sections_len: usize,
    target_len: usize,

    /// Section buffers, reused across windows.
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    data_pos: usize,
    inst_pos: usize,
    addr_pos: usize,
    acache: AddressCache,

    /// Second half of the current double opcode, not yet executed.
    queued: Option<(u8, u8)>,
    pending_copy: Option<SourceCopy>,

    /// Target bytes of the current window.
    output: Vec<u8>,

    total_in: u64,
    total_out: u64,
    windows: u64,
}

impl StreamDecoder {
    /// Create a decoder. `verify_checksum` enables per-window Adler-32
    /// verification when the patch carries checksums.
    pub fn new(verify_checksum: bool) -> Self {
        Self {
            state: State::FileHeader,
            verify_checksum,
            max_window: HARD_MAX_WINSIZE,
            input: Vec::new(),
            pos: 0,
            block_size: 0,
            source_len: None,
            file_header: None,
            window: WindowHeader::default(),
            sections_len: 0,
            target_len: 0,
            data: Vec::new(),
            inst: Vec::new(),
            addr: Vec::new(),
            data_pos: 0,
            inst_pos: 0,
            addr_pos: 0,
            acache: AddressCache::new(),
            queued: None,
            pending_copy: None,
            output: Vec::new(),
            total_in: 0,
            total_out: 0,
            windows: 0,
        }
    }

    /// Number of windows fully decoded.
    pub fn windows(&self) -> u64 {
        self.windows
    }

    #[inline]
    fn buffered(&self) -> usize {
        self.input.len() - self.pos
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
        self.total_in += n as u64;
    }

    fn observe_block(&mut self, block: SourceBlock<'_>) {
        let len = block.data.len() as u64;
        if self.block_size == 0 || len >= self.block_size {
            return;
        }
        let end = block.number.saturating_mul(self.block_size).saturating_add(len);
        self.source_len = Some(self.source_len.map_or(end, |known| known.min(end)));
    }

    /// Run a header parser over the buffered input. `Ok(None)` means the
    /// header is incomplete.
    fn parse<T>(
        &mut self,
        f: impl FnOnce(&mut Cursor<&[u8]>) -> io::Result<T>,
    ) -> Result<Option<T>, DecodeError> {
        let mut cursor = Cursor::new(&self.input[self.pos..]);
        match f(&mut cursor) {
            Ok(value) => {
                let n = cursor.position() as usize;
                self.advance(n);
                Ok(Some(value))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(header_error(e)),
        }
    }

    fn step(&mut self, block: SourceBlock<'_>) -> Result<Event, DecodeError> {
        self.observe_block(block);
        match self.state {
            State::FileHeader => {
                let Some(hdr) = self.parse(|r| FileHeader::decode(r))? else {
                    return Ok(Event::NeedInput);
                };
                log::trace!(
                    "vcdiff file header: hdr_ind={:#04X} secondary={:?}",
                    hdr.hdr_ind,
                    hdr.secondary_id
                );
                self.file_header = Some(hdr);
                self.state = State::WindowHeader;
                Ok(Event::Boundary(Boundary::Header))
            }

            State::WindowHeader => {
                let Some(wh) = self.parse(|r| WindowHeader::decode(r))?.flatten() else {
                    return Ok(Event::NeedInput);
                };
                self.start_window(wh)?;
                self.state = State::Sections;
                Ok(Event::Boundary(Boundary::WindowStart))
            }

            State::Sections => {
                if self.buffered() < self.sections_len {
                    return Ok(Event::NeedInput);
                }
                self.load_sections()?;
                self.state = State::Instructions;
                self.step_instructions(block)
            }

            State::Instructions => self.step_instructions(block),

            State::Output => Ok(Event::Output),

            State::WindowFinish => {
                self.windows += 1;
                self.state = State::WindowHeader;
                Ok(Event::Boundary(Boundary::WindowFinish))
            }

            State::Failed => Err(DecodeError::InvalidInput(
                "decoder polled after a previous error".into(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Window setup
    // -----------------------------------------------------------------------

    fn start_window(&mut self, wh: WindowHeader) -> Result<(), DecodeError> {
        if wh.has_target() {
            return Err(DecodeError::Unsupported("VCD_TARGET not supported".into()));
        }
        if wh.target_window_len > self.max_window {
            return Err(DecodeError::WindowTooLarge {
                len: wh.target_window_len,
                max: self.max_window,
            });
        }

        let sections_len = wh
            .sections_len()
            .filter(|&len| len <= self.max_window.saturating_mul(2))
            .ok_or_else(|| {
                DecodeError::InvalidInput(format!(
                    "window sections too large for a {} byte window",
                    wh.target_window_len
                ))
            })?;

        if wh.has_source() {
            if self.block_size == 0 {
                return Err(DecodeError::InvalidInput(
                    "window references a source but no source is attached".into(),
                ));
            }
            let end = wh.copy_window_offset + wh.copy_window_len;
            if let Some(source_len) = self.source_len
                && end > source_len
            {
                return Err(DecodeError::SourceUnderflow { offset: end });
            }
        }

        log::trace!(
            "vcdiff window {}: target={} source={}@{} sections={}",
            self.windows,
            wh.target_window_len,
            wh.copy_window_len,
            wh.copy_window_offset,
            sections_len
        );

        self.sections_len = sections_len as usize;
        self.target_len = wh.target_window_len as usize;
        self.window = wh;
        Ok(())
    }

    fn load_sections(&mut self) -> Result<(), DecodeError> {
        let start = self.pos;
        let data_end = start + self.window.data_len as usize;
        let inst_end = data_end + self.window.inst_len as usize;
        let addr_end = start + self.sections_len;

        self.data.clear();
        self.data.extend_from_slice(&self.input[start..data_end]);
        self.inst.clear();
        self.inst.extend_from_slice(&self.input[data_end..inst_end]);
        self.addr.clear();
        self.addr.extend_from_slice(&self.input[inst_end..addr_end]);
        self.advance(self.sections_len);

        if self.window.del_ind != 0 {
            let secondary_id = self.file_header.as_ref().and_then(|h| h.secondary_id);
            let (data, inst, addr) = secondary::decompress_sections(
                std::mem::take(&mut self.data),
                std::mem::take(&mut self.inst),
                std::mem::take(&mut self.addr),
                self.window.del_ind,
                secondary_id,
                self.max_window as usize,
            )?;
            self.data = data;
            self.inst = inst;
            self.addr = addr;
        }

        self.data_pos = 0;
        self.inst_pos = 0;
        self.addr_pos = 0;
        self.queued = None;
        self.pending_copy = None;
        self.acache.init();
        self.output.clear();
        self.output.reserve(self.target_len);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Instruction execution
    // -----------------------------------------------------------------------

    fn step_instructions(&mut self, block: SourceBlock<'_>) -> Result<Event, DecodeError> {
        let code_table = code_table::default_code_table();
        loop {
            if let Some(number) = self.copy_from_source(block)? {
                return Ok(Event::NeedSourceBlock(number));
            }

            if let Some((itype, size)) = self.queued.take() {
                self.execute_half(itype, size)?;
                continue;
            }

            let Some(&opcode) = self.inst.get(self.inst_pos) else {
                break;
            };
            self.inst_pos += 1;

            let entry = &code_table[opcode as usize];
            if entry.type2 != XD3_NOOP {
                self.queued = Some((entry.type2, entry.size2));
            }
            if entry.type1 != XD3_NOOP {
                self.execute_half(entry.type1, entry.size1)?;
            }
        }

        self.finish_window()?;
        self.state = State::Output;
        Ok(Event::Output)
    }

    fn execute_half(&mut self, itype: u8, table_size: u8) -> Result<(), DecodeError> {
        let size = if table_size == 0 {
            let (val, consumed) = varint::read_u32(&self.inst[self.inst_pos..])
                .map_err(|e| DecodeError::InvalidInput(format!("bad instruction size: {e}")))?;
            self.inst_pos += consumed;
            val as usize
        } else {
            table_size as usize
        };

        let produced = self.output.len();
        if size > self.target_len - produced {
            return Err(DecodeError::InvalidInput(format!(
                "instruction of {size} bytes overflows target window ({produced} of {} produced)",
                self.target_len
            )));
        }

        match itype {
            XD3_RUN => {
                let Some(&byte) = self.data.get(self.data_pos) else {
                    return Err(DecodeError::InvalidInput(
                        "data section underflow (RUN)".into(),
                    ));
                };
                self.data_pos += 1;
                self.output.resize(produced + size, byte);
            }

            XD3_ADD => {
                let end = self.data_pos + size;
                let Some(bytes) = self.data.get(self.data_pos..end) else {
                    return Err(DecodeError::InvalidInput(
                        "data section underflow (ADD)".into(),
                    ));
                };
                self.output.extend_from_slice(bytes);
                self.data_pos = end;
            }

            _ => {
                // COPY: itype >= XD3_CPY, mode = itype - XD3_CPY
                let mode = itype - XD3_CPY;
                let copy_window_len = self.window.copy_window_len;
                let here = copy_window_len + produced as u64;
                let (addr, consumed) = self
                    .acache
                    .decode(mode, &self.addr[self.addr_pos..], here)
                    .map_err(|e| DecodeError::InvalidInput(format!("address decode: {e}")))?;
                self.addr_pos += consumed;

                if addr < copy_window_len {
                    if addr + size as u64 > copy_window_len {
                        return Err(DecodeError::InvalidInput(
                            "COPY spans source/target boundary".into(),
                        ));
                    }
                    self.pending_copy = Some(SourceCopy {
                        offset: self.window.copy_window_offset + addr,
                        remaining: size,
                    });
                } else {
                    // Target self-copy, relative to the window start.
                    let start = (addr - copy_window_len) as usize;
                    let end = start + size;
                    if end <= produced {
                        self.output.extend_from_within(start..end);
                    } else {
                        // Overlapping: each read must see the bytes just written.
                        for i in start..end {
                            let byte = self.output[i];
                            self.output.push(byte);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Continue the parked source COPY. Returns the block number needed
    /// when the copy crosses out of `block`.
    fn copy_from_source(&mut self, block: SourceBlock<'_>) -> Result<Option<u64>, DecodeError> {
        let Some(mut copy) = self.pending_copy.take() else {
            return Ok(None);
        };
        let block_size = self.block_size;
        if block_size == 0 {
            return Err(DecodeError::InvalidInput(
                "COPY references source but no source is attached".into(),
            ));
        }

        while copy.remaining > 0 {
            let number = copy.offset / block_size;
            if number != block.number {
                self.pending_copy = Some(copy);
                return Ok(Some(number));
            }
            let off = (copy.offset % block_size) as usize;
            if off >= block.data.len() {
                return Err(DecodeError::SourceUnderflow {
                    offset: copy.offset,
                });
            }
            let n = copy.remaining.min(block.data.len() - off);
            self.output.extend_from_slice(&block.data[off..off + n]);
            copy.offset += n as u64;
            copy.remaining -= n;
        }
        Ok(None)
    }

    fn finish_window(&self) -> Result<(), DecodeError> {
        if self.output.len() != self.target_len {
            return Err(DecodeError::InvalidInput(format!(
                "target size mismatch: expected {}, got {}",
                self.target_len,
                self.output.len()
            )));
        }

        if self.verify_checksum && let Some(expected) = self.window.adler32 {
            let actual = compute_adler32(&self.output);
            if actual != expected {
                return Err(DecodeError::ChecksumMismatch { expected, actual });
            }
        }
        Ok(())
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DeltaEngine for StreamDecoder {
    fn configure(&mut self, window_size: u64) {
        self.max_window = window_size.min(HARD_MAX_WINSIZE);
    }

    fn set_source(&mut self, block_size: u64, initial: SourceBlock<'_>) {
        self.block_size = block_size;
        self.source_len = None;
        self.observe_block(initial);
    }

    // No end marker is needed: `close` decides whether the patch ended
    // between windows.
    fn feed_input(&mut self, bytes: &[u8], _is_final: bool) {
        self.input.drain(..self.pos);
        self.pos = 0;
        self.input.extend_from_slice(bytes);
    }

    fn poll_event(&mut self, current: SourceBlock<'_>) -> Result<Event, DecodeError> {
        let result = self.step(current);
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    fn output(&self) -> &[u8] {
        match self.state {
            State::Output => &self.output,
            _ => &[],
        }
    }

    fn consume_output(&mut self) {
        if self.state == State::Output {
            self.total_out += self.output.len() as u64;
            self.output.clear();
            self.state = State::WindowFinish;
        }
    }

    fn close(&mut self) -> Result<(), DecodeError> {
        match self.state {
            State::FileHeader | State::WindowHeader if self.buffered() == 0 => Ok(()),
            State::FileHeader | State::WindowHeader | State::Sections => {
                Err(DecodeError::UnexpectedEof {
                    state: self.state.name(),
                })
            }
            state => Err(DecodeError::InvalidInput(format!(
                "stream closed in {}",
                state.name()
            ))),
        }
    }

    fn total_in(&self) -> u64 {
        self.total_in
    }

    fn total_out(&self) -> u64 {
        self.total_out
    }
}

// ---------------------------------------------------------------------------
// Adler-32
// ---------------------------------------------------------------------------

/// Adler-32 as stored in the VCD_ADLER32 window field.
pub fn compute_adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65521;
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in data {
            a = (a + u32::from(byte)) % MOD_ADLER;
            b = (b + a) % MOD_ADLER;
        }
        (b << 16) | a
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
