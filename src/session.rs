// Decode driver: runs a `DeltaEngine` over three byte streams.
//
// The session owns the source (random access through the block cache), the
// patch (read sequentially in block-sized chunks) and the target (written
// sequentially). It dispatches every engine event to one of those streams
// and reports progress deltas at stream boundaries.
//
// Dropping a session closes all three streams and frees the cache, on every
// exit path.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::cache::{BlockCache, CacheStats, SlotId};
use crate::engine::{Boundary, DeltaEngine, Event, SourceBlock};
use crate::error::{PatchError, Role};
use crate::progress::ProgressSink;
use crate::vcdiff::{DecodeError, HARD_MAX_WINSIZE};

/// Memory for one session: the block cache and the patch chunk buffer.
///
/// Allocated before any stream is opened, so allocation failure never
/// leaves a half-created target behind.
#[derive(Debug)]
pub struct SessionBuffers {
    cache: BlockCache,
    chunk: Vec<u8>,
}

impl SessionBuffers {
    pub fn allocate(block_size: usize, cache_blocks: usize) -> Result<Self, PatchError> {
        let cache = BlockCache::new(block_size, cache_blocks)?;
        let mut chunk = Vec::new();
        chunk
            .try_reserve_exact(block_size)
            .map_err(|_| PatchError::OutOfMemory {
                bytes: block_size as u64,
            })?;
        chunk.resize(block_size, 0);
        Ok(Self { cache, chunk })
    }
}

/// Counters of a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Patch bytes consumed by the engine.
    pub patch_bytes: u64,
    /// Target bytes written.
    pub output_bytes: u64,
    pub windows: u64,
    pub cache: CacheStats,
}

/// One patch application in progress.
pub struct DecodeSession<E, S, P, T> {
    engine: E,
    cache: BlockCache,
    chunk: Vec<u8>,
    source: S,
    patch: P,
    target: T,
    window_size: u64,

    current: Option<SlotId>,
    final_chunk: bool,
    written: u64,
    windows: u64,
    /// `(written, read)` at the last progress notification.
    reported: (u64, u64),
}

impl<E, S, P, T> DecodeSession<E, S, P, T>
where
    E: DeltaEngine,
    S: Read + Seek,
    P: Read,
    T: Write,
{
    pub fn new(engine: E, buffers: SessionBuffers, source: S, patch: P, target: T) -> Self {
        Self {
            engine,
            cache: buffers.cache,
            chunk: buffers.chunk,
            source,
            patch,
            target,
            window_size: HARD_MAX_WINSIZE,
            current: None,
            final_chunk: false,
            written: 0,
            windows: 0,
            reported: (0, 0),
        }
    }

    /// Largest target window the engine may accept.
    pub fn with_window_size(mut self, window_size: u64) -> Self {
        self.window_size = window_size;
        self
    }

    /// Decode the whole patch.
    pub fn run<K: ProgressSink + ?Sized>(&mut self, sink: &mut K) -> Result<SessionStats, PatchError> {
        log::debug!(
            "decode session: block_size={} cache_blocks={} window_size={}",
            self.cache.block_size(),
            self.cache.capacity(),
            self.window_size
        );
        self.prime()?;

        loop {
            self.dispatch(sink)?;
            if self.final_chunk {
                break;
            }
            self.read_chunk()?;
        }

        self.engine.close().map_err(PatchError::StreamClose)?;
        let stats = self.stats();
        log::debug!(
            "decode session finished: {} patch bytes, {} output bytes, {} windows, cache {:?}",
            stats.patch_bytes,
            stats.output_bytes,
            stats.windows,
            stats.cache
        );
        Ok(stats)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            patch_bytes: self.engine.total_in(),
            output_bytes: self.written,
            windows: self.windows,
            cache: self.cache.stats(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Give back the target, e.g. to flush a buffered writer.
    pub fn into_target(self) -> T {
        self.target
    }

    // Load block 0 and hand it to the engine. An empty source yields an
    // empty block 0.
    fn prime(&mut self) -> Result<(), PatchError> {
        self.engine.configure(self.window_size);
        let slot = self.resolve_block(0)?;
        self.current = Some(slot);
        let block = self.cache.block(slot).unwrap_or_else(SourceBlock::empty);
        self.engine
            .set_source(self.cache.block_size() as u64, block);
        Ok(())
    }

    // Read up to one chunk of patch. A short read marks the final chunk.
    fn read_chunk(&mut self) -> Result<(), PatchError> {
        let n = read_up_to(&mut self.patch, &mut self.chunk)
            .map_err(|e| PatchError::io(Role::Patch, e))?;
        self.final_chunk = n < self.chunk.len();
        log::trace!("patch chunk: {n} bytes (final: {})", self.final_chunk);
        self.engine.feed_input(&self.chunk[..n], self.final_chunk);
        Ok(())
    }

    // Poll the engine until it needs more patch input.
    fn dispatch<K: ProgressSink + ?Sized>(&mut self, sink: &mut K) -> Result<(), PatchError> {
        loop {
            let block = self
                .current
                .and_then(|slot| self.cache.block(slot))
                .unwrap_or_else(SourceBlock::empty);
            let event = self.engine.poll_event(block).map_err(PatchError::Decode)?;
            log::trace!("engine event: {event:?}");

            match event {
                Event::NeedInput => return Ok(()),
                Event::Output => {
                    let out = self.engine.output();
                    self.target
                        .write_all(out)
                        .map_err(|e| PatchError::io(Role::Target, e))?;
                    self.written += out.len() as u64;
                    self.notify(sink);
                    self.engine.consume_output();
                }
                Event::NeedSourceBlock(number) => {
                    self.current = Some(self.resolve_block(number)?);
                }
                Event::Boundary(boundary) => {
                    if boundary == Boundary::WindowFinish {
                        self.windows += 1;
                    }
                    self.notify(sink);
                }
            }
        }
    }

    // Serve `number` from the cache, refilling the LRU slot on a miss.
    fn resolve_block(&mut self, number: u64) -> Result<SlotId, PatchError> {
        if let Some(slot) = self.cache.lookup(number) {
            return Ok(slot);
        }

        let offset = number
            .checked_mul(self.cache.block_size() as u64)
            .ok_or_else(|| {
                PatchError::Decode(DecodeError::InvalidInput(format!(
                    "source block {number} is out of range"
                )))
            })?;
        let source = &mut self.source;
        self.cache
            .fill(number, |buf| {
                source.seek(SeekFrom::Start(offset))?;
                read_up_to(source, buf)
            })
            .map_err(|e| PatchError::io(Role::Source, e))
    }

    fn notify<K: ProgressSink + ?Sized>(&mut self, sink: &mut K) {
        let now = (self.written, self.engine.total_in());
        let written_delta = now.0.saturating_sub(self.reported.0);
        let read_delta = now.1.saturating_sub(self.reported.1);
        if let Err(e) = sink.accept(written_delta, read_delta) {
            log::warn!("progress notification dropped: {e}");
        }
        self.reported = now;
    }
}

/// Fill `buf` from `r` until it is full or `r` reaches EOF.
pub fn read_up_to<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
