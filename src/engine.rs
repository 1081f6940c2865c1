// Delta engine seam: the contract between the decode driver and a
// streaming delta decoder.
//
// The driver owns every stream and the block cache. The engine only sees
// patch bytes pushed through `feed_input` and the one source block lent to
// it on each `poll_event`. It never keeps a reference into the cache
// between polls.

use crate::vcdiff::DecodeError;

/// A borrowed view of one cached source block.
///
/// `data` holds the valid bytes only, so the final block of a source whose
/// length is not a multiple of the block size is shorter than the block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceBlock<'a> {
    pub number: u64,
    pub data: &'a [u8],
}

impl<'a> SourceBlock<'a> {
    pub fn new(number: u64, data: &'a [u8]) -> Self {
        Self { number, data }
    }

    /// Block 0 of an empty source.
    pub fn empty() -> Self {
        Self {
            number: 0,
            data: &[],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Stream positions at which the driver reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The file header has been parsed.
    Header,
    /// A window header has been parsed.
    WindowStart,
    /// A window's output has been consumed.
    WindowFinish,
}

/// One step of engine progress, as returned by [`DeltaEngine::poll_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// More patch bytes are required before the engine can continue.
    NeedInput,
    /// [`DeltaEngine::output`] holds bytes for the target. The engine repeats
    /// this event until [`DeltaEngine::consume_output`] is called.
    Output,
    /// The engine needs this source block lent on the next poll.
    NeedSourceBlock(u64),
    Boundary(Boundary),
}

/// A resumable streaming delta decoder.
///
/// Errors are fatal: after `poll_event` returns `Err` the engine must not be
/// polled again.
pub trait DeltaEngine {
    /// Set the largest target window the engine accepts.
    fn configure(&mut self, window_size: u64);

    /// Attach a source with the given block size and its first block.
    ///
    /// Engines that never see this call treat any source reference as an
    /// error.
    fn set_source(&mut self, block_size: u64, initial: SourceBlock<'_>);

    /// Append patch bytes. `is_final` marks the end of the patch.
    fn feed_input(&mut self, bytes: &[u8], is_final: bool);

    /// Advance until the next event. `current` is the most recently
    /// resolved source block.
    fn poll_event(&mut self, current: SourceBlock<'_>) -> Result<Event, DecodeError>;

    /// Output bytes pending since the last `Event::Output`.
    fn output(&self) -> &[u8];

    /// Acknowledge that [`output`](Self::output) has been written.
    fn consume_output(&mut self);

    /// Finish the stream. Fails unless the engine is between windows.
    fn close(&mut self) -> Result<(), DecodeError>;

    /// Patch bytes consumed so far.
    fn total_in(&self) -> u64;

    /// Target bytes produced and acknowledged so far.
    fn total_out(&self) -> u64;
}

impl<E: DeltaEngine + ?Sized> DeltaEngine for Box<E> {
    fn configure(&mut self, window_size: u64) {
        (**self).configure(window_size)
    }

    fn set_source(&mut self, block_size: u64, initial: SourceBlock<'_>) {
        (**self).set_source(block_size, initial)
    }

    fn feed_input(&mut self, bytes: &[u8], is_final: bool) {
        (**self).feed_input(bytes, is_final)
    }

    fn poll_event(&mut self, current: SourceBlock<'_>) -> Result<Event, DecodeError> {
        (**self).poll_event(current)
    }

    fn output(&self) -> &[u8] {
        (**self).output()
    }

    fn consume_output(&mut self) {
        (**self).consume_output()
    }

    fn close(&mut self) -> Result<(), DecodeError> {
        (**self).close()
    }

    fn total_in(&self) -> u64 {
        (**self).total_in()
    }

    fn total_out(&self) -> u64 {
        (**self).total_out()
    }
}
