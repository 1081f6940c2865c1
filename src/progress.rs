// Progress notifications from the decode loop.
//
// The driver reports incremental `(written, read)` byte deltas at stream
// boundaries. Delivery is fire-and-forget: a failed `accept` is logged by
// the driver and decoding continues. Sinks must not block.

use std::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("progress receiver disconnected")]
    Disconnected,
    #[error("progress queue full")]
    Full,
}

/// Receiver of progress deltas.
///
/// `written_delta` counts target bytes written and `read_delta` counts patch
/// bytes consumed since the previous notification.
pub trait ProgressSink {
    fn accept(&mut self, written_delta: u64, read_delta: u64) -> Result<(), SinkError>;
}

impl<S: ProgressSink + ?Sized> ProgressSink for &mut S {
    fn accept(&mut self, written_delta: u64, read_delta: u64) -> Result<(), SinkError> {
        (**self).accept(written_delta, read_delta)
    }
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn accept(&mut self, _written_delta: u64, _read_delta: u64) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Queue delivery. An unbounded channel never blocks the sender.
impl ProgressSink for mpsc::Sender<(u64, u64)> {
    fn accept(&mut self, written_delta: u64, read_delta: u64) -> Result<(), SinkError> {
        self.send((written_delta, read_delta))
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Bounded queue delivery. A full queue drops the notification.
impl ProgressSink for mpsc::SyncSender<(u64, u64)> {
    fn accept(&mut self, written_delta: u64, read_delta: u64) -> Result<(), SinkError> {
        self.try_send((written_delta, read_delta))
            .map_err(|e| match e {
                mpsc::TrySendError::Full(_) => SinkError::Full,
                mpsc::TrySendError::Disconnected(_) => SinkError::Disconnected,
            })
    }
}

/// Adapter for a closure, built with [`from_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnSink<F>(F);

/// Wrap `f(written_delta, read_delta)` as a sink.
pub fn from_fn<F: FnMut(u64, u64)>(f: F) -> FnSink<F> {
    FnSink(f)
}

impl<F: FnMut(u64, u64)> ProgressSink for FnSink<F> {
    fn accept(&mut self, written_delta: u64, read_delta: u64) -> Result<(), SinkError> {
        (self.0)(written_delta, read_delta);
        Ok(())
    }
}

/// Accumulates deltas into running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub written: u64,
    pub read: u64,
    pub notifications: u64,
}

impl ProgressSink for Totals {
    fn accept(&mut self, written_delta: u64, read_delta: u64) -> Result<(), SinkError> {
        self.written += written_delta;
        self.read += read_delta;
        self.notifications += 1;
        Ok(())
    }
}
