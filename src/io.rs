// File-level entry points for applying a patch.
//
// `apply_patch()` opens the three files, runs a `DecodeSession` over them
// and returns the session statistics. Decode memory is allocated before any
// file is opened. The target is written through a `BufWriter` and, with the
// `file-io` feature, hashed with SHA-256 as it is written.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

#[cfg(feature = "file-io")]
use sha2::Digest;

pub use crate::error::{PatchError, Role};

use crate::cache::CacheStats;
use crate::progress::{NoProgress, ProgressSink};
use crate::session::{DecodeSession, SessionBuffers, SessionStats};
use crate::vcdiff::{HARD_MAX_WINSIZE, StreamDecoder};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Size of one cached source block, and of one patch read.
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024 * 1024; // 8 MiB

/// Number of cached source blocks.
pub const DEFAULT_CACHE_BLOCKS: usize = 32;

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// Tunables for one patch application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOptions {
    /// Bytes per cached source block.
    pub block_size: usize,
    /// Number of blocks the cache holds.
    pub cache_blocks: usize,
    /// Largest target window accepted from the patch.
    pub window_size: u64,
    /// Verify per-window Adler-32 checksums when the patch carries them.
    pub verify_checksum: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: DEFAULT_CACHE_BLOCKS,
            window_size: HARD_MAX_WINSIZE,
            verify_checksum: true,
        }
    }
}

impl PatchOptions {
    /// Bytes held by the block cache.
    pub fn cache_bytes(&self) -> u64 {
        (self.block_size as u64).saturating_mul(self.cache_blocks as u64)
    }

    fn validate(&self) -> Result<(), PatchError> {
        if self.window_size == 0 || self.window_size > HARD_MAX_WINSIZE {
            return Err(PatchError::InvalidConfig(format!(
                "window size must be between 1 and {HARD_MAX_WINSIZE} bytes, got {}",
                self.window_size
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `apply_patch()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchStats {
    /// Patch bytes consumed.
    pub patch_size: u64,
    /// Target bytes written.
    pub output_size: u64,
    /// Number of VCDIFF windows decoded.
    pub windows: u64,
    /// Source block cache counters.
    pub cache: CacheStats,
    /// SHA-256 of the target (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

impl PatchStats {
    fn from_session(stats: SessionStats, output_sha256: Option<[u8; 32]>) -> Self {
        Self {
            patch_size: stats.patch_bytes,
            output_size: stats.output_bytes,
            windows: stats.windows,
            cache: stats.cache,
            output_sha256,
        }
    }
}

// ---------------------------------------------------------------------------
// apply_patch
// ---------------------------------------------------------------------------

/// Apply `patch` to `source`, writing the result to `target`, with the
/// default options.
pub fn apply_patch<K: ProgressSink + ?Sized>(
    source: &Path,
    patch: &Path,
    target: &Path,
    sink: &mut K,
) -> Result<PatchStats, PatchError> {
    apply_patch_with_options(source, patch, target, sink, &PatchOptions::default())
}

/// Apply `patch` to `source`, writing the result to `target`.
///
/// The target is created (or truncated) only after the cache is allocated
/// and both inputs are open. On a decode error the target is left partially
/// written.
pub fn apply_patch_with_options<K: ProgressSink + ?Sized>(
    source: &Path,
    patch: &Path,
    target: &Path,
    sink: &mut K,
    opts: &PatchOptions,
) -> Result<PatchStats, PatchError> {
    opts.validate()?;
    let buffers = SessionBuffers::allocate(opts.block_size, opts.cache_blocks)?;

    let source_file =
        File::open(source).map_err(|e| PatchError::open(Role::Source, source, e))?;
    let patch_file = File::open(patch).map_err(|e| PatchError::open(Role::Patch, patch, e))?;
    let target_file =
        File::create(target).map_err(|e| PatchError::open(Role::Target, target, e))?;
    log::debug!(
        "applying {} to {} -> {}",
        patch.display(),
        source.display(),
        target.display()
    );

    let writer = BufWriter::with_capacity(BUF_SIZE, target_file);
    #[cfg(feature = "file-io")]
    let writer = HashingWriter::new(writer);

    let mut session = DecodeSession::new(
        StreamDecoder::new(opts.verify_checksum),
        buffers,
        source_file,
        patch_file,
        writer,
    )
    .with_window_size(opts.window_size);
    let stats = session.run(sink)?;

    #[cfg(feature = "file-io")]
    let (mut writer, output_sha256) = {
        let (writer, digest) = session.into_target().finish();
        (writer, Some(digest))
    };
    #[cfg(not(feature = "file-io"))]
    let (mut writer, output_sha256): (_, Option<[u8; 32]>) = (session.into_target(), None);

    writer
        .flush()
        .map_err(|e| PatchError::io(Role::Target, e))?;

    Ok(PatchStats::from_session(stats, output_sha256))
}

// ---------------------------------------------------------------------------
// apply_to_vec
// ---------------------------------------------------------------------------

/// Apply an in-memory patch to an in-memory source.
pub fn apply_to_vec(
    source: &[u8],
    patch: &[u8],
    opts: &PatchOptions,
) -> Result<Vec<u8>, PatchError> {
    opts.validate()?;
    let buffers = SessionBuffers::allocate(opts.block_size, opts.cache_blocks)?;
    let mut session = DecodeSession::new(
        StreamDecoder::new(opts.verify_checksum),
        buffers,
        Cursor::new(source),
        patch,
        Vec::new(),
    )
    .with_window_size(opts.window_size);
    session.run(&mut NoProgress)?;
    Ok(session.into_target())
}

// ---------------------------------------------------------------------------
// Hashing writer (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
struct HashingWriter<W: Write> {
    inner: W,
    hasher: sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: sha2::Sha256::new(),
        }
    }

    fn finish(self) -> (W, [u8; 32]) {
        (self.inner, self.hasher.finalize().into())
    }
}

#[cfg(feature = "file-io")]
impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Totals;
    use crate::vcdiff::{VCDIFF_MAGIC, WindowHeader, varint};

    // One window holding a single ADD of `data` (at most 17 bytes).
    fn add_patch(data: &[u8]) -> Vec<u8> {
        let mut out = VCDIFF_MAGIC.to_vec();
        out.push(0);
        let wh = WindowHeader {
            target_window_len: data.len() as u64,
            data_len: data.len() as u64,
            inst_len: 1,
            ..Default::default()
        };
        out.push(0);
        varint::write_u64(&mut out, wh.compute_enc_len()).unwrap();
        varint::write_u64(&mut out, wh.target_window_len).unwrap();
        out.push(0);
        varint::write_u64(&mut out, wh.data_len).unwrap();
        varint::write_u64(&mut out, wh.inst_len).unwrap();
        varint::write_u64(&mut out, wh.addr_len).unwrap();
        out.extend_from_slice(data);
        out.push(1 + data.len() as u8);
        out
    }

    fn small_opts() -> PatchOptions {
        PatchOptions {
            block_size: 16,
            cache_blocks: 2,
            ..Default::default()
        }
    }

    #[test]
    fn default_options_use_crate_constants() {
        let opts = PatchOptions::default();
        assert_eq!(opts.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(opts.cache_blocks, DEFAULT_CACHE_BLOCKS);
        assert_eq!(opts.cache_bytes(), 256 * 1024 * 1024);
        assert!(opts.verify_checksum);
    }

    #[test]
    fn apply_to_vec_add_only() {
        let out = apply_to_vec(b"", &add_patch(b"hello"), &small_opts()).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn empty_patch_is_empty_target() {
        assert!(apply_to_vec(b"abc", b"", &small_opts()).unwrap().is_empty());
    }

    #[test]
    fn bad_window_size_rejected() {
        for window_size in [0, HARD_MAX_WINSIZE + 1] {
            let opts = PatchOptions {
                window_size,
                ..small_opts()
            };
            assert!(matches!(
                apply_to_vec(b"", b"", &opts),
                Err(PatchError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn apply_patch_writes_target_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let patch = dir.path().join("patch.vcdiff");
        let target = dir.path().join("target.bin");
        std::fs::write(&source, b"unused").unwrap();
        let patch_bytes = add_patch(b"written to disk");
        std::fs::write(&patch, &patch_bytes).unwrap();

        let mut totals = Totals::default();
        let stats =
            apply_patch_with_options(&source, &patch, &target, &mut totals, &small_opts())
                .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"written to disk");
        assert_eq!(stats.output_size, 15);
        assert_eq!(stats.patch_size, patch_bytes.len() as u64);
        assert_eq!(stats.windows, 1);
        assert_eq!(totals.written, 15);
        assert_eq!(totals.read, patch_bytes.len() as u64);
    }

    #[test]
    fn missing_patch_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"x").unwrap();
        let target = dir.path().join("target.bin");

        let err = apply_patch_with_options(
            &source,
            &dir.path().join("missing.vcdiff"),
            &target,
            &mut NoProgress,
            &small_opts(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PatchError::Open {
                role: Role::Patch,
                ..
            }
        ));
        assert!(!target.exists());
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn sha256_of_output_computed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let patch = dir.path().join("patch.vcdiff");
        let target = dir.path().join("target.bin");
        std::fs::write(&source, b"").unwrap();
        std::fs::write(&patch, add_patch(b"checksum me")).unwrap();

        let stats =
            apply_patch_with_options(&source, &patch, &target, &mut NoProgress, &small_opts())
                .unwrap();
        let expected: [u8; 32] = sha2::Sha256::digest(b"checksum me").into();
        assert_eq!(stats.output_sha256, Some(expected));
    }
}
