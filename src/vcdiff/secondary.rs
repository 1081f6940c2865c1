// Secondary decompression for VCDIFF DATA/INST/ADDR sections.
//
// The VCDIFF file header stores a secondary compressor ID; xdelta3 defines:
//   ID 1 = DJW (xdelta3-specific Huffman, not supported)
//   ID 2 = LZMA
//   ID 16 = FGK (xdelta3-specific, not supported)
//
// ID 3 (Zlib) is accepted as an extension for patches produced by Rust
// encoders that use it.

use std::io;

use super::decoder::DecodeError;
use super::header::{
    VCD_ADDRCOMP, VCD_DATACOMP, VCD_DJW_ID, VCD_FGK_ID, VCD_INSTCOMP, VCD_LZMA_ID,
};

/// Secondary compressor ID for Zlib/Deflate.
pub const VCD_ZLIB_ID: u8 = 3;

/// Decoded DATA/INST/ADDR sections.
pub type DecompressedSections = (Vec<u8>, Vec<u8>, Vec<u8>);

/// A secondary decompressor for VCDIFF sections.
pub trait SecondaryBackend: Send + Sync {
    /// The secondary compressor ID stored in the VCDIFF file header.
    fn id(&self) -> u8;

    /// Decompress one section. Output longer than `limit` bytes is
    /// rejected as invalid input.
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError>;
}

#[cfg(any(feature = "lzma-secondary", feature = "zlib-secondary"))]
fn section_too_large(limit: usize) -> DecodeError {
    DecodeError::InvalidInput(format!(
        "decompressed section exceeds the limit of {limit} bytes"
    ))
}

// ---------------------------------------------------------------------------
// LZMA backend
// ---------------------------------------------------------------------------

/// LZMA secondary decompressor (ID 2). Reads xdelta3 `-S lzma` output.
#[cfg(feature = "lzma-secondary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaBackend;

#[cfg(feature = "lzma-secondary")]
impl SecondaryBackend for LzmaBackend {
    fn id(&self) -> u8 {
        VCD_LZMA_ID
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
        use lzma_rs::decompress::Options;

        let mut input = io::BufReader::new(io::Cursor::new(data));
        let mut output = CappedWriter {
            buf: Vec::new(),
            limit,
            overflowed: false,
        };
        // The dictionary buffers output before it reaches the writer.
        let options = Options {
            memlimit: Some(limit),
            ..Default::default()
        };
        match lzma_rs::lzma_decompress_with_options(&mut input, &mut output, &options) {
            Ok(()) => Ok(output.buf),
            Err(_) if output.overflowed => Err(section_too_large(limit)),
            Err(e) => Err(DecodeError::InvalidInput(format!(
                "LZMA decompression failed: {e}"
            ))),
        }
    }
}

/// Output sink that refuses to grow past `limit` bytes.
#[cfg(feature = "lzma-secondary")]
struct CappedWriter {
    buf: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

#[cfg(feature = "lzma-secondary")]
impl io::Write for CappedWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if bytes.len() > self.limit - self.buf.len() {
            self.overflowed = true;
            return Err(io::Error::other("section limit reached"));
        }
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Zlib backend
// ---------------------------------------------------------------------------

/// Zlib/Deflate secondary decompressor (ID 3).
#[cfg(feature = "zlib-secondary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibBackend;

#[cfg(feature = "zlib-secondary")]
impl SecondaryBackend for ZlibBackend {
    fn id(&self) -> u8 {
        VCD_ZLIB_ID
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
        use flate2::read::ZlibDecoder;
        use io::Read;

        let mut decoder = ZlibDecoder::new(data).take(limit as u64 + 1);
        let mut output = Vec::new();
        decoder
            .read_to_end(&mut output)
            .map_err(|e| DecodeError::InvalidInput(format!("Zlib decompression failed: {e}")))?;
        if output.len() > limit {
            return Err(section_too_large(limit));
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Section dispatch
// ---------------------------------------------------------------------------

/// Look up a decompression backend by secondary compressor ID.
pub fn backend_for_id(secondary_id: Option<u8>) -> Result<Box<dyn SecondaryBackend>, DecodeError> {
    match secondary_id {
        #[cfg(feature = "lzma-secondary")]
        Some(VCD_LZMA_ID) => Ok(Box::new(LzmaBackend)),

        #[cfg(not(feature = "lzma-secondary"))]
        Some(VCD_LZMA_ID) => Err(DecodeError::Unsupported(
            "LZMA secondary compression requires the 'lzma-secondary' feature".into(),
        )),

        #[cfg(feature = "zlib-secondary")]
        Some(VCD_ZLIB_ID) => Ok(Box::new(ZlibBackend)),

        #[cfg(not(feature = "zlib-secondary"))]
        Some(VCD_ZLIB_ID) => Err(DecodeError::Unsupported(
            "Zlib secondary compression requires the 'zlib-secondary' feature".into(),
        )),

        Some(VCD_DJW_ID) => Err(DecodeError::Unsupported(
            "DJW secondary compression is not supported".into(),
        )),
        Some(VCD_FGK_ID) => Err(DecodeError::Unsupported(
            "FGK secondary compression is not supported".into(),
        )),
        Some(id) => Err(DecodeError::Unsupported(format!(
            "unsupported secondary compressor ID: {id}"
        ))),
        None => Err(DecodeError::InvalidInput(
            "del_ind indicates secondary compression but no compressor ID in file header".into(),
        )),
    }
}

/// Decompress sections according to the window's delta indicator.
///
/// Sections whose bit is clear in `del_ind` are passed through. Each
/// decompressed section is capped at `limit` bytes.
pub fn decompress_sections(
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    del_ind: u8,
    secondary_id: Option<u8>,
    limit: usize,
) -> Result<DecompressedSections, DecodeError> {
    if del_ind == 0 {
        return Ok((data, inst, addr));
    }

    let backend = backend_for_id(secondary_id)?;
    let backend = backend.as_ref();

    let section = |bit: u8, bytes: Vec<u8>| -> Result<Vec<u8>, DecodeError> {
        if del_ind & bit != 0 {
            backend.decompress(&bytes, limit)
        } else {
            Ok(bytes)
        }
    };

    Ok((
        section(VCD_DATACOMP, data)?,
        section(VCD_INSTCOMP, inst)?,
        section(VCD_ADDRCOMP, addr)?,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
