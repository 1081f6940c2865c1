// VCDIFF format decoding (RFC 3284).
//
// Reads the delta format written by xdelta3, byte-for-byte compatible with
// its decoder.
//
// # Modules
//
// - `varint`        : Variable-length integers (base-128, big-endian)
// - `address_cache` : NEAR/SAME address cache for COPY instruction addresses
// - `code_table`    : Default RFC 3284 code table (256 entries)
// - `header`        : File header and per-window header parsing
// - `secondary`     : LZMA/Zlib decompression of window sections
// - `decoder`       : Resumable streaming decoder (a `DeltaEngine`)

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod header;
pub mod secondary;
pub mod varint;

// Re-export key types for convenience.
pub use address_cache::AddressCache;
pub use code_table::{CodeTable, CodeTableEntry};
pub use decoder::{DecodeError, StreamDecoder, compute_adler32};
pub use header::{FileHeader, HARD_MAX_WINSIZE, VCDIFF_MAGIC, WindowHeader};
