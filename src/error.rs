// Error taxonomy for applying a patch.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::cache::CacheError;
use crate::vcdiff::DecodeError;

/// Which of the three streams an I/O error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Patch,
    Target,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Patch => "patch",
            Self::Target => "target",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("cannot open {role} file {}: {source}", .path.display())]
    Open {
        role: Role,
        path: PathBuf,
        source: io::Error,
    },
    #[error("{role} I/O error: {source}")]
    Io { role: Role, source: io::Error },
    #[error("cannot allocate {bytes} bytes of decode buffers")]
    OutOfMemory { bytes: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("patch decode failed: {0}")]
    Decode(#[source] DecodeError),
    #[error("patch ended without a clean close: {0}")]
    StreamClose(#[source] DecodeError),
}

impl PatchError {
    pub fn io(role: Role, source: io::Error) -> Self {
        Self::Io { role, source }
    }

    pub fn open(role: Role, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            role,
            path: path.into(),
            source,
        }
    }

    /// The OS error code behind an I/O failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Open { source, .. } | Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

impl From<CacheError> for PatchError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::OutOfMemory { bytes } => Self::OutOfMemory { bytes },
            CacheError::ZeroCapacity | CacheError::ZeroBlockSize => {
                Self::InvalidConfig(e.to_string())
            }
        }
    }
}
