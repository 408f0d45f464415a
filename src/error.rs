use std::io;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid dimensions {width}x{height}: {reason}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        reason: &'static str,
    },

    #[error("unsupported bit depth {0}")]
    InvalidDepth(u8),

    #[error("unsupported alpha level count {0}")]
    InvalidAlphaLevels(usize),

    #[error("buffer length {len} does not match the expected {expected}")]
    BufferMismatch { len: usize, expected: usize },

    #[error("palette of {len} colours exceeds the limit of {max}")]
    PaletteTooLarge { len: usize, max: usize },

    #[error("palette has no colours left for image content")]
    EmptyPalette,

    #[error("missing input: {0}")]
    MissingInput(&'static str),

    #[error("conversion cancelled")]
    Cancelled,

    #[error("conversion worker panicked")]
    WorkerPanicked,

    #[error("malformed encoded data: {0}")]
    Malformed(#[from] io::Error),
}

/// A capacity clamp that was applied instead of failing the conversion.
///
/// `requested` is how many characters (or palette colours) the data wanted,
/// `actual` is how many the caller's budget allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncated {
    pub requested: usize,
    pub actual: usize,
}

pub type Result<T> = std::result::Result<T, ConvertError>;
