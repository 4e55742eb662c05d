use thiserror::Error;

/// Error kinds surfaced by the protocol layer: framing I/O, malformed
/// frames, and config/request shape problems. Binaries wrap these in
/// `anyhow::Result` at their boundary; library code propagates them with
/// `?`.
#[derive(Debug, Error)]
pub enum BuildjailError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame truncated: need {needed} bytes, have {have}")]
    FrameTruncated { needed: usize, have: usize },

    #[error("frame body is not valid JSON: {0}")]
    FrameMalformed(#[from] serde_json::Error),

    #[error("request shape error: {0}")]
    RequestShape(String),
}

pub type Result<T> = std::result::Result<T, BuildjailError>;
