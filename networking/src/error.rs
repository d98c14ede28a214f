use thiserror::Error;

/// Failure to read, write or decode a frame.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame body of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error("snappy: {0}")]
    Compression(#[from] snap::Error),
    #[error("decode: {0}")]
    Codec(#[from] bincode::Error),
}

impl WireError {
    /// Whether the peer closed the stream cleanly between frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
