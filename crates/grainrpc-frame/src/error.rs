/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header has an invalid magic number.
    #[error("invalid frame magic (expected 0x4752 \"GR\")")]
    InvalidMagic,

    /// The message kind byte is not one this version understands.
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// Reserved header flags were set.
    #[error("unsupported frame flags {0:#04x}")]
    UnsupportedFlags(u8),

    /// The payload exceeds the maximum allowed size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended (EOF) cleanly or mid-frame.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the error is a read/write timeout rather than a broken stream.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
