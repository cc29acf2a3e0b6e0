use std::fmt;

use crate::error::FrameError;

/// Discriminator carried in every frame header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Greeting and authentication steps, only before a connection is established.
    Handshake = 0,
    /// A method invocation on a remote grain.
    Call = 1,
    /// The result (value or exception) of an earlier invocation.
    Result = 2,
    /// The sender is disconnecting on purpose.
    Goodbye = 3,
    /// The sender dropped its proxies for the listed grains.
    Release = 4,
}

impl MessageKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Handshake => "handshake",
            MessageKind::Call => "call",
            MessageKind::Result => "result",
            MessageKind::Goodbye => "goodbye",
            MessageKind::Release => "release",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Handshake),
            1 => Ok(MessageKind::Call),
            2 => Ok(MessageKind::Result),
            3 => Ok(MessageKind::Goodbye),
            4 => Ok(MessageKind::Release),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_values_are_stable() {
        for kind in [
            MessageKind::Handshake,
            MessageKind::Call,
            MessageKind::Result,
            MessageKind::Goodbye,
            MessageKind::Release,
        ] {
            assert_eq!(MessageKind::try_from(kind.as_u8()).unwrap(), kind);
        }
        assert_eq!(MessageKind::Call.as_u8(), 1);
        assert_eq!(MessageKind::Result.as_u8(), 2);
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(matches!(
            MessageKind::try_from(9),
            Err(FrameError::UnknownKind(9))
        ));
    }
}
