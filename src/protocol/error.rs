//! Protocol level errors.

/// An error when translating a buffer from postgres.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame length field is smaller than the length field itself.
    #[error("frame at byte {offset} declares invalid length {len}")]
    InvalidLength {
        offset: u64,
        len: i32,
    },
    /// The frame length field exceeds the configured cap.
    #[error("frame at byte {offset} of {len} bytes exceeds the {cap} byte cap")]
    FrameTooLarge {
        offset: u64,
        len: u32,
        cap: u32,
    },
    /// Message type byte does not map to any known backend message.
    #[error("unknown message type {found:?} ({found:#04x})")]
    Unknown {
        found: u8,
    },
    /// A known message arrived in a phase that does not allow it.
    #[error("unexpected message {found:?} during {phase}")]
    UnexpectedPhase {
        found: u8,
        phase: &'static str,
    },
    /// A message body ended before all declared fields were read.
    #[error("truncated {msg} message")]
    Truncated {
        msg: &'static str,
    },
    /// A protocol string is missing its nul terminator.
    #[error("protocol string is not nul terminated")]
    UnterminatedString,
    #[error("protocol string is not valid utf8: {0}")]
    NonUtf8(std::str::Utf8Error),
    #[error("unknown authentication request ({0})")]
    UnknownAuth(i32),
    #[error("unknown transaction status {0:?}")]
    UnknownTxStatus(u8),
    /// Decoder asked for one message type, another arrived.
    #[error("expected message {expect:?}, found {found:?}")]
    Unexpected {
        expect: u8,
        found: u8,
    },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unknown { found }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected { expect, found }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::UnexpectedPhase { found, phase }
    }

    pub(crate) fn non_utf8(err: std::string::FromUtf8Error) -> ProtocolError {
        Self::NonUtf8(err.utf8_error())
    }
}
