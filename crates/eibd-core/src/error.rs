use core::fmt;

/// Failure to put a PDU on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    BufferTooSmall,
    /// A field does not fit its bits, e.g. a sequence number above 15.
    ValueOutOfRange,
    /// Payload too long for the frame's length field, or empty where an
    /// APCI byte is required.
    InvalidLength,
    Message(&'static str),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => f.write_str("buffer too small"),
            Self::ValueOutOfRange => f.write_str("field value out of range"),
            Self::InvalidLength => f.write_str("payload length not encodable"),
            Self::Message(msg) => f.write_str(msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Failure to parse received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    /// A length byte disagrees with the bytes actually present.
    InvalidLength,
    InvalidValue,
    /// Well formed, but a frame or message type not handled here.
    Unsupported,
    Message(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => f.write_str("unexpected end of input"),
            Self::InvalidLength => f.write_str("length field inconsistent with frame size"),
            Self::InvalidValue => f.write_str("invalid value"),
            Self::Unsupported => f.write_str("frame type unsupported"),
            Self::Message(msg) => f.write_str(msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}
