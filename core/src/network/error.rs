//! Messaging error types

/// Topic construction failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopicError {
    /// A segment contains `+`, `#` or a null character
    InvalidCharacter,
    /// Topic exceeds the fixed buffer
    TooLong,
}

impl core::fmt::Display for TopicError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidCharacter => write!(f, "Invalid character in topic"),
            Self::TooLong => write!(f, "Topic too long"),
        }
    }
}

impl core::error::Error for TopicError {}

/// Inbound command decoding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Payload is not valid JSON
    MalformedJson,
    /// JSON parsed but is not an object
    NotAnObject,
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MalformedJson => write!(f, "Malformed JSON payload"),
            Self::NotAnObject => write!(f, "Payload is not a JSON object"),
        }
    }
}

impl core::error::Error for DecodeError {}
