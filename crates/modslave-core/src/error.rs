use thiserror::Error;

/// Errors that can occur while encoding Modbus data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("value out of range")]
    ValueOutOfRange,
    #[error("invalid length")]
    InvalidLength,
}

/// Errors that can occur while decoding Modbus data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid function code")]
    InvalidFunctionCode,
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid crc")]
    InvalidCrc,
    #[error("trailing bytes after pdu")]
    TrailingBytes,
}
