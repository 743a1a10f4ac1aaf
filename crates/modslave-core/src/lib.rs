//! Modbus slave-side PDU codec and framing.
//!
//! `modslave-core` decodes request PDUs into owned [`pdu::Request`] values and
//! encodes [`pdu::Response`] values, plus MBAP (TCP) and RTU framing helpers.

#![forbid(unsafe_code)]

pub mod encoding;
pub mod error;
pub mod frame;
pub mod pdu;

pub use error::{DecodeError, EncodeError};

/// Largest PDU allowed by the Modbus application protocol.
pub const MAX_PDU_LEN: usize = 253;
