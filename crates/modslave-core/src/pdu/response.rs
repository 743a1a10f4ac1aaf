use crate::encoding::Writer;
use crate::pdu::{ExceptionCode, ExceptionResponse, FunctionCode, Request};
use crate::{EncodeError, MAX_PDU_LEN};

/// A response PDU produced by a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePdu {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    Exception(ExceptionResponse),
}

impl ResponsePdu {
    pub fn exception(function_code: u8, exception_code: ExceptionCode) -> Self {
        Self::Exception(ExceptionResponse::new(function_code, exception_code))
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception(resp) => Some(resp.exception_code),
            _ => None,
        }
    }

    /// Function code byte as it appears on the wire.
    pub fn function_byte(&self) -> u8 {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils.as_u8(),
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs.as_u8(),
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters.as_u8(),
            Self::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters.as_u8(),
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil.as_u8(),
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister.as_u8(),
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils.as_u8(),
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters.as_u8(),
            Self::Exception(resp) => resp.function_code | 0x80,
        }
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        match self {
            Self::ReadCoils(bits) | Self::ReadDiscreteInputs(bits) => {
                w.write_u8(self.function_byte())?;
                w.write_packed_bits(bits)
            }
            Self::ReadHoldingRegisters(words) | Self::ReadInputRegisters(words) => {
                let byte_count =
                    u8::try_from(words.len() * 2).map_err(|_| EncodeError::ValueOutOfRange)?;
                w.write_u8(self.function_byte())?;
                w.write_u8(byte_count)?;
                for word in words {
                    w.write_be_u16(*word)?;
                }
                Ok(())
            }
            Self::WriteSingleCoil { address, value } => {
                w.write_u8(self.function_byte())?;
                w.write_be_u16(*address)?;
                w.write_be_u16(if *value { 0xFF00 } else { 0x0000 })
            }
            Self::WriteSingleRegister { address, value } => {
                w.write_u8(self.function_byte())?;
                w.write_be_u16(*address)?;
                w.write_be_u16(*value)
            }
            Self::WriteMultipleCoils { address, quantity }
            | Self::WriteMultipleRegisters { address, quantity } => {
                w.write_u8(self.function_byte())?;
                w.write_be_u16(*address)?;
                w.write_be_u16(*quantity)
            }
            Self::Exception(resp) => resp.encode(w),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::with_limit(MAX_PDU_LEN);
        self.encode(&mut w)?;
        Ok(w.into_inner())
    }
}

/// A response addressed back to the originator of a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub transaction_id: Option<u16>,
    pub unit_id: u8,
    pub pdu: ResponsePdu,
}

impl Response {
    pub fn answer(request: &Request, pdu: ResponsePdu) -> Self {
        Self {
            transaction_id: request.transaction_id,
            unit_id: request.unit_id,
            pdu,
        }
    }
}
