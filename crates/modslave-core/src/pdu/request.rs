use crate::encoding::Reader;
use crate::pdu::FunctionCode;
use crate::DecodeError;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;

fn validate_quantity(quantity: u16, max: u16) -> Result<(), DecodeError> {
    if quantity == 0 || quantity > max {
        return Err(DecodeError::InvalidValue);
    }
    Ok(())
}

/// Start address and quantity of FC01..FC04.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    fn decode(r: &mut Reader<'_>, max: u16) -> Result<Self, DecodeError> {
        let address = r.read_be_u16()?;
        let quantity = r.read_be_u16()?;
        validate_quantity(quantity, max)?;
        Ok(Self { address, quantity })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleCoilRequest {
    pub address: u16,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterRequest {
    pub address: u16,
    pub value: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleCoilsRequest {
    pub address: u16,
    pub values: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequest {
    pub address: u16,
    pub values: Vec<u16>,
}

/// A request PDU as seen by a slave.
///
/// Decoding through [`RequestPdu::parse`] is total: a function code the slave
/// does not serve becomes [`RequestPdu::Unsupported`] and a body that fails to
/// decode becomes [`RequestPdu::Malformed`], so the processor can still answer
/// with the matching exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPdu {
    ReadCoils(ReadRequest),
    ReadDiscreteInputs(ReadRequest),
    ReadHoldingRegisters(ReadRequest),
    ReadInputRegisters(ReadRequest),
    WriteSingleCoil(WriteSingleCoilRequest),
    WriteSingleRegister(WriteSingleRegisterRequest),
    WriteMultipleCoils(WriteMultipleCoilsRequest),
    WriteMultipleRegisters(WriteMultipleRegistersRequest),
    Unsupported(u8),
    Malformed { function_code: u8, error: DecodeError },
}

impl RequestPdu {
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
            Self::Unsupported(code) => FunctionCode::Other(*code),
            Self::Malformed { function_code, .. } => FunctionCode::Other(*function_code),
        }
    }

    /// Raw function code byte, without the exception bit.
    pub fn raw_function_code(&self) -> u8 {
        match self {
            Self::Unsupported(code) => *code,
            Self::Malformed { function_code, .. } => *function_code,
            other => other.function_code().as_u8(),
        }
    }

    /// Decodes a whole PDU, mapping every failure into a variant.
    pub fn parse(pdu: &[u8]) -> Self {
        let function_code = pdu.first().copied().unwrap_or(0) & 0x7F;
        let mut r = Reader::new(pdu);
        match Self::decode(&mut r).and_then(|decoded| r.finish().map(|()| decoded)) {
            Ok(decoded) => decoded,
            Err(error) => Self::Malformed {
                function_code,
                error,
            },
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let function = FunctionCode::from_u8(r.read_u8()?)?;
        match function {
            FunctionCode::ReadCoils => Ok(Self::ReadCoils(ReadRequest::decode(r, MAX_READ_BITS)?)),
            FunctionCode::ReadDiscreteInputs => Ok(Self::ReadDiscreteInputs(ReadRequest::decode(
                r,
                MAX_READ_BITS,
            )?)),
            FunctionCode::ReadHoldingRegisters => Ok(Self::ReadHoldingRegisters(
                ReadRequest::decode(r, MAX_READ_REGISTERS)?,
            )),
            FunctionCode::ReadInputRegisters => Ok(Self::ReadInputRegisters(ReadRequest::decode(
                r,
                MAX_READ_REGISTERS,
            )?)),
            FunctionCode::WriteSingleCoil => {
                let address = r.read_be_u16()?;
                let value = match r.read_be_u16()? {
                    0xFF00 => true,
                    0x0000 => false,
                    _ => return Err(DecodeError::InvalidValue),
                };
                Ok(Self::WriteSingleCoil(WriteSingleCoilRequest { address, value }))
            }
            FunctionCode::WriteSingleRegister => {
                let address = r.read_be_u16()?;
                let value = r.read_be_u16()?;
                Ok(Self::WriteSingleRegister(WriteSingleRegisterRequest {
                    address,
                    value,
                }))
            }
            FunctionCode::WriteMultipleCoils => {
                let address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                validate_quantity(quantity, MAX_WRITE_COILS)?;
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != usize::from(quantity).div_ceil(8) {
                    return Err(DecodeError::InvalidLength);
                }
                let values = r.read_packed_bits(usize::from(quantity))?;
                Ok(Self::WriteMultipleCoils(WriteMultipleCoilsRequest {
                    address,
                    values,
                }))
            }
            FunctionCode::WriteMultipleRegisters => {
                let address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                validate_quantity(quantity, MAX_WRITE_REGISTERS)?;
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != usize::from(quantity) * 2 {
                    return Err(DecodeError::InvalidLength);
                }
                let values = (0..quantity)
                    .map(|_| r.read_be_u16())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::WriteMultipleRegisters(WriteMultipleRegistersRequest {
                    address,
                    values,
                }))
            }
            FunctionCode::Other(code) => {
                // The body of an unserved function is never interpreted.
                r.read_exact(r.remaining())?;
                Ok(Self::Unsupported(code))
            }
        }
    }
}

/// A decoded request together with its addressing.
///
/// Built by a transport from raw bytes and consumed exactly once by a
/// processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// MBAP transaction id; only present on TCP.
    pub transaction_id: Option<u16>,
    pub unit_id: u8,
    pub pdu: RequestPdu,
}

impl Request {
    pub fn tcp(transaction_id: u16, unit_id: u8, pdu: RequestPdu) -> Self {
        Self {
            transaction_id: Some(transaction_id),
            unit_id,
            pdu,
        }
    }

    pub fn rtu(unit_id: u8, pdu: RequestPdu) -> Self {
        Self {
            transaction_id: None,
            unit_id,
            pdu,
        }
    }

    pub fn function_code(&self) -> FunctionCode {
        self.pdu.function_code()
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadRequest, RequestPdu, WriteMultipleCoilsRequest, WriteSingleCoilRequest};
    use crate::DecodeError;

    #[test]
    fn parses_fc01_request() {
        let pdu = RequestPdu::parse(&[0x01, 0x00, 0x7B, 0x00, 0x01]);
        assert_eq!(
            pdu,
            RequestPdu::ReadCoils(ReadRequest {
                address: 123,
                quantity: 1
            })
        );
    }

    #[test]
    fn parses_fc05_request() {
        let pdu = RequestPdu::parse(&[0x05, 0x00, 0x7B, 0xFF, 0x00]);
        assert_eq!(
            pdu,
            RequestPdu::WriteSingleCoil(WriteSingleCoilRequest {
                address: 123,
                value: true
            })
        );
    }

    #[test]
    fn parses_fc15_packed_values() {
        let pdu = RequestPdu::parse(&[0x0F, 0x00, 0x13, 0x00, 0x09, 0x02, 0b0100_1101, 0b0000_0001]);
        assert_eq!(
            pdu,
            RequestPdu::WriteMultipleCoils(WriteMultipleCoilsRequest {
                address: 0x13,
                values: vec![true, false, true, true, false, false, true, false, true],
            })
        );
    }

    #[test]
    fn parses_fc16_values() {
        match RequestPdu::parse(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]) {
            RequestPdu::WriteMultipleRegisters(req) => {
                assert_eq!(req.address, 1);
                assert_eq!(req.values, vec![0x000A, 0x0102]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn byte_count_mismatch_is_malformed() {
        let pdu = RequestPdu::parse(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x12, 0x34, 0x56]);
        assert_eq!(
            pdu,
            RequestPdu::Malformed {
                function_code: 0x10,
                error: DecodeError::InvalidLength
            }
        );
    }

    #[test]
    fn invalid_coil_value_is_malformed() {
        let pdu = RequestPdu::parse(&[0x05, 0x00, 0x01, 0x12, 0x34]);
        assert!(matches!(
            pdu,
            RequestPdu::Malformed {
                function_code: 0x05,
                error: DecodeError::InvalidValue
            }
        ));
    }

    #[test]
    fn zero_and_oversized_quantities_are_malformed() {
        assert!(matches!(
            RequestPdu::parse(&[0x03, 0x00, 0x00, 0x00, 0x00]),
            RequestPdu::Malformed { error: DecodeError::InvalidValue, .. }
        ));
        assert!(matches!(
            RequestPdu::parse(&[0x03, 0x00, 0x00, 0x00, 0x7E]),
            RequestPdu::Malformed { error: DecodeError::InvalidValue, .. }
        ));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        assert!(matches!(
            RequestPdu::parse(&[0x06, 0x00, 0x01, 0x00, 0x02, 0xFF]),
            RequestPdu::Malformed { error: DecodeError::TrailingBytes, .. }
        ));
    }

    #[test]
    fn unknown_function_is_unsupported() {
        let pdu = RequestPdu::parse(&[0x2B, 0x0E, 0x01, 0x00]);
        assert_eq!(pdu, RequestPdu::Unsupported(0x2B));
        assert_eq!(pdu.raw_function_code(), 0x2B);
    }

    #[test]
    fn exception_bit_function_is_malformed() {
        assert_eq!(
            RequestPdu::parse(&[0x83, 0x02]),
            RequestPdu::Malformed {
                function_code: 0x03,
                error: DecodeError::InvalidFunctionCode
            }
        );
    }
}
