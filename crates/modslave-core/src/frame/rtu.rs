use crate::pdu::Response;
use crate::{DecodeError, EncodeError, MAX_PDU_LEN};
use crc::{Crc, CRC_16_MODBUS};

/// Address byte + function code + two CRC bytes.
pub const MIN_FRAME_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = MAX_PDU_LEN + 3;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS (reflected polynomial 0xA001, initial value 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

pub fn encode_frame(address: u8, pdu: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    if pdu.len() > MAX_PDU_LEN {
        return Err(EncodeError::ValueOutOfRange);
    }

    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(address);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, EncodeError> {
    encode_frame(response.unit_id, &response.pdu.to_bytes()?)
}

/// Verifies the trailing CRC and splits a frame into address and PDU.
pub fn decode_frame(data: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(DecodeError::InvalidLength);
    }

    let (payload, crc) = data.split_at(data.len() - 2);
    if crc16(payload) != u16::from_le_bytes([crc[0], crc[1]]) {
        return Err(DecodeError::InvalidCrc);
    }
    Ok((payload[0], &payload[1..]))
}
