use crate::encoding::{Reader, Writer};
use crate::pdu::{Request, RequestPdu, Response};
use crate::{DecodeError, EncodeError, MAX_PDU_LEN};

pub const MBAP_HEADER_LEN: usize = 7;
pub const DEFAULT_PORT: u16 = 502;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Length includes unit-id byte + PDU length.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)?;
        w.write_u8(self.unit_id)?;
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let transaction_id = r.read_be_u16()?;
        let protocol_id = r.read_be_u16()?;
        let length = r.read_be_u16()?;
        let unit_id = r.read_u8()?;

        if protocol_id != 0 {
            return Err(DecodeError::InvalidValue);
        }
        // At least the unit id and a function code, at most a full PDU.
        if length < 2 || usize::from(length) - 1 > MAX_PDU_LEN {
            return Err(DecodeError::InvalidLength);
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }

    pub fn pdu_len(&self) -> usize {
        usize::from(self.length).saturating_sub(1)
    }

    /// Builds the request carried by this header and its PDU bytes.
    pub fn request(&self, pdu: &[u8]) -> Request {
        Request::tcp(self.transaction_id, self.unit_id, RequestPdu::parse(pdu))
    }
}

/// Decodes one complete ADU (header + PDU).
pub fn decode_request(adu: &[u8]) -> Result<Request, DecodeError> {
    let mut r = Reader::new(adu);
    let header = MbapHeader::decode(&mut r)?;
    let pdu = r.read_exact(header.pdu_len())?;
    r.finish()?;
    Ok(header.request(pdu))
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, EncodeError> {
    let pdu = response.pdu.to_bytes()?;
    let length = u16::try_from(pdu.len() + 1).map_err(|_| EncodeError::ValueOutOfRange)?;

    let mut w = Writer::with_limit(MBAP_HEADER_LEN + pdu.len());
    MbapHeader {
        transaction_id: response.transaction_id.unwrap_or(0),
        protocol_id: 0,
        length,
        unit_id: response.unit_id,
    }
    .encode(&mut w)?;
    w.write_all(&pdu)?;
    Ok(w.into_inner())
}
