use crate::EncodeError;

/// Appends encoded bytes to an owned buffer that may not grow past `limit`.
#[derive(Debug)]
pub struct Writer {
    buf: Vec<u8>,
    limit: usize,
}

impl Writer {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(64)),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_written(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn reserve(&self, additional: usize) -> Result<(), EncodeError> {
        if self.buf.len() + additional > self.limit {
            return Err(EncodeError::BufferTooSmall);
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.reserve(1)?;
        self.buf.push(value);
        Ok(())
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.reserve(data.len())?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }

    /// Writes a byte count followed by `bits` packed LSB first.
    pub fn write_packed_bits(&mut self, bits: &[bool]) -> Result<(), EncodeError> {
        let byte_count =
            u8::try_from(bits.len().div_ceil(8)).map_err(|_| EncodeError::ValueOutOfRange)?;
        self.reserve(1 + usize::from(byte_count))?;
        self.buf.push(byte_count);
        let start = self.buf.len();
        self.buf.resize(start + usize::from(byte_count), 0);
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                self.buf[start + i / 8] |= 1u8 << (i % 8);
            }
        }
        Ok(())
    }
}
