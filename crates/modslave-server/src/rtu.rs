use crate::transport::{AsyncTransport, TransportError};
use async_trait::async_trait;
use modslave_core::frame::rtu as rtu_frame;
use modslave_core::pdu::{Request, RequestPdu, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

#[cfg(feature = "rtu")]
use crate::async_processor::AsyncRequestProcessor;
#[cfg(feature = "rtu")]
use crate::processor::RequestProcessor;
#[cfg(feature = "rtu")]
use crate::ServerError;
#[cfg(feature = "rtu")]
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
#[cfg(feature = "rtu")]
use tracing::warn;

/// RTU-framed transport over a byte stream.
///
/// Bytes are accumulated until some suffix of the buffer forms a frame with a
/// valid CRC. Leading noise and frames with a bad CRC are skipped silently.
#[derive(Debug)]
pub struct RtuTransport<IO> {
    io: IO,
    frame: Vec<u8>,
    len: usize,
}

impl<IO> RtuTransport<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            io,
            frame: vec![0u8; rtu_frame::MAX_FRAME_LEN],
            len: 0,
        }
    }

    pub fn with_max_frame_len(io: IO, max_frame_len: usize) -> Result<Self, TransportError> {
        if max_frame_len < rtu_frame::MIN_FRAME_LEN {
            return Err(TransportError::InvalidFrame(
                "rtu frame length must be at least 4 bytes",
            ));
        }
        Ok(Self {
            io,
            frame: vec![0u8; max_frame_len],
            len: 0,
        })
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

fn decode_suffix_frame(buffer: &[u8]) -> Option<(u8, &[u8])> {
    if buffer.len() < rtu_frame::MIN_FRAME_LEN {
        return None;
    }
    (0..=buffer.len() - rtu_frame::MIN_FRAME_LEN)
        .find_map(|start| rtu_frame::decode_frame(&buffer[start..]).ok())
}

#[async_trait]
impl<IO> AsyncTransport for RtuTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        let max_frame_len = self.frame.len();
        loop {
            if self.len == max_frame_len {
                self.frame.copy_within(1..max_frame_len, 0);
                self.len -= 1;
            }

            let n = self.io.read(&mut self.frame[self.len..self.len + 1]).await?;
            if n == 0 {
                return Ok(None);
            }
            self.len += n;

            let Some((unit_id, pdu)) = decode_suffix_frame(&self.frame[..self.len]) else {
                continue;
            };
            trace!(unit_id, pdu_len = pdu.len(), "read modbus rtu frame");
            let request = Request::rtu(unit_id, RequestPdu::parse(pdu));
            self.len = 0;
            return Ok(Some(request));
        }
    }

    async fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        let frame = rtu_frame::encode_response(response)?;
        self.io.write_all(&frame).await?;
        self.io.flush().await?;
        Ok(())
    }
}

#[cfg(feature = "rtu")]
#[derive(Debug, Clone)]
pub struct RtuServerConfig {
    pub max_frame_len: usize,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

#[cfg(feature = "rtu")]
impl Default for RtuServerConfig {
    fn default() -> Self {
        Self {
            max_frame_len: rtu_frame::MAX_FRAME_LEN,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// Modbus RTU slave on a serial line.
#[cfg(feature = "rtu")]
pub struct ModbusRtuServer {
    stream: SerialStream,
    engine: RequestProcessor,
    config: RtuServerConfig,
}

#[cfg(feature = "rtu")]
impl ModbusRtuServer {
    pub fn open(
        path: &str,
        baud_rate: u32,
        engine: RequestProcessor,
        config: RtuServerConfig,
    ) -> Result<Self, ServerError> {
        let stream = tokio_serial::new(path, baud_rate)
            .parity(config.parity)
            .data_bits(config.data_bits)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .open_native_async()
            .map_err(|err| {
                ServerError::Io(std::io::Error::other(format!(
                    "failed to open serial port '{path}': {err}"
                )))
            })?;
        Ok(Self::from_stream(stream, engine, config))
    }

    pub fn from_stream(stream: SerialStream, engine: RequestProcessor, config: RtuServerConfig) -> Self {
        Self {
            stream,
            engine,
            config,
        }
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let transport = RtuTransport::with_max_frame_len(self.stream, self.config.max_frame_len)?;
        let mut processor = AsyncRequestProcessor::new(self.engine, transport);
        if let Err(err) = processor.serve().await {
            warn!(error = %err, "modbus rtu server ended with error");
            return Err(err.into());
        }
        Ok(())
    }
}
