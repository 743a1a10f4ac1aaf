use crate::async_processor::AsyncRequestProcessor;
use crate::processor::RequestProcessor;
use crate::transport::{AsyncTransport, TransportError};
use crate::ServerError;
use async_trait::async_trait;
use modslave_core::encoding::Reader;
use modslave_core::frame::tcp;
use modslave_core::pdu::{Request, Response};
use modslave_core::MAX_PDU_LEN;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, trace, warn};

/// MBAP-framed transport over a byte stream.
///
/// A frame with an invalid MBAP header is reported as an error, which ends
/// the connection. `recv` is cancel safe: bytes of a partly read frame stay
/// buffered for the next call.
#[derive(Debug)]
pub struct TcpTransport<IO = TcpStream> {
    io: IO,
    frame: Vec<u8>,
    len: usize,
}

impl<IO> TcpTransport<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            io,
            frame: vec![0u8; tcp::MBAP_HEADER_LEN + MAX_PDU_LEN],
            len: 0,
        }
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

#[async_trait]
impl<IO> AsyncTransport for TcpTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        loop {
            let frame_len = if self.len < tcp::MBAP_HEADER_LEN {
                tcp::MBAP_HEADER_LEN
            } else {
                let mbap = &self.frame[..tcp::MBAP_HEADER_LEN];
                let header = match tcp::MbapHeader::decode(&mut Reader::new(mbap)) {
                    Ok(header) => header,
                    Err(err) => {
                        self.len = 0;
                        return Err(err.into());
                    }
                };
                let frame_len = tcp::MBAP_HEADER_LEN + header.pdu_len();
                if self.len == frame_len {
                    self.len = 0;
                    let pdu = &self.frame[tcp::MBAP_HEADER_LEN..frame_len];
                    trace!(
                        transaction_id = header.transaction_id,
                        unit_id = header.unit_id,
                        pdu_len = pdu.len(),
                        "read modbus tcp frame"
                    );
                    return Ok(Some(header.request(pdu)));
                }
                frame_len
            };

            let n = self.io.read(&mut self.frame[self.len..frame_len]).await?;
            if n == 0 {
                let partial_pdu = self.len >= tcp::MBAP_HEADER_LEN;
                self.len = 0;
                if partial_pdu {
                    return Err(TransportError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
                return Ok(None);
            }
            self.len += n;
        }
    }

    async fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        let adu = tcp::encode_response(response)?;
        self.io.write_all(&adu).await?;
        self.io.flush().await?;
        Ok(())
    }
}

/// Modbus TCP slave: one task and one [`AsyncRequestProcessor`] per connection,
/// all sharing the processor's register store.
pub struct ModbusTcpServer {
    listener: TcpListener,
    engine: RequestProcessor,
}

impl ModbusTcpServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, engine: RequestProcessor) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, engine))
    }

    pub fn from_listener(listener: TcpListener, engine: RequestProcessor) -> Self {
        Self { listener, engine }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn engine(&self) -> &RequestProcessor {
        &self.engine
    }

    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let engine = self.engine.clone();
            tokio::spawn(async move {
                debug!(%peer, "modbus tcp connection accepted");
                let mut processor = AsyncRequestProcessor::new(engine, TcpTransport::new(socket));
                match processor.serve().await {
                    Ok(()) => debug!(%peer, "modbus tcp connection closed"),
                    Err(err) => {
                        warn!(%peer, error = %err, "modbus tcp server connection ended with error")
                    }
                }
            });
        }
    }
}
