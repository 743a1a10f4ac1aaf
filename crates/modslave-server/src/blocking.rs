//! Blocking adapter over any [`AsyncTransport`].

use crate::tcp::TcpTransport;
use crate::transport::{AsyncTransport, Transport, TransportError};
use modslave_core::pdu::{Request, Response};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Drives an async transport on a private current-thread runtime so that
/// [`RequestProcessor`](crate::RequestProcessor) can use it from plain threads.
///
/// Must not be used from within another async runtime.
pub struct BlockingTransport<T> {
    runtime: Runtime,
    inner: T,
}

fn runtime() -> Result<Runtime, TransportError> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

impl<T: AsyncTransport> BlockingTransport<T> {
    pub fn new(inner: T) -> Result<Self, TransportError> {
        Ok(Self {
            runtime: runtime()?,
            inner,
        })
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl BlockingTransport<TcpTransport<TcpStream>> {
    /// Waits for one master to connect to `listener`.
    pub fn accept_tcp(listener: &std::net::TcpListener) -> Result<Self, TransportError> {
        let (stream, peer) = listener.accept()?;
        debug!(%peer, "modbus tcp connection accepted");
        stream.set_nonblocking(true)?;
        let runtime = runtime()?;
        let stream = {
            let _guard = runtime.enter();
            TcpStream::from_std(stream)?
        };
        Ok(Self {
            runtime,
            inner: TcpTransport::new(stream),
        })
    }
}

impl<T: AsyncTransport> Transport for BlockingTransport<T> {
    fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        self.runtime.block_on(self.inner.recv())
    }

    fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        self.runtime.block_on(self.inner.send(response))
    }
}
