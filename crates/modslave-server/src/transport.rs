//! Request sources and response sinks.

use async_trait::async_trait;
use modslave_core::pdu::{Request, Response};
use modslave_core::{DecodeError, EncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
}

/// Blocking transport.
pub trait Transport {
    /// Next request, or `None` once the peer is gone.
    fn recv(&mut self) -> Result<Option<Request>, TransportError>;

    fn send(&mut self, response: &Response) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        (**self).recv()
    }

    fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        (**self).send(response)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        (**self).recv()
    }

    fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        (**self).send(response)
    }
}

/// Async transport.
#[async_trait]
pub trait AsyncTransport: Send {
    /// Next request, or `None` once the peer is gone.
    async fn recv(&mut self) -> Result<Option<Request>, TransportError>;

    async fn send(&mut self, response: &Response) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: AsyncTransport + ?Sized> AsyncTransport for &mut T {
    async fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        (**self).recv().await
    }

    async fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        (**self).send(response).await
    }
}

#[async_trait]
impl<T: AsyncTransport + ?Sized> AsyncTransport for Box<T> {
    async fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        (**self).recv().await
    }

    async fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        (**self).send(response).await
    }
}
