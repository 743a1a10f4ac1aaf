use crate::transport::{AsyncTransport, Transport, TransportError};
use async_trait::async_trait;
use modslave_core::pdu::{Request, Response};
use std::collections::VecDeque;

/// Transport backed by an in-memory queue of requests.
///
/// `recv` yields queued requests in order and `None` once the queue is empty.
/// Sent responses are kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    incoming: VecDeque<Request>,
    sent: Vec<Response>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests(requests: impl IntoIterator<Item = Request>) -> Self {
        Self {
            incoming: requests.into_iter().collect(),
            sent: Vec::new(),
        }
    }

    pub fn push(&mut self, request: Request) {
        self.incoming.push_back(request);
    }

    pub fn pending(&self) -> usize {
        self.incoming.len()
    }

    pub fn sent(&self) -> &[Response] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        Ok(self.incoming.pop_front())
    }

    fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        self.sent.push(response.clone());
        Ok(())
    }
}

#[async_trait]
impl AsyncTransport for MemoryTransport {
    async fn recv(&mut self) -> Result<Option<Request>, TransportError> {
        Ok(self.incoming.pop_front())
    }

    async fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        self.sent.push(response.clone());
        Ok(())
    }
}
