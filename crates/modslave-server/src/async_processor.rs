//! Request processing as an explicit, resumable state machine.
//!
//! [`AsyncRequestProcessor::process`] does no I/O when asked to fetch a
//! request and does no register access when that access would suspend on a
//! hook. It returns a [`Suspension`] instead, which the caller hands back to
//! [`AsyncRequestProcessor::resume`] when it is ready to wait. Dropping a
//! suspension, or the future of `resume`, abandons the request without
//! touching the store: writes are committed only once every hook has agreed.

use crate::observer::ProcessObserver;
use crate::processor::{Access, Dispatch, Outcome, ProcessError, RequestProcessor};
use crate::transport::AsyncTransport;
use modslave_core::pdu::{Request, ResponsePdu};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Where a request currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Waiting for the transport to deliver a request.
    AwaitingRequest,
    /// Request decoded; waiting on a register access that runs suspending hooks.
    AwaitingAccess,
    Done,
}

/// A paused request, to be passed to [`AsyncRequestProcessor::resume`].
#[derive(Debug)]
#[must_use = "a suspended request does nothing until resumed"]
pub struct Suspension {
    phase: Phase,
    in_flight: InFlight,
}

/// Marks the processor busy for as long as its suspension is alive.
#[derive(Debug)]
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(Arc::clone(flag))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
enum Phase {
    AwaitingRequest,
    AwaitingAccess { request: Request, access: Access },
}

impl Suspension {
    pub fn state(&self) -> ProcessState {
        match self.phase {
            Phase::AwaitingRequest => ProcessState::AwaitingRequest,
            Phase::AwaitingAccess { .. } => ProcessState::AwaitingAccess,
        }
    }

    /// The request being processed, once one has been acquired.
    pub fn request(&self) -> Option<&Request> {
        match &self.phase {
            Phase::AwaitingRequest => None,
            Phase::AwaitingAccess { request, .. } => Some(request),
        }
    }

    pub fn access(&self) -> Option<&Access> {
        match &self.phase {
            Phase::AwaitingRequest => None,
            Phase::AwaitingAccess { access, .. } => Some(access),
        }
    }
}

#[derive(Debug)]
pub enum Progress {
    Suspended(Suspension),
    Done(Outcome),
}

impl Progress {
    pub fn state(&self) -> ProcessState {
        match self {
            Self::Suspended(suspension) => suspension.state(),
            Self::Done(_) => ProcessState::Done,
        }
    }
}

/// Processes requests from one [`AsyncTransport`], one at a time.
pub struct AsyncRequestProcessor<T> {
    engine: RequestProcessor,
    transport: T,
    in_flight: Arc<AtomicBool>,
}

impl<T: AsyncTransport> AsyncRequestProcessor<T> {
    pub fn new(engine: RequestProcessor, transport: T) -> Self {
        Self {
            engine,
            transport,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &RequestProcessor {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Whether a suspension handed out by this processor is still alive.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Starts processing a request.
    ///
    /// With `None` the processor suspends in
    /// [`AwaitingRequest`](ProcessState::AwaitingRequest) without touching
    /// the transport. With a request it runs to completion unless the access
    /// needs a suspending hook. Fails with [`ProcessError::Busy`] while an
    /// earlier request is still suspended.
    pub async fn process(&mut self, request: Option<Request>) -> Result<Progress, ProcessError> {
        if self.is_in_flight() {
            return Err(ProcessError::Busy);
        }
        match request {
            None => Ok(self.suspend(Phase::AwaitingRequest)),
            Some(request) => self.begin(request).await,
        }
    }

    /// Continues a suspended request.
    ///
    /// Dropping the returned future abandons the request; the processor
    /// accepts a new one afterwards.
    pub async fn resume(&mut self, suspension: Suspension) -> Result<Progress, ProcessError> {
        let Suspension { phase, in_flight } = suspension;
        drop(in_flight);
        match phase {
            Phase::AwaitingRequest => match self.transport.recv().await {
                Ok(Some(request)) => self.begin(request).await,
                Ok(None) => Ok(Progress::Done(Outcome::Closed)),
                Err(err) => Err(err.into()),
            },
            Phase::AwaitingAccess { request, access } => {
                let pdu = self.engine.run_access_async(&request, &access).await;
                self.finish(&request, pdu).await
            }
        }
    }

    /// Gives up on a suspended request without running it any further.
    ///
    /// Same as dropping the suspension, with a log line.
    pub fn abandon(&mut self, suspension: Suspension) {
        if let Some(request) = suspension.request() {
            debug!(
                transaction_id = ?request.transaction_id,
                unit_id = request.unit_id,
                "suspended modbus request abandoned"
            );
        }
    }

    /// Processes one request to completion.
    pub async fn run(&mut self, request: Option<Request>) -> Result<Outcome, ProcessError> {
        let mut progress = self.process(request).await?;
        loop {
            match progress {
                Progress::Done(outcome) => return Ok(outcome),
                Progress::Suspended(suspension) => progress = self.resume(suspension).await?,
            }
        }
    }

    /// Processes requests until the transport closes.
    pub async fn serve(&mut self) -> Result<(), ProcessError> {
        loop {
            if self.run(None).await? == Outcome::Closed {
                return Ok(());
            }
        }
    }

    fn suspend(&self, phase: Phase) -> Progress {
        Progress::Suspended(Suspension {
            phase,
            in_flight: InFlight::acquire(&self.in_flight),
        })
    }

    async fn begin(&mut self, request: Request) -> Result<Progress, ProcessError> {
        self.engine.observer().request_acquired(&request);
        match self.engine.dispatch(&request) {
            Dispatch::Drop(reason) => {
                self.engine.observer().request_dropped(&request, reason);
                Ok(Progress::Done(Outcome::Dropped))
            }
            Dispatch::Respond(pdu) => self.finish(&request, pdu).await,
            Dispatch::Access(access) if access.suspends(self.engine.store()) => {
                Ok(self.suspend(Phase::AwaitingAccess { request, access }))
            }
            Dispatch::Access(access) => {
                let pdu = self.engine.run_access_async(&request, &access).await;
                self.finish(&request, pdu).await
            }
        }
    }

    async fn finish(&mut self, request: &Request, pdu: ResponsePdu) -> Result<Progress, ProcessError> {
        let Some(response) = self.engine.conclude(request, pdu) else {
            return Ok(Progress::Done(Outcome::Dropped));
        };
        self.transport.send(&response).await?;
        self.engine.observer().response_sent(&response);
        Ok(Progress::Done(Outcome::Responded(response)))
    }
}
