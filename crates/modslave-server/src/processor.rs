//! Turns requests into register accesses and responses.

use crate::observer::{DropReason, ProcessObserver, TracingObserver};
use crate::store::{AccessMode, Driver, RegisterStore, StoreError};
use crate::table::{RegisterValues, Table};
use crate::transport::{Transport, TransportError};
use modslave_core::pdu::{ExceptionCode, Request, RequestPdu, Response, ResponsePdu};
use futures::FutureExt;
use modslave_core::DecodeError;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_UNIT_ID: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Unit this slave answers to.
    pub unit_id: u8,
    /// Execute writes addressed to unit 0 without responding.
    pub broadcast: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            unit_id: DEFAULT_UNIT_ID,
            broadcast: false,
        }
    }
}

impl ProcessorConfig {
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }
}

/// Result of processing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Responded(Response),
    /// The request was handled (or ignored) without a response.
    Dropped,
    /// The transport has no more requests.
    Closed,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("a request is already being processed")]
    Busy,
}

/// A register access requested by a master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub table: Table,
    pub op: AccessOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOp {
    Read { address: u16, quantity: u16 },
    Write { address: u16, values: RegisterValues },
}

impl Access {
    pub fn mode(&self) -> AccessMode {
        match self.op {
            AccessOp::Read { .. } => AccessMode::Read,
            AccessOp::Write { .. } => AccessMode::Write,
        }
    }

    /// Whether carrying out this access would run a suspending hook.
    pub fn suspends(&self, store: &RegisterStore) -> bool {
        let (address, quantity) = match &self.op {
            AccessOp::Read { address, quantity } => (*address, usize::from(*quantity)),
            AccessOp::Write { address, values } => (*address, values.len()),
        };
        store.requires_suspension(self.table, address, quantity, self.mode())
    }
}

pub(crate) enum Dispatch {
    Drop(DropReason),
    Respond(ResponsePdu),
    Access(Access),
}

/// Exception reported for a failed register access.
pub fn exception_for(err: &StoreError) -> ExceptionCode {
    match err {
        StoreError::ReadOnly(_) => ExceptionCode::IllegalFunction,
        StoreError::AddressRange { .. } | StoreError::NotFound { .. } => {
            ExceptionCode::IllegalDataAddress
        }
        StoreError::HookRejected { .. } | StoreError::KindMismatch { .. } => {
            ExceptionCode::IllegalDataValue
        }
        _ => ExceptionCode::ServerDeviceFailure,
    }
}

fn exception_for_decode(err: DecodeError) -> ExceptionCode {
    match err {
        DecodeError::InvalidFunctionCode => ExceptionCode::IllegalFunction,
        _ => ExceptionCode::IllegalDataValue,
    }
}

fn table_for(pdu: &RequestPdu) -> Option<Table> {
    match pdu {
        RequestPdu::ReadCoils(_) | RequestPdu::WriteSingleCoil(_) | RequestPdu::WriteMultipleCoils(_) => {
            Some(Table::Coils)
        }
        RequestPdu::ReadDiscreteInputs(_) => Some(Table::DiscreteInputs),
        RequestPdu::ReadHoldingRegisters(_)
        | RequestPdu::WriteSingleRegister(_)
        | RequestPdu::WriteMultipleRegisters(_) => Some(Table::HoldingRegisters),
        RequestPdu::ReadInputRegisters(_) => Some(Table::InputRegisters),
        RequestPdu::Unsupported(_) | RequestPdu::Malformed { .. } => None,
    }
}

/// Synchronous request processor over a shared [`RegisterStore`].
///
/// Hooks run on the calling thread; suspending hooks are driven to
/// completion before the response is produced.
#[derive(Clone)]
pub struct RequestProcessor {
    store: Arc<RegisterStore>,
    config: ProcessorConfig,
    observer: Arc<dyn ProcessObserver>,
}

impl RequestProcessor {
    pub fn new(store: Arc<RegisterStore>, config: ProcessorConfig) -> Self {
        Self {
            store,
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: impl ProcessObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    pub fn config(&self) -> ProcessorConfig {
        self.config
    }

    /// Processes one request, receiving it from `transport` when `request`
    /// is `None`.
    pub fn process<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        request: Option<Request>,
    ) -> Result<Outcome, ProcessError> {
        let request = match request {
            Some(request) => request,
            None => match transport.recv()? {
                Some(request) => request,
                None => return Ok(Outcome::Closed),
            },
        };
        match self.handle(&request) {
            Some(response) => {
                transport.send(&response)?;
                self.observer.response_sent(&response);
                Ok(Outcome::Responded(response))
            }
            None => Ok(Outcome::Dropped),
        }
    }

    /// Processes requests until the transport closes.
    pub fn serve<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<(), ProcessError> {
        loop {
            if self.process(transport, None)? == Outcome::Closed {
                return Ok(());
            }
        }
    }

    /// Produces the response for a request, or `None` when none is due.
    pub fn handle(&self, request: &Request) -> Option<Response> {
        self.observer.request_acquired(request);
        let pdu = match self.dispatch(request) {
            Dispatch::Drop(reason) => {
                self.observer.request_dropped(request, reason);
                return None;
            }
            Dispatch::Respond(pdu) => pdu,
            Dispatch::Access(access) => self.run_access(request, &access),
        };
        self.conclude(request, pdu)
    }

    /// Serves a read request against `table`.
    pub fn read_access(&self, request: &Request, table: Table) -> ResponsePdu {
        match self.access_for(request, table) {
            Ok(access) if access.mode() == AccessMode::Read => self.run_access(request, &access),
            Ok(_) => ResponsePdu::exception(
                request.pdu.raw_function_code(),
                ExceptionCode::IllegalFunction,
            ),
            Err(pdu) => pdu,
        }
    }

    /// Serves a write request against `table`.
    pub fn write_access(&self, request: &Request, table: Table) -> ResponsePdu {
        match self.access_for(request, table) {
            Ok(access) if access.mode() == AccessMode::Write => self.run_access(request, &access),
            Ok(_) => ResponsePdu::exception(
                request.pdu.raw_function_code(),
                ExceptionCode::IllegalFunction,
            ),
            Err(pdu) => pdu,
        }
    }

    pub(crate) fn observer(&self) -> &dyn ProcessObserver {
        self.observer.as_ref()
    }

    fn is_broadcast(&self, request: &Request) -> bool {
        self.config.broadcast && request.unit_id == 0
    }

    pub(crate) fn dispatch(&self, request: &Request) -> Dispatch {
        if request.unit_id != self.config.unit_id && !self.is_broadcast(request) {
            return Dispatch::Drop(DropReason::ForeignUnit);
        }
        let function = request.pdu.raw_function_code();
        match &request.pdu {
            RequestPdu::Unsupported(_) => {
                return Dispatch::Respond(ResponsePdu::exception(
                    function,
                    ExceptionCode::IllegalFunction,
                ))
            }
            RequestPdu::Malformed { error, .. } => {
                return Dispatch::Respond(ResponsePdu::exception(
                    function,
                    exception_for_decode(*error),
                ))
            }
            _ => {}
        }
        let Some(table) = table_for(&request.pdu) else {
            return Dispatch::Respond(ResponsePdu::exception(
                function,
                ExceptionCode::IllegalFunction,
            ));
        };
        match self.access_for(request, table) {
            Ok(access) if access.mode() == AccessMode::Read && self.is_broadcast(request) => {
                Dispatch::Drop(DropReason::Broadcast)
            }
            Ok(access) => Dispatch::Access(access),
            Err(pdu) => Dispatch::Respond(pdu),
        }
    }

    fn access_for(&self, request: &Request, table: Table) -> Result<Access, ResponsePdu> {
        let op = match &request.pdu {
            RequestPdu::ReadCoils(read)
            | RequestPdu::ReadDiscreteInputs(read)
            | RequestPdu::ReadHoldingRegisters(read)
            | RequestPdu::ReadInputRegisters(read) => AccessOp::Read {
                address: read.address,
                quantity: read.quantity,
            },
            RequestPdu::WriteSingleCoil(write) => AccessOp::Write {
                address: write.address,
                values: RegisterValues::from(write.value),
            },
            RequestPdu::WriteSingleRegister(write) => AccessOp::Write {
                address: write.address,
                values: RegisterValues::from(write.value),
            },
            RequestPdu::WriteMultipleCoils(write) => AccessOp::Write {
                address: write.address,
                values: RegisterValues::Bits(write.values.clone()),
            },
            RequestPdu::WriteMultipleRegisters(write) => AccessOp::Write {
                address: write.address,
                values: RegisterValues::Words(write.values.clone()),
            },
            RequestPdu::Unsupported(_) | RequestPdu::Malformed { .. } => {
                return Err(ResponsePdu::exception(
                    request.pdu.raw_function_code(),
                    ExceptionCode::IllegalFunction,
                ))
            }
        };
        Ok(Access { table, op })
    }

    fn run_access(&self, request: &Request, access: &Access) -> ResponsePdu {
        // A blocking access never suspends, so one poll finishes it.
        self.perform(Driver::Blocking, request, access)
            .now_or_never()
            .unwrap_or_else(|| {
                ResponsePdu::exception(
                    request.pdu.raw_function_code(),
                    ExceptionCode::ServerDeviceFailure,
                )
            })
    }

    pub(crate) async fn run_access_async(&self, request: &Request, access: &Access) -> ResponsePdu {
        self.perform(Driver::Suspending, request, access).await
    }

    async fn perform(&self, driver: Driver, request: &Request, access: &Access) -> ResponsePdu {
        self.observer.dispatch_started(request, access.table);
        let result = match &access.op {
            AccessOp::Read { address, quantity } => self
                .store
                .get_with(driver, access.table, *address, *quantity)
                .await
                .map(Some),
            AccessOp::Write { address, values } => self
                .store
                .set_with(driver, access.table, *address, values.clone())
                .await
                .map(|()| None),
        };
        self.complete(request, access, result)
    }

    /// Builds the response for a finished access: read data, a write echo,
    /// or the exception matching the store error.
    fn complete(
        &self,
        request: &Request,
        access: &Access,
        result: Result<Option<RegisterValues>, StoreError>,
    ) -> ResponsePdu {
        self.observer
            .access_completed(request, access.table, result.as_ref().err());
        let function = request.pdu.raw_function_code();
        let values = match result {
            Ok(values) => values,
            Err(err) => return ResponsePdu::exception(function, exception_for(&err)),
        };
        let pdu = match (&request.pdu, values) {
            (RequestPdu::ReadCoils(_), Some(RegisterValues::Bits(bits))) => {
                Some(ResponsePdu::ReadCoils(bits))
            }
            (RequestPdu::ReadDiscreteInputs(_), Some(RegisterValues::Bits(bits))) => {
                Some(ResponsePdu::ReadDiscreteInputs(bits))
            }
            (RequestPdu::ReadHoldingRegisters(_), Some(RegisterValues::Words(words))) => {
                Some(ResponsePdu::ReadHoldingRegisters(words))
            }
            (RequestPdu::ReadInputRegisters(_), Some(RegisterValues::Words(words))) => {
                Some(ResponsePdu::ReadInputRegisters(words))
            }
            (RequestPdu::WriteSingleCoil(write), None) => Some(ResponsePdu::WriteSingleCoil {
                address: write.address,
                value: write.value,
            }),
            (RequestPdu::WriteSingleRegister(write), None) => {
                Some(ResponsePdu::WriteSingleRegister {
                    address: write.address,
                    value: write.value,
                })
            }
            (RequestPdu::WriteMultipleCoils(write), None) => u16::try_from(write.values.len())
                .ok()
                .map(|quantity| ResponsePdu::WriteMultipleCoils {
                    address: write.address,
                    quantity,
                }),
            (RequestPdu::WriteMultipleRegisters(write), None) => {
                u16::try_from(write.values.len())
                    .ok()
                    .map(|quantity| ResponsePdu::WriteMultipleRegisters {
                        address: write.address,
                        quantity,
                    })
            }
            _ => None,
        };
        pdu.unwrap_or_else(|| {
            ResponsePdu::exception(function, ExceptionCode::ServerDeviceFailure)
        })
    }

    /// Wraps a response PDU, suppressing it for broadcast requests.
    pub(crate) fn conclude(&self, request: &Request, pdu: ResponsePdu) -> Option<Response> {
        if self.is_broadcast(request) {
            self.observer.request_dropped(request, DropReason::Broadcast);
            return None;
        }
        Some(Response::answer(request, pdu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::observer::NoopObserver;
    use crate::register::Register;
    use modslave_core::pdu::{
        ReadRequest, WriteMultipleCoilsRequest, WriteSingleCoilRequest, WriteSingleRegisterRequest,
    };

    fn processor() -> RequestProcessor {
        let store = RegisterStore::default();
        store
            .add_register(Table::Coils, Register::new(123, true))
            .unwrap();
        store
            .add_register(Table::HoldingRegisters, Register::new(93, 19u16))
            .unwrap();
        store
            .add_register(Table::InputRegisters, Register::new(10, 60001u16))
            .unwrap();
        RequestProcessor::new(Arc::new(store), ProcessorConfig::default())
            .with_observer(NoopObserver)
    }

    fn read(pdu: fn(ReadRequest) -> RequestPdu, address: u16, quantity: u16) -> Request {
        Request::tcp(1, 1, pdu(ReadRequest { address, quantity }))
    }

    #[test]
    fn read_holding_register() {
        let processor = processor();
        let response = processor
            .handle(&read(RequestPdu::ReadHoldingRegisters, 93, 1))
            .unwrap();
        assert_eq!(response.transaction_id, Some(1));
        assert_eq!(response.pdu, ResponsePdu::ReadHoldingRegisters(vec![19]));
    }

    #[test]
    fn write_single_coil_echoes() {
        let processor = processor();
        let request = Request::tcp(
            2,
            1,
            RequestPdu::WriteSingleCoil(WriteSingleCoilRequest {
                address: 123,
                value: false,
            }),
        );
        let response = processor.handle(&request).unwrap();
        assert_eq!(
            response.pdu,
            ResponsePdu::WriteSingleCoil {
                address: 123,
                value: false
            }
        );
        assert_eq!(
            processor.store().read(Table::Coils, 123, 1).unwrap(),
            RegisterValues::from(false)
        );
    }

    #[test]
    fn write_multiple_coils_spans_registers() {
        let processor = processor();
        let store = processor.store();
        store
            .add_register(Table::Coils, Register::new(200, false))
            .unwrap();
        store
            .add_register(Table::Coils, Register::new(201, vec![false, false]))
            .unwrap();

        let request = Request::tcp(
            3,
            1,
            RequestPdu::WriteMultipleCoils(WriteMultipleCoilsRequest {
                address: 200,
                values: vec![true, false, true],
            }),
        );
        let response = processor.handle(&request).unwrap();
        assert_eq!(
            response.pdu,
            ResponsePdu::WriteMultipleCoils {
                address: 200,
                quantity: 3
            }
        );
        assert_eq!(
            store.register(Table::Coils, 201).unwrap().values,
            RegisterValues::Bits(vec![false, true])
        );
        let response = processor
            .handle(&read(RequestPdu::ReadCoils, 200, 3))
            .unwrap();
        assert_eq!(response.pdu, ResponsePdu::ReadCoils(vec![true, false, true]));
    }

    #[test]
    fn unmapped_address_is_illegal_data_address() {
        let processor = processor();
        let response = processor
            .handle(&read(RequestPdu::ReadCoils, 124, 1))
            .unwrap();
        assert_eq!(
            response.pdu.exception_code(),
            Some(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn unsupported_and_malformed_requests() {
        let processor = processor();
        let response = processor
            .handle(&Request::tcp(3, 1, RequestPdu::parse(&[0x2B, 0x0E, 0x01, 0x00])))
            .unwrap();
        assert_eq!(
            response.pdu,
            ResponsePdu::exception(0x2B, ExceptionCode::IllegalFunction)
        );

        let response = processor
            .handle(&Request::tcp(4, 1, RequestPdu::parse(&[0x03, 0x00, 0x5D, 0x00, 0x00])))
            .unwrap();
        assert_eq!(
            response.pdu,
            ResponsePdu::exception(0x03, ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn foreign_unit_is_dropped() {
        let processor = processor();
        let request = Request::tcp(5, 9, RequestPdu::ReadCoils(ReadRequest { address: 123, quantity: 1 }));
        assert_eq!(processor.handle(&request), None);
    }

    #[test]
    fn broadcast_writes_execute_silently() {
        let processor = processor();
        let request = Request::rtu(
            0,
            RequestPdu::WriteSingleRegister(WriteSingleRegisterRequest {
                address: 93,
                value: 7,
            }),
        );
        assert_eq!(processor.handle(&request), None);
        assert_eq!(
            processor.store().read(Table::HoldingRegisters, 93, 1).unwrap(),
            RegisterValues::from(19u16)
        );

        let broadcasting = RequestProcessor::new(
            Arc::clone(processor.store()),
            ProcessorConfig::default().with_broadcast(true),
        );
        assert_eq!(broadcasting.handle(&request), None);
        assert_eq!(
            processor.store().read(Table::HoldingRegisters, 93, 1).unwrap(),
            RegisterValues::from(7u16)
        );
    }

    #[test]
    fn write_access_on_read_only_table_is_illegal_function() {
        let processor = processor();
        let request = Request::tcp(
            6,
            1,
            RequestPdu::WriteSingleRegister(WriteSingleRegisterRequest {
                address: 10,
                value: 1,
            }),
        );
        let pdu = processor.write_access(&request, Table::InputRegisters);
        assert_eq!(pdu.exception_code(), Some(ExceptionCode::IllegalFunction));
        assert_eq!(
            processor.store().read(Table::InputRegisters, 10, 1).unwrap(),
            RegisterValues::from(60001u16)
        );
        let pdu = processor.read_access(&request, Table::InputRegisters);
        assert_eq!(pdu.exception_code(), Some(ExceptionCode::IllegalFunction));
    }

    #[test]
    fn process_reports_closed_transport() {
        let processor = processor();
        let mut transport = MemoryTransport::with_requests([
            read(RequestPdu::ReadInputRegisters, 10, 1),
            Request::tcp(7, 3, RequestPdu::ReadCoils(ReadRequest { address: 123, quantity: 1 })),
        ]);
        let first = processor.process(&mut transport, None).unwrap();
        assert!(matches!(first, Outcome::Responded(_)));
        assert_eq!(processor.process(&mut transport, None).unwrap(), Outcome::Dropped);
        assert_eq!(processor.process(&mut transport, None).unwrap(), Outcome::Closed);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn explicit_request_bypasses_transport_recv() {
        let processor = processor();
        let mut transport = MemoryTransport::new();
        let outcome = processor
            .process(&mut transport, Some(read(RequestPdu::ReadCoils, 123, 1)))
            .unwrap();
        let response = match outcome {
            Outcome::Responded(response) => response,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(response.pdu, ResponsePdu::ReadCoils(vec![true]));
        assert_eq!(transport.sent(), &[response]);
    }
}
