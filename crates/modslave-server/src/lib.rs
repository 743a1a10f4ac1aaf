//! Modbus slave engine: register tables with access hooks, request
//! processing (blocking and resumable async), and TCP/RTU transports.

#![forbid(unsafe_code)]

use thiserror::Error;

pub mod async_processor;
pub mod blocking;
pub mod definitions;
pub mod hooks;
pub mod memory;
pub mod observer;
pub mod processor;
pub mod register;
pub mod rtu;
pub mod store;
pub mod table;
pub mod tcp;
pub mod transport;

pub use async_processor::{AsyncRequestProcessor, ProcessState, Progress, Suspension};
pub use blocking::BlockingTransport;
pub use definitions::{DefinitionError, InitialValue, RegisterDefinition, RegisterDefinitions, Scalar};
pub use hooks::{
    AsyncGetHook, AsyncSetHook, HookContext, HookError, HookResult, OnGet, OnSet, SetOutcome,
};
pub use memory::MemoryTransport;
pub use observer::{DropReason, NoopObserver, ProcessObserver, TracingObserver};
pub use processor::{
    exception_for, Access, AccessOp, Outcome, ProcessError, ProcessorConfig, RequestProcessor,
};
pub use register::{Register, RegisterHooks, RegisterInfo};
pub use rtu::RtuTransport;
#[cfg(feature = "rtu")]
pub use rtu::{ModbusRtuServer, RtuServerConfig};
pub use store::{AccessMode, RegisterStore, StoreConfig, StoreError};
pub use table::{RegisterValues, Table};
pub use tcp::{ModbusTcpServer, TcpTransport};
pub use transport::{AsyncTransport, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("processing error: {0}")]
    Process(#[from] ProcessError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
