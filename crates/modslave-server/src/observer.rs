use crate::processor::exception_for;
use crate::store::StoreError;
use crate::table::Table;
use modslave_core::pdu::{ExceptionCode, Request, Response};
use tracing::{debug, warn};

/// Why a request got no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Addressed to another unit.
    ForeignUnit,
    /// Broadcast requests are executed silently.
    Broadcast,
}

/// Notified at each stage of request processing. All methods default to no-ops.
pub trait ProcessObserver: Send + Sync {
    fn request_acquired(&self, _request: &Request) {}

    fn dispatch_started(&self, _request: &Request, _table: Table) {}

    fn access_completed(&self, _request: &Request, _table: Table, _error: Option<&StoreError>) {}

    fn response_sent(&self, _response: &Response) {}

    fn request_dropped(&self, _request: &Request, _reason: DropReason) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProcessObserver for NoopObserver {}

/// Emits `tracing` events for each stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProcessObserver for TracingObserver {
    fn request_acquired(&self, request: &Request) {
        debug!(
            transaction_id = ?request.transaction_id,
            unit_id = request.unit_id,
            function = request.pdu.raw_function_code(),
            "received modbus request"
        );
    }

    fn dispatch_started(&self, request: &Request, table: Table) {
        debug!(
            transaction_id = ?request.transaction_id,
            %table,
            "dispatching modbus request"
        );
    }

    fn access_completed(&self, request: &Request, table: Table, error: Option<&StoreError>) {
        let Some(err) = error else {
            return;
        };
        let exception = exception_for(err);
        if is_device_failure(exception) {
            warn!(
                transaction_id = ?request.transaction_id,
                %table,
                error = %err,
                "register access failed"
            );
        } else {
            debug!(
                transaction_id = ?request.transaction_id,
                %table,
                ?exception,
                error = %err,
                "register access refused"
            );
        }
    }

    fn response_sent(&self, response: &Response) {
        debug!(
            transaction_id = ?response.transaction_id,
            unit_id = response.unit_id,
            function = response.pdu.function_byte(),
            exception = response.pdu.is_exception(),
            "sent modbus response"
        );
    }

    fn request_dropped(&self, request: &Request, reason: DropReason) {
        debug!(
            transaction_id = ?request.transaction_id,
            unit_id = request.unit_id,
            ?reason,
            "modbus request dropped"
        );
    }
}

fn is_device_failure(exception: ExceptionCode) -> bool {
    exception == ExceptionCode::ServerDeviceFailure
}
