use async_trait::async_trait;
use modslave_core::pdu::{ReadRequest, Request, RequestPdu, ResponsePdu, WriteSingleRegisterRequest};
use modslave_server::{
    AsyncRequestProcessor, AsyncSetHook, HookContext, HookResult, MemoryTransport, NoopObserver,
    OnSet, Outcome, ProcessError, ProcessState, ProcessorConfig, Progress, Register, RegisterStore,
    RegisterValues, RequestProcessor, SetOutcome, Suspension, Table, TcpTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;

/// Holds every write until released.
struct Gate(Arc<Notify>);

#[async_trait]
impl AsyncSetHook for Gate {
    async fn on_set(
        &self,
        _ctx: HookContext<'_>,
        _proposed: RegisterValues,
    ) -> HookResult<SetOutcome> {
        self.0.notified().await;
        Ok(SetOutcome::Accept)
    }
}

fn processor(gate: Arc<Notify>) -> AsyncRequestProcessor<MemoryTransport> {
    let store = RegisterStore::default();
    store
        .add_register(
            Table::HoldingRegisters,
            Register::new(93, 19u16).with_on_set(OnSet::suspending(Gate(gate))),
        )
        .unwrap();
    let engine = RequestProcessor::new(Arc::new(store), ProcessorConfig::default())
        .with_observer(NoopObserver);
    AsyncRequestProcessor::new(engine, MemoryTransport::new())
}

fn write(value: u16) -> Request {
    Request::tcp(
        1,
        1,
        RequestPdu::WriteSingleRegister(WriteSingleRegisterRequest { address: 93, value }),
    )
}

fn stored(processor: &AsyncRequestProcessor<MemoryTransport>) -> RegisterValues {
    processor
        .engine()
        .store()
        .read(Table::HoldingRegisters, 93, 1)
        .unwrap()
}

fn suspended(progress: Progress) -> Suspension {
    match progress {
        Progress::Suspended(suspension) => suspension,
        other => panic!("unexpected progress: {other:?}"),
    }
}

#[tokio::test]
async fn write_waits_for_its_hook() {
    let gate = Arc::new(Notify::new());
    let mut processor = processor(Arc::clone(&gate));

    let suspension = suspended(processor.process(Some(write(7))).await.unwrap());
    assert_eq!(suspension.state(), ProcessState::AwaitingAccess);
    assert_eq!(stored(&processor), RegisterValues::from(19u16));

    gate.notify_one();
    let progress = processor.resume(suspension).await.unwrap();
    assert_eq!(progress.state(), ProcessState::Done);
    assert_eq!(stored(&processor), RegisterValues::from(7u16));
    assert_eq!(
        processor.transport().sent()[0].pdu,
        ResponsePdu::WriteSingleRegister {
            address: 93,
            value: 7
        }
    );
}

#[tokio::test]
async fn cancelled_resume_commits_nothing() {
    let gate = Arc::new(Notify::new());
    let mut processor = processor(Arc::clone(&gate));

    let suspension = suspended(processor.process(Some(write(7))).await.unwrap());
    let timed_out = tokio::time::timeout(Duration::from_millis(20), processor.resume(suspension))
        .await
        .is_err();
    assert!(timed_out);
    assert_eq!(stored(&processor), RegisterValues::from(19u16));
    assert!(processor.transport().sent().is_empty());

    // The connection is usable again.
    gate.notify_one();
    let outcome = processor.run(Some(write(8))).await.unwrap();
    assert!(matches!(outcome, Outcome::Responded(_)));
    assert_eq!(stored(&processor), RegisterValues::from(8u16));
}

#[tokio::test]
async fn one_request_in_flight_at_a_time() {
    let gate = Arc::new(Notify::new());
    let mut processor = processor(gate);

    let suspension = suspended(processor.process(Some(write(7))).await.unwrap());
    let read = Request::tcp(
        2,
        1,
        RequestPdu::ReadHoldingRegisters(ReadRequest {
            address: 93,
            quantity: 1,
        }),
    );
    assert!(matches!(
        processor.process(Some(read.clone())).await,
        Err(ProcessError::Busy)
    ));

    processor.abandon(suspension);
    assert!(!processor.is_in_flight());
    assert_eq!(stored(&processor), RegisterValues::from(19u16));

    let outcome = processor.run(Some(read)).await.unwrap();
    let response = match outcome {
        Outcome::Responded(response) => response,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(response.pdu, ResponsePdu::ReadHoldingRegisters(vec![19]));
}

#[tokio::test]
async fn awaiting_request_ends_when_transport_closes() {
    let mut processor = processor(Arc::new(Notify::new()));
    let suspension = suspended(processor.process(None).await.unwrap());
    assert_eq!(suspension.state(), ProcessState::AwaitingRequest);
    assert!(suspension.request().is_none());

    let progress = processor.resume(suspension).await.unwrap();
    assert!(matches!(progress, Progress::Done(Outcome::Closed)));
}

#[tokio::test]
async fn cancelled_request_wait_keeps_the_stream_in_step() {
    let store = RegisterStore::default();
    store
        .add_register(Table::HoldingRegisters, Register::new(93, 19u16))
        .unwrap();
    let engine = RequestProcessor::new(Arc::new(store), ProcessorConfig::default())
        .with_observer(NoopObserver);
    let (mut master, slave_side) = duplex(256);
    let mut processor = AsyncRequestProcessor::new(engine, TcpTransport::new(slave_side));

    let read_93 = [0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x5D, 0x00, 0x01];
    master.write_all(&read_93[..3]).await.unwrap();
    let suspension = suspended(processor.process(None).await.unwrap());
    assert_eq!(suspension.state(), ProcessState::AwaitingRequest);
    let timed_out = tokio::time::timeout(Duration::from_millis(20), processor.resume(suspension))
        .await
        .is_err();
    assert!(timed_out);
    assert!(!processor.is_in_flight());

    master.write_all(&read_93[3..]).await.unwrap();
    master
        .write_all(&[0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x5D, 0x00, 0x01])
        .await
        .unwrap();
    for transaction_id in [7u16, 8] {
        let outcome = processor.run(None).await.unwrap();
        let response = match outcome {
            Outcome::Responded(response) => response,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(response.transaction_id, Some(transaction_id));
        assert_eq!(response.pdu, ResponsePdu::ReadHoldingRegisters(vec![19]));
    }

    let mut adu = [0u8; 22];
    master.read_exact(&mut adu).await.unwrap();
    assert_eq!(
        adu,
        [
            0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x13, 0x00, 0x08, 0x00,
            0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x13,
        ]
    );
}
