use modslave_core::pdu::{
    ExceptionCode, ReadRequest, Request, RequestPdu, ResponsePdu, WriteMultipleRegistersRequest,
    WriteSingleCoilRequest, WriteSingleRegisterRequest,
};
use modslave_server::{
    HookError, MemoryTransport, NoopObserver, OnGet, OnSet, ProcessorConfig, RegisterDefinition,
    RegisterDefinitions, RegisterHooks, RegisterStore, RegisterValues, RequestProcessor,
    SetOutcome, StoreConfig, StoreError, Table,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EXAMPLE: &str = r#"{
    "COILS": {
        "RESET_REGISTER_DATA_COIL": { "register": 42, "len": 1, "val": 0 },
        "EXAMPLE_COIL": { "register": 123, "len": 1, "val": 1 }
    },
    "HREGS": { "EXAMPLE_HREG": { "register": 93, "len": 1, "val": 19 } },
    "ISTS": { "EXAMPLE_ISTS": { "register": 67, "len": 1, "val": 0 } },
    "IREGS": { "EXAMPLE_IREG": { "register": 10, "len": 1, "val": 60001 } }
}"#;

fn definitions() -> RegisterDefinitions {
    let mut defs = RegisterDefinitions::from_json_str(EXAMPLE).unwrap();
    defs.attach_get_hook(
        Table::InputRegisters,
        "EXAMPLE_IREG",
        OnGet::blocking(|ctx, current| {
            let value = current.as_words().map_or(0, |words| words[0]);
            ctx.store.write(ctx.table, ctx.address, value.wrapping_add(1))?;
            Ok(None)
        }),
    )
    .unwrap();
    defs.attach_set_hook(
        Table::Coils,
        "RESET_REGISTER_DATA_COIL",
        OnSet::blocking(|ctx, proposed| {
            if !matches!(proposed.as_bits(), Some([true])) {
                return Ok(SetOutcome::Accept);
            }
            ctx.store.reset_to_defaults()?;
            Ok(SetOutcome::Override(RegisterValues::from(false)))
        }),
    )
    .unwrap();
    defs
}

fn processor() -> RequestProcessor {
    let store = RegisterStore::from_definitions(&definitions(), StoreConfig::default()).unwrap();
    RequestProcessor::new(Arc::new(store), ProcessorConfig::default()).with_observer(NoopObserver)
}

fn request(pdu: RequestPdu) -> Request {
    Request::tcp(1, 1, pdu)
}

fn read(pdu: fn(ReadRequest) -> RequestPdu, address: u16, quantity: u16) -> Request {
    request(pdu(ReadRequest { address, quantity }))
}

fn write_coil(address: u16, value: bool) -> Request {
    request(RequestPdu::WriteSingleCoil(WriteSingleCoilRequest { address, value }))
}

fn write_register(address: u16, value: u16) -> Request {
    request(RequestPdu::WriteSingleRegister(WriteSingleRegisterRequest {
        address,
        value,
    }))
}

fn answer(processor: &RequestProcessor, request: &Request) -> ResponsePdu {
    processor.handle(request).unwrap().pdu
}

#[test]
fn example_coil_round_trip() {
    let processor = processor();
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadCoils, 123, 1)),
        ResponsePdu::ReadCoils(vec![true])
    );
    assert_eq!(
        answer(&processor, &write_coil(123, false)),
        ResponsePdu::WriteSingleCoil {
            address: 123,
            value: false
        }
    );
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadCoils, 123, 1)),
        ResponsePdu::ReadCoils(vec![false])
    );
}

#[test]
fn example_holding_register_and_discrete_input() {
    let processor = processor();
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadHoldingRegisters, 93, 1)),
        ResponsePdu::ReadHoldingRegisters(vec![19])
    );
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadDiscreteInputs, 67, 1)),
        ResponsePdu::ReadDiscreteInputs(vec![false])
    );
}

#[test]
fn input_register_counts_its_reads() {
    let processor = processor();
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadInputRegisters, 10, 1)),
        ResponsePdu::ReadInputRegisters(vec![60002])
    );
    assert_eq!(
        processor.store().read(Table::InputRegisters, 10, 1).unwrap(),
        RegisterValues::from(60002u16)
    );
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadInputRegisters, 10, 1)),
        ResponsePdu::ReadInputRegisters(vec![60003])
    );
}

#[test]
fn reset_coil_restores_defaults() {
    let processor = processor();
    answer(&processor, &write_register(93, 500));
    answer(&processor, &read(RequestPdu::ReadInputRegisters, 10, 1));
    answer(&processor, &write_coil(123, false));

    assert_eq!(
        answer(&processor, &write_coil(42, true)),
        ResponsePdu::WriteSingleCoil {
            address: 42,
            value: true
        }
    );
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadHoldingRegisters, 93, 1)),
        ResponsePdu::ReadHoldingRegisters(vec![19])
    );
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadCoils, 123, 1)),
        ResponsePdu::ReadCoils(vec![true])
    );
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadCoils, 42, 1)),
        ResponsePdu::ReadCoils(vec![false])
    );
    // The counting hook survives the reset.
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadInputRegisters, 10, 1)),
        ResponsePdu::ReadInputRegisters(vec![60002])
    );
}

#[test]
fn setup_registers_replaces_every_table() {
    let processor = processor();
    let replacement = RegisterDefinitions::default().with_register(
        Table::HoldingRegisters,
        "SETPOINT",
        RegisterDefinition::new(200, vec![1u16, 2]),
    );
    processor.store().setup_registers(&replacement).unwrap();

    assert!(processor.store().register(Table::Coils, 123).is_none());
    assert!(processor.store().register(Table::InputRegisters, 10).is_none());
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadCoils, 123, 1)).exception_code(),
        Some(ExceptionCode::IllegalDataAddress)
    );
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadHoldingRegisters, 200, 2)),
        ResponsePdu::ReadHoldingRegisters(vec![1, 2])
    );
}

#[test]
fn invalid_setup_keeps_existing_tables() {
    let processor = processor();
    let overlapping = RegisterDefinitions::default()
        .with_register(
            Table::Coils,
            "A",
            RegisterDefinition::new(0, false).with_len(4),
        )
        .with_register(Table::Coils, "B", RegisterDefinition::new(2, true));
    let err = processor.store().setup_registers(&overlapping).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateAddress { .. }));
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadCoils, 123, 1)),
        ResponsePdu::ReadCoils(vec![true])
    );
}

#[test]
fn unmapped_range_is_illegal_address_and_skips_hooks() {
    let processor = processor();
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadInputRegisters, 10, 2)).exception_code(),
        Some(ExceptionCode::IllegalDataAddress)
    );
    assert_eq!(
        processor.store().read(Table::InputRegisters, 10, 1).unwrap(),
        RegisterValues::from(60001u16)
    );
}

#[test]
fn writes_to_read_only_tables_are_illegal_function() {
    let processor = processor();
    let pdu = processor.write_access(&write_coil(67, true), Table::DiscreteInputs);
    assert_eq!(pdu.exception_code(), Some(ExceptionCode::IllegalFunction));
    assert_eq!(
        processor.store().read(Table::DiscreteInputs, 67, 1).unwrap(),
        RegisterValues::from(false)
    );
}

#[test]
fn rejecting_hook_is_illegal_data_value() {
    let processor = processor();
    processor
        .store()
        .attach_hooks(
            Table::HoldingRegisters,
            93,
            RegisterHooks {
                on_get: None,
                on_set: Some(OnSet::blocking(|_, proposed| {
                    match proposed.as_words() {
                        Some([value]) if *value > 100 => {
                            Ok(SetOutcome::Reject(format!("{value} exceeds 100")))
                        }
                        _ => Ok(SetOutcome::Accept),
                    }
                })),
            },
        )
        .unwrap();

    assert_eq!(
        answer(&processor, &write_register(93, 500)).exception_code(),
        Some(ExceptionCode::IllegalDataValue)
    );
    assert_eq!(
        processor.store().read(Table::HoldingRegisters, 93, 1).unwrap(),
        RegisterValues::from(19u16)
    );
    answer(&processor, &write_register(93, 50));
    assert_eq!(
        processor.store().read(Table::HoldingRegisters, 93, 1).unwrap(),
        RegisterValues::from(50u16)
    );
}

#[test]
fn failing_hooks_are_device_failures() {
    let processor = processor();
    processor
        .store()
        .attach_hooks(
            Table::HoldingRegisters,
            93,
            RegisterHooks {
                on_get: Some(OnGet::blocking(|_, _| panic!("sensor driver crashed"))),
                on_set: Some(OnSet::blocking(|_, _| Err(HookError::failed("bus timeout")))),
            },
        )
        .unwrap();
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadHoldingRegisters, 93, 1)).exception_code(),
        Some(ExceptionCode::ServerDeviceFailure)
    );
    assert_eq!(
        answer(&processor, &write_register(93, 1)).exception_code(),
        Some(ExceptionCode::ServerDeviceFailure)
    );
    // Processing continues for other registers.
    assert_eq!(
        answer(&processor, &read(RequestPdu::ReadCoils, 123, 1)),
        ResponsePdu::ReadCoils(vec![true])
    );
}

#[test]
fn concurrent_connections_never_interleave_a_write() {
    let store = Arc::new(RegisterStore::default());
    let inside = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let (flag, seen) = (Arc::clone(&inside), Arc::clone(&overlapped));
    store
        .add_register(
            Table::HoldingRegisters,
            modslave_server::Register::new(0, vec![0u16, 0]).with_on_set(OnSet::blocking(
                move |_, _| {
                    if flag.swap(true, Ordering::SeqCst) {
                        seen.store(true, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                    flag.store(false, Ordering::SeqCst);
                    Ok(SetOutcome::Accept)
                },
            )),
        )
        .unwrap();

    let connections: Vec<_> = [0x1111u16, 0x2222]
        .into_iter()
        .map(|value| {
            let processor = RequestProcessor::new(Arc::clone(&store), ProcessorConfig::default())
                .with_observer(NoopObserver);
            std::thread::spawn(move || {
                let mut transport = MemoryTransport::with_requests((0..20).map(|_| {
                    request(RequestPdu::WriteMultipleRegisters(
                        WriteMultipleRegistersRequest {
                            address: 0,
                            values: vec![value, value],
                        },
                    ))
                }));
                processor.serve(&mut transport).unwrap();
                transport.sent().len()
            })
        })
        .collect();
    for connection in connections {
        assert_eq!(connection.join().unwrap(), 20);
    }

    assert!(!overlapped.load(Ordering::SeqCst));
    let values = store.read(Table::HoldingRegisters, 0, 2).unwrap();
    assert!(
        values == RegisterValues::from(vec![0x1111u16, 0x1111])
            || values == RegisterValues::from(vec![0x2222u16, 0x2222]),
        "unexpected values: {values:?}"
    );
}
