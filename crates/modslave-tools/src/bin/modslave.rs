use clap::Parser;
use modslave_server::{ModbusTcpServer, RegisterStore, RequestProcessor, ServerError, StoreConfig};
use modslave_tools::common::{
    attach_read_counter, attach_reset_coil, describe, init_tracing, load_definitions, ListenArgs,
    SlaveArgs,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "modslave", about = "Serve a Modbus register table over TCP or RTU")]
struct Args {
    /// JSON register definitions; the bundled example table when omitted.
    #[arg(long)]
    registers: Option<PathBuf>,
    #[command(flatten)]
    listen: ListenArgs,
    #[command(flatten)]
    slave: SlaveArgs,
    /// Coil address that resets all registers to their defaults when set.
    #[arg(long)]
    reset_coil: Option<u16>,
    /// Input register address that increments on every read.
    #[arg(long)]
    count_reads: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let mut definitions = load_definitions(args.registers.as_deref())?;
    if let Some(address) = args.reset_coil {
        attach_reset_coil(&mut definitions, address)?;
    }
    if let Some(address) = args.count_reads {
        attach_read_counter(&mut definitions, address)?;
    }

    let store = Arc::new(RegisterStore::from_definitions(
        &definitions,
        StoreConfig::default(),
    )?);
    for line in describe(&store) {
        println!("{line}");
    }
    let engine = RequestProcessor::new(store, args.slave.config());

    match args.listen.rtu.as_deref() {
        Some(path) => serve_rtu(path, args.listen.baud, engine).await?,
        None => {
            let server =
                ModbusTcpServer::bind((args.listen.host.as_str(), args.listen.port), engine)
                    .await?;
            info!(addr = %server.local_addr()?, unit_id = args.slave.unit_id, "serving modbus tcp");
            server.run().await?;
        }
    }
    Ok(())
}

#[cfg(feature = "rtu")]
async fn serve_rtu(path: &str, baud: u32, engine: RequestProcessor) -> Result<(), ServerError> {
    use modslave_server::{ModbusRtuServer, RtuServerConfig};

    info!(path, baud, "serving modbus rtu");
    ModbusRtuServer::open(path, baud, engine, RtuServerConfig::default())?
        .run()
        .await
}

#[cfg(not(feature = "rtu"))]
async fn serve_rtu(_path: &str, _baud: u32, _engine: RequestProcessor) -> Result<(), ServerError> {
    Err(ServerError::Io(std::io::Error::other(
        "modslave was built without the `rtu` feature",
    )))
}
