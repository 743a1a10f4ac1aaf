use clap::Args;
use modslave_core::frame::tcp::DEFAULT_PORT;
use modslave_server::{
    DefinitionError, OnGet, OnSet, ProcessorConfig, RegisterDefinitions, RegisterStore,
    RegisterValues, SetOutcome, Table,
};
use std::path::Path;

/// Register table served when no `--registers` file is given.
pub const EXAMPLE_REGISTERS: &str = include_str!("../registers/example.json");

#[derive(Debug, Clone, Args)]
pub struct ListenArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Serve Modbus RTU on this serial port instead of TCP.
    #[arg(long)]
    pub rtu: Option<String>,
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
}

#[derive(Debug, Clone, Args)]
pub struct SlaveArgs {
    #[arg(long, default_value_t = 1)]
    pub unit_id: u8,
    /// Execute writes sent to unit 0 without answering them.
    #[arg(long)]
    pub broadcast: bool,
}

impl SlaveArgs {
    pub fn config(&self) -> ProcessorConfig {
        ProcessorConfig::default()
            .with_unit_id(self.unit_id)
            .with_broadcast(self.broadcast)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

pub fn load_definitions(path: Option<&Path>) -> Result<RegisterDefinitions, DefinitionError> {
    match path {
        Some(path) => RegisterDefinitions::from_json_file(path),
        None => RegisterDefinitions::from_json_str(EXAMPLE_REGISTERS),
    }
}

fn name_at(
    definitions: &RegisterDefinitions,
    table: Table,
    address: u16,
) -> Result<String, DefinitionError> {
    definitions
        .table(table)
        .iter()
        .find(|(_, definition)| definition.register == address)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| DefinitionError::UnknownRegister {
            table,
            name: format!("@{address}"),
        })
}

/// Turns the coil at `address` into a reset switch: writing 1 restores every
/// table to its configured defaults and the coil reads back 0.
pub fn attach_reset_coil(
    definitions: &mut RegisterDefinitions,
    address: u16,
) -> Result<(), DefinitionError> {
    let name = name_at(definitions, Table::Coils, address)?;
    definitions.attach_set_hook(
        Table::Coils,
        &name,
        OnSet::blocking(|ctx, proposed| {
            if !matches!(proposed.as_bits(), Some([true])) {
                return Ok(SetOutcome::Accept);
            }
            tracing::info!("reset coil set, restoring register defaults");
            ctx.store.reset_to_defaults()?;
            Ok(SetOutcome::Override(RegisterValues::from(false)))
        }),
    )
}

/// Makes the input register at `address` count its reads.
pub fn attach_read_counter(
    definitions: &mut RegisterDefinitions,
    address: u16,
) -> Result<(), DefinitionError> {
    let name = name_at(definitions, Table::InputRegisters, address)?;
    definitions.attach_get_hook(
        Table::InputRegisters,
        &name,
        OnGet::blocking(|ctx, current| {
            let value = current.as_words().map_or(0, |words| words[0]);
            ctx.store
                .write(ctx.table, ctx.address, value.wrapping_add(1))?;
            Ok(None)
        }),
    )
}

/// One line per configured register.
pub fn describe(store: &RegisterStore) -> Vec<String> {
    let mut lines = Vec::new();
    for table in Table::ALL {
        for info in store.registers(table) {
            let values = match &info.values {
                RegisterValues::Bits(bits) => bits
                    .iter()
                    .map(|bit| u8::from(*bit).to_string())
                    .collect::<Vec<_>>(),
                RegisterValues::Words(words) => words.iter().map(u16::to_string).collect(),
            };
            lines.push(format!(
                "{} addr={} len={} values=[{}]",
                table.key(),
                info.address,
                info.length,
                values.join(", ")
            ));
        }
    }
    lines
}
