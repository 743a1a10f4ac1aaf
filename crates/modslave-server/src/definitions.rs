//! Declarative register configuration.
//!
//! ```json
//! {
//!   "COILS": { "EXAMPLE_COIL": { "register": 123, "len": 1, "val": 1 } },
//!   "HREGS": { "EXAMPLE_HREG": { "register": 93, "len": 1, "val": 19 } },
//!   "ISTS":  { "EXAMPLE_ISTS": { "register": 67, "len": 1, "val": 0 } },
//!   "IREGS": { "EXAMPLE_IREG": { "register": 10, "len": 1, "val": 60001 } }
//! }
//! ```

use crate::hooks::{OnGet, OnSet};
use crate::register::Register;
use crate::table::{RegisterValues, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid register definitions: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{table} register '{name}' has zero length")]
    ZeroLength { table: Table, name: String },
    #[error("{table} register '{name}' needs {expected} initial values, got {got}")]
    LengthMismatch {
        table: Table,
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{table} register '{name}': {value} is not a valid initial value")]
    InvalidValue {
        table: Table,
        name: String,
        value: i64,
    },
    #[error("{table} has no register named '{name}'")]
    UnknownRegister { table: Table, name: String },
    #[error("{table} are read-only and take no set hooks")]
    InvalidHook { table: Table },
}

/// One scalar in a `val` field. Coils accept `true`/`false` or `0`/`1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
}

/// Initial value: a scalar repeated over the register, or one value per slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl Default for InitialValue {
    fn default() -> Self {
        Self::Scalar(Scalar::Int(0))
    }
}

impl From<bool> for InitialValue {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }
}

impl From<u16> for InitialValue {
    fn from(value: u16) -> Self {
        Self::Scalar(Scalar::Int(i64::from(value)))
    }
}

impl From<Vec<u16>> for InitialValue {
    fn from(values: Vec<u16>) -> Self {
        Self::List(values.into_iter().map(|v| Scalar::Int(i64::from(v))).collect())
    }
}

impl From<Vec<bool>> for InitialValue {
    fn from(values: Vec<bool>) -> Self {
        Self::List(values.into_iter().map(Scalar::Bool).collect())
    }
}

fn default_len() -> u16 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDefinition {
    pub register: u16,
    #[serde(default = "default_len")]
    pub len: u16,
    #[serde(default)]
    pub val: InitialValue,
    #[serde(skip)]
    pub on_get: Option<OnGet>,
    #[serde(skip)]
    pub on_set: Option<OnSet>,
}

impl RegisterDefinition {
    pub fn new(register: u16, val: impl Into<InitialValue>) -> Self {
        let val = val.into();
        let len = match &val {
            InitialValue::List(values) => u16::try_from(values.len()).unwrap_or(u16::MAX),
            InitialValue::Scalar(_) => 1,
        };
        Self {
            register,
            len,
            val,
            on_get: None,
            on_set: None,
        }
    }

    pub fn with_len(mut self, len: u16) -> Self {
        self.len = len;
        self
    }

    pub fn with_on_get(mut self, hook: OnGet) -> Self {
        self.on_get = Some(hook);
        self
    }

    pub fn with_on_set(mut self, hook: OnSet) -> Self {
        self.on_set = Some(hook);
        self
    }

    /// Expands `val` into one value per slot.
    pub fn values(&self, table: Table, name: &str) -> Result<RegisterValues, DefinitionError> {
        let len = usize::from(self.len);
        if len == 0 {
            return Err(DefinitionError::ZeroLength {
                table,
                name: name.to_owned(),
            });
        }
        let scalars = match &self.val {
            InitialValue::Scalar(value) => vec![*value; len],
            InitialValue::List(values) if values.len() == len => values.clone(),
            InitialValue::List(values) => {
                return Err(DefinitionError::LengthMismatch {
                    table,
                    name: name.to_owned(),
                    expected: len,
                    got: values.len(),
                })
            }
        };

        let invalid = |value: i64| DefinitionError::InvalidValue {
            table,
            name: name.to_owned(),
            value,
        };
        if table.holds_bits() {
            scalars
                .into_iter()
                .map(|scalar| match scalar {
                    Scalar::Bool(bit) => Ok(bit),
                    Scalar::Int(0) => Ok(false),
                    Scalar::Int(1) => Ok(true),
                    Scalar::Int(other) => Err(invalid(other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RegisterValues::Bits)
        } else {
            scalars
                .into_iter()
                .map(|scalar| match scalar {
                    Scalar::Bool(bit) => Ok(u16::from(bit)),
                    Scalar::Int(word) => u16::try_from(word).map_err(|_| invalid(word)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RegisterValues::Words)
        }
    }
}

/// Named register definitions for all four tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterDefinitions {
    #[serde(rename = "COILS", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coils: BTreeMap<String, RegisterDefinition>,
    #[serde(rename = "HREGS", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub holding_registers: BTreeMap<String, RegisterDefinition>,
    #[serde(rename = "ISTS", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub discrete_inputs: BTreeMap<String, RegisterDefinition>,
    #[serde(rename = "IREGS", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_registers: BTreeMap<String, RegisterDefinition>,
}

impl RegisterDefinitions {
    pub fn from_json_str(json: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, DefinitionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_register(
        mut self,
        table: Table,
        name: impl Into<String>,
        definition: RegisterDefinition,
    ) -> Self {
        self.table_mut(table).insert(name.into(), definition);
        self
    }

    pub fn table(&self, table: Table) -> &BTreeMap<String, RegisterDefinition> {
        match table {
            Table::Coils => &self.coils,
            Table::HoldingRegisters => &self.holding_registers,
            Table::DiscreteInputs => &self.discrete_inputs,
            Table::InputRegisters => &self.input_registers,
        }
    }

    pub fn table_mut(&mut self, table: Table) -> &mut BTreeMap<String, RegisterDefinition> {
        match table {
            Table::Coils => &mut self.coils,
            Table::HoldingRegisters => &mut self.holding_registers,
            Table::DiscreteInputs => &mut self.discrete_inputs,
            Table::InputRegisters => &mut self.input_registers,
        }
    }

    pub fn get(&self, table: Table, name: &str) -> Option<&RegisterDefinition> {
        self.table(table).get(name)
    }

    pub fn attach_get_hook(
        &mut self,
        table: Table,
        name: &str,
        hook: OnGet,
    ) -> Result<(), DefinitionError> {
        self.entry(table, name)?.on_get = Some(hook);
        Ok(())
    }

    pub fn attach_set_hook(
        &mut self,
        table: Table,
        name: &str,
        hook: OnSet,
    ) -> Result<(), DefinitionError> {
        if table.is_read_only() {
            return Err(DefinitionError::InvalidHook { table });
        }
        self.entry(table, name)?.on_set = Some(hook);
        Ok(())
    }

    fn entry(&mut self, table: Table, name: &str) -> Result<&mut RegisterDefinition, DefinitionError> {
        self.table_mut(table)
            .get_mut(name)
            .ok_or_else(|| DefinitionError::UnknownRegister {
                table,
                name: name.to_owned(),
            })
    }

    /// Builds the registers described by every table.
    pub fn registers(&self) -> Result<Vec<(Table, Register)>, DefinitionError> {
        let mut registers = Vec::new();
        for table in Table::ALL {
            for (name, definition) in self.table(table) {
                let mut register =
                    Register::new(definition.register, definition.values(table, name)?);
                if let Some(hook) = &definition.on_get {
                    register = register.with_on_get(hook.clone());
                }
                if let Some(hook) = &definition.on_set {
                    register = register.with_on_set(hook.clone());
                }
                registers.push((table, register));
            }
        }
        Ok(registers)
    }
}
