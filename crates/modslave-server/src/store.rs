//! Register tables and hook-aware access to them.

use crate::definitions::{DefinitionError, RegisterDefinitions};
use crate::hooks::{HookContext, HookError, HookResult, SetOutcome};
use crate::hooks::{OnGet, OnSet};
use crate::register::{Register, RegisterHooks, RegisterInfo};
use crate::table::{RegisterValues, Table};
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::ops::Range;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Number of addressable slots per table.
pub const DEFAULT_TABLE_SIZE: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub table_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_size: DEFAULT_TABLE_SIZE,
        }
    }
}

impl StoreConfig {
    pub fn with_table_size(mut self, table_size: usize) -> Self {
        self.table_size = table_size;
        self
    }
}

/// Direction of an access, used to pick the hooks that apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table}: register at {address} overlaps an existing register")]
    DuplicateAddress { table: Table, address: u16 },
    #[error("{table}: set hooks are not allowed on read-only tables (register {address})")]
    InvalidHook { table: Table, address: u16 },
    #[error("{table}: no register starts at {address}")]
    NotFound { table: Table, address: u16 },
    #[error("{table}: {quantity} slots from {address} are not covered by registers")]
    AddressRange {
        table: Table,
        address: u16,
        quantity: usize,
    },
    #[error("{0} are read-only")]
    ReadOnly(Table),
    #[error("{table}: values have the wrong element type")]
    KindMismatch { table: Table },
    #[error("{table}: register at {address} has an invalid length")]
    InvalidLength { table: Table, address: u16 },
    #[error("{table}: hook for register {address} returned values that do not fit it")]
    InvalidHookValue { table: Table, address: u16 },
    #[error("{table}: write to register {address} rejected: {reason}")]
    HookRejected {
        table: Table,
        address: u16,
        reason: String,
    },
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error("no register definitions to reset to")]
    NotConfigured,
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl From<StoreError> for HookError {
    fn from(err: StoreError) -> Self {
        HookError::Failed(err.to_string())
    }
}

/// The four register tables of a slave.
///
/// Table data sits behind a read/write lock that is never held while a hook
/// runs. Each table also has an access lock, held for the whole of a `get` or
/// `set` including its hooks, so accesses to one table are serialized.
pub struct RegisterStore {
    config: StoreConfig,
    tables: RwLock<Tables>,
    access: [Mutex<()>; 4],
    defaults: RwLock<Option<RegisterDefinitions>>,
}

impl fmt::Debug for RegisterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("RegisterStore")
            .field("config", &self.config)
            .field("coils", &tables.map(Table::Coils).len())
            .field("holding_registers", &tables.map(Table::HoldingRegisters).len())
            .field("discrete_inputs", &tables.map(Table::DiscreteInputs).len())
            .field("input_registers", &tables.map(Table::InputRegisters).len())
            .finish()
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl RegisterStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(Tables::default()),
            access: Default::default(),
            defaults: RwLock::new(None),
        }
    }

    pub fn from_definitions(
        definitions: &RegisterDefinitions,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let store = Self::new(config);
        store.setup_registers(definitions)?;
        Ok(store)
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    pub fn add_register(&self, table: Table, register: Register) -> Result<(), StoreError> {
        self.tables
            .write()
            .insert(table, register, self.config.table_size)
    }

    pub fn remove_register(&self, table: Table, address: u16) -> Result<Register, StoreError> {
        self.tables
            .write()
            .map_mut(table)
            .remove(&address)
            .ok_or(StoreError::NotFound { table, address })
    }

    /// Replaces the hooks of the register starting at `address`.
    ///
    /// Accesses already in progress keep the hooks they started with.
    pub fn attach_hooks(
        &self,
        table: Table,
        address: u16,
        hooks: RegisterHooks,
    ) -> Result<(), StoreError> {
        if table.is_read_only() && hooks.on_set.is_some() {
            return Err(StoreError::InvalidHook { table, address });
        }
        let mut tables = self.tables.write();
        let register = tables
            .map_mut(table)
            .get_mut(&address)
            .ok_or(StoreError::NotFound { table, address })?;
        register.set_hooks(hooks);
        Ok(())
    }

    /// Replaces all four tables with `definitions`, which also become the
    /// state restored by [`reset_to_defaults`](Self::reset_to_defaults).
    ///
    /// Nothing changes when a definition is invalid.
    pub fn setup_registers(&self, definitions: &RegisterDefinitions) -> Result<(), StoreError> {
        let mut tables = Tables::default();
        for (table, register) in definitions.registers()? {
            tables.insert(table, register, self.config.table_size)?;
        }
        debug!(
            coils = tables.map(Table::Coils).len(),
            holding_registers = tables.map(Table::HoldingRegisters).len(),
            discrete_inputs = tables.map(Table::DiscreteInputs).len(),
            input_registers = tables.map(Table::InputRegisters).len(),
            "register tables configured"
        );
        *self.tables.write() = tables;
        *self.defaults.write() = Some(definitions.clone());
        Ok(())
    }

    pub fn reset_to_defaults(&self) -> Result<(), StoreError> {
        let defaults = self
            .defaults
            .read()
            .clone()
            .ok_or(StoreError::NotConfigured)?;
        self.setup_registers(&defaults)
    }

    /// Snapshot of the register starting exactly at `address`.
    pub fn register(&self, table: Table, address: u16) -> Option<RegisterInfo> {
        self.tables
            .read()
            .map(table)
            .get(&address)
            .map(Register::info)
    }

    pub fn registers(&self, table: Table) -> Vec<RegisterInfo> {
        self.tables
            .read()
            .map(table)
            .values()
            .map(Register::info)
            .collect()
    }

    /// Reads a range without running hooks.
    pub fn read(
        &self,
        table: Table,
        address: u16,
        quantity: u16,
    ) -> Result<RegisterValues, StoreError> {
        let tables = self.tables.read();
        let segments = tables.covering(table, address, usize::from(quantity), self.config.table_size)?;
        tables.collect(table, &segments)
    }

    /// Writes a range without running hooks. Read-only tables accept it too.
    pub fn write(
        &self,
        table: Table,
        address: u16,
        values: impl Into<RegisterValues>,
    ) -> Result<(), StoreError> {
        let values = values.into();
        if !values.fits(table) {
            return Err(StoreError::KindMismatch { table });
        }
        let mut tables = self.tables.write();
        let segments = tables.covering(table, address, values.len(), self.config.table_size)?;
        let map = tables.map_mut(table);
        for segment in &segments {
            if let Some(register) = map.get_mut(&segment.address) {
                register
                    .values_mut()
                    .overlay(segment.window.start, &values, segment.source());
            }
        }
        Ok(())
    }

    /// Reads a range, running `on_get` hooks of every register it touches.
    ///
    /// Suspending hooks are driven to completion on the calling thread. Must
    /// not be called from within an async runtime; use
    /// [`get_async`](Self::get_async) there.
    pub fn get(
        &self,
        table: Table,
        address: u16,
        quantity: u16,
    ) -> Result<RegisterValues, StoreError> {
        Driver::complete(self.get_with(Driver::Blocking, table, address, quantity))
    }

    pub async fn get_async(
        &self,
        table: Table,
        address: u16,
        quantity: u16,
    ) -> Result<RegisterValues, StoreError> {
        self.get_with(Driver::Suspending, table, address, quantity)
            .await
    }

    /// Writes a range, running `on_set` hooks of every register it touches.
    ///
    /// The write is committed only when every hook accepts; a rejection
    /// leaves all registers unchanged. Must not be called from within an
    /// async runtime; use [`set_async`](Self::set_async) there.
    pub fn set(
        &self,
        table: Table,
        address: u16,
        values: impl Into<RegisterValues>,
    ) -> Result<(), StoreError> {
        Driver::complete(self.set_with(Driver::Blocking, table, address, values.into()))
    }

    pub async fn set_async(
        &self,
        table: Table,
        address: u16,
        values: impl Into<RegisterValues>,
    ) -> Result<(), StoreError> {
        self.set_with(Driver::Suspending, table, address, values.into())
            .await
    }

    pub(crate) async fn get_with(
        &self,
        driver: Driver,
        table: Table,
        address: u16,
        quantity: u16,
    ) -> Result<RegisterValues, StoreError> {
        let _access = driver.lock(&self.access[table.index()]).await;
        let segments = self.segments(table, address, usize::from(quantity))?;
        let mut overrides = Vec::new();
        for segment in &segments {
            let Some(hook) = &segment.on_get else {
                continue;
            };
            let current = self.current(table, segment)?;
            if let Some(values) = driver.on_get(hook, self.context(table, segment), current).await? {
                overrides.push((segment, self.checked(table, segment, values)?));
            }
        }
        self.finish_get(table, address, quantity, &overrides)
    }

    pub(crate) async fn set_with(
        &self,
        driver: Driver,
        table: Table,
        address: u16,
        values: RegisterValues,
    ) -> Result<(), StoreError> {
        Self::check_writable(table, &values)?;
        let _access = driver.lock(&self.access[table.index()]).await;
        let segments = self.segments(table, address, values.len())?;
        let mut commits = Vec::with_capacity(segments.len());
        for segment in &segments {
            let proposed = self.propose(table, segment, &values)?;
            let outcome = match &segment.on_set {
                Some(hook) => {
                    driver
                        .on_set(hook, self.context(table, segment), proposed.clone())
                        .await?
                }
                None => SetOutcome::Accept,
            };
            commits.push(self.resolve(table, segment, proposed, outcome)?);
        }
        self.commit(table, address, &commits)
    }

    /// Whether an access over this range would run a suspending hook.
    pub fn requires_suspension(
        &self,
        table: Table,
        address: u16,
        quantity: usize,
        mode: AccessMode,
    ) -> bool {
        let Ok(segments) = self.segments(table, address, quantity) else {
            return false;
        };
        segments.iter().any(|segment| match mode {
            AccessMode::Read => segment.on_get.as_ref().is_some_and(OnGet::is_suspending),
            AccessMode::Write => segment.on_set.as_ref().is_some_and(OnSet::is_suspending),
        })
    }

    fn check_writable(table: Table, values: &RegisterValues) -> Result<(), StoreError> {
        if table.is_read_only() {
            return Err(StoreError::ReadOnly(table));
        }
        if !values.fits(table) {
            return Err(StoreError::KindMismatch { table });
        }
        Ok(())
    }

    fn segments(
        &self,
        table: Table,
        address: u16,
        quantity: usize,
    ) -> Result<Vec<Segment>, StoreError> {
        self.tables
            .read()
            .covering(table, address, quantity, self.config.table_size)
    }

    fn context(&self, table: Table, segment: &Segment) -> HookContext<'_> {
        HookContext {
            store: self,
            table,
            address: segment.address,
        }
    }

    fn current(&self, table: Table, segment: &Segment) -> Result<RegisterValues, StoreError> {
        self.tables
            .read()
            .map(table)
            .get(&segment.address)
            .filter(|register| register.length() == segment.length)
            .map(|register| register.values().clone())
            .ok_or(StoreError::AddressRange {
                table,
                address: segment.address,
                quantity: segment.length,
            })
    }

    fn checked(
        &self,
        table: Table,
        segment: &Segment,
        values: RegisterValues,
    ) -> Result<RegisterValues, StoreError> {
        if !values.fits(table) || values.len() != segment.length {
            return Err(StoreError::InvalidHookValue {
                table,
                address: segment.address,
            });
        }
        Ok(values)
    }

    fn finish_get(
        &self,
        table: Table,
        address: u16,
        quantity: u16,
        overrides: &[(&Segment, RegisterValues)],
    ) -> Result<RegisterValues, StoreError> {
        let mut values = self.read(table, address, quantity)?;
        for (segment, replaced) in overrides {
            values.overlay(segment.offset, replaced, segment.window.clone());
        }
        trace!(%table, address, quantity, hooked = overrides.len(), "register get");
        Ok(values)
    }

    fn propose(
        &self,
        table: Table,
        segment: &Segment,
        written: &RegisterValues,
    ) -> Result<RegisterValues, StoreError> {
        let mut proposed = self.current(table, segment)?;
        proposed.overlay(segment.window.start, written, segment.source());
        Ok(proposed)
    }

    fn resolve<'s>(
        &self,
        table: Table,
        segment: &'s Segment,
        proposed: RegisterValues,
        outcome: SetOutcome,
    ) -> Result<Commit<'s>, StoreError> {
        match outcome {
            SetOutcome::Accept => Ok(Commit {
                segment,
                values: proposed,
                window: segment.window.clone(),
            }),
            SetOutcome::Override(values) => Ok(Commit {
                segment,
                values: self.checked(table, segment, values)?,
                window: 0..segment.length,
            }),
            SetOutcome::Reject(reason) => {
                debug!(%table, address = segment.address, %reason, "register write rejected");
                Err(StoreError::HookRejected {
                    table,
                    address: segment.address,
                    reason,
                })
            }
        }
    }

    fn commit(&self, table: Table, address: u16, commits: &[Commit<'_>]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let map = tables.map_mut(table);
        let intact = commits.iter().all(|commit| {
            map.get(&commit.segment.address)
                .is_some_and(|register| register.length() == commit.segment.length)
        });
        if !intact {
            return Err(StoreError::AddressRange {
                table,
                address,
                quantity: commits.iter().map(|commit| commit.segment.window.len()).sum(),
            });
        }
        for commit in commits {
            if let Some(register) = map.get_mut(&commit.segment.address) {
                register
                    .values_mut()
                    .overlay(commit.window.start, &commit.values, commit.window.clone());
            }
        }
        trace!(%table, address, registers = commits.len(), "register set");
        Ok(())
    }
}

/// How an access waits for its table lock and its hooks.
///
/// `Blocking` waits on the calling thread, so an access driven by it never
/// returns `Pending` and completes in a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Driver {
    Blocking,
    Suspending,
}

impl Driver {
    async fn lock<'m>(self, access: &'m Mutex<()>) -> MutexGuard<'m, ()> {
        match self {
            Self::Blocking => access.blocking_lock(),
            Self::Suspending => access.lock().await,
        }
    }

    async fn on_get(
        self,
        hook: &OnGet,
        ctx: HookContext<'_>,
        current: RegisterValues,
    ) -> HookResult<Option<RegisterValues>> {
        match self {
            Self::Blocking => hook.call_blocking(&ctx, &current),
            Self::Suspending => hook.call(ctx, current).await,
        }
    }

    async fn on_set(
        self,
        hook: &OnSet,
        ctx: HookContext<'_>,
        proposed: RegisterValues,
    ) -> HookResult<SetOutcome> {
        match self {
            Self::Blocking => hook.call_blocking(&ctx, &proposed),
            Self::Suspending => hook.call(ctx, proposed).await,
        }
    }

    /// Runs a [`Driver::Blocking`] access to its result.
    pub(crate) fn complete<T>(
        access: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        access
            .now_or_never()
            .unwrap_or_else(|| Err(HookError::failed("blocking register access suspended").into()))
    }
}

/// Part of an access that falls inside one register.
#[derive(Debug, Clone)]
struct Segment {
    address: u16,
    length: usize,
    /// Covered slots, relative to the register start.
    window: Range<usize>,
    /// Position of the window within the access.
    offset: usize,
    on_get: Option<OnGet>,
    on_set: Option<OnSet>,
}

impl Segment {
    /// Slots of the access that land in this register.
    fn source(&self) -> Range<usize> {
        self.offset..self.offset + self.window.len()
    }
}

struct Commit<'s> {
    segment: &'s Segment,
    values: RegisterValues,
    window: Range<usize>,
}

#[derive(Default)]
struct Tables {
    maps: [BTreeMap<u16, Register>; 4],
}

impl Tables {
    fn map(&self, table: Table) -> &BTreeMap<u16, Register> {
        &self.maps[table.index()]
    }

    fn map_mut(&mut self, table: Table) -> &mut BTreeMap<u16, Register> {
        &mut self.maps[table.index()]
    }

    fn insert(
        &mut self,
        table: Table,
        register: Register,
        table_size: usize,
    ) -> Result<(), StoreError> {
        let address = register.address();
        if register.length() == 0 || register.end() > table_size {
            return Err(StoreError::InvalidLength { table, address });
        }
        if !register.values().fits(table) {
            return Err(StoreError::KindMismatch { table });
        }
        if table.is_read_only() && register.on_set().is_some() {
            return Err(StoreError::InvalidHook { table, address });
        }
        let map = self.map(table);
        let start = usize::from(address);
        let overlaps_previous = map
            .range(..=address)
            .next_back()
            .is_some_and(|(_, existing)| existing.end() > start);
        let overlaps_next = map
            .range(address..)
            .next()
            .is_some_and(|(&next, _)| usize::from(next) < register.end());
        if overlaps_previous || overlaps_next {
            return Err(StoreError::DuplicateAddress { table, address });
        }
        self.map_mut(table).insert(address, register);
        Ok(())
    }

    fn covering(
        &self,
        table: Table,
        address: u16,
        quantity: usize,
        table_size: usize,
    ) -> Result<Vec<Segment>, StoreError> {
        let start = usize::from(address);
        let end = start + quantity;
        let out_of_range = || StoreError::AddressRange {
            table,
            address,
            quantity,
        };
        if quantity == 0 || end > table_size {
            return Err(out_of_range());
        }

        let map = self.map(table);
        let mut segments = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let key = u16::try_from(cursor).map_err(|_| out_of_range())?;
            let (_, register) = map
                .range(..=key)
                .next_back()
                .filter(|(_, register)| register.end() > cursor)
                .ok_or_else(out_of_range)?;
            let register_start = usize::from(register.address());
            let segment_end = register.end().min(end);
            segments.push(Segment {
                address: register.address(),
                length: register.length(),
                window: cursor - register_start..segment_end - register_start,
                offset: cursor - start,
                on_get: register.on_get().cloned(),
                on_set: register.on_set().cloned(),
            });
            cursor = segment_end;
        }
        Ok(segments)
    }

    fn collect(&self, table: Table, segments: &[Segment]) -> Result<RegisterValues, StoreError> {
        let map = self.map(table);
        let mut values = RegisterValues::empty_for(table);
        for segment in segments {
            let register = map.get(&segment.address).ok_or(StoreError::NotFound {
                table,
                address: segment.address,
            })?;
            values.extend(&register.values().slice(segment.window.clone()));
        }
        Ok(values)
    }
}
