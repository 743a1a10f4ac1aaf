use crate::hooks::{OnGet, OnSet};
use crate::table::RegisterValues;

/// A run of consecutive slots in one table, with optional access hooks.
#[derive(Debug, Clone)]
pub struct Register {
    address: u16,
    values: RegisterValues,
    on_get: Option<OnGet>,
    on_set: Option<OnSet>,
}

impl Register {
    /// The register length is the number of initial values.
    pub fn new(address: u16, values: impl Into<RegisterValues>) -> Self {
        Self {
            address,
            values: values.into(),
            on_get: None,
            on_set: None,
        }
    }

    pub fn with_on_get(mut self, hook: OnGet) -> Self {
        self.on_get = Some(hook);
        self
    }

    pub fn with_on_set(mut self, hook: OnSet) -> Self {
        self.on_set = Some(hook);
        self
    }

    pub fn with_hooks(mut self, hooks: RegisterHooks) -> Self {
        self.on_get = hooks.on_get;
        self.on_set = hooks.on_set;
        self
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn length(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &RegisterValues {
        &self.values
    }

    pub fn on_get(&self) -> Option<&OnGet> {
        self.on_get.as_ref()
    }

    pub fn on_set(&self) -> Option<&OnSet> {
        self.on_set.as_ref()
    }

    pub(crate) fn end(&self) -> usize {
        usize::from(self.address) + self.values.len()
    }

    pub(crate) fn values_mut(&mut self) -> &mut RegisterValues {
        &mut self.values
    }

    pub(crate) fn set_hooks(&mut self, hooks: RegisterHooks) {
        self.on_get = hooks.on_get;
        self.on_set = hooks.on_set;
    }

    pub(crate) fn info(&self) -> RegisterInfo {
        RegisterInfo {
            address: self.address,
            length: self.values.len(),
            values: self.values.clone(),
        }
    }
}

/// Hooks bound to a register.
#[derive(Debug, Clone, Default)]
pub struct RegisterHooks {
    pub on_get: Option<OnGet>,
    pub on_set: Option<OnSet>,
}

/// Point-in-time copy of a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInfo {
    pub address: u16,
    pub length: usize,
    pub values: RegisterValues,
}
