//! Access hooks attached to registers.
//!
//! A hook is either blocking (a plain closure) or suspending (an async trait
//! object). Blocking drivers run suspending hooks to completion on the
//! calling thread; async drivers await both kinds.

use crate::store::RegisterStore;
use crate::table::{RegisterValues, Table};
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

pub type HookResult<T> = Result<T, HookError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("hook failed: {0}")]
    Failed(String),
    #[error("hook panicked")]
    Panicked,
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// What a hook sees about the access that triggered it.
///
/// Hooks may use `store` for hook-free access (`read`/`write`) to any table,
/// and for `setup_registers`. Calling `get`/`set` on the table being accessed
/// from inside its own hook deadlocks.
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    pub store: &'a RegisterStore,
    pub table: Table,
    pub address: u16,
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("table", &self.table)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Decision of an `on_set` hook about a proposed register value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Accept,
    Override(RegisterValues),
    Reject(String),
}

#[async_trait]
pub trait AsyncGetHook: Send + Sync {
    /// Returns `Some` to replace the values reported for this register.
    async fn on_get(
        &self,
        ctx: HookContext<'_>,
        current: RegisterValues,
    ) -> HookResult<Option<RegisterValues>>;
}

#[async_trait]
pub trait AsyncSetHook: Send + Sync {
    async fn on_set(&self, ctx: HookContext<'_>, proposed: RegisterValues)
        -> HookResult<SetOutcome>;
}

type BlockingGet =
    dyn Fn(&HookContext<'_>, &RegisterValues) -> HookResult<Option<RegisterValues>> + Send + Sync;
type BlockingSet = dyn Fn(&HookContext<'_>, &RegisterValues) -> HookResult<SetOutcome> + Send + Sync;

/// Hook run before a register is read.
#[derive(Clone)]
pub enum OnGet {
    Blocking(Arc<BlockingGet>),
    Suspending(Arc<dyn AsyncGetHook>),
}

impl OnGet {
    pub fn blocking<F>(hook: F) -> Self
    where
        F: Fn(&HookContext<'_>, &RegisterValues) -> HookResult<Option<RegisterValues>>
            + Send
            + Sync
            + 'static,
    {
        Self::Blocking(Arc::new(hook))
    }

    pub fn suspending(hook: impl AsyncGetHook + 'static) -> Self {
        Self::Suspending(Arc::new(hook))
    }

    pub fn is_suspending(&self) -> bool {
        matches!(self, Self::Suspending(_))
    }

    pub(crate) fn call_blocking(
        &self,
        ctx: &HookContext<'_>,
        current: &RegisterValues,
    ) -> HookResult<Option<RegisterValues>> {
        match self {
            Self::Blocking(hook) => guard(|| hook(ctx, current)),
            Self::Suspending(hook) => {
                futures::executor::block_on(guard_async(hook.on_get(*ctx, current.clone())))
            }
        }
    }

    pub(crate) async fn call(
        &self,
        ctx: HookContext<'_>,
        current: RegisterValues,
    ) -> HookResult<Option<RegisterValues>> {
        match self {
            Self::Blocking(hook) => guard(|| hook(&ctx, &current)),
            Self::Suspending(hook) => guard_async(hook.on_get(ctx, current)).await,
        }
    }
}

impl fmt::Debug for OnGet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("OnGet::Blocking"),
            Self::Suspending(_) => f.write_str("OnGet::Suspending"),
        }
    }
}

/// Hook run before a write to a register is committed.
#[derive(Clone)]
pub enum OnSet {
    Blocking(Arc<BlockingSet>),
    Suspending(Arc<dyn AsyncSetHook>),
}

impl OnSet {
    pub fn blocking<F>(hook: F) -> Self
    where
        F: Fn(&HookContext<'_>, &RegisterValues) -> HookResult<SetOutcome> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(hook))
    }

    pub fn suspending(hook: impl AsyncSetHook + 'static) -> Self {
        Self::Suspending(Arc::new(hook))
    }

    pub fn is_suspending(&self) -> bool {
        matches!(self, Self::Suspending(_))
    }

    pub(crate) fn call_blocking(
        &self,
        ctx: &HookContext<'_>,
        proposed: &RegisterValues,
    ) -> HookResult<SetOutcome> {
        match self {
            Self::Blocking(hook) => guard(|| hook(ctx, proposed)),
            Self::Suspending(hook) => {
                futures::executor::block_on(guard_async(hook.on_set(*ctx, proposed.clone())))
            }
        }
    }

    pub(crate) async fn call(
        &self,
        ctx: HookContext<'_>,
        proposed: RegisterValues,
    ) -> HookResult<SetOutcome> {
        match self {
            Self::Blocking(hook) => guard(|| hook(&ctx, &proposed)),
            Self::Suspending(hook) => guard_async(hook.on_set(ctx, proposed)).await,
        }
    }
}

impl fmt::Debug for OnSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("OnSet::Blocking"),
            Self::Suspending(_) => f.write_str("OnSet::Suspending"),
        }
    }
}

fn guard<T>(hook: impl FnOnce() -> HookResult<T>) -> HookResult<T> {
    std::panic::catch_unwind(AssertUnwindSafe(hook)).unwrap_or(Err(HookError::Panicked))
}

async fn guard_async<T>(hook: impl std::future::Future<Output = HookResult<T>>) -> HookResult<T> {
    AssertUnwindSafe(hook)
        .catch_unwind()
        .await
        .unwrap_or(Err(HookError::Panicked))
}
