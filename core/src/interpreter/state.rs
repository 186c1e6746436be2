//! Interpreter instance ownership
//!
//! One [`Interpreter`] wraps one Lua state together with the two slots the
//! load/execute protocol needs: the pending chunk and the result cache. The
//! type is `!Send`, so it stays on the thread that created it.

use std::sync::Arc;

use mlua::{Function, Lua, LuaOptions, StdLib, Value};

use crate::context::ServiceContext;
use crate::error::WorkerError;
use crate::trace::svc_trace;

use super::trampoline::{self, Entry};

pub struct Interpreter {
    pub(crate) lua: Lua,
    pub(crate) ctx: Arc<ServiceContext>,
    /// Compiled but not yet invoked chunk
    pub(crate) pending: Option<Function>,
    /// Values returned by the last successful execute, in order
    pub(crate) results: Option<Vec<Value>>,
    /// `xpcall` as loaded by the base library, immune to script reassignment
    pub(crate) xpcall: Option<Function>,
}

impl Interpreter {
    /// Create a bare interpreter state.
    ///
    /// Standard libraries and the `service` table are installed lazily on the
    /// first load. Memory is managed by mlua's realloc-style allocator on top
    /// of the Rust global allocator, capped by the configured limit.
    pub fn create(ctx: Arc<ServiceContext>) -> Result<Self, WorkerError> {
        let lua = Lua::new_with(StdLib::NONE, LuaOptions::new()).map_err(|e| {
            WorkerError::resource(format!("Can't create Lua state: {e}"))
        })?;

        if let Some(limit) = ctx.memory_limit() {
            lua.set_memory_limit(limit).map_err(|e| {
                WorkerError::resource(format!("Can't apply memory limit of {limit} bytes: {e}"))
            })?;
        }

        svc_trace!(ctx, "Created Lua state");

        Ok(Self {
            lua,
            ctx,
            pending: None,
            results: None,
            xpcall: None,
        })
    }

    /// Compile `script` (relative to the install directory) without running it
    pub fn load(&mut self, script: &str) -> Result<(), WorkerError> {
        trampoline::enter(self, Entry::Load { script })
    }

    /// Run the pending chunk and capture what it returns
    pub fn execute(&mut self) -> Result<(), WorkerError> {
        trampoline::enter(self, Entry::Execute)
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes currently held by the Lua state
    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }

    /// Release the state and everything it owns
    pub fn destroy(self) {
        svc_trace!(
            self.ctx,
            "Closing Lua state ({} bytes in use)",
            self.lua.used_memory()
        );
        drop(self);
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("has_pending", &self.pending.is_some())
            .field("results", &self.results.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}
