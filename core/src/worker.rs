//! Worker thread body
//!
//! The worker owns the interpreter for its whole life: create, load the main
//! script, execute it, destroy. Faults that escape the interpreter are caught
//! here and end this thread only.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::context::ServiceContext;
use crate::error::WorkerError;
use crate::interpreter::Interpreter;
use crate::trace::svc_trace;

/// Name given to the thread that runs the main script
pub const WORKER_THREAD_NAME: &str = "lua-worker";

/// Run `script` to completion on the current thread.
///
/// `on_running` fires once the interpreter exists, before the script is
/// loaded. Returns `Ok` when the script ran and returned.
pub fn run_worker(
    ctx: Arc<ServiceContext>,
    script: &str,
    on_running: impl FnOnce(),
) -> Result<(), WorkerError> {
    guarded(&ctx, || drive(&ctx, script, on_running))
}

fn drive(ctx: &Arc<ServiceContext>, script: &str, on_running: impl FnOnce()) -> Result<(), WorkerError> {
    let mut interp = Interpreter::create(ctx.clone())?;
    on_running();

    let outcome = interp.load(script).and_then(|()| interp.execute());
    match &outcome {
        Ok(()) => svc_trace!(ctx, "Script succeeded"),
        Err(err) => {
            svc_trace!(ctx, "Script failed: {}", err);
            tracing::error!(service = %ctx.identity().name, error = %err, "Main script failed");
        }
    }

    interp.destroy();
    outcome
}

/// Run `body`, turning a panic into [`WorkerError::Fatal`]
pub(crate) fn guarded<T>(
    ctx: &ServiceContext,
    body: impl FnOnce() -> Result<T, WorkerError>,
) -> Result<T, WorkerError> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            let err = WorkerError::Fatal {
                message: panic_message(payload.as_ref()),
            };
            svc_trace!(ctx, "{}", err);
            tracing::error!(service = %ctx.identity().name, "{}", err);
            Err(err)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown fault".to_string()
    }
}
