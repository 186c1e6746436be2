//! Host boundary for the interpreter
//!
//! Handle-based wrappers a service host calls. They never fail: problems are
//! reported through the trace sink and `tracing`, and the handle is handed
//! back so the caller decides what happens next. A `None` handle stands for
//! "no interpreter" everywhere.

use std::sync::Arc;

use crate::context::ServiceContext;
use crate::error::WorkerError;
use crate::interpreter::Interpreter;
use crate::trace::svc_trace;

/* ===================== Lifecycle ===================== */

/// Load `script` into `handle`, creating an interpreter when there is none.
///
/// Returns `None` only when a new interpreter could not be created.
pub fn load(
    handle: Option<Interpreter>,
    ctx: &Arc<ServiceContext>,
    script: &str,
) -> Option<Interpreter> {
    let mut interp = match handle {
        Some(interp) => interp,
        None => match Interpreter::create(ctx.clone()) {
            Ok(interp) => interp,
            Err(err) => {
                report(ctx, "Can't create Lua state", &err);
                return None;
            }
        },
    };

    match interp.load(script) {
        Ok(()) => svc_trace!(ctx, "Script loaded ok"),
        Err(err) => report(ctx, "Script load failed", &err),
    }
    Some(interp)
}

/// Run the pending chunk of `handle`
pub fn execute(handle: Option<Interpreter>) -> Option<Interpreter> {
    let Some(mut interp) = handle else {
        tracing::warn!("No existing lua state");
        return None;
    };

    let ctx = interp.context().clone();
    match interp.execute() {
        Ok(()) => svc_trace!(ctx, "Script succeeded"),
        Err(err) => report(&ctx, "Script failed", &err),
    }
    Some(interp)
}

pub fn destroy(handle: Option<Interpreter>) {
    if let Some(interp) = handle {
        interp.destroy();
    }
}

fn report(ctx: &ServiceContext, what: &str, err: &WorkerError) {
    svc_trace!(ctx, "{}: {}", what, err);
    tracing::error!(service = %ctx.identity().name, error = %err, "{}", what);
}

/* ===================== Results ===================== */

pub fn result_string(handle: Option<&Interpreter>, pos: usize) -> Option<String> {
    handle?.result_string(pos)
}

pub fn result_int(handle: Option<&Interpreter>, pos: usize) -> i64 {
    handle.map_or(0, |interp| interp.result_int(pos))
}

pub fn result_field_string(handle: Option<&Interpreter>, pos: usize, field: &str) -> Option<String> {
    handle?.result_field_string(pos, field)
}

pub fn result_field_int(handle: Option<&Interpreter>, pos: usize, field: &str) -> i64 {
    handle.map_or(0, |interp| interp.result_field_int(pos, field))
}
