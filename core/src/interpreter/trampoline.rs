//! Protected entry into the interpreter
//!
//! [`enter`] is the single way into a Lua state. It lazily builds the script
//! environment, then performs one phase of the protocol:
//!
//! - [`Entry::Load`] compiles a script file into the pending chunk.
//! - [`Entry::Execute`] runs the pending chunk under `xpcall` with a
//!   traceback handler and stores everything it returns.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use mlua::{Function, Lua, MultiValue, StdLib, Table, Value};

use crate::context::ServiceContext;
use crate::error::WorkerError;
use crate::trace::svc_trace;

use super::state::Interpreter;
use super::stdlib;

/// Global whose presence marks an initialized environment
pub(crate) const SENTINEL_GLOBAL: &str = "service";

/// Longest script path accepted by the loader
#[cfg(windows)]
pub(crate) const MAX_SCRIPT_PATH: usize = 260;
#[cfg(not(windows))]
pub(crate) const MAX_SCRIPT_PATH: usize = 4096;

/// Frames captured by the traceback handler before eliding the rest
const MAX_TRACEBACK_FRAMES: usize = 22;

/// Phase of the two-phase protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry<'a> {
    /// Compile the named script, relative to the install directory
    Load { script: &'a str },
    /// Invoke the pending chunk
    Execute,
}

pub(crate) fn enter(interp: &mut Interpreter, entry: Entry<'_>) -> Result<(), WorkerError> {
    ensure_environment(interp)?;
    match entry {
        Entry::Load { script } => load_pending(interp, script),
        Entry::Execute => run_pending(interp),
    }
}

/* ===================== Environment ===================== */

fn ensure_environment(interp: &mut Interpreter) -> Result<(), WorkerError> {
    let sentinel: Value = interp.lua.globals().get(SENTINEL_GLOBAL)?;
    if interp.xpcall.is_some() && !matches!(sentinel, Value::Nil | Value::Boolean(false)) {
        return Ok(());
    }

    interp.lua.gc_stop();
    let installed = install_environment(&interp.lua, &interp.ctx);
    interp.lua.gc_restart();
    interp.xpcall = Some(installed?);

    svc_trace!(interp.ctx, "Initialized Lua environment");
    Ok(())
}

/// Install libraries and the `service` table; returns the pristine `xpcall`
fn install_environment(lua: &Lua, ctx: &Arc<ServiceContext>) -> mlua::Result<Function> {
    lua.load_std_libs(StdLib::ALL_SAFE)?;
    // Captured before any script runs, so reassigning the global has no effect.
    let xpcall: Function = lua.globals().get("xpcall")?;
    stdlib::install(lua, ctx)?;
    extend_package_paths(lua, ctx)?;
    Ok(xpcall)
}

fn extend_package_paths(lua: &Lua, ctx: &ServiceContext) -> mlua::Result<()> {
    let paths = ctx.package_paths();
    let package: Table = lua.globals().get("package")?;

    for (key, extra) in [("path", &paths.lua_path), ("cpath", &paths.lua_cpath)] {
        let Some(extra) = extra else {
            continue;
        };
        let rooted = root_templates(ctx.install_dir(), extra);
        let value = match package.get::<Option<String>>(key)? {
            Some(current) if !current.is_empty() => format!("{rooted};{current}"),
            _ => rooted,
        };
        package.set(key, value)?;
    }
    Ok(())
}

/// Anchor each relative `;`-separated search template at `install_dir`
pub(crate) fn root_templates(install_dir: &Path, templates: &str) -> String {
    templates
        .split(';')
        .filter(|t| !t.is_empty())
        .map(|t| {
            if Path::new(t).is_absolute() {
                t.to_string()
            } else {
                install_dir.join(t).display().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(";")
}

/* ===================== Load ===================== */

fn load_pending(interp: &mut Interpreter, script: &str) -> Result<(), WorkerError> {
    interp.results = None;
    interp.pending = None;

    let path = resolve_script_path(interp.ctx.install_dir(), script)?;
    svc_trace!(interp.ctx, "Script: {}", path.display());

    let source = std::fs::read(&path)
        .map_err(|e| WorkerError::from_io(format!("cannot open {}", path.display()), &e))?;

    let function = interp
        .lua
        .load(strip_shebang(source))
        .set_name(format!("@{}", path.display()))
        .into_function()?;

    interp.pending = Some(function);
    Ok(())
}

/// Resolve a script name against the install directory.
///
/// The working directory is never consulted, and names that would leave the
/// install directory are refused.
pub(crate) fn resolve_script_path(install_dir: &Path, script: &str) -> Result<PathBuf, WorkerError> {
    if !install_dir.is_absolute() {
        return Err(WorkerError::resource(format!(
            "Module name '{}' isn't fully qualified",
            install_dir.display()
        )));
    }
    if script.is_empty() {
        return Err(WorkerError::resource("Script name is empty"));
    }

    let relative = Path::new(script);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(WorkerError::resource(format!(
            "Script name '{script}' must stay inside the service folder"
        )));
    }

    let full = install_dir.join(relative);
    if full.as_os_str().len() > MAX_SCRIPT_PATH {
        return Err(WorkerError::resource(format!(
            "Script name '{}' too long",
            full.display()
        )));
    }
    Ok(full)
}

// Blank out a leading `#` line but keep its newline so line numbers hold.
fn strip_shebang(mut source: Vec<u8>) -> Vec<u8> {
    if source.first() == Some(&b'#') {
        let end = source
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(source.len());
        source.drain(..end);
    }
    source
}

/* ===================== Execute ===================== */

fn run_pending(interp: &mut Interpreter) -> Result<(), WorkerError> {
    interp.results = None;

    let pending = interp
        .pending
        .clone()
        .ok_or_else(|| WorkerError::ProtocolMisuse("No pending work function to run".into()))?;

    let xpcall = interp
        .xpcall
        .clone()
        .ok_or_else(|| WorkerError::ProtocolMisuse("Lua environment is not initialized".into()))?;
    let lua = &interp.lua;
    let handler = lua.create_function(|lua, err: Value| Ok(traceback(lua, describe_error(lua, err))))?;

    let returned: MultiValue = xpcall.call((pending, handler))?;
    let mut values: Vec<Value> = returned.into_iter().collect();
    let status = if values.is_empty() {
        Value::Nil
    } else {
        values.remove(0)
    };

    if !matches!(status, Value::Boolean(true)) {
        let traceback = values
            .into_iter()
            .next()
            .and_then(|v| lua.coerce_string(v).ok().flatten())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(WorkerError::Runtime { traceback });
    }

    svc_trace!(interp.ctx, "Saved work result count: {}", values.len());
    for value in &values {
        svc_trace!(interp.ctx, "item: {}", value.type_name());
    }

    interp.results = Some(values);
    Ok(())
}

fn describe_error(lua: &Lua, err: Value) -> String {
    let tostring = lua.globals().get::<Function>("tostring");
    match tostring.and_then(|f| f.call::<String>(err)) {
        Ok(message) => message,
        Err(_) => "(error object is not a string)".to_string(),
    }
}

/// Append the active call stack to `message`, innermost frame first
fn traceback(lua: &Lua, message: String) -> String {
    let mut out = message;
    out.push_str("\nstack traceback:");

    let mut level = 1;
    while let Some(frame) = lua.inspect_stack(level) {
        if level > MAX_TRACEBACK_FRAMES {
            out.push_str("\n\t...");
            break;
        }
        let source = frame.source();
        let names = frame.names();
        let location = source.short_src.as_deref().unwrap_or("?");
        let place = match (names.name.as_deref(), source.what) {
            (Some(name), _) => format!("function '{name}'"),
            (None, "main") => "main chunk".to_string(),
            (None, "C") => "C function".to_string(),
            _ => "function <anonymous>".to_string(),
        };
        let line = frame.curr_line();
        if line > 0 {
            out.push_str(&format!("\n\t{location}:{line}: in {place}"));
        } else {
            out.push_str(&format!("\n\t{location}: in {place}"));
        }
        level += 1;
    }
    out
}
