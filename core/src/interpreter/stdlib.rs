//! Functions and values available to service scripts
//!
//! Everything lives in the global table `service`:
//!
//! - `service.name`, `service.display_name`, `service.filename`,
//!   `service.path` - read-only identity
//! - `service.sleep(ms)` - block the worker thread
//! - `service.print(...)` - write a line to the trace sink, always
//! - `service.stopping()` - true once a stop was requested
//! - `service.tracelevel([n])` - get or set the trace level
//! - `service.GetCurrentDirectory()` / `service.SetCurrentDirectory(path)`
//! - `service.GetCurrentConfiguration([name])` - service configuration table
//!
//! `print`, `sleep`, `stopping` and `tracelevel` are also copied into the
//! global namespace.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mlua::{Function, Lua, Table, Value, Variadic};

use crate::context::ServiceContext;
use crate::platform;
use crate::trace::svc_trace;

use super::trampoline::SENTINEL_GLOBAL;

const IDENTITY_KEYS: [&str; 4] = ["name", "display_name", "filename", "path"];

pub(crate) fn install(lua: &Lua, ctx: &Arc<ServiceContext>) -> mlua::Result<()> {
    let service = lua.create_table()?;

    service.set("sleep", lua.create_function(sleep)?)?;

    let print_ctx = ctx.clone();
    service.set(
        "print",
        lua.create_function(move |lua, args: Variadic<Value>| print(lua, &print_ctx, args))?,
    )?;

    let stop_ctx = ctx.clone();
    service.set(
        "stopping",
        lua.create_function(move |_, ()| Ok(stop_ctx.stopping()))?,
    )?;

    let level_ctx = ctx.clone();
    service.set(
        "tracelevel",
        lua.create_function(move |_, level: Option<i64>| {
            if let Some(level) = level {
                level_ctx.set_trace_level(level.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
            }
            Ok(level_ctx.trace_level() as i64)
        })?,
    )?;

    service.set(
        "GetCurrentDirectory",
        lua.create_function(|_, ()| Ok(platform::current_directory()?.display().to_string()))?,
    )?;

    service.set(
        "SetCurrentDirectory",
        lua.create_function(|_, path: String| {
            platform::set_current_directory(Path::new(&path))?;
            Ok(true)
        })?,
    )?;

    let config_ctx = ctx.clone();
    service.set(
        "GetCurrentConfiguration",
        lua.create_function(move |lua, name: Option<String>| {
            current_configuration(lua, &config_ctx, name)
        })?,
    )?;

    protect_identity(lua, &service, ctx)?;

    let globals = lua.globals();
    globals.set("print", service.get::<Function>("print")?)?;
    globals.set("sleep", service.get::<Function>("sleep")?)?;
    globals.set("stopping", service.get::<Function>("stopping")?)?;
    globals.set("tracelevel", service.get::<Function>("tracelevel")?)?;
    globals.set(SENTINEL_GLOBAL, service)?;
    Ok(())
}

/* ===================== Functions ===================== */

fn sleep(_: &Lua, ms: f64) -> mlua::Result<()> {
    let ms = if ms.is_finite() && ms > 0.0 { ms as u64 } else { 0 };
    std::thread::sleep(Duration::from_millis(ms));
    Ok(())
}

fn print(lua: &Lua, ctx: &ServiceContext, args: Variadic<Value>) -> mlua::Result<()> {
    let tostring: Function = lua.globals().get("tostring")?;
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let text: mlua::String = tostring.call(arg)?;
        parts.push(text.to_string_lossy().to_string());
    }
    ctx.print_line(&parts.join("\t"));
    Ok(())
}

fn current_configuration(
    lua: &Lua,
    ctx: &ServiceContext,
    name: Option<String>,
) -> mlua::Result<Table> {
    let name = name.unwrap_or_else(|| ctx.identity().name.clone());
    svc_trace!(ctx, "Get service configuration for {}:", name);

    let config = ctx.config_query().query(&name)?;
    let table = lua.create_table()?;

    let field_str = |key: &str, value: &str| -> mlua::Result<()> {
        table.set(key, value)?;
        svc_trace!(ctx, "  {}: {}", key, value);
        Ok(())
    };
    let field_int = |key: &str, value: u32| -> mlua::Result<()> {
        table.set(key, value)?;
        svc_trace!(ctx, "  {}: 0x{:x}", key, value);
        Ok(())
    };

    field_str("name", &name)?;
    field_int("ServiceType", config.service_type)?;
    field_int("StartType", config.start_type)?;
    field_int("ErrorControl", config.error_control)?;
    field_str("BinaryPathName", &config.binary_path_name)?;
    if let Some(group) = &config.load_order_group {
        field_str("LoadOrderGroup", group)?;
    }
    if let Some(tag) = config.tag_id.filter(|&t| t != 0) {
        field_int("TagId", tag)?;
    }
    if let Some(deps) = &config.dependencies {
        field_str("Dependencies", deps)?;
    }
    if let Some(start_name) = &config.service_start_name {
        field_str("ServiceStartName", start_name)?;
    }
    if let Some(description) = &config.description {
        field_str("Description", description)?;
    }
    Ok(table)
}

/* ===================== Identity ===================== */

/// Serve identity values through `__index` and refuse assignments to them
fn protect_identity(lua: &Lua, service: &Table, ctx: &ServiceContext) -> mlua::Result<()> {
    let identity = ctx.identity();
    let values = lua.create_table()?;
    values.set("name", identity.name.as_str())?;
    values.set(
        "display_name",
        identity.display_name.as_deref().unwrap_or(identity.name.as_str()),
    )?;
    values.set("filename", identity.filename.display().to_string())?;
    values.set("path", path_with_separator(&identity.install_dir))?;

    let meta = lua.create_table()?;
    meta.set("__index", values)?;
    meta.set(
        "__newindex",
        lua.create_function(|_, (table, key, value): (Table, Value, Value)| {
            if let Value::String(s) = &key {
                let key_name = s.to_string_lossy().to_string();
                if IDENTITY_KEYS.contains(&key_name.as_str()) {
                    return Err(mlua::Error::RuntimeError(format!(
                        "service.{key_name} is read-only"
                    )));
                }
            }
            table.raw_set(key, value)
        })?,
    )?;

    let setmetatable: Function = lua.globals().get("setmetatable")?;
    setmetatable.call::<()>((service.clone(), meta))
}

// The folder path keeps its trailing separator so scripts can append names.
fn path_with_separator(dir: &Path) -> String {
    let mut path = dir.display().to_string();
    if !path.ends_with(std::path::MAIN_SEPARATOR) {
        path.push(std::path::MAIN_SEPARATOR);
    }
    path
}
