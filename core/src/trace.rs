//! Trace sink
//!
//! Level-gated diagnostic stream shared by the host and the script. Lines are
//! handed to a [`TraceSink`]; the default sink forwards them to `tracing`.
//!
//! Verbosity:
//! - `<= 0`: nothing
//! - `1`: the message alone
//! - `2`: prefixed with `[<service name>] `
//! - `>= 3`: prefixed with `[<service name>:<pid>/<thread>] `

use std::sync::Mutex;

/// Destination for trace lines
pub trait TraceSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Forwards trace lines to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "luaservice::trace", "{}", line);
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

/// Prefix for a trace line at `level`
pub fn trace_prefix(level: i32, service_name: &str) -> String {
    match level {
        i32::MIN..=1 => String::new(),
        2 => format!("[{}] ", service_name),
        _ => format!(
            "[{}:{}/{:?}] ",
            service_name,
            std::process::id(),
            std::thread::current().id()
        ),
    }
}

/// Trace through a `ServiceContext`, formatting only when tracing is enabled
macro_rules! svc_trace {
    ($ctx:expr, $($arg:tt)*) => {
        if $ctx.trace_enabled() {
            $ctx.trace(&format!($($arg)*));
        }
    };
}

pub(crate) use svc_trace;
