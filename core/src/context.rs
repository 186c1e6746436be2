//! Process-wide service context
//!
//! Replaces loose globals with one struct shared as `Arc<ServiceContext>`.
//! Access rules per field:
//!
//! - `identity`, `package_paths`, `memory_limit`: fixed at construction,
//!   read from any thread.
//! - `stop`: written only by the control thread, read by the worker
//!   (see [`StopFlag`]).
//! - `trace_level`: written by configuration and by the script through
//!   `tracelevel()`, read by every trace call. Relaxed loads and stores;
//!   a stale read only changes how verbose one line is.
//! - `sink`, `config_query`: shared trait objects, internally synchronized.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::platform::{LocalServiceConfig, ServiceConfigQuery};
use crate::signals::StopFlag;
use crate::trace::{trace_prefix, TraceSink, TracingSink};

/// Who the running service is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Name known to the service manager
    pub name: String,
    pub display_name: Option<String>,
    /// Full path of the host executable
    pub filename: PathBuf,
    /// Folder every script name is resolved against
    pub install_dir: PathBuf,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, install_dir: impl Into<PathBuf>) -> Self {
        let install_dir = install_dir.into();
        let filename = std::env::current_exe().unwrap_or_else(|_| install_dir.join("luaservice"));
        Self {
            name: name.into(),
            display_name: None,
            filename,
            install_dir,
        }
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }
}

/// Extra `package.path` / `package.cpath` templates, relative to the install dir
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackagePaths {
    pub lua_path: Option<String>,
    pub lua_cpath: Option<String>,
}

pub struct ServiceContext {
    identity: ServiceIdentity,
    stop: StopFlag,
    trace_level: AtomicI32,
    package_paths: PackagePaths,
    memory_limit: Option<usize>,
    sink: Arc<dyn TraceSink>,
    config_query: Arc<dyn ServiceConfigQuery>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("identity", &self.identity)
            .field("stop", &self.stop)
            .field("trace_level", &self.trace_level())
            .field("package_paths", &self.package_paths)
            .field("memory_limit", &self.memory_limit)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    pub fn builder(identity: ServiceIdentity) -> ServiceContextBuilder {
        ServiceContextBuilder::new(identity)
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn install_dir(&self) -> &Path {
        &self.identity.install_dir
    }

    pub fn package_paths(&self) -> &PackagePaths {
        &self.package_paths
    }

    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    pub fn config_query(&self) -> &dyn ServiceConfigQuery {
        self.config_query.as_ref()
    }

    /* ===================== Stop Flag ===================== */

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    pub fn stopping(&self) -> bool {
        self.stop.is_stop_requested()
    }

    /* ===================== Tracing ===================== */

    pub fn trace_level(&self) -> i32 {
        self.trace_level.load(Ordering::Relaxed)
    }

    pub fn set_trace_level(&self, level: i32) {
        self.trace_level.store(level, Ordering::Relaxed);
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_level() > 0
    }

    /// Emit `message` if the trace level is above zero
    pub fn trace(&self, message: &str) {
        let level = self.trace_level();
        if level <= 0 {
            return;
        }
        let prefix = trace_prefix(level, &self.identity.name);
        self.sink.emit(&format!("{prefix}{message}"));
    }

    /// Emit `line` regardless of the trace level (script `print`)
    pub fn print_line(&self, line: &str) {
        self.sink.emit(line);
    }
}

/// Builder for [`ServiceContext`]
pub struct ServiceContextBuilder {
    identity: ServiceIdentity,
    trace_level: i32,
    package_paths: PackagePaths,
    memory_limit: Option<usize>,
    description: Option<String>,
    sink: Option<Arc<dyn TraceSink>>,
    config_query: Option<Arc<dyn ServiceConfigQuery>>,
}

impl ServiceContextBuilder {
    pub fn new(identity: ServiceIdentity) -> Self {
        Self {
            identity,
            trace_level: 0,
            package_paths: PackagePaths::default(),
            memory_limit: None,
            description: None,
            sink: None,
            config_query: None,
        }
    }

    pub fn trace_level(mut self, level: i32) -> Self {
        self.trace_level = level;
        self
    }

    pub fn package_paths(mut self, paths: PackagePaths) -> Self {
        self.package_paths = paths;
        self
    }

    pub fn memory_limit(mut self, limit: Option<usize>) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Description reported by the default configuration query
    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config_query(mut self, query: Arc<dyn ServiceConfigQuery>) -> Self {
        self.config_query = Some(query);
        self
    }

    pub fn build(self) -> Arc<ServiceContext> {
        let config_query = self.config_query.unwrap_or_else(|| {
            Arc::new(LocalServiceConfig::new(
                self.identity.name.clone(),
                &self.identity.filename,
                self.description.clone(),
            ))
        });

        Arc::new(ServiceContext {
            identity: self.identity,
            stop: StopFlag::new(),
            trace_level: AtomicI32::new(self.trace_level),
            package_paths: self.package_paths,
            memory_limit: self.memory_limit,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            config_query,
        })
    }
}
