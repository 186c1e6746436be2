//! Initialization for LuaService
//!
//! Resolves the effective configuration and builds the [`Application`]:
//! load `.env`, layer the configuration sources, run the optional `init.lua`
//! pre-initialization, validate.
//!
//! # Example
//!
//! ```no_run
//! use luaservice_core::init::InitBuilder;
//!
//! # fn main() -> anyhow::Result<()> {
//! let app = InitBuilder::new()
//!     .install_dir("/opt/luaservice")
//!     .init()?;
//! println!("{}", app.config.service.name);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::application::Application;
use crate::config::Config;
use crate::services::InitializationService;
use crate::trace::{TraceSink, TracingSink};

/// Options for initializing LuaService
#[derive(Clone)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Install directory (overrides config file and env vars)
    pub install_dir: Option<PathBuf>,

    /// Whether to run the pre-initialization script
    pub run_init_script: bool,

    /// Destination for trace lines and script output
    pub sink: Arc<dyn TraceSink>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            install_dir: None,
            run_init_script: true,
            sink: Arc::new(TracingSink),
        }
    }
}

impl std::fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitOptions")
            .field("config_path", &self.config_path)
            .field("install_dir", &self.install_dir)
            .field("run_init_script", &self.run_init_script)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.install_dir = Some(dir.into());
        self
    }

    pub fn run_init_script(mut self, run: bool) -> Self {
        self.options.run_init_script = run;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.options.sink = sink;
        self
    }

    pub fn options(self) -> InitOptions {
        self.options
    }

    /// Initialize LuaService with the configured options
    pub fn init(self) -> Result<Application> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the configuration and build the application
pub fn initialize(options: InitOptions) -> Result<Application> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    let mut config = resolve_config(&options)?;

    if options.run_init_script {
        let install_dir = config.install_dir()?;
        InitializationService::new(options.sink.clone())
            .initialize(&mut config, install_dir)
            .context("Pre-initialization failed")?;
        config
            .validate()
            .context("Configuration is invalid after pre-initialization")?;
    }

    Application::new(config, options.sink)
}

/// Configuration from files and environment, without `init.lua`
pub fn resolve_config(options: &InitOptions) -> Result<Config> {
    Config::builder()
        .config_path(options.config_path.clone())
        .install_dir(options.install_dir.clone())
        .build()
        .context("Failed to load configuration")
}
