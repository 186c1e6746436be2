//! The configured service instance
//!
//! Pure instantiation: turns an effective [`Config`] into the shared
//! [`ServiceContext`] and the services that use it. No I/O happens here.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::context::{PackagePaths, ServiceContext, ServiceIdentity};
use crate::services::LifecycleService;
use crate::trace::TraceSink;

pub struct Application {
    pub config: Config,
    pub context: Arc<ServiceContext>,
}

impl Application {
    pub fn new(config: Config, sink: Arc<dyn TraceSink>) -> Result<Self> {
        let identity = ServiceIdentity::new(config.service.name.clone(), config.install_dir()?)
            .with_display_name(config.service.display_name.clone());

        let context = ServiceContext::builder(identity)
            .trace_level(config.trace.level)
            .package_paths(PackagePaths {
                lua_path: config.lua.path.clone(),
                lua_cpath: config.lua.cpath.clone(),
            })
            .memory_limit(config.worker.memory_limit_bytes)
            .description(config.service.description.clone())
            .sink(sink)
            .build();

        Ok(Self { config, context })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    /// Lifecycle service for the configured main script
    pub fn lifecycle_service(&self) -> LifecycleService {
        LifecycleService::new(
            self.context.clone(),
            self.config.service.script.clone(),
            self.config.stop_timeout(),
        )
    }
}
