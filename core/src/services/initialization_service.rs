use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::context::{ServiceContext, ServiceIdentity};
use crate::interpreter::Interpreter;
use crate::trace::TraceSink;

/// Values an `init.lua` script may hand back in its first result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOverrides {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub script: Option<String>,
    pub lua_path: Option<String>,
    pub lua_cpath: Option<String>,
    pub tracelevel: Option<i32>,
}

impl InitOverrides {
    fn read(interp: &Interpreter) -> Self {
        let field = |name: &str| interp.result_field_string(1, name);
        Self {
            name: field("name"),
            display_name: field("display_name"),
            script: field("script"),
            lua_path: field("lua_path"),
            lua_cpath: field("lua_cpath"),
            tracelevel: interp
                .result_has_field(1, "tracelevel")
                .then(|| interp.result_field_int(1, "tracelevel"))
                .map(|level| level.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
        }
    }

    /// Write every present value over `config`
    pub fn apply(self, config: &mut Config) {
        if let Some(name) = self.name {
            config.service.name = name;
        }
        if let Some(display_name) = self.display_name {
            config.service.display_name = Some(display_name);
        }
        if let Some(script) = self.script {
            config.service.script = script;
        }
        if let Some(path) = self.lua_path {
            config.lua.path = Some(path);
        }
        if let Some(cpath) = self.lua_cpath {
            config.lua.cpath = Some(cpath);
        }
        if let Some(level) = self.tracelevel {
            config.trace.level = level;
        }
    }
}

/// Runs the optional pre-initialization script before the service starts
pub struct InitializationService {
    sink: Arc<dyn TraceSink>,
}

impl InitializationService {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self { sink }
    }

    /// Run `init.lua` in a throwaway interpreter and fold its answers into
    /// `config`. A missing script is skipped; one that fails to load or run
    /// is an error.
    pub fn initialize(&self, config: &mut Config, install_dir: PathBuf) -> Result<()> {
        let script = config.service.init_script.clone();
        if !install_dir.join(&script).is_file() {
            tracing::debug!(script = %script, "No pre-initialization script");
            return Ok(());
        }

        let ctx = ServiceContext::builder(ServiceIdentity::new(
            config.service.name.clone(),
            install_dir,
        ))
        .trace_level(config.trace.level)
        .sink(self.sink.clone())
        .build();

        let overrides = self
            .run_init_script(&ctx, &script)
            .with_context(|| format!("Can not load/execute `{script}` file"))?;
        tracing::info!(script = %script, ?overrides, "Applied pre-initialization");
        overrides.apply(config);
        Ok(())
    }

    fn run_init_script(&self, ctx: &Arc<ServiceContext>, script: &str) -> Result<InitOverrides> {
        let mut interp = Interpreter::create(ctx.clone())
            .context("Can't create Lua state for pre-initialization")?;

        let outcome = interp.load(script).and_then(|()| interp.execute());
        let overrides = outcome.map(|()| InitOverrides::read(&interp));
        interp.destroy();
        Ok(overrides?)
    }
}
