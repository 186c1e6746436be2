//! Layered service configuration
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `luaservice.toml` in the install directory, or the file named by
//!    `LUASERVICE_CONFIG_PATH` / an explicit path
//! 3. `LUASERVICE_<SECTION>__<KEY>` environment variables
//!
//! `init.lua` overrides are applied on top by the initialization service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// File looked up in the install directory when no path is given
pub const CONFIG_FILE_NAME: &str = "luaservice.toml";
/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "LUASERVICE_CONFIG_PATH";
const ENV_PREFIX: &str = "LUASERVICE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceSettings,
    pub trace: TraceSettings,
    pub worker: WorkerSettings,
    pub lua: LuaSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Main script, relative to the install directory
    pub script: String,
    /// Pre-initialization script, relative to the install directory
    pub init_script: String,
    /// Defaults to the folder holding the executable
    pub install_dir: Option<PathBuf>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "LuaService".to_string(),
            display_name: None,
            description: None,
            script: "service.lua".to_string(),
            init_script: "init.lua".to_string(),
            install_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub level: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub stop_timeout_secs: u64,
    pub memory_limit_bytes: Option<usize>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 25,
            memory_limit_bytes: None,
        }
    }
}

/// Extra module search templates, `;`-separated, relative to the install dir
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuaSettings {
    pub path: Option<String>,
    pub cpath: Option<String>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with default sources only
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Install directory, always absolute once built
    pub fn install_dir(&self) -> Result<PathBuf> {
        match &self.service.install_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_install_dir(),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.stop_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            bail!("service.name must not be empty");
        }
        if self.service.script.trim().is_empty() {
            bail!("service.script must not be empty");
        }
        if self.worker.stop_timeout_secs == 0 {
            bail!("worker.stop_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    install_dir: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config_path: None,
            install_dir: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigBuilder {
    /// Explicit configuration file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Install directory, overriding every other source
    pub fn install_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.install_dir = dir;
        self
    }

    /// Prefix for environment overrides
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Config> {
        let install_dir = match &self.install_dir {
            Some(dir) => Some(absolute(dir)?),
            None => None,
        };

        let explicit = self
            .config_path
            .clone()
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut builder = config::Config::builder();
        match &explicit {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.as_path()).required(true));
            }
            None => {
                let dir = match &install_dir {
                    Some(dir) => dir.clone(),
                    None => default_install_dir()?,
                };
                let path = dir.join(CONFIG_FILE_NAME);
                builder = builder.add_source(config::File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.service.install_dir = Some(match install_dir {
            Some(dir) => dir,
            None => config.install_dir().and_then(|dir| absolute(&dir))?,
        });

        config.validate()?;
        tracing::debug!(
            name = %config.service.name,
            script = %config.service.script,
            "Configuration loaded"
        );
        Ok(config)
    }
}

fn default_install_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("Executable has no parent folder")
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    Ok(cwd.join(path))
}
