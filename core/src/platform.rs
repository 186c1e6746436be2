//! Platform wrappers exposed to scripts
//!
//! Thin I/O wrappers: working directory access and the service configuration
//! query. Each failure carries the platform error code so the script sees a
//! message like `SetCurrentDirectory failed (2)`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// `ServiceType` for a service running in its own process
pub const SERVICE_WIN32_OWN_PROCESS: u32 = 0x10;
/// `StartType` for a service started on demand
pub const SERVICE_DEMAND_START: u32 = 0x3;
/// `ErrorControl` that logs start failures and continues
pub const SERVICE_ERROR_NORMAL: u32 = 0x1;
/// Error code reported for an unknown service name
pub const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

/// Configuration record for one installed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub service_type: u32,
    pub start_type: u32,
    pub error_control: u32,
    pub binary_path_name: String,
    pub load_order_group: Option<String>,
    pub tag_id: Option<u32>,
    pub dependencies: Option<String>,
    pub service_start_name: Option<String>,
    pub description: Option<String>,
}

/// Source of service configuration records
pub trait ServiceConfigQuery: Send + Sync {
    fn query(&self, name: &str) -> Result<ServiceConfig, PlatformError>;
}

/// Answers for the running service only, from its own identity
#[derive(Debug, Clone)]
pub struct LocalServiceConfig {
    config: ServiceConfig,
}

impl LocalServiceConfig {
    pub fn new(name: impl Into<String>, binary_path: &Path, description: Option<String>) -> Self {
        Self {
            config: ServiceConfig {
                name: name.into(),
                service_type: SERVICE_WIN32_OWN_PROCESS,
                start_type: SERVICE_DEMAND_START,
                error_control: SERVICE_ERROR_NORMAL,
                binary_path_name: binary_path.display().to_string(),
                load_order_group: None,
                tag_id: None,
                dependencies: None,
                service_start_name: None,
                description,
            },
        }
    }
}

impl ServiceConfigQuery for LocalServiceConfig {
    fn query(&self, name: &str) -> Result<ServiceConfig, PlatformError> {
        if name.eq_ignore_ascii_case(&self.config.name) {
            Ok(self.config.clone())
        } else {
            Err(PlatformError::Os {
                op: "OpenService",
                code: ERROR_SERVICE_DOES_NOT_EXIST,
            })
        }
    }
}

pub fn current_directory() -> Result<PathBuf, PlatformError> {
    std::env::current_dir().map_err(|e| PlatformError::from_io("GetCurrentDirectory", &e))
}

pub fn set_current_directory(path: &Path) -> Result<(), PlatformError> {
    std::env::set_current_dir(path).map_err(|e| PlatformError::from_io("SetCurrentDirectory", &e))
}
