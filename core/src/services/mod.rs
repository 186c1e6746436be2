pub mod initialization_service;
pub mod lifecycle_service;

pub use initialization_service::{InitOverrides, InitializationService};
pub use lifecycle_service::{
    shutdown_signal, LifecycleService, ServiceState, ServiceStatus, StatusBoard,
};
