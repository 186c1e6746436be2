pub mod application;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod init;
pub mod interpreter;
pub mod platform;
pub mod services;
pub mod signals;
pub mod trace;
pub mod worker;

// Re-export main types
pub use context::{ServiceContext, ServiceIdentity};
pub use error::{PlatformError, WorkerError};
pub use interpreter::{Entry, Interpreter};

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
