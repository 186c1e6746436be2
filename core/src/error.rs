//! Error taxonomy for the Lua worker

use thiserror::Error;

/// Errors raised while driving the embedded interpreter
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// Malformed script, reported with the compiler's source location
    #[error("compile error: {message}")]
    Compile { message: String },

    /// Error raised while the script ran, with the captured call stack
    #[error("runtime error: {traceback}")]
    Runtime { traceback: String },

    /// Fault that escaped every protected call; ends the worker thread only
    #[error("PANIC: unprotected error in call to Lua API ({message})")]
    Fatal { message: String },

    /// Allocation or platform failure
    #[error("resource error: {message}")]
    Resource { message: String, code: Option<i32> },

    /// Host drove the two-phase protocol out of order
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(String),
}

impl WorkerError {
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            code: None,
        }
    }

    /// Wrap an I/O failure, keeping the OS error code when there is one
    pub fn from_io(context: impl std::fmt::Display, err: &std::io::Error) -> Self {
        let code = err.raw_os_error();
        let message = match code {
            Some(code) => format!("{context}: {err} ({code})"),
            None => format!("{context}: {err}"),
        };
        Self::Resource { message, code }
    }
}

impl From<mlua::Error> for WorkerError {
    fn from(err: mlua::Error) -> Self {
        match err {
            mlua::Error::SyntaxError { message, .. } => WorkerError::Compile { message },
            mlua::Error::RuntimeError(traceback) => WorkerError::Runtime { traceback },
            mlua::Error::MemoryError(message) => WorkerError::Resource {
                message,
                code: None,
            },
            mlua::Error::CallbackError { traceback, cause } => WorkerError::Runtime {
                traceback: format!("{cause}\n{traceback}"),
            },
            other => WorkerError::Runtime {
                traceback: other.to_string(),
            },
        }
    }
}

/// Failures from the platform wrappers exposed to scripts
#[derive(Debug, Error)]
pub enum PlatformError {
    /// An OS call failed; `code` is the platform error code
    #[error("{op} failed ({code})")]
    Os { op: &'static str, code: i32 },
}

impl PlatformError {
    pub fn from_io(op: &'static str, err: &std::io::Error) -> Self {
        Self::Os {
            op,
            code: err.raw_os_error().unwrap_or(-1),
        }
    }
}

// Scripts see platform failures as ordinary Lua errors carrying the message.
impl From<PlatformError> for mlua::Error {
    fn from(err: PlatformError) -> Self {
        mlua::Error::RuntimeError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_map_to_compile() {
        let err = WorkerError::from(mlua::Error::SyntaxError {
            message: "[string \"x\"]:1: unexpected symbol".to_string(),
            incomplete_input: false,
        });
        assert!(matches!(err, WorkerError::Compile { .. }));
        assert!(err.to_string().contains("unexpected symbol"));
    }

    #[test]
    fn platform_errors_carry_the_os_code() {
        let err = PlatformError::Os {
            op: "SetCurrentDirectory",
            code: 2,
        };
        assert_eq!(err.to_string(), "SetCurrentDirectory failed (2)");

        let lua_err: mlua::Error = err.into();
        assert!(matches!(lua_err, mlua::Error::RuntimeError(ref m) if m == "SetCurrentDirectory failed (2)"));
    }

    #[test]
    fn io_resource_errors_keep_the_code() {
        let io = std::io::Error::from_raw_os_error(2);
        let err = WorkerError::from_io("cannot open service.lua", &io);
        let WorkerError::Resource { code, message } = err else {
            unreachable!("expected a resource error");
        };
        assert_eq!(code, Some(2));
        assert!(message.starts_with("cannot open service.lua"));
    }
}
