//! Embedded Lua interpreter
//!
//! An [`Interpreter`] follows a two-phase protocol: `load` compiles a script
//! from the install directory into a pending chunk, `execute` runs it and
//! keeps every returned value for the typed `result_*` accessors.

mod results;
mod state;
mod stdlib;
mod trampoline;

pub use state::Interpreter;
pub use trampoline::Entry;

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
