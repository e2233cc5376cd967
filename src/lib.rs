//! An embeddable register-based bytecode VM: a tracing mark-sweep heap,
//! closures with upvalues, cooperative fibers, a hot-reloadable module
//! loader, and a C-style embedding stack API for hosts that can't link
//! against `Value` directly.

pub mod builder;
pub mod builtins;
pub mod config;
pub mod embed;
pub mod error;
pub mod gc;
pub mod instruction;
pub mod magic;
pub mod module;
pub mod native;
pub mod object;
pub mod pcall;
pub mod prototype;
pub mod value;
pub mod vm;

pub use config::Config;
pub use error::{Error, Result};
pub use gc::Gc;
pub use value::Value;
pub use vm::Vm;
