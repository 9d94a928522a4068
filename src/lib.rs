//! luar - reflection-driven value bridge between Rust hosts and embedded Lua
//!
//! Host values are described by `Type` descriptors and carried as
//! `HostValue`s. Pushing one into Lua yields a primitive, a function, or a
//! proxy handle over the live host storage; pulling a Lua value back is
//! driven by the requested type.

pub mod anchor;
pub mod config;
pub mod error;
pub mod interop;
pub mod logging;
pub mod types;
pub mod value;

mod library;
mod namespace;
mod state;

// Re-export core types
pub use config::{BridgeConfig, Config, LoggingConfig};
pub use error::{Error, ErrorKind, Result};
pub use interop::{infer, null, pull, push, LuaObject};
pub use library::{map_to_table, slice_to_table};
pub use state::State;
pub use types::{Field, Kind, Method, MethodSig, Signature, Type};
pub use value::{coerce, HostFn, HostValue, Reflect, Variadic};

pub use mlua;

/// Initialize logging from `LUAR_LOG_*` environment variables
pub fn init() {
    logging::init();
}
