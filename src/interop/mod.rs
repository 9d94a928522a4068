//! Interoperability - marshal host values into Lua and back
//!
//! Architecture:
//! - `classify.rs` - conversion rule per type descriptor
//! - `push.rs` - host -> Lua, proxy handle cache and anchoring
//! - `pull.rs` - Lua -> host, typed and inferred
//! - `proxy.rs` - userdata views over live host aggregates
//! - `call.rs` - function adapters in both directions
//! - `null.rs` - the null sentinel
//! - `typeinfo.rs` - type handles for scripts

mod call;
mod classify;
mod null;
mod proxy;
mod pull;
mod push;
mod typeinfo;

#[cfg(test)]
mod tests;

pub use call::LuaObject;
pub use classify::{classify, classify_value, ProxyKind, Rule};
pub use null::{is_null, null};
pub use proxy::Proxy;
pub use pull::{infer, pull, pull_element};
pub use push::{push, push_element};
pub use typeinfo::TypeHandle;

pub(crate) use pull::proxy_target;
pub(crate) use push::{push_with, Placement, HANDLE_CACHE};
