//! Runtime instance - one Lua state plus its bridge bookkeeping
//!
//! Per-instance state lives in the Lua app-data slot (`Bridge`): the anchor
//! table and the bridge settings. The handle cache lives in the Lua
//! registry. Closing the instance releases both in bulk.

use mlua::{Lua, Value as LuaValue};

use crate::anchor::AnchorTable;
use crate::config::{BridgeConfig, Config};
use crate::error::{Error, Result};
use crate::interop::{pull, push, LuaObject, HANDLE_CACHE};
use crate::logging::{self, perf};
use crate::types::Type;
use crate::value::HostValue;
use crate::{library, namespace};

/// Bookkeeping attached to each Lua instance
#[derive(Debug)]
pub(crate) struct Bridge {
    pub(crate) anchors: AnchorTable,
    pub(crate) config: BridgeConfig,
}

/// A Lua instance with the bridge installed
pub struct State {
    lua: Lua,
    config: Config,
}

impl State {
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let lua = Lua::new();
        lua.set_app_data(Bridge {
            anchors: AnchorTable::new(),
            config: config.bridge.clone(),
        });
        lua.set_named_registry_value(HANDLE_CACHE, lua.create_table()?)?;
        if config.bridge.install_library {
            library::install(&lua, &config.bridge.library)?;
        }
        logging::log_instance_init(&config.bridge.library);
        Ok(Self { lua, config })
    }

    /// The underlying Lua state
    #[inline]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Publish host values under `namespace` (empty for globals)
    pub fn register<I, K>(&self, namespace: &str, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, HostValue)>,
        K: Into<String>,
    {
        let entries: Vec<(String, HostValue)> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        namespace::register(&self.lua, namespace, &entries)
    }

    /// Run a chunk of Lua source
    pub fn do_string(&self, code: &str) -> Result<()> {
        let _perf = perf::track("do_string");
        self.lua
            .load(code)
            .set_name(self.config.bridge.chunk_name.clone())
            .exec()
            .map_err(|err| {
                let err = Error::from(err);
                logging::log_script_error(&err.to_string());
                err
            })
    }

    pub fn set_global(&self, name: &str, value: &HostValue) -> Result<()> {
        let pushed = push(&self.lua, value)?;
        self.lua.globals().set(name, pushed)?;
        Ok(())
    }

    /// Read a global (dotted paths allowed) as a value of `ty`
    pub fn get_global(&self, name: &str, ty: &Type) -> Result<HostValue> {
        pull(&namespace::lookup(&self.lua, name)?, ty)
    }

    /// Host handle on the Lua function at a dotted path
    pub fn callable(&self, name: &str) -> Result<LuaObject> {
        match namespace::lookup(&self.lua, name)? {
            LuaValue::Function(func) => Ok(LuaObject::new(func, name)),
            other => Err(Error::Binding(format!(
                "{name} is a {}, not a function",
                other.type_name()
            ))),
        }
    }

    /// Number of host values currently anchored
    pub fn anchored(&self) -> usize {
        self.lua
            .app_data_ref::<Bridge>()
            .map(|bridge| bridge.anchors.len())
            .unwrap_or(0)
    }

    /// Release every anchored value and shut the instance down
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(bridge) = self.lua.remove_app_data::<Bridge>() {
            logging::log_instance_close(bridge.anchors.len());
            bridge.anchors.clear();
            if let Err(err) = self.lua.unset_named_registry_value(HANDLE_CACHE) {
                logging::log_teardown_error(HANDLE_CACHE, &err.to_string());
            }
        }
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("library", &self.config.bridge.library)
            .field("anchored", &self.anchored())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Reflect;

    #[test]
    fn test_teardown_releases_handles() {
        let mut state = State::new().unwrap();
        state.set_global("s", &vec![1i64, 2].into_host()).unwrap();
        assert_eq!(state.anchored(), 1);

        state.teardown();
        assert_eq!(state.anchored(), 0);
        let cache: Option<mlua::Table> = state.lua().named_registry_value(HANDLE_CACHE).unwrap();
        assert!(cache.is_none());

        // a second teardown (from drop) finds nothing to release
        state.teardown();
    }

    #[test]
    fn test_functions_are_not_anchored() {
        let state = State::new().unwrap();
        state.set_global("f", &HostValue::func(|x: i64| x + 1)).unwrap();
        state.do_string("assert(f(1) == 2)").unwrap();
        assert_eq!(state.anchored(), 0);
    }
}
