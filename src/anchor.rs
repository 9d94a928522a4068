//! Anchor table - keeps host values reachable while Lua holds handles to them
//!
//! Anchored:
//! - every slice, map, pointer or native handle pushed as a proxy
//! - not functions: a pushed host function's Lua closure owns its `HostFn`
//! - keyed by storage address, type and capability set
//!
//! Entries are never removed one at a time; the table is released in bulk
//! when its runtime instance closes.

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::logging;
use crate::types::Type;
use crate::value::HostValue;

/// Identity of a pushed handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    addr: usize,
    ty: String,
    caps: Option<String>,
}

impl Identity {
    pub fn new(addr: usize, ty: &Type, caps: Option<&Type>) -> Self {
        Self {
            addr,
            ty: ty.to_string(),
            caps: caps.map(Type::to_string),
        }
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Registry key of the cached handle
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}|{}", self.addr, self.ty)?;
        if let Some(caps) = &self.caps {
            write!(f, "|{caps}")?;
        }
        Ok(())
    }
}

/// Per-instance set of anchored host values (lock-free concurrent map)
pub struct AnchorTable {
    entries: DashMap<Identity, HostValue>,
}

impl AnchorTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_capacity(128),
        }
    }

    /// Anchor `value`; returns false if the identity was already anchored
    #[inline]
    pub fn anchor(&self, identity: Identity, value: HostValue) -> bool {
        match self.entries.entry(identity) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let ty = value.ty().to_string();
                slot.insert(value);
                logging::log_anchor(&ty, self.entries.len());
                true
            }
        }
    }

    pub fn get(&self, identity: &Identity) -> Option<HostValue> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    #[inline]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every anchor (instance shutdown)
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for AnchorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AnchorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnchorTable")
            .field("anchored", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Reflect;

    #[test]
    fn test_anchor_once_per_identity() {
        let table = AnchorTable::new();
        let items = vec![1i64, 2].into_host();
        let id = Identity::new(items.identity().unwrap(), items.ty(), None);

        assert!(table.anchor(id.clone(), items.clone()));
        assert!(!table.anchor(id.clone(), items.clone()));
        assert_eq!(table.len(), 1);
        assert!(table.contains(&id));
        assert_eq!(table.get(&id).and_then(|v| v.identity()), items.identity());
    }

    #[test]
    fn test_capabilities_distinguish_identity() {
        let any = Type::any();
        let a = Identity::new(0x10, &Type::int(), None);
        let b = Identity::new(0x10, &Type::int(), Some(&any));
        assert_ne!(a, b);
        assert_eq!(a.key(), "0x10|int");
        assert_eq!(b.key(), "0x10|int|interface {}");
    }

    #[test]
    fn test_clear_releases_storage() {
        let table = AnchorTable::default();
        let items = vec![1i64].into_host();
        let id = Identity::new(items.identity().unwrap(), items.ty(), None);
        table.anchor(id, items.clone());
        table.clear();
        assert!(table.is_empty());
    }
}
