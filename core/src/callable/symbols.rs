use std::sync::Arc;

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;

use super::CallableRef;

static GLOBAL_SYMBOLS: Lazy<SymbolTable> = Lazy::new(SymbolTable::new);

/// Name → callable table used to resolve pending symbolic references.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: DashMap<Arc<str>, CallableRef>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers a native callable under its symbol key (`Owner.name`).
    pub fn register(&self, callable: CallableRef) -> Result<()> {
        let key = callable
            .native_symbol()
            .map(|(symbol, _)| symbol.key())
            .ok_or_else(|| anyhow!("only native callables carry a symbol key: {:?}", callable))?;
        self.register_as(&key, callable)
    }

    /// Registers `callable` under an explicit key. Re-registering the same
    /// callable is a no-op; a different callable under a taken key is an error.
    pub fn register_as(&self, key: &str, callable: CallableRef) -> Result<()> {
        match self.entries.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(callable);
                Ok(())
            }
            Entry::Occupied(existing) if existing.get() == &callable => Ok(()),
            Entry::Occupied(_) => Err(anyhow!("symbol '{}' is already registered", key)),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<CallableRef> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().to_string()).collect();
        keys.sort();
        keys
    }
}

/// The process-wide table consulted by [`CallableRef::resolve`].
pub fn global_symbols() -> &'static SymbolTable {
    &GLOBAL_SYMBOLS
}
