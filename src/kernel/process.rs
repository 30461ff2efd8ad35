//! Labeled process-name allocation.
//!
//! A component that must run at several labels is started as distinct
//! processes. Each one gets `<name>_wproc_<n>`, where `n` counts the names
//! already issued for the `uid:processName` index. Names are never released.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::info;

/// Infix between the base process name and its ordinal.
pub const PROCESS_SUFFIX: &str = "_wproc_";

/// Registry of issued labeled process names.
#[derive(Debug, Default)]
pub struct ProcessNameRegistry {
    issued: Mutex<HashMap<String, Vec<String>>>,
}

impl ProcessNameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next name for `index` (conventionally `uid:processName`).
    pub fn allocate(&self, index: &str, process_name: &str) -> String {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let names = issued.entry(index.to_owned()).or_default();
        let name = format!("{process_name}{PROCESS_SUFFIX}{}", names.len());
        names.push(name.clone());
        info!(%index, %name, "labeled process name allocated");
        name
    }

    /// Names issued so far for `index`, if any.
    pub fn existing(&self, index: &str) -> Option<Vec<String>> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }
}
