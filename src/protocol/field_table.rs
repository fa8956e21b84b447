//! Field definition providers.
//!
//! A provider is a named, process-wide, lazily loaded field table
//! ("FISC", "ATM", "BankCore", ...). Tables are immutable once loaded;
//! [`reload_provider`] swaps the cached `Arc` atomically so decoders that
//! hold the previous table keep a consistent view.

use crate::{
    protocol::field_definition::{self, FieldDefinition},
    FepError, FepResult,
};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use vec_map::VecMap;

const DEFAULT_FISC_CSV: &str = include_str!("default_fisc.csv");

/// An immutable lookup table from field number to [`FieldDefinition`].
#[derive(Debug)]
pub struct FieldTable {
    name: String,
    definitions: VecMap<FieldDefinition>,
}

impl FieldTable {
    /// Builds a table from CSV text (header row; `#` comments and blank
    /// lines ignored; quoted fields honored).
    pub fn from_csv(name: impl Into<String>, source: &str) -> FepResult<Self> {
        Self::from_definitions(name, field_definition::parse_csv(source)?)
    }

    /// Builds a table from a JSON array of definition records.
    pub fn from_json(name: impl Into<String>, source: &str) -> FepResult<Self> {
        Self::from_definitions(name, field_definition::parse_json(source)?)
    }

    fn from_definitions(
        name: impl Into<String>,
        definitions: Vec<FieldDefinition>,
    ) -> FepResult<Self> {
        let name = name.into();
        let mut map = VecMap::with_capacity(129);
        for definition in definitions {
            let number = definition.number();
            if let Some(previous) = map.insert(number as usize, definition) {
                warn!(
                    "field table {name:?}: duplicate definition for field {number} \
                     ({}), keeping the later one",
                    previous.name()
                );
            }
        }
        if map.is_empty() {
            return Err(FepError::Definition {
                line: 0,
                reason: format!("field table {name:?} has no definitions"),
            });
        }
        Ok(Self {
            name,
            definitions: map,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Definition of field `n`, if the table declares one.
    pub fn get(&self, n: u8) -> Option<&FieldDefinition> {
        self.definitions.get(n as usize)
    }

    /// All definitions in ascending field order.
    pub fn all(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

lazy_static! {
    static ref PROVIDERS: RwLock<HashMap<String, Arc<FieldTable>>> = RwLock::new(HashMap::new());
}

/// Returns the cached table of the named provider, loading it on first
/// access.
///
/// The source is resolved per provider: the environment key
/// `FISCLINK_FIELD_TABLE_<NAME>` may point at a `.csv` or `.json` file;
/// without it, the provider "FISC" falls back to the embedded default
/// table and any other name fails with a usage error.
pub fn provider(name: &str) -> FepResult<Arc<FieldTable>> {
    if let Some(table) = PROVIDERS.read()?.get(name) {
        return Ok(Arc::clone(table));
    }
    let table = Arc::new(load_table(name)?);
    let mut providers = PROVIDERS.write()?;
    // a racing loader may have beaten us; keep the first one
    Ok(Arc::clone(
        providers
            .entry(name.to_string())
            .or_insert_with(|| table.clone()),
    ))
}

/// Reloads the named provider from its source and swaps the cached table.
pub fn reload_provider(name: &str) -> FepResult<Arc<FieldTable>> {
    let table = Arc::new(load_table(name)?);
    PROVIDERS
        .write()?
        .insert(name.to_string(), Arc::clone(&table));
    debug!(
        "field table provider {name:?} reloaded with {} definitions",
        table.len()
    );
    Ok(table)
}

/// Registers (or replaces) a provider with an explicitly built table.
pub fn register_provider(table: FieldTable) -> FepResult<Arc<FieldTable>> {
    let table = Arc::new(table);
    PROVIDERS
        .write()?
        .insert(table.name().to_string(), Arc::clone(&table));
    Ok(table)
}

/// Drops the named provider from the cache; the next access reloads it.
pub fn clear_provider(name: &str) -> FepResult<()> {
    PROVIDERS.write()?.remove(name);
    Ok(())
}

/// Drops every cached provider.
pub fn clear_providers() -> FepResult<()> {
    PROVIDERS.write()?.clear();
    Ok(())
}

fn load_table(name: &str) -> FepResult<FieldTable> {
    let env_key = format!(
        "FISCLINK_FIELD_TABLE_{}",
        name.to_ascii_uppercase().replace(['-', ' '], "_")
    );
    if let Ok(path) = std::env::var(&env_key) {
        debug!("loading field table {name:?} from {path} ({env_key})");
        let source = std::fs::read_to_string(&path)?;
        return if path.ends_with(".json") {
            FieldTable::from_json(name, &source)
        } else {
            FieldTable::from_csv(name, &source)
        };
    }
    if name == crate::DEFAULT_PROVIDER {
        trace!("loading embedded default field table");
        return FieldTable::from_csv(name, DEFAULT_FISC_CSV);
    }
    Err(FepError::UsageDetailed(format!(
        "no source for field table provider {name:?}; set {env_key} or register it explicitly"
    )))
}

#[cfg(test)]
mod test {
    use super::{provider, FieldTable, DEFAULT_FISC_CSV};

    #[test]
    fn test_embedded_default_loads() {
        let table = FieldTable::from_csv("FISC", DEFAULT_FISC_CSV).unwrap();
        assert!(table.len() > 30);
        let pan = table.get(2).unwrap();
        assert!(pan.sensitive());
        let stan = table.get(11).unwrap();
        assert_eq!(stan.length(), 6);
        assert!(table.get(5).is_none());
    }

    #[test]
    fn test_default_provider_is_cached() {
        let a = provider(crate::DEFAULT_PROVIDER).unwrap();
        let b = provider(crate::DEFAULT_PROVIDER).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_provider_fails() {
        assert!(provider("NOBODY").is_err());
    }
}
