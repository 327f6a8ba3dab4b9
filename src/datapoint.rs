//! Datapoints and the per-endpoint value cache
//!
//! A [`Datapoint`] is a named, typed value exposed at a bus address. The
//! [`DatapointStore`] keeps the endpoint's registered datapoints together
//! with one cached, string-normalized value per datapoint, seeded with the
//! type's default at registration and overwritten unconditionally on every
//! write. The cache lives for the endpoint's process lifetime only.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::addr::BusAddress;
use crate::dpt::DptId;

/// Datapoint registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatapointError {
    /// The bus address is already taken by another datapoint
    #[error("datapoint {0} is already registered")]
    AlreadyRegistered(BusAddress),

    /// No datapoint under the given address
    #[error("no datapoint registered at {0}")]
    NotRegistered(BusAddress),
}

/// A named, typed value slot at a bus address
///
/// Immutable after registration; only the cached value changes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Datapoint {
    /// Bus address the value is published under
    pub address: BusAddress,
    /// Display name, may be empty
    pub name: String,
    /// Declared semantic type and wire encoding
    pub dpt: DptId,
}

impl Datapoint {
    /// New datapoint with an explicit display name
    pub fn new(address: BusAddress, name: impl Into<String>, dpt: DptId) -> Self {
        Self {
            address,
            name: name.into(),
            dpt,
        }
    }

    /// New datapoint named after its type code
    pub fn unnamed(address: BusAddress, dpt: DptId) -> Self {
        Self::new(address, dpt.id(), dpt)
    }

    /// The address a state value is maintained under (same as `address`)
    pub fn main_address(&self) -> BusAddress {
        self.address
    }
}

/// Registered datapoints plus their value cache
///
/// Invariant: every registered datapoint has exactly one cache entry at all
/// times.
#[derive(Debug, Clone, Default)]
pub struct DatapointStore {
    points: BTreeMap<u16, Datapoint>,
    values: HashMap<u16, String>,
}

impl DatapointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a datapoint and seed its cache entry.
    ///
    /// Without an explicit initial value the cache is seeded with the type's
    /// zero/default representation.
    pub fn register(
        &mut self,
        datapoint: Datapoint,
        initial: Option<&str>,
    ) -> Result<(), DatapointError> {
        let key = datapoint.address.raw();
        if self.points.contains_key(&key) {
            return Err(DatapointError::AlreadyRegistered(datapoint.address));
        }
        let value = initial
            .map(str::to_string)
            .unwrap_or_else(|| datapoint.dpt.default_value());
        self.points.insert(key, datapoint);
        self.values.insert(key, value);
        Ok(())
    }

    /// Datapoint under the given address
    pub fn get(&self, address: BusAddress) -> Option<&Datapoint> {
        self.points.get(&address.raw())
    }

    /// Cached value of the datapoint at the given address
    pub fn read(&self, address: BusAddress) -> Result<&str, DatapointError> {
        self.values
            .get(&address.raw())
            .map(String::as_str)
            .ok_or(DatapointError::NotRegistered(address))
    }

    /// Overwrite the cached value unconditionally
    pub fn write(
        &mut self,
        address: BusAddress,
        value: impl Into<String>,
    ) -> Result<(), DatapointError> {
        if !self.points.contains_key(&address.raw()) {
            return Err(DatapointError::NotRegistered(address));
        }
        self.values.insert(address.raw(), value.into());
        Ok(())
    }

    /// All datapoints in address order
    pub fn iter(&self) -> impl Iterator<Item = &Datapoint> {
        self.points.values()
    }

    /// Number of registered datapoints
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the store holds no datapoints
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> BusAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_register_seeds_default_value() {
        let mut store = DatapointStore::new();
        store
            .register(Datapoint::new(addr("1/0/1"), "Bool", DptId::Bool), None)
            .unwrap();
        assert_eq!(store.read(addr("1/0/1")).unwrap(), "false");
    }

    #[test]
    fn test_register_with_initial_value() {
        let mut store = DatapointStore::new();
        store
            .register(
                Datapoint::unnamed(addr("1/0/5"), DptId::Text),
                Some("Hello bus!"),
            )
            .unwrap();
        assert_eq!(store.read(addr("1/0/5")).unwrap(), "Hello bus!");
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut store = DatapointStore::new();
        store
            .register(Datapoint::unnamed(addr("1/0/3"), DptId::Scaling), None)
            .unwrap();
        assert_eq!(
            store.register(Datapoint::unnamed(addr("1/0/3"), DptId::Count16), None),
            Err(DatapointError::AlreadyRegistered(addr("1/0/3")))
        );
        // original registration unchanged
        assert_eq!(store.get(addr("1/0/3")).unwrap().dpt, DptId::Scaling);
    }

    #[test]
    fn test_write_overwrites_cache() {
        let mut store = DatapointStore::new();
        store
            .register(Datapoint::unnamed(addr("1/0/4"), DptId::Count16), None)
            .unwrap();
        store.write(addr("1/0/4"), "42").unwrap();
        assert_eq!(store.read(addr("1/0/4")).unwrap(), "42");
        store.write(addr("1/0/4"), "43").unwrap();
        assert_eq!(store.read(addr("1/0/4")).unwrap(), "43");
    }

    #[test]
    fn test_unregistered_access_fails() {
        let mut store = DatapointStore::new();
        assert_eq!(
            store.read(addr("7/7/7")),
            Err(DatapointError::NotRegistered(addr("7/7/7")))
        );
        assert_eq!(
            store.write(addr("7/7/7"), "1"),
            Err(DatapointError::NotRegistered(addr("7/7/7")))
        );
    }

    #[test]
    fn test_iteration_in_address_order() {
        let mut store = DatapointStore::new();
        for a in ["1/0/4", "0/0/7", "1/0/1"] {
            store
                .register(Datapoint::unnamed(addr(a), DptId::Switch), None)
                .unwrap();
        }
        let order: Vec<String> = store.iter().map(|d| d.address.to_string()).collect();
        assert_eq!(order, ["0/0/7", "1/0/1", "1/0/4"]);
        assert_eq!(store.len(), 3);
    }
}
