//! Work items and the collection that owns them
//!
//! A collection is a fixed, ordered list of uniquely named items. The index
//! of an item in the collection is also its slot in the result store.

use crate::error::ConfigError;
use std::collections::HashSet;
use std::sync::Arc;

/// A single unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<P> {
    /// Position in the collection (and in the result store)
    pub index: usize,

    /// Unique name, used as the backup key
    pub name: String,

    /// Opaque payload handed to the operation unmodified
    pub payload: P,
}

/// Ordered collection of named items
#[derive(Debug, Clone)]
pub struct Collection<P> {
    items: Vec<Arc<Item<P>>>,
}

impl<P> Collection<P> {
    /// Build a collection from `(name, payload)` pairs
    ///
    /// Names must be non-empty and unique; indices are assigned in order.
    pub fn new<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for (index, (name, payload)) in entries.into_iter().enumerate() {
            let name = name.into();
            if name.is_empty() {
                return Err(ConfigError::EmptyItemName(index));
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateItem(name));
            }
            items.push(Arc::new(Item {
                index,
                name,
                payload,
            }));
        }

        Ok(Self { items })
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get an item by index
    pub fn get(&self, index: usize) -> Option<&Arc<Item<P>>> {
        self.items.get(index)
    }

    /// Iterate items in collection order
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Item<P>>> {
        self.items.iter()
    }

    /// Item names in collection order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.name.as_str())
    }
}

impl Collection<()> {
    /// Build a payload-less collection from names alone
    pub fn from_names<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(|name| (name, ())))
    }
}

impl<'a, P> IntoIterator for &'a Collection<P> {
    type Item = &'a Arc<Item<P>>;
    type IntoIter = std::slice::Iter<'a, Arc<Item<P>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_indices() {
        let collection = Collection::new(vec![("m1", 10), ("m2", 20), ("m3", 30)]).unwrap();

        assert_eq!(collection.len(), 3);
        for (i, item) in collection.iter().enumerate() {
            assert_eq!(item.index, i);
        }
        assert_eq!(collection.get(1).unwrap().name, "m2");
        assert_eq!(collection.get(1).unwrap().payload, 20);
        assert!(collection.get(3).is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Collection::from_names(["a", "b", "a"]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateItem("a".into()));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = Collection::from_names(["a", ""]).unwrap_err();
        assert_eq!(err, ConfigError::EmptyItemName(1));
    }

    #[test]
    fn test_names_order() {
        let collection = Collection::from_names(["c", "a", "b"]).unwrap();
        let names: Vec<_> = collection.names().collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
