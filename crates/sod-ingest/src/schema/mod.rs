//! Field registry
//!
//! Maps canonical column names to a human-readable description and an
//! optional declared type. The normalizer reads it to embed column
//! metadata and the downloader reads it to enumerate API fields. Both only
//! see the [`SchemaRegistry`] trait, so tests substitute a
//! [`StaticRegistry`].

pub mod dictionary;
pub mod fdic;

pub use dictionary::export_dictionary;
pub use fdic::{FdicSchemaRegistry, RegistrySource};

use sod_common::types::{FieldDescriptor, FieldType};
use std::collections::BTreeMap;

/// Read-only lookup of field descriptions and type hints
pub trait SchemaRegistry: Send + Sync {
    /// Description for `name`, matched case-insensitively
    fn describe(&self, name: &str) -> Option<String>;

    /// Declared type for `name`, if the registry knows one
    fn field_type(&self, _name: &str) -> Option<FieldType> {
        None
    }

    /// Every known field, upper-cased and sorted
    fn field_names(&self) -> Vec<String>;

    /// Full descriptor; unknown fields get an empty description
    fn descriptor(&self, name: &str) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            description: self.describe(name).unwrap_or_default(),
            field_type: self.field_type(name),
        }
    }

    fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }
}

/// In-memory registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticRegistry {
    fields: BTreeMap<String, FieldDescriptor>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.insert(descriptor);
        }
        registry
    }

    /// Insert or replace a descriptor; the key is upper-cased
    pub fn insert(&mut self, mut descriptor: FieldDescriptor) {
        descriptor.name = descriptor.name.trim().to_uppercase();
        self.fields.insert(descriptor.name.clone(), descriptor);
    }

    /// Shorthand for a description without a type
    pub fn with(mut self, name: &str, description: &str) -> Self {
        self.insert(FieldDescriptor::new(name, description));
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    pub(crate) fn into_map(self) -> BTreeMap<String, FieldDescriptor> {
        self.fields
    }

    fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(&name.trim().to_uppercase())
    }
}

impl SchemaRegistry for StaticRegistry {
    fn describe(&self, name: &str) -> Option<String> {
        self.get(name).map(|d| d.description.clone())
    }

    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.get(name).and_then(|d| d.field_type)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = StaticRegistry::new().with("depsumbr", "Branch deposits");
        assert_eq!(registry.describe("DEPSUMBR").as_deref(), Some("Branch deposits"));
        assert_eq!(registry.describe(" DepSumBr ").as_deref(), Some("Branch deposits"));
        assert_eq!(registry.field_names(), vec!["DEPSUMBR".to_string()]);
    }

    #[test]
    fn test_unknown_field_gets_empty_description() {
        let registry = StaticRegistry::new();
        let descriptor = registry.descriptor("BRNUM");
        assert_eq!(descriptor.name, "BRNUM");
        assert_eq!(descriptor.description, "");
        assert_eq!(descriptor.field_type, None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_declared_type() {
        let registry = StaticRegistry::from_descriptors([
            FieldDescriptor::new("ZIPBR", "Branch zip code").with_type(FieldType::String)
        ]);
        assert_eq!(registry.field_type("zipbr"), Some(FieldType::String));
        assert_eq!(registry.len(), 1);
    }
}
