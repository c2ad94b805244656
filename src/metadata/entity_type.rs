use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::metadata::Property;
use crate::sql::ScalarValue;

/// A mapped entity type: table, properties, key and (for shared-table
/// hierarchies) its discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub table_name: String,
    pub schema: Option<String>,
    pub properties: IndexMap<String, Property>,
    pub primary_key: Vec<String>,
    /// Name of the property whose column distinguishes concrete types when
    /// several share a table. None for plain, single-type tables.
    pub discriminator_property: Option<String>,
    /// The value identifying rows of this concrete type.
    pub discriminator_value: Option<ScalarValue>,
    /// Name of the base entity type in a mapped hierarchy.
    pub base_type: Option<String>,
    /// Abstract types participate in a hierarchy but match no rows of
    /// their own.
    pub is_abstract: bool,
}

impl EntityType {
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> EntityType {
        EntityType {
            name: name.into(),
            table_name: table_name.into(),
            schema: None,
            properties: IndexMap::new(),
            primary_key: Vec::new(),
            discriminator_property: None,
            discriminator_value: None,
            base_type: None,
            is_abstract: false,
        }
    }

    pub fn with_property(mut self, property: Property) -> EntityType {
        self.properties.insert(property.name.clone(), property);
        self
    }

    pub fn with_key(mut self, names: &[&str]) -> EntityType {
        self.primary_key = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_discriminator(mut self, property: &str, value: ScalarValue) -> EntityType {
        self.discriminator_property = Some(property.to_string());
        self.discriminator_value = Some(value);
        self
    }

    pub fn with_base(mut self, base: &str) -> EntityType {
        self.base_type = Some(base.to_string());
        self
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn key_properties(&self) -> Vec<&Property> {
        self.primary_key.iter().filter_map(|n| self.properties.get(n.as_str())).collect()
    }

    /// Display name used in diagnostics and shaper identification.
    pub fn display_name(&self) -> &str {
        &self.name
    }
}
