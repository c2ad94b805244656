use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::metadata::EntityType;

/// The read-only metadata boundary: entity types keyed by name, in
/// registration order. Compilation only ever reads from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub entities: IndexMap<String, EntityType>,
}

impl Model {
    pub fn new() -> Model {
        Model { entities: IndexMap::new() }
    }

    pub fn with_entity(mut self, entity: EntityType) -> Model {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn find_entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    /// The concrete (non-abstract) types of `entity`'s hierarchy that carry
    /// a discriminator value: the type itself plus every transitively
    /// derived type, in registration order.
    pub fn concrete_types_in_hierarchy<'a>(&'a self, entity: &'a EntityType) -> Vec<&'a EntityType> {
        let mut result = Vec::new();
        if !entity.is_abstract && entity.discriminator_value.is_some() {
            result.push(entity);
        }
        for candidate in self.entities.values() {
            if candidate.name != entity.name
                && self.derives_from(candidate, &entity.name)
                && !candidate.is_abstract
                && candidate.discriminator_value.is_some()
            {
                result.push(candidate);
            }
        }
        result
    }

    /// Property lookup across the inheritance chain: the entity's own
    /// properties first, then each base type's.
    pub fn find_property<'a>(&'a self, entity: &'a EntityType, name: &str) -> Option<&'a crate::metadata::Property> {
        if let Some(property) = entity.find_property(name) {
            return Some(property);
        }
        let mut current = entity.base_type.as_deref();
        while let Some(base_name) = current {
            let base = self.find_entity_type(base_name)?;
            if let Some(property) = base.find_property(name) {
                return Some(property);
            }
            current = base.base_type.as_deref();
        }
        None
    }

    /// All mapped properties of an entity, base types first, in declared
    /// order. This is the materialization layout.
    pub fn all_properties<'a>(&'a self, entity: &'a EntityType) -> Vec<&'a crate::metadata::Property> {
        let mut chain = vec![entity];
        let mut current = entity.base_type.as_deref();
        while let Some(base_name) = current {
            match self.find_entity_type(base_name) {
                Some(base) => {
                    chain.push(base);
                    current = base.base_type.as_deref();
                }
                None => break,
            }
        }
        chain
            .iter()
            .rev()
            .flat_map(|e| e.properties.values())
            .collect()
    }

    /// Primary key of an entity, declared on it or inherited.
    pub fn find_primary_key<'a>(&'a self, entity: &'a EntityType) -> Vec<&'a crate::metadata::Property> {
        let mut current = Some(entity);
        while let Some(e) = current {
            if !e.primary_key.is_empty() {
                let e_key = e.primary_key.clone();
                return e_key
                    .iter()
                    .filter_map(|name| self.find_property(entity, name))
                    .collect();
            }
            current = e.base_type.as_deref().and_then(|b| self.find_entity_type(b));
        }
        Vec::new()
    }

    fn derives_from(&self, entity: &EntityType, base_name: &str) -> bool {
        let mut current = entity.base_type.as_deref();
        while let Some(name) = current {
            if name == base_name {
                return true;
            }
            current = self.find_entity_type(name).and_then(|e| e.base_type.as_deref());
        }
        false
    }
}
