use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sql::ScalarKind;

static NEXT_SOURCE_ID: AtomicUsize = AtomicUsize::new(0);

/// What a query source ranges over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceItem {
    /// Rows of a mapped entity type, by name.
    Entity(String),
    /// Bare scalar values, e.g. a projected column or an in-memory list.
    Value(ScalarKind),
}

/// A range variable of the query ("p" in `from p in Products`).
///
/// Sources are compared by identity, never structurally: two sources with
/// the same name and item type are still different variables. Share one via
/// `QuerySourceRef` clones; constructing a new `QuerySource` always mints a
/// new identity.
#[derive(Debug)]
pub struct QuerySource {
    id: usize,
    pub name: String,
    pub item: SourceItem,
}

pub type QuerySourceRef = Rc<QuerySource>;

impl QuerySource {
    pub fn new(name: impl Into<String>, item: SourceItem) -> QuerySourceRef {
        Rc::new(QuerySource {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            item,
        })
    }

    pub fn entity(name: impl Into<String>, entity_type: impl Into<String>) -> QuerySourceRef {
        QuerySource::new(name, SourceItem::Entity(entity_type.into()))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn entity_type_name(&self) -> Option<&str> {
        match &self.item {
            SourceItem::Entity(name) => Some(name),
            SourceItem::Value(_) => None,
        }
    }
}

impl PartialEq for QuerySource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QuerySource {}

impl Hash for QuerySource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_structure() {
        let a = QuerySource::entity("p", "Product");
        let b = QuerySource::entity("p", "Product");
        assert_ne!(a, b);
        let shared = a.clone();
        assert_eq!(a, shared);
    }
}
