use serde::{Deserialize, Serialize};

use crate::sql::ScalarKind;

/// A scalar property of an entity type and its column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub column_name: String,
    pub kind: ScalarKind,
    pub nullable: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Property {
        let name = name.into();
        Property { column_name: name.clone(), name, kind, nullable: false }
    }

    pub fn nullable(mut self) -> Property {
        self.nullable = true;
        self
    }

    pub fn column(mut self, column_name: impl Into<String>) -> Property {
        self.column_name = column_name.into();
        self
    }
}
