use std::fmt;

/// Fatal failures of query compilation.
///
/// "This expression cannot become SQL" is never an error: the translator
/// reports that through `Translation::NotTranslatable` and the query falls
/// back to client evaluation. Everything here stops compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryCompilationError {
    /// The query root names an entity the model does not contain.
    UnknownEntityType(String),
    /// A member access names a property the entity does not map.
    UnknownProperty { entity: String, property: String },
    /// A column was requested for a query source no table was registered
    /// for. Internal invariant violation: the root visitor registers every
    /// source before anything binds against it.
    UnregisteredQuerySource(String),
    /// Eager loading requires composing over the query root, which a
    /// non-SELECT raw SQL fragment cannot support.
    IncludeOnNonComposableSql(String),
    /// Generation-time shape mismatch: a composed raw-SQL root is projected
    /// through a column the entity does not map.
    UnknownColumn { table: String, column: String },
}

impl fmt::Display for QueryCompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryCompilationError::UnknownEntityType(name) => {
                write!(f, "entity type '{}' is not part of the model", name)
            }
            QueryCompilationError::UnknownProperty { entity, property } => {
                write!(f, "entity type '{}' has no mapped property '{}'", entity, property)
            }
            QueryCompilationError::UnregisteredQuerySource(name) => {
                write!(f, "no table registered for query source '{}'", name)
            }
            QueryCompilationError::IncludeOnNonComposableSql(sql) => {
                write!(
                    f,
                    "eager loading requires a composable SELECT query, but the raw SQL root is not composable: {}",
                    sql
                )
            }
            QueryCompilationError::UnknownColumn { table, column } => {
                write!(f, "the result set of '{}' does not contain a column '{}'", table, column)
            }
        }
    }
}

impl std::error::Error for QueryCompilationError {}
