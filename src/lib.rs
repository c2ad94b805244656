pub mod error;
pub mod metadata;
pub mod query_model;
pub mod select;
pub mod shaper;
pub mod sql;
pub mod sqlgen;
pub mod translate;

pub mod query;
pub use error::QueryCompilationError;
pub use query::{compile_query, CompiledQuery, QueryCompilationOptions};
