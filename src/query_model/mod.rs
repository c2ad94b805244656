pub mod query_source;
pub use query_source::*;

pub mod expression;
pub use expression::*;

pub mod query_model;
pub use query_model::*;
