pub mod select_expression;
pub use select_expression::*;
