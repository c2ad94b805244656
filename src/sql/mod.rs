pub mod scalar;
pub use scalar::*;

pub mod operators;
pub use operators::*;

pub mod expr;
pub use expr::*;

pub mod table;
pub use table::*;
