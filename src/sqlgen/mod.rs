pub mod dialect;
pub mod generator;

pub use dialect::*;
pub use generator::*;
