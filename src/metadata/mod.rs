pub mod property;
pub use property::*;

pub mod entity_type;
pub use entity_type::*;

pub mod model;
pub use model::*;
