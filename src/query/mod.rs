pub mod compile;
pub mod context;
pub mod model_visitor;
pub mod projection;

pub use compile::*;
pub use context::*;
pub use model_visitor::*;
