pub mod value_buffer;
pub use value_buffer::*;

pub mod shaper;
pub use shaper::*;
